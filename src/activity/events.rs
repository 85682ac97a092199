//! Named shorthands over [`ActivityLogService::create_activity_log`]. Each one
//! only fixes action, resource type and level for a kind of event.

use serde_json::{json, Value};

use super::{ActivityLogService, LogOutcome};
use crate::error::LogError;
use crate::model::{ActivityAction, Details, LogLevel, NewActivityLog, ResourceType};

fn object(v: Value) -> Details {
    match v {
        Value::Object(map) => map,
        _ => Details::new(),
    }
}

fn with_changes(mut req: NewActivityLog, changes: Option<Details>) -> NewActivityLog {
    req.details = changes.map(|c| object(json!({ "changes": c })));
    req
}

fn titled(title: &str) -> Option<String> {
    Some(title.to_string())
}

impl ActivityLogService {
    pub async fn log_post_created(&self, user_id: &str, post_id: &str, title: &str) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Create, ResourceType::BoardPost)
            .with_resource(post_id, titled(title));
        self.create_activity_log(req).await
    }

    pub async fn log_post_updated(
        &self,
        user_id: &str,
        post_id: &str,
        title: &str,
        changes: Option<Details>,
    ) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Update, ResourceType::BoardPost)
            .with_resource(post_id, titled(title));
        self.create_activity_log(with_changes(req, changes)).await
    }

    pub async fn log_post_deleted(&self, user_id: &str, post_id: &str, title: &str) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Delete, ResourceType::BoardPost)
            .with_resource(post_id, titled(title))
            .with_level(LogLevel::Warn);
        self.create_activity_log(req).await
    }

    pub async fn log_post_published(&self, user_id: &str, post_id: &str, title: &str) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Publish, ResourceType::BoardPost)
            .with_resource(post_id, titled(title));
        self.create_activity_log(req).await
    }

    pub async fn log_post_unpublished(&self, user_id: &str, post_id: &str, title: &str) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Unpublish, ResourceType::BoardPost)
            .with_resource(post_id, titled(title));
        self.create_activity_log(req).await
    }

    pub async fn log_comment_created(&self, user_id: &str, comment_id: &str, post_id: &str) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Create, ResourceType::Comment)
            .with_resource(comment_id, None)
            .with_details(object(json!({ "post_id": post_id })));
        self.create_activity_log(req).await
    }

    pub async fn log_comment_deleted(&self, user_id: &str, comment_id: &str, post_id: &str) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Delete, ResourceType::Comment)
            .with_resource(comment_id, None)
            .with_details(object(json!({ "post_id": post_id })))
            .with_level(LogLevel::Warn);
        self.create_activity_log(req).await
    }

    pub async fn log_calendar_event_created(&self, user_id: &str, event_id: &str, title: &str) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Create, ResourceType::CalendarEvent)
            .with_resource(event_id, titled(title));
        self.create_activity_log(req).await
    }

    pub async fn log_calendar_event_updated(
        &self,
        user_id: &str,
        event_id: &str,
        title: &str,
        changes: Option<Details>,
    ) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Update, ResourceType::CalendarEvent)
            .with_resource(event_id, titled(title));
        self.create_activity_log(with_changes(req, changes)).await
    }

    pub async fn log_calendar_event_deleted(&self, user_id: &str, event_id: &str, title: &str) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Delete, ResourceType::CalendarEvent)
            .with_resource(event_id, titled(title))
            .with_level(LogLevel::Warn);
        self.create_activity_log(req).await
    }

    pub async fn log_file_uploaded(
        &self,
        user_id: &str,
        file_id: &str,
        file_name: &str,
        size_bytes: u64,
        mime_type: &str,
    ) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Create, ResourceType::File)
            .with_resource(file_id, titled(file_name))
            .with_details(object(json!({ "size_bytes": size_bytes, "mime_type": mime_type })));
        self.create_activity_log(req).await
    }

    pub async fn log_file_deleted(&self, user_id: &str, file_id: &str, file_name: &str) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Delete, ResourceType::File)
            .with_resource(file_id, titled(file_name))
            .with_level(LogLevel::Warn);
        self.create_activity_log(req).await
    }

    pub async fn log_draft_saved(&self, user_id: &str, draft_id: &str, title: Option<&str>) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::Update, ResourceType::Draft)
            .with_resource(draft_id, title.map(str::to_string))
            .with_level(LogLevel::Debug);
        self.create_activity_log(req).await
    }

    /// Role edits are administrative and always carry the admin flag.
    pub async fn log_role_changed(
        &self,
        admin_id: &str,
        role_id: &str,
        role_name: &str,
        changes: Details,
    ) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(admin_id, ActivityAction::Update, ResourceType::Role)
            .with_resource(role_id, Some(role_name.to_string()))
            .with_details(object(json!({ "changes": changes })))
            .with_level(LogLevel::Warn)
            .as_admin();
        self.create_activity_log(req).await
    }

    pub async fn log_permission_granted(
        &self,
        admin_id: &str,
        role_id: &str,
        permission: &str,
    ) -> Result<LogOutcome, LogError> {
        self.permission_change(admin_id, ActivityAction::Create, role_id, permission).await
    }

    pub async fn log_permission_revoked(
        &self,
        admin_id: &str,
        role_id: &str,
        permission: &str,
    ) -> Result<LogOutcome, LogError> {
        self.permission_change(admin_id, ActivityAction::Delete, role_id, permission).await
    }

    async fn permission_change(
        &self,
        admin_id: &str,
        action: ActivityAction,
        role_id: &str,
        permission: &str,
    ) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(admin_id, action, ResourceType::Permission)
            .with_resource(permission, None)
            .with_details(object(json!({ "role_id": role_id, "permission": permission })))
            .with_level(LogLevel::Warn)
            .as_admin();
        self.create_activity_log(req).await
    }

    pub async fn log_user_role_assigned(
        &self,
        admin_id: &str,
        target_user_id: &str,
        role_name: &str,
    ) -> Result<LogOutcome, LogError> {
        self.user_role_change(admin_id, ActivityAction::Create, target_user_id, role_name).await
    }

    pub async fn log_user_role_removed(
        &self,
        admin_id: &str,
        target_user_id: &str,
        role_name: &str,
    ) -> Result<LogOutcome, LogError> {
        self.user_role_change(admin_id, ActivityAction::Delete, target_user_id, role_name).await
    }

    async fn user_role_change(
        &self,
        admin_id: &str,
        action: ActivityAction,
        target_user_id: &str,
        role_name: &str,
    ) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(admin_id, action, ResourceType::UserRole)
            .with_resource(target_user_id, Some(role_name.to_string()))
            .with_details(object(json!({ "target_user_id": target_user_id, "role": role_name })))
            .with_level(LogLevel::Warn)
            .as_admin();
        self.create_activity_log(req).await
    }

    pub async fn log_resource_viewed(
        &self,
        user_id: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<LogOutcome, LogError> {
        let req = NewActivityLog::new(user_id, ActivityAction::View, resource_type)
            .with_resource(resource_id, None)
            .with_level(LogLevel::Debug);
        self.create_activity_log(req).await
    }

    /// Application error surfaced into the activity stream.
    pub async fn log_error(
        &self,
        user_id: &str,
        message: &str,
        context: Option<Details>,
    ) -> Result<LogOutcome, LogError> {
        let mut details = context.unwrap_or_default();
        details.insert("message".into(), json!(message));
        let req = NewActivityLog::new(user_id, ActivityAction::Error, ResourceType::System)
            .with_details(details)
            .with_level(LogLevel::Error);
        self.create_activity_log(req).await
    }
}
