use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Free-form structured payload attached to activity and security records.
pub type Details = Map<String, Value>;

/// Sentinel user id for events raised before anyone is authenticated.
pub const UNKNOWN_USER: &str = "unknown";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LogLevel {
    Debug = 0,
    #[default]
    Info = 1,
    Warn = 2,
    Error = 3,
    Off = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Off => "OFF",
        }
    }

    pub fn from_ordinal(v: u8) -> Option<LogLevel> {
        match v {
            0 => Some(LogLevel::Debug),
            1 => Some(LogLevel::Info),
            2 => Some(LogLevel::Warn),
            3 => Some(LogLevel::Error),
            4 => Some(LogLevel::Off),
            _ => None,
        }
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, String> {
        LogLevel::from_ordinal(v).ok_or_else(|| format!("invalid log level ordinal: {}", v))
    }
}

impl From<LogLevel> for u8 {
    fn from(l: LogLevel) -> u8 {
        l as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    LoginSuccess,
    LoginFailure,
    MultipleFailedAttempts,
    BulkDataAccess,
    MaliciousRequest,
    AdminAccess,
    UnauthorizedAccess,
    PermissionDenied,
    SessionExpired,
}

impl SecurityEventType {
    pub const ALL: [SecurityEventType; 9] = [
        SecurityEventType::LoginSuccess,
        SecurityEventType::LoginFailure,
        SecurityEventType::MultipleFailedAttempts,
        SecurityEventType::BulkDataAccess,
        SecurityEventType::MaliciousRequest,
        SecurityEventType::AdminAccess,
        SecurityEventType::UnauthorizedAccess,
        SecurityEventType::PermissionDenied,
        SecurityEventType::SessionExpired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::LoginSuccess => "LOGIN_SUCCESS",
            SecurityEventType::LoginFailure => "LOGIN_FAILURE",
            SecurityEventType::MultipleFailedAttempts => "MULTIPLE_FAILED_ATTEMPTS",
            SecurityEventType::BulkDataAccess => "BULK_DATA_ACCESS",
            SecurityEventType::MaliciousRequest => "MALICIOUS_REQUEST",
            SecurityEventType::AdminAccess => "ADMIN_ACCESS",
            SecurityEventType::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
            SecurityEventType::PermissionDenied => "PERMISSION_DENIED",
            SecurityEventType::SessionExpired => "SESSION_EXPIRED",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was done to a resource. Security events reuse the activity stream
/// under `security_<event type>` action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActivityAction {
    Create,
    Update,
    Delete,
    View,
    Publish,
    Unpublish,
    Error,
    Security(SecurityEventType),
}

const SECURITY_ACTION_PREFIX: &str = "security_";

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityAction::Create => f.write_str("create"),
            ActivityAction::Update => f.write_str("update"),
            ActivityAction::Delete => f.write_str("delete"),
            ActivityAction::View => f.write_str("view"),
            ActivityAction::Publish => f.write_str("publish"),
            ActivityAction::Unpublish => f.write_str("unpublish"),
            ActivityAction::Error => f.write_str("error"),
            ActivityAction::Security(t) => {
                write!(f, "{}{}", SECURITY_ACTION_PREFIX, t.as_str().to_ascii_lowercase())
            }
        }
    }
}

impl FromStr for ActivityAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "create" => Ok(ActivityAction::Create),
            "update" => Ok(ActivityAction::Update),
            "delete" => Ok(ActivityAction::Delete),
            "view" => Ok(ActivityAction::View),
            "publish" => Ok(ActivityAction::Publish),
            "unpublish" => Ok(ActivityAction::Unpublish),
            "error" => Ok(ActivityAction::Error),
            other => other
                .strip_prefix(SECURITY_ACTION_PREFIX)
                .and_then(|rest| {
                    SecurityEventType::ALL
                        .iter()
                        .find(|t| t.as_str().eq_ignore_ascii_case(rest))
                        .copied()
                })
                .map(ActivityAction::Security)
                .ok_or_else(|| format!("unknown activity action: {}", other)),
        }
    }
}

impl TryFrom<String> for ActivityAction {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        s.parse()
    }
}

impl From<ActivityAction> for String {
    fn from(a: ActivityAction) -> String {
        a.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    BoardPost,
    CalendarEvent,
    Comment,
    Draft,
    File,
    System,
    Permission,
    Role,
    UserRole,
    Security,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::BoardPost => "board_post",
            ResourceType::CalendarEvent => "calendar_event",
            ResourceType::Comment => "comment",
            ResourceType::Draft => "draft",
            ResourceType::File => "file",
            ResourceType::System => "system",
            ResourceType::Permission => "permission",
            ResourceType::Role => "role",
            ResourceType::UserRole => "user_role",
            ResourceType::Security => "security",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An activity record as submitted by application code, before it is
/// stamped into a [`LogEntry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewActivityLog {
    pub user_id: String,
    pub action: ActivityAction,
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing)]
    pub actor_is_admin: bool,
}

impl NewActivityLog {
    pub fn new(user_id: impl Into<String>, action: ActivityAction, resource_type: ResourceType) -> Self {
        Self {
            user_id: user_id.into(),
            action,
            resource_type,
            resource_id: None,
            resource_title: None,
            details: None,
            level: LogLevel::Info,
            ip_address: None,
            user_agent: None,
            actor_is_admin: false,
        }
    }

    pub fn with_resource(mut self, id: impl Into<String>, title: Option<String>) -> Self {
        self.resource_id = Some(id.into());
        self.resource_title = title;
        self
    }

    pub fn with_details(mut self, details: Details) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_request_meta(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn as_admin(mut self) -> Self {
        self.actor_is_admin = true;
        self
    }
}

/// A stamped activity record. Identity fields and `created_at` are fixed at
/// construction; only the queue holding the entry changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    id: Uuid,
    user_id: String,
    action: ActivityAction,
    resource_type: ResourceType,
    #[serde(default)]
    resource_id: Option<String>,
    #[serde(default)]
    resource_title: Option<String>,
    #[serde(default)]
    details: Details,
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    user_agent: Option<String>,
    level: LogLevel,
    created_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(req: NewActivityLog) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: req.user_id,
            action: req.action,
            resource_type: req.resource_type,
            resource_id: req.resource_id,
            resource_title: req.resource_title,
            details: req.details.unwrap_or_default(),
            ip_address: req.ip_address,
            user_agent: req.user_agent,
            level: req.level,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
    pub fn action(&self) -> ActivityAction {
        self.action
    }
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }
    pub fn resource_title(&self) -> Option<&str> {
        self.resource_title.as_deref()
    }
    pub fn details(&self) -> &Details {
        &self.details
    }
    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
    pub fn level(&self) -> LogLevel {
        self.level
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub details: Details,
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, severity: Severity, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            severity,
            user_id: user_id.into(),
            session_id: None,
            ip_address: None,
            user_agent: None,
            details: Details::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: Details) -> Self {
        self.details = details;
        self
    }

    pub fn with_request_meta(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub user_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
