//! Entry point for application code that wants something recorded in the
//! activity log.

mod events;

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::batch::{BatchStatus, LogBatchProcessor};
use crate::config::LogPolicy;
use crate::error::LogError;
use crate::masking::mask_sensitive_data;
use crate::model::{ActivityAction, LogEntry, LogLevel, NewActivityLog, ResourceType};
use crate::observability::metrics::Metrics;
use crate::observability::Logger;
use crate::security::SecurityLogger;
use crate::sink::{ActivityWriter, WriteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    BelowMinLevel,
    ExcludedByPolicy,
    /// The immediate writer's receiving side applied its own policy.
    RemotePolicy,
}

#[derive(Debug, Clone)]
pub enum LogOutcome {
    /// Dropped by level or action/resource filtering. Not an error.
    Filtered(FilterReason),
    /// Sitting in the batch queue; not durable yet.
    Queued(LogEntry),
    Persisted(LogEntry),
}

impl LogOutcome {
    pub fn entry(&self) -> Option<&LogEntry> {
        match self {
            LogOutcome::Filtered(_) => None,
            LogOutcome::Queued(e) | LogOutcome::Persisted(e) => Some(e),
        }
    }
}

#[derive(Clone)]
pub struct ActivityLogService {
    policy: Arc<LogPolicy>,
    batch: LogBatchProcessor,
    writer: Arc<dyn ActivityWriter>,
    security: Option<SecurityLogger>,
    metrics: Arc<Metrics>,
    logger: Logger,
}

impl ActivityLogService {
    pub fn new(
        policy: Arc<LogPolicy>,
        batch: LogBatchProcessor,
        writer: Arc<dyn ActivityWriter>,
        security: Option<SecurityLogger>,
        metrics: Arc<Metrics>,
        logger: Logger,
    ) -> Self {
        Self { policy, batch, writer, security, metrics, logger }
    }

    pub fn policy(&self) -> &LogPolicy {
        &self.policy
    }

    pub fn batch(&self) -> &LogBatchProcessor {
        &self.batch
    }

    pub fn security(&self) -> Option<&SecurityLogger> {
        self.security.as_ref()
    }

    /// Filters, masks and then queues or writes one activity record.
    ///
    /// A failed immediate write is returned as `Err`. Unless the failed record
    /// was itself `Error` level, one `Error` level "log creation failed"
    /// record is attempted on its behalf first.
    pub async fn create_activity_log(&self, req: NewActivityLog) -> Result<LogOutcome, LogError> {
        if !self.policy.should_log(req.level) {
            self.metrics.activity_logs_filtered.inc();
            return Ok(LogOutcome::Filtered(FilterReason::BelowMinLevel));
        }
        if !self.policy.should_log_action(req.action, req.resource_type) {
            self.metrics.activity_logs_filtered.inc();
            return Ok(LogOutcome::Filtered(FilterReason::ExcludedByPolicy));
        }

        if self.policy.security_logging_enabled && req.actor_is_admin {
            self.forward_admin_access(&req);
        }

        let mut req = req;
        req.details = req.details.map(|d| mask_sensitive_data(&self.policy, &d));

        if self.policy.batching_enabled {
            let entry = LogEntry::new(req);
            self.batch.enqueue(entry.clone());
            return Ok(LogOutcome::Queued(entry));
        }

        self.metrics.immediate_writes.inc();
        match self.writer.write_activity(&req).await {
            Ok(WriteOutcome::Persisted(entry)) => Ok(LogOutcome::Persisted(entry)),
            Ok(WriteOutcome::Dropped) => {
                self.metrics.activity_logs_filtered.inc();
                Ok(LogOutcome::Filtered(FilterReason::RemotePolicy))
            }
            Err(e) => {
                self.metrics.immediate_write_failures.inc();
                self.logger.error("Activity log write failed", Some(&json!({
                    "action": req.action.to_string(),
                    "resource_type": req.resource_type.as_str(),
                    "error": e.to_string(),
                })));
                self.report_write_failure(&req, &e).await;
                Err(e)
            }
        }
    }

    /// Best effort; never blocks or fails the caller.
    fn forward_admin_access(&self, req: &NewActivityLog) {
        let Some(security) = self.security.clone() else { return };
        let user_id = req.user_id.clone();
        let action = req.action;
        let resource_type = req.resource_type;
        let resource_id = req.resource_id.clone();
        tokio::spawn(async move {
            let _ = security
                .log_admin_access(&user_id, action, resource_type, resource_id.as_deref())
                .await;
        });
    }

    /// Writes the single secondary record describing a failed write. It goes
    /// to the writer directly and is never reported on in turn. Failures of
    /// `Error` level records are not reported at all.
    async fn report_write_failure(&self, failed: &NewActivityLog, error: &LogError) {
        if failed.level >= LogLevel::Error
            || !self.policy.should_log(LogLevel::Error)
            || !self.policy.should_log_action(ActivityAction::Error, ResourceType::System)
        {
            return;
        }
        let mut details = crate::model::Details::new();
        details.insert("message".into(), json!("log creation failed"));
        details.insert("original_action".into(), json!(failed.action.to_string()));
        details.insert("original_resource_type".into(), json!(failed.resource_type.as_str()));
        details.insert("error".into(), json!(error.to_string()));
        let report = NewActivityLog::new(failed.user_id.clone(), ActivityAction::Error, ResourceType::System)
            .with_details(mask_sensitive_data(&self.policy, &details))
            .with_level(LogLevel::Error)
            .with_request_meta(failed.ip_address.clone(), failed.user_agent.clone());

        if let Err(e) = self.writer.write_activity(&report).await {
            self.metrics.immediate_write_failures.inc();
            self.logger.error("Failure report could not be written", Some(&json!({
                "error": e.to_string(),
            })));
        }
    }

    pub fn batch_status(&self) -> BatchStatus {
        self.batch.get_batch_status()
    }

    /// Final flush; call once at process exit.
    pub async fn shutdown(&self) -> BatchStatus {
        self.batch.shutdown().await
    }
}
