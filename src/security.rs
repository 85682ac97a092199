//! Security event logging with login-failure escalation, bulk-access and
//! malicious-request detection.
//!
//! Security events never wait in the batch queue: each one is written to the
//! sink immediately. Events at `High` or above are also copied into the
//! regular activity stream and raise an alert.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::batch::LogBatchProcessor;
use crate::config::LogPolicy;
use crate::error::LogError;
use crate::masking::mask_sensitive_data;
use crate::model::{
    ActivityAction, Details, LogEntry, LogLevel, NewActivityLog, ResourceType, SecurityAlert, SecurityEvent,
    SecurityEventType, Severity, UNKNOWN_USER,
};
use crate::observability::metrics::Metrics;
use crate::observability::Logger;
use crate::sink::LogSink;

pub const LOGIN_TRACKER_TTL: Duration = Duration::from_secs(60 * 60);
pub const MULTIPLE_FAILURE_THRESHOLD: u32 = 3;
pub const HIGH_SEVERITY_FAILURES: u32 = 5;
pub const BULK_ACCESS_THRESHOLD: u64 = 100;
pub const MAX_ALERTS: usize = 100;
pub const REQUEST_SNAPSHOT_LIMIT: usize = 1000;

lazy_static! {
    static ref MALICIOUS_PATTERNS: Vec<Regex> = [
        // markup / script injection
        r"(?i)<script[^>]*>",
        r"(?i)javascript:",
        r"(?i)\bon(?:load|error|click|mouseover|focus)\s*=",
        // SQL
        r"(?i)\bunion\b\s+(?:all\s+)?select\b",
        r"(?i)\bdrop\s+table\b",
        r"(?i)\binsert\s+into\b",
        r"(?i)\bdelete\s+from\b",
        r"(?i)'\s*or\s*'?1'?\s*=\s*'?1",
        r";\s*--",
        // path traversal
        r"\.\./",
        r"\.\.\\\\",
        r"(?i)%2e%2e%2f",
        // code execution
        r"(?i)\beval\s*\(",
        r"(?i)\bexec\s*\(",
        r"(?i)\bsystem\s*\(",
        r"(?i)child_process",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub identity: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackerCounts {
    pub login_attempts: usize,
    pub access_windows: usize,
}

struct LoginTracker {
    attempt_count: u32,
    failure_count: u32,
    last_attempt_at: chrono::DateTime<chrono::Utc>,
    created: Instant,
}

/// Fixed window: opened by the first access, discarded once `window` has
/// elapsed.
struct AccessWindow {
    count: u64,
    window_start: Instant,
    window: Duration,
    reported: bool,
}

#[derive(Default)]
struct Trackers {
    logins: HashMap<(String, String), LoginTracker>,
    access: HashMap<(String, ResourceType), AccessWindow>,
    alerts: VecDeque<SecurityAlert>,
}

impl Trackers {
    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.logins.len() + self.access.len();
        self.logins.retain(|_, t| now.duration_since(t.created) < LOGIN_TRACKER_TTL);
        self.access.retain(|_, w| now.duration_since(w.window_start) < w.window);
        before - (self.logins.len() + self.access.len())
    }
}

struct SecurityInner {
    policy: Arc<LogPolicy>,
    sink: Arc<dyn LogSink>,
    batch: Option<LogBatchProcessor>,
    metrics: Arc<Metrics>,
    logger: Logger,
    trackers: Mutex<Trackers>,
}

#[derive(Clone)]
pub struct SecurityLogger {
    inner: Arc<SecurityInner>,
}

impl SecurityLogger {
    /// `batch` receives the activity-stream copy of high severity events;
    /// pass `None` to keep security events out of the activity stream.
    pub fn new(
        policy: Arc<LogPolicy>,
        sink: Arc<dyn LogSink>,
        batch: Option<LogBatchProcessor>,
        metrics: Arc<Metrics>,
        logger: Logger,
    ) -> Self {
        Self {
            inner: Arc::new(SecurityInner {
                policy,
                sink,
                batch,
                metrics,
                logger,
                trackers: Mutex::new(Trackers::default()),
            }),
        }
    }

    fn trackers(&self) -> MutexGuard<'_, Trackers> {
        self.inner.trackers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn log_security_event(&self, event: SecurityEvent) -> Result<SecurityEvent, LogError> {
        let inner = &self.inner;
        if !inner.policy.security_logging_enabled {
            return Err(LogError::Disabled("security logging"));
        }
        inner.metrics.security_events.with_label_values(&[event.severity.as_str()]).inc();

        let written = inner.sink.insert_security_event(&event).await;
        if let Err(e) = &written {
            inner.metrics.security_write_failures.inc();
            inner.logger.error("Security event write failed", Some(&json!({
                "event_type": event.event_type.as_str(),
                "severity": event.severity.as_str(),
                "error": e.to_string(),
            })));
        }

        if event.severity >= Severity::High {
            self.mirror_to_activity_stream(&event).await;
            self.raise_alert(&event);
        }

        written.map(|_| event)
    }

    async fn mirror_to_activity_stream(&self, event: &SecurityEvent) {
        let Some(batch) = &self.inner.batch else { return };
        let mut details = event.details.clone();
        details.insert("severity".into(), json!(event.severity.as_str()));
        details.insert("security_event_id".into(), json!(event.id.to_string()));
        let req = NewActivityLog::new(
            event.user_id.clone(),
            ActivityAction::Security(event.event_type),
            ResourceType::Security,
        )
        .with_details(mask_sensitive_data(&self.inner.policy, &details))
        .with_level(LogLevel::Error)
        .with_request_meta(event.ip_address.clone(), event.user_agent.clone());
        // add_log reports its own failures
        let _ = batch.add_log(LogEntry::new(req)).await;
    }

    fn raise_alert(&self, event: &SecurityEvent) {
        let alert = SecurityAlert {
            event_type: event.event_type,
            severity: event.severity,
            user_id: event.user_id.clone(),
            message: format!(
                "{} ({}) for user {}",
                event.event_type,
                event.severity.as_str(),
                event.user_id
            ),
            created_at: event.created_at,
        };
        self.inner.logger.warn("Security alert", Some(&json!({
            "event_type": event.event_type.as_str(),
            "severity": event.severity.as_str(),
            "user_id": event.user_id,
            "ip_address": event.ip_address,
        })));
        self.inner.metrics.security_alerts.inc();
        let mut t = self.trackers();
        t.alerts.push_back(alert);
        while t.alerts.len() > MAX_ALERTS {
            t.alerts.pop_front();
        }
    }

    /// Records a login attempt and returns the events it produced.
    ///
    /// Failures for the same `(ip, identity)` escalate: `Low` below 3,
    /// `Medium` for 3 and 4, `High` from 5 on. The third failure also emits
    /// one `MultipleFailedAttempts`. Success resets the key.
    pub async fn log_login_attempt(&self, attempt: LoginAttempt) -> Vec<SecurityEvent> {
        let now = Instant::now();
        let key = (
            attempt.ip_address.clone().unwrap_or_else(|| UNKNOWN_USER.to_string()),
            attempt.identity.clone(),
        );

        let planned: Vec<(SecurityEventType, Severity, Details)> = {
            let mut t = self.trackers();
            t.sweep(now);
            if attempt.success {
                t.logins.remove(&key);
                vec![(SecurityEventType::LoginSuccess, Severity::Low, details(json!({
                    "identity": attempt.identity,
                })))]
            } else {
                let tracker = t.logins.entry(key).or_insert_with(|| LoginTracker {
                    attempt_count: 0,
                    failure_count: 0,
                    last_attempt_at: chrono::Utc::now(),
                    created: now,
                });
                tracker.attempt_count += 1;
                tracker.failure_count += 1;
                tracker.last_attempt_at = chrono::Utc::now();
                let failures = tracker.failure_count;
                let severity = match failures {
                    f if f >= HIGH_SEVERITY_FAILURES => Severity::High,
                    f if f >= MULTIPLE_FAILURE_THRESHOLD => Severity::Medium,
                    _ => Severity::Low,
                };
                let mut out = vec![(SecurityEventType::LoginFailure, severity, details(json!({
                    "identity": attempt.identity,
                    "failure_count": failures,
                    "attempt_count": tracker.attempt_count,
                    "last_attempt_at": tracker.last_attempt_at.to_rfc3339(),
                })))];
                if failures == MULTIPLE_FAILURE_THRESHOLD {
                    out.push((SecurityEventType::MultipleFailedAttempts, Severity::High, details(json!({
                        "identity": attempt.identity,
                        "failure_count": failures,
                    }))));
                }
                out
            }
        };

        let user_id = attempt.user_id.clone().unwrap_or_else(|| UNKNOWN_USER.to_string());
        let mut emitted = Vec::with_capacity(planned.len());
        for (event_type, severity, d) in planned {
            let mut event = SecurityEvent::new(event_type, severity, user_id.clone())
                .with_details(d)
                .with_request_meta(attempt.ip_address.clone(), attempt.user_agent.clone());
            if let Some(session_id) = &attempt.session_id {
                event = event.with_session(session_id.clone());
            }
            let _ = self.log_security_event(event.clone()).await;
            emitted.push(event);
        }
        emitted
    }

    /// Adds `count` accesses to the `(user, resource type)` window and
    /// reports bulk access once per window when the total reaches
    /// [`BULK_ACCESS_THRESHOLD`].
    pub async fn detect_bulk_access(
        &self,
        user_id: &str,
        resource_type: ResourceType,
        count: u64,
        window: Duration,
    ) -> Option<SecurityEvent> {
        let now = Instant::now();
        let hit = {
            let mut t = self.trackers();
            t.sweep(now);
            let w = t
                .access
                .entry((user_id.to_string(), resource_type))
                .or_insert_with(|| AccessWindow { count: 0, window_start: now, window, reported: false });
            w.count += count;
            if w.count >= BULK_ACCESS_THRESHOLD && !w.reported {
                w.reported = true;
                Some((w.count, now.duration_since(w.window_start), w.window))
            } else {
                None
            }
        };

        let (total, elapsed, window) = hit?;
        let rate = total as f64 / elapsed.as_secs_f64().max(0.001);
        let event = SecurityEvent::new(SecurityEventType::BulkDataAccess, Severity::High, user_id)
            .with_details(details(json!({
                "resource_type": resource_type.as_str(),
                "access_count": total,
                "window_ms": window.as_millis() as u64,
                "elapsed_ms": elapsed.as_millis() as u64,
                "rate_per_second": rate,
            })));
        let _ = self.log_security_event(event.clone()).await;
        Some(event)
    }

    pub async fn detect_malicious_request(
        &self,
        user_id: &str,
        request: &Value,
        ip_address: Option<&str>,
    ) -> Option<SecurityEvent> {
        let serialized = serde_json::to_string(request).unwrap_or_default();
        let matched = matching_patterns(&serialized);
        if matched.is_empty() {
            return None;
        }
        let snapshot: String = serialized.chars().take(REQUEST_SNAPSHOT_LIMIT).collect();
        let event = SecurityEvent::new(SecurityEventType::MaliciousRequest, Severity::High, user_id)
            .with_details(details(json!({
                "patterns": matched,
                "request": snapshot,
            })))
            .with_request_meta(ip_address.map(str::to_string), None);
        let _ = self.log_security_event(event.clone()).await;
        Some(event)
    }

    /// Access record for an administrator acting on a resource.
    pub async fn log_admin_access(
        &self,
        user_id: &str,
        action: ActivityAction,
        resource_type: ResourceType,
        resource_id: Option<&str>,
    ) -> Result<SecurityEvent, LogError> {
        let event = SecurityEvent::new(SecurityEventType::AdminAccess, Severity::Low, user_id)
            .with_details(details(json!({
                "action": action.to_string(),
                "resource_type": resource_type.as_str(),
                "resource_id": resource_id,
            })));
        self.log_security_event(event).await
    }

    pub async fn log_unauthorized_access(
        &self,
        user_id: &str,
        resource_type: ResourceType,
        resource_id: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<SecurityEvent, LogError> {
        let event = SecurityEvent::new(SecurityEventType::UnauthorizedAccess, Severity::Medium, user_id)
            .with_details(details(json!({
                "resource_type": resource_type.as_str(),
                "resource_id": resource_id,
            })))
            .with_request_meta(ip_address.map(str::to_string), None);
        self.log_security_event(event).await
    }

    /// Newest last.
    pub fn get_alerts(&self) -> Vec<SecurityAlert> {
        self.trackers().alerts.iter().cloned().collect()
    }

    pub fn clear_alerts(&self) {
        self.trackers().alerts.clear();
    }

    /// Drops expired login trackers and access windows; returns how many.
    pub fn sweep_expired(&self) -> usize {
        self.trackers().sweep(Instant::now())
    }

    pub fn tracker_counts(&self) -> TrackerCounts {
        let t = self.trackers();
        TrackerCounts { login_attempts: t.logins.len(), access_windows: t.access.len() }
    }
}

fn details(v: Value) -> Details {
    match v {
        Value::Object(map) => map,
        _ => Details::new(),
    }
}

/// Sources of every signature that matches `serialized`.
pub fn matching_patterns(serialized: &str) -> Vec<&'static str> {
    MALICIOUS_PATTERNS
        .iter()
        .filter(|re| re.is_match(serialized))
        .map(|re| re.as_str())
        .collect()
}
