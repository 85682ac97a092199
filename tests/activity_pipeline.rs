use activity_log::activity::{ActivityLogService, FilterReason, LogOutcome};
use activity_log::batch::{FlushOutcome, LogBatchProcessor};
use activity_log::config::LogPolicy;
use activity_log::model::{ActivityAction, LogLevel, NewActivityLog, ResourceType, SecurityEventType, Severity};
use activity_log::observability::{metrics::Metrics, Logger};
use activity_log::security::{LoginAttempt, SecurityLogger};
use activity_log::sink::{DirectWriter, MemorySink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Stack {
    activity: ActivityLogService,
    security: SecurityLogger,
    sink: Arc<MemorySink>,
    metrics: Arc<Metrics>,
}

fn stack(vars: &[(&str, &str)]) -> Stack {
    let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    let policy = Arc::new(LogPolicy::from_lookup(|k| map.get(k).cloned()));
    let sink = Arc::new(MemorySink::new());
    let metrics = Arc::new(Metrics::new());
    let logger = Logger::new("pipeline-test");
    let batch = LogBatchProcessor::new(policy.clone(), sink.clone(), metrics.clone(), logger.clone());
    let security = SecurityLogger::new(policy.clone(), sink.clone(), Some(batch.clone()), metrics.clone(), logger.clone());
    let writer = Arc::new(DirectWriter::new(sink.clone()));
    let activity = ActivityLogService::new(policy, batch, writer, Some(security.clone()), metrics.clone(), logger);
    Stack { activity, security, sink, metrics }
}

fn post(n: usize) -> NewActivityLog {
    NewActivityLog::new("u1", ActivityAction::Create, ResourceType::BoardPost)
        .with_resource(format!("p{}", n), None)
}

#[tokio::test]
async fn warn_threshold_drops_info() {
    let s = stack(&[("LOG_LEVEL", "2")]);
    let out = s.activity.create_activity_log(post(1)).await.unwrap();
    assert!(matches!(out, LogOutcome::Filtered(FilterReason::BelowMinLevel)));

    let out = s.activity.create_activity_log(post(2).with_level(LogLevel::Warn)).await.unwrap();
    assert!(matches!(out, LogOutcome::Persisted(_)));
    assert_eq!(s.sink.activity_logs().len(), 1);
    assert_eq!(s.metrics.activity_logs_filtered.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn production_batch_of_three_flushes_once() {
    let s = stack(&[("APP_ENV", "production"), ("LOG_BATCH_SIZE", "3")]);
    for n in 0..3 {
        let out = s.activity.create_activity_log(post(n)).await.unwrap();
        assert!(matches!(out, LogOutcome::Queued(_)));
    }
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(s.sink.activity_insert_calls(), 1);
    let ids: Vec<_> = s.sink.activity_logs().iter().map(|e| e.resource_id().map(str::to_string)).collect();
    assert_eq!(ids, vec![Some("p0".into()), Some("p1".into()), Some("p2".into())]);
    let status = s.activity.batch_status();
    assert_eq!(status.queue_length, 0);
    assert!(!status.is_processing);
}

#[tokio::test(start_paused = true)]
async fn interval_flushes_partial_batch() {
    let s = stack(&[("APP_ENV", "production"), ("LOG_BATCH_INTERVAL_MS", "200")]);
    s.activity.create_activity_log(post(0)).await.unwrap();
    assert!(s.activity.batch_status().has_timer);

    tokio::time::sleep(Duration::from_millis(199)).await;
    assert_eq!(s.sink.activity_insert_calls(), 0);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(s.sink.activity_logs().len(), 1);
    assert!(!s.activity.batch_status().has_timer);
}

#[tokio::test(start_paused = true)]
async fn entries_survive_failed_flushes_and_persist_once() {
    let s = stack(&[("APP_ENV", "production"), ("LOG_BATCH_SIZE", "100")]);
    s.sink.set_failing(true);
    for n in 0..5 {
        s.activity.create_activity_log(post(n)).await.unwrap();
    }
    for _ in 0..3 {
        assert!(matches!(s.activity.batch().force_batch().await, FlushOutcome::Requeued { count: 5, .. }));
        assert_eq!(s.activity.batch_status().queue_length, 5);
    }
    s.activity.create_activity_log(post(5)).await.unwrap();

    s.sink.set_failing(false);
    let status = s.activity.shutdown().await;
    assert_eq!(status.queue_length, 0);

    let ids: Vec<String> = s
        .sink
        .activity_logs()
        .iter()
        .filter_map(|e| e.resource_id().map(str::to_string))
        .collect();
    assert_eq!(ids, (0..6).map(|n| format!("p{}", n)).collect::<Vec<_>>());
    assert_eq!(s.metrics.flush_failures.get(), 3);
}

#[tokio::test(start_paused = true)]
async fn five_failed_logins_escalate_to_high() {
    let s = stack(&[("APP_ENV", "production")]);
    let attempt = LoginAttempt {
        identity: "deacon@example.org".into(),
        user_id: None,
        success: false,
        ip_address: Some("198.51.100.7".into()),
        user_agent: Some("curl/8".into()),
        session_id: None,
    };

    let mut severities = Vec::new();
    let mut multiple = 0;
    for _ in 0..5 {
        for event in s.security.log_login_attempt(attempt.clone()).await {
            match event.event_type {
                SecurityEventType::LoginFailure => severities.push(event.severity),
                SecurityEventType::MultipleFailedAttempts => multiple += 1,
                other => panic!("unexpected {:?}", other),
            }
        }
    }
    assert_eq!(
        severities,
        vec![Severity::Low, Severity::Low, Severity::Medium, Severity::Medium, Severity::High]
    );
    assert_eq!(multiple, 1);
    assert_eq!(s.sink.security_events().len(), 6);
    // MULTIPLE_FAILED_ATTEMPTS and the fifth failure are both High
    assert_eq!(s.security.get_alerts().len(), 2);

    // high severity copies wait in the activity batch
    let status = s.activity.shutdown().await;
    assert_eq!(status.queue_length, 0);
    let mirrored = s.sink.activity_logs();
    assert_eq!(mirrored.len(), 2);
    assert!(mirrored.iter().all(|e| e.resource_type() == ResourceType::Security && e.level() == LogLevel::Error));
    assert_eq!(mirrored[0].details()["severity"], "high");
    assert_eq!(mirrored[0].action(), ActivityAction::Security(SecurityEventType::MultipleFailedAttempts));
    assert_eq!(mirrored[0].ip_address(), Some("198.51.100.7"));

    let success = LoginAttempt { success: true, ..attempt.clone() };
    s.security.log_login_attempt(success).await;
    let events = s.security.log_login_attempt(attempt).await;
    assert_eq!(events[0].severity, Severity::Low);
}

#[tokio::test(start_paused = true)]
async fn login_trackers_expire_after_an_hour() {
    let s = stack(&[]);
    let attempt = LoginAttempt {
        identity: "a@b.org".into(),
        user_id: None,
        success: false,
        ip_address: Some("10.1.1.1".into()),
        user_agent: None,
        session_id: None,
    };
    for _ in 0..2 {
        s.security.log_login_attempt(attempt.clone()).await;
    }
    assert_eq!(s.security.tracker_counts().login_attempts, 1);

    tokio::time::advance(Duration::from_secs(60 * 60 + 1)).await;
    assert_eq!(s.security.sweep_expired(), 1);
    assert_eq!(s.security.tracker_counts().login_attempts, 0);

    let events = s.security.log_login_attempt(attempt).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].details["failure_count"], 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_producers_lose_and_duplicate_nothing() {
    let s = stack(&[("APP_ENV", "production"), ("LOG_BATCH_SIZE", "10")]);
    let calls = (0..57).map(|n| {
        let activity = s.activity.clone();
        async move { activity.create_activity_log(post(n)).await }
    });
    let results = futures::future::join_all(calls).await;
    assert!(results.iter().all(|r| matches!(r, Ok(LogOutcome::Queued(_)))));

    s.activity.shutdown().await;
    let mut ids: Vec<String> = s
        .sink
        .activity_logs()
        .iter()
        .filter_map(|e| e.resource_id().map(str::to_string))
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 57);
    assert_eq!(s.sink.activity_logs().len(), 57);
}
