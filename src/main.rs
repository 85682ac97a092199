use activity_log::activity::ActivityLogService;
use activity_log::api::{self, AppState};
use activity_log::batch::LogBatchProcessor;
use activity_log::config::{LogPolicy, ServiceConfig};
use activity_log::observability::{metrics::Metrics, Logger};
use activity_log::security::SecurityLogger;
use activity_log::sink::{DirectWriter, PgSink};
use serde_json::json;
use std::sync::{atomic::{AtomicBool, Ordering}, Arc};
use std::time::Duration;
use tokio::time::sleep;

const MAX_CONNECT_ATTEMPTS: u32 = 8;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load Config
    let config = ServiceConfig::from_env().map_err(|e| format!("invalid configuration: {}", e))?;
    let policy = Arc::new(LogPolicy::from_env());

    // 2. Initialize Logger
    let logger = Logger::new(config.service_id.clone());
    logger.info("Activity log service starting up", Some(&json!({
        "environment": policy.environment.as_str(),
        "min_level": policy.min_level.as_str(),
        "batching_enabled": policy.batching_enabled,
        "batch_size": policy.batch_size,
        "batch_interval_ms": policy.batch_interval_ms,
        "archive_days": policy.archive_days,
        "http_bind": config.http_bind,
    })));

    // 3. Connect to Postgres with exponential backoff
    let metrics = Arc::new(Metrics::new());
    let sink = {
        let mut attempt: u32 = 0;
        loop {
            match PgSink::connect(&config.database_url, config.db_max_connections).await {
                Ok(sink) => break sink,
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    if attempt >= MAX_CONNECT_ATTEMPTS {
                        logger.error("Giving up on database connection", Some(&json!({
                            "error": e.to_string(),
                            "attempts": attempt,
                        })));
                        return Err(e.into());
                    }
                    let backoff_ms = std::cmp::min(30_000, 500_u64.saturating_mul(2_u64.saturating_pow(attempt)));
                    logger.error("Failed to connect to database, will retry", Some(&json!({
                        "error": e.to_string(),
                        "attempt": attempt,
                        "backoff_ms": backoff_ms,
                    })));
                    sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    };
    sink.ensure_schema().await?;
    logger.info("Connected to database", None);
    let sink = Arc::new(sink);

    // 4. Wire services
    let batch = LogBatchProcessor::new(policy.clone(), sink.clone(), metrics.clone(), logger.clone());
    let security = SecurityLogger::new(policy.clone(), sink.clone(), Some(batch.clone()), metrics.clone(), logger.clone());
    let writer = Arc::new(DirectWriter::new(sink.clone()));
    let activity = ActivityLogService::new(
        policy.clone(),
        batch,
        writer,
        Some(security.clone()),
        metrics.clone(),
        logger.clone(),
    );

    // 5. Periodic tracker sweep
    {
        let security = security.clone();
        let sweep_logger = logger.clone();
        let every = Duration::from_millis(config.security_sweep_interval_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = security.sweep_expired();
                if removed > 0 {
                    sweep_logger.info("Expired security trackers swept", Some(&json!({
                        "removed": removed,
                        "remaining": security.tracker_counts(),
                    })));
                }
            }
        });
    }

    // 6. Start HTTP server
    let readiness = Arc::new(AtomicBool::new(false));
    let draining = Arc::new(AtomicBool::new(false));
    let state = AppState {
        activity: activity.clone(),
        security,
        metrics: metrics.clone(),
        api_token: Arc::from(config.api_token.as_str()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        readiness: readiness.clone(),
        draining: draining.clone(),
    };
    let http_bind = config.http_bind.clone();
    let server_logger = logger.clone();
    tokio::spawn(async move {
        server_logger.info(&format!("HTTP server listening on {}", http_bind), None);
        if let Err(e) = api::start_server(http_bind, state).await {
            server_logger.error(&format!("HTTP server crashed: {}", e), None);
            std::process::exit(1);
        }
    });
    readiness.store(true, Ordering::SeqCst);

    // Keep main alive
    tokio::signal::ctrl_c().await?;
    readiness.store(false, Ordering::SeqCst);
    draining.store(true, Ordering::SeqCst);

    let status = activity.shutdown().await;
    if status.queue_length > 0 {
        logger.error("Shutdown left entries unpersisted", Some(&json!({
            "queue_length": status.queue_length,
        })));
    }
    logger.info("Activity log service shutdown", None);

    Ok(())
}
