//! Persistence boundary: append-only inserts into `activity_logs` and
//! `security_logs`, plus the immediate-write path used when batching is off.

pub mod http;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::LogError;
use crate::model::{LogEntry, NewActivityLog, SecurityEvent};

pub use self::http::HttpActivityClient;
pub use self::memory::MemorySink;
pub use self::postgres::PgSink;

#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persists every entry or none of them.
    async fn insert_activity_logs(&self, entries: &[LogEntry]) -> Result<(), LogError>;

    async fn insert_security_event(&self, event: &SecurityEvent) -> Result<(), LogError>;
}

/// Result of one immediate write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Persisted(LogEntry),
    /// The receiving side dropped the record under its own log policy.
    Dropped,
}

/// Writes a single activity record outside the batch queue.
#[async_trait]
pub trait ActivityWriter: Send + Sync {
    async fn write_activity(&self, req: &NewActivityLog) -> Result<WriteOutcome, LogError>;
}

/// Immediate writer that goes straight to a [`LogSink`]. This is what the
/// ingestion service itself uses behind its HTTP endpoint.
#[derive(Clone)]
pub struct DirectWriter {
    sink: Arc<dyn LogSink>,
}

impl DirectWriter {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl ActivityWriter for DirectWriter {
    async fn write_activity(&self, req: &NewActivityLog) -> Result<WriteOutcome, LogError> {
        let entry = LogEntry::new(req.clone());
        self.sink.insert_activity_logs(std::slice::from_ref(&entry)).await?;
        Ok(WriteOutcome::Persisted(entry))
    }
}
