use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::LogSink;
use crate::error::LogError;
use crate::model::{LogEntry, SecurityEvent};

/// In-process sink. Keeps every row it accepts and can be switched into a
/// failing mode to exercise retry paths.
#[derive(Default)]
pub struct MemorySink {
    activity: Mutex<Vec<LogEntry>>,
    security: Mutex<Vec<SecurityEvent>>,
    failing: AtomicBool,
    security_failing: AtomicBool,
    activity_calls: AtomicUsize,
    security_calls: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes activity inserts fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_security_failing(&self, failing: bool) {
        self.security_failing.store(failing, Ordering::SeqCst);
    }

    pub fn activity_logs(&self) -> Vec<LogEntry> {
        lock(&self.activity).clone()
    }

    pub fn security_events(&self) -> Vec<SecurityEvent> {
        lock(&self.security).clone()
    }

    /// Insert attempts, including failed ones.
    pub fn activity_insert_calls(&self) -> usize {
        self.activity_calls.load(Ordering::SeqCst)
    }

    pub fn security_insert_calls(&self) -> usize {
        self.security_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn insert_activity_logs(&self, entries: &[LogEntry]) -> Result<(), LogError> {
        self.activity_calls.fetch_add(1, Ordering::SeqCst);
        // Suspend like a real round trip so callers interleave.
        tokio::task::yield_now().await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(LogError::persistence("connection refused (memory sink failing)"));
        }
        lock(&self.activity).extend_from_slice(entries);
        Ok(())
    }

    async fn insert_security_event(&self, event: &SecurityEvent) -> Result<(), LogError> {
        self.security_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.security_failing.load(Ordering::SeqCst) {
            return Err(LogError::persistence("connection refused (memory sink failing)"));
        }
        lock(&self.security).push(event.clone());
        Ok(())
    }
}
