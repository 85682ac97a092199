//! Batch queue in front of the activity-log sink.
//!
//! Entries accumulate until the queue reaches `batch_size` or the batch timer
//! fires, whichever comes first. One flush at a time; a flush that fails puts
//! its entries back at the front of the queue.

use serde::Serialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::LogPolicy;
use crate::error::LogError;
use crate::model::LogEntry;
use crate::observability::metrics::Metrics;
use crate::observability::Logger;
use crate::sink::LogSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchStatus {
    pub queue_length: usize,
    pub is_processing: bool,
    pub has_timer: bool,
}

#[derive(Debug, Clone)]
pub enum FlushOutcome {
    /// Queue empty or another flush already in flight.
    Skipped,
    Flushed { count: usize },
    /// Persist failed; the entries are back in the queue.
    Requeued { count: usize, error: LogError },
}

struct BatchTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct BatchState {
    queue: VecDeque<LogEntry>,
    timer: Option<BatchTimer>,
    timer_generation: u64,
    is_processing: bool,
}

struct Inner {
    policy: Arc<LogPolicy>,
    sink: Arc<dyn LogSink>,
    metrics: Arc<Metrics>,
    logger: Logger,
    state: Mutex<BatchState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears `is_processing` when the flush ends, however it ends.
struct ProcessingGuard<'a> {
    inner: &'a Inner,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.inner.lock().is_processing = false;
    }
}

#[derive(Clone)]
pub struct LogBatchProcessor {
    inner: Arc<Inner>,
}

impl LogBatchProcessor {
    pub fn new(policy: Arc<LogPolicy>, sink: Arc<dyn LogSink>, metrics: Arc<Metrics>, logger: Logger) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                sink,
                metrics,
                logger,
                state: Mutex::new(BatchState::default()),
            }),
        }
    }

    pub fn policy(&self) -> &LogPolicy {
        &self.inner.policy
    }

    /// Queues `entry`, or writes it straight through when batching is off.
    /// Only the unbatched path can fail; queued entries are reported through
    /// flush outcomes.
    pub async fn add_log(&self, entry: LogEntry) -> Result<(), LogError> {
        let inner = &self.inner;
        if !inner.policy.batching_enabled {
            inner.metrics.immediate_writes.inc();
            return inner
                .sink
                .insert_activity_logs(std::slice::from_ref(&entry))
                .await
                .map_err(|e| {
                    inner.metrics.immediate_write_failures.inc();
                    inner.logger.error("Unbatched activity write failed", Some(&json!({
                        "error": e.to_string(),
                        "action": entry.action().to_string(),
                        "resource_type": entry.resource_type().as_str(),
                    })));
                    e
                });
        }

        if self.push(entry) {
            self.flush_batch().await;
        }
        Ok(())
    }

    /// Non-blocking queue append for the batched path: the entry joins the
    /// queue before this returns, any flush it triggers runs on a spawned
    /// task. The queue is used even when the policy has batching off; such
    /// callers want [`add_log`](Self::add_log).
    pub fn enqueue(&self, entry: LogEntry) {
        if self.push(entry) {
            let this = self.clone();
            tokio::spawn(async move {
                this.flush_batch().await;
            });
        }
    }

    /// Appends to the queue; true when the caller should flush now.
    fn push(&self, entry: LogEntry) -> bool {
        let inner = &self.inner;
        let mut st = inner.lock();
        st.queue.push_back(entry);
        inner.metrics.activity_logs_queued.inc();
        inner.metrics.queue_length.set(st.queue.len() as i64);
        if st.queue.len() >= inner.policy.batch_size && !st.is_processing {
            return true;
        }
        if st.timer.is_none() {
            self.arm_timer(&mut st);
        }
        false
    }

    fn arm_timer(&self, st: &mut BatchState) {
        st.timer_generation += 1;
        let generation = st.timer_generation;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let delay = Duration::from_millis(self.inner.policy.batch_interval_ms);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            {
                let mut st = inner.lock();
                // Someone else cancelled or replaced this timer.
                if st.timer.as_ref().map(|t| t.generation) != Some(generation) {
                    return;
                }
                st.timer = None;
            }
            LogBatchProcessor { inner }.flush_batch().await;
        });
        st.timer = Some(BatchTimer { generation, handle });
    }

    pub async fn flush_batch(&self) -> FlushOutcome {
        let inner = &self.inner;
        let snapshot: Vec<LogEntry> = {
            let mut st = inner.lock();
            if st.is_processing || st.queue.is_empty() {
                return FlushOutcome::Skipped;
            }
            if let Some(timer) = st.timer.take() {
                timer.handle.abort();
            }
            st.is_processing = true;
            inner.metrics.queue_length.set(0);
            st.queue.drain(..).collect()
        };
        let _guard = ProcessingGuard { inner };

        let count = snapshot.len();
        let started = Instant::now();
        match inner.sink.insert_activity_logs(&snapshot).await {
            Ok(()) => {
                let elapsed = started.elapsed().as_secs_f64();
                inner.metrics.batches_flushed.inc();
                inner.metrics.entries_persisted.inc_by(count as u64);
                inner.metrics.flush_duration_seconds.observe(elapsed);
                inner.metrics.flush_throughput.set(count as f64 / elapsed.max(1e-6));
                if inner.policy.performance_logging_enabled {
                    inner.logger.info("Batch flushed", Some(&json!({
                        "count": count,
                        "duration_ms": (elapsed * 1000.0) as u64,
                    })));
                }
                FlushOutcome::Flushed { count }
            }
            Err(error) => {
                let queue_length = {
                    let mut st = inner.lock();
                    let mut restored: VecDeque<LogEntry> = snapshot.into();
                    restored.extend(st.queue.drain(..));
                    st.queue = restored;
                    st.queue.len()
                };
                inner.metrics.flush_failures.inc();
                inner.metrics.queue_length.set(queue_length as i64);
                inner.logger.error("Batch flush failed, entries re-queued", Some(&json!({
                    "count": count,
                    "queue_length": queue_length,
                    "transient": error.is_transient(),
                    "error": error.to_string(),
                })));
                FlushOutcome::Requeued { count, error }
            }
        }
    }

    /// Operator-triggered drain.
    pub async fn force_batch(&self) -> FlushOutcome {
        self.flush_batch().await
    }

    pub fn get_batch_status(&self) -> BatchStatus {
        let st = self.inner.lock();
        BatchStatus {
            queue_length: st.queue.len(),
            is_processing: st.is_processing,
            has_timer: st.timer.is_some(),
        }
    }

    /// Cancels the timer and drains the queue. Waits for an in-flight flush
    /// first; stops at the first failed persist and leaves those entries
    /// queued.
    pub async fn shutdown(&self) -> BatchStatus {
        if let Some(timer) = self.inner.lock().timer.take() {
            timer.handle.abort();
        }
        loop {
            match self.flush_batch().await {
                FlushOutcome::Flushed { .. } => continue,
                FlushOutcome::Requeued { .. } => break,
                FlushOutcome::Skipped => {
                    if self.get_batch_status().is_processing {
                        sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                    break;
                }
            }
        }
        let status = self.get_batch_status();
        self.inner.logger.info("Batch processor shut down", Some(&json!({
            "remaining": status.queue_length,
        })));
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::model::{ActivityAction, NewActivityLog, ResourceType};
    use crate::sink::MemorySink;

    fn policy(batching: bool, size: usize, interval_ms: u64) -> Arc<LogPolicy> {
        let mut p = LogPolicy::for_environment(Environment::Development);
        p.batching_enabled = batching;
        p.batch_size = size;
        p.batch_interval_ms = interval_ms;
        Arc::new(p)
    }

    fn processor(p: Arc<LogPolicy>) -> (LogBatchProcessor, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let proc = LogBatchProcessor::new(p, sink.clone(), Arc::new(Metrics::new()), Logger::new("batch-test"));
        (proc, sink)
    }

    fn entry(n: usize) -> LogEntry {
        LogEntry::new(
            NewActivityLog::new(format!("user-{}", n), ActivityAction::Create, ResourceType::BoardPost)
                .with_resource(format!("post-{}", n), None),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn flush_on_empty_queue_is_a_noop() {
        let (p, sink) = processor(policy(true, 10, 1000));
        let before = p.get_batch_status();
        assert!(matches!(p.flush_batch().await, FlushOutcome::Skipped));
        assert_eq!(p.get_batch_status(), before);
        assert_eq!(sink.activity_insert_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn size_threshold_flushes_all_entries_once() {
        let (p, sink) = processor(policy(true, 3, 60_000));
        p.add_log(entry(1)).await.unwrap();
        p.add_log(entry(2)).await.unwrap();
        assert!(p.get_batch_status().has_timer);
        p.add_log(entry(3)).await.unwrap();

        assert_eq!(sink.activity_insert_calls(), 1);
        assert_eq!(sink.activity_logs().len(), 3);
        let status = p.get_batch_status();
        assert_eq!(status.queue_length, 0);
        assert!(!status.has_timer);
        assert!(!status.is_processing);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_partial_batch() {
        let (p, sink) = processor(policy(true, 100, 5_000));
        p.add_log(entry(1)).await.unwrap();
        p.add_log(entry(2)).await.unwrap();
        assert!(p.get_batch_status().has_timer);

        sleep(Duration::from_millis(4_000)).await;
        assert_eq!(sink.activity_insert_calls(), 0);

        sleep(Duration::from_millis(2_000)).await;
        assert_eq!(sink.activity_insert_calls(), 1);
        assert_eq!(sink.activity_logs().len(), 2);
        assert_eq!(p.get_batch_status(), BatchStatus { queue_length: 0, is_processing: false, has_timer: false });
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_flushes_persist_once() {
        let (p, sink) = processor(policy(true, 100, 60_000));
        for i in 0..4 {
            p.add_log(entry(i)).await.unwrap();
        }
        let (a, b) = tokio::join!(p.flush_batch(), p.flush_batch());
        let flushed: Vec<usize> = [a, b]
            .into_iter()
            .filter_map(|o| match o {
                FlushOutcome::Flushed { count } => Some(count),
                _ => None,
            })
            .collect();
        assert_eq!(flushed, vec![4]);
        assert_eq!(sink.activity_insert_calls(), 1);
        assert_eq!(sink.activity_logs().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_requeues_in_front_of_new_entries() {
        let (p, sink) = processor(policy(true, 100, 60_000));
        let first = entry(1);
        let second = entry(2);
        let late = entry(3);
        p.add_log(first.clone()).await.unwrap();
        p.add_log(second.clone()).await.unwrap();
        sink.set_failing(true);

        let (outcome, added) = tokio::join!(p.flush_batch(), p.add_log(late.clone()));
        added.unwrap();
        assert!(matches!(outcome, FlushOutcome::Requeued { count: 2, .. }));
        assert_eq!(p.get_batch_status().queue_length, 3);
        assert!(!p.get_batch_status().is_processing);

        sink.set_failing(false);
        assert!(matches!(p.force_batch().await, FlushOutcome::Flushed { count: 3 }));
        let ids: Vec<_> = sink.activity_logs().iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![first.id(), second.id(), late.id()]);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_survive_repeated_failures() {
        let (p, sink) = processor(policy(true, 2, 60_000));
        sink.set_failing(true);
        let mut added = Vec::new();
        for i in 0..7 {
            let e = entry(i);
            added.push(e.id());
            p.add_log(e).await.unwrap();
        }
        assert!(sink.activity_insert_calls() >= 3);
        assert_eq!(p.get_batch_status().queue_length, 7);

        sink.set_failing(false);
        p.force_batch().await;
        let mut persisted: Vec<_> = sink.activity_logs().iter().map(|e| e.id()).collect();
        persisted.sort();
        added.sort();
        assert_eq!(persisted, added);
    }

    #[tokio::test]
    async fn unbatched_policy_writes_through() {
        let (p, sink) = processor(policy(false, 10, 1000));
        p.add_log(entry(1)).await.unwrap();
        assert_eq!(sink.activity_logs().len(), 1);
        assert_eq!(p.get_batch_status().queue_length, 0);

        sink.set_failing(true);
        assert!(p.add_log(entry(2)).await.is_err());
        assert_eq!(p.get_batch_status().queue_length, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_queue_and_cancels_timer() {
        let (p, sink) = processor(policy(true, 50, 60_000));
        for i in 0..5 {
            p.add_log(entry(i)).await.unwrap();
        }
        let status = p.shutdown().await;
        assert_eq!(status, BatchStatus { queue_length: 0, is_processing: false, has_timer: false });
        assert_eq!(sink.activity_logs().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_returns_before_the_flush_it_triggers() {
        let (p, sink) = processor(policy(true, 2, 60_000));
        p.enqueue(entry(1));
        assert_eq!(p.get_batch_status().queue_length, 1);
        assert!(p.get_batch_status().has_timer);

        p.enqueue(entry(2));
        assert_eq!(sink.activity_insert_calls(), 0);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(sink.activity_logs().len(), 2);
        assert_eq!(p.get_batch_status(), BatchStatus { queue_length: 0, is_processing: false, has_timer: false });
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_always_queues() {
        let (p, sink) = processor(policy(false, 10, 60_000));
        p.enqueue(entry(1));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(sink.activity_insert_calls(), 0);
        assert_eq!(p.get_batch_status().queue_length, 1);

        p.shutdown().await;
        assert_eq!(sink.activity_logs().len(), 1);
    }
}
