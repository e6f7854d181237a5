//! Background coalescing queue for deferred deletes.
//!
//! Request handlers hand delete requests to a [`DeleteQueue`] and return
//! right away. A single [`BatchDeleter`] worker drains the queue whenever
//! the ticker fires or the queue fills up, merges the drained tasks per
//! owner, checks ownership and issues one `delete_batch` per owner.
//!
//! ```text
//! Idle ──wake──▶ Draining ──▶ Dispatching ──▶ Idle
//!   │
//!   └──shutdown──▶ final Draining/Dispatching ──▶ stopped
//! ```

use snipper_core::error::Result;
use snipper_core::{Record, Storage, StorageError};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use typed_builder::TypedBuilder;

const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);
const MAX_TICK_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Tuning knobs for the delete queue.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct DeleteQueueConfig {
    /// Capacity of the inbound channel. Filling it wakes the worker early.
    #[builder(default = 5)]
    pub buffer_size: usize,
    /// Period of the ticker that wakes the worker.
    #[builder(default = Duration::from_secs(10))]
    pub flush_interval: Duration,
    /// Upper bound for each storage call made while flushing.
    #[builder(default = Duration::from_secs(30))]
    pub operation_timeout: Duration,
}

impl Default for DeleteQueueConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One inbound delete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTask {
    pub shorts: Vec<String>,
    pub user_id: String,
}

impl DeleteTask {
    pub fn new(shorts: Vec<String>, user_id: impl Into<String>) -> Self {
        Self {
            shorts,
            user_id: user_id.into(),
        }
    }
}

/// Producer handle of the delete queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeleteQueue {
    tasks: mpsc::Sender<DeleteTask>,
    wake: mpsc::Sender<()>,
}

impl DeleteQueue {
    /// Queues `shorts` for deletion on behalf of `user_id`.
    ///
    /// Never blocks the caller: the send runs on a spawned task, which waits
    /// for room if the channel is full. Must be called inside a Tokio
    /// runtime.
    pub fn queue_items(&self, shorts: Vec<String>, user_id: impl Into<String>) {
        let task = DeleteTask::new(shorts, user_id);
        let queue = self.clone();
        tokio::spawn(async move { queue.enqueue(task).await });
    }

    /// Sends `task` into the queue, waiting for room if it is full.
    ///
    /// When the send leaves the channel at capacity the worker is woken
    /// without waiting for the next tick.
    pub async fn enqueue(&self, task: DeleteTask) {
        trace!(user_id = %task.user_id, count = task.shorts.len(), "queueing delete task");

        if let Err(mpsc::error::SendError(task)) = self.tasks.send(task).await {
            warn!(user_id = %task.user_id, "delete queue is closed, dropping task");
            return;
        }

        if self.tasks.capacity() == 0 {
            debug!("delete queue is full, waking flush worker");
            self.flush_now();
        }
    }

    /// Wakes the worker without waiting for the ticker.
    pub fn flush_now(&self) {
        // A full wake channel already holds a pending wake.
        let _ = self.wake.try_send(());
    }
}

/// The consumer side of the delete queue.
pub struct BatchDeleter<S> {
    dispatcher: Dispatcher<S>,
    flush_interval: Duration,
    tasks: mpsc::Receiver<DeleteTask>,
    wake_tx: mpsc::Sender<()>,
    wake_rx: mpsc::Receiver<()>,
}

impl<S: Storage> BatchDeleter<S> {
    /// Creates the worker and the producer handle feeding it.
    pub fn new(storage: Arc<S>, config: DeleteQueueConfig) -> (Self, DeleteQueue) {
        let (tasks_tx, tasks_rx) = mpsc::channel(config.buffer_size.max(1));
        let (wake_tx, wake_rx) = mpsc::channel(1);

        let deleter = Self {
            dispatcher: Dispatcher {
                storage,
                operation_timeout: config.operation_timeout,
            },
            flush_interval: config.flush_interval,
            tasks: tasks_rx,
            wake_tx: wake_tx.clone(),
            wake_rx,
        };
        let queue = DeleteQueue {
            tasks: tasks_tx,
            wake: wake_tx,
        };

        (deleter, queue)
    }

    /// Runs the ticker and the flush loop until `shutdown` turns `true` (or
    /// its sender is dropped).
    ///
    /// Before returning, the flush loop runs one last cycle over whatever the
    /// channel holds at that moment.
    pub async fn start(self, shutdown: watch::Receiver<bool>) {
        let Self {
            dispatcher,
            flush_interval,
            mut tasks,
            wake_tx,
            mut wake_rx,
        } = self;

        info!(
            flush_interval_ms = flush_interval.as_millis() as u64,
            "starting batch deleter"
        );

        let ticker = run_ticker(wake_tx, flush_interval, shutdown.clone());
        let flusher = async {
            let mut shutdown = shutdown;
            loop {
                tokio::select! {
                    biased;
                    _ = stopped(&mut shutdown) => break,
                    woken = wake_rx.recv() => match woken {
                        Some(()) => dispatcher.flush_cycle(&mut tasks).await,
                        None => break,
                    },
                }
            }
            debug!("flush loop stopping, running final cycle");
            dispatcher.flush_cycle(&mut tasks).await;
        };

        tokio::join!(ticker, flusher);
        info!("batch deleter stopped");
    }
}

async fn run_ticker(wake: mpsc::Sender<()>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    // `interval_at` rejects a zero period and deadlines must fit in an `Instant`.
    let period = period.clamp(MIN_TICK_PERIOD, MAX_TICK_PERIOD);
    let now = Instant::now();
    let start = now.checked_add(period).unwrap_or(now);
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            _ = ticker.tick() => {
                trace!("flush tick");
                let _ = wake.try_send(());
            }
        }
    }
    debug!("flush ticker stopped");
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // An error means the sender is gone, which also ends the service lifetime.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

struct Dispatcher<S> {
    storage: Arc<S>,
    operation_timeout: Duration,
}

impl<S: Storage> Dispatcher<S> {
    async fn flush_cycle(&self, tasks: &mut mpsc::Receiver<DeleteTask>) {
        let drained = drain(tasks);
        if drained.is_empty() {
            trace!("nothing to flush");
            return;
        }

        let merged = coalesce(drained);
        debug!(users = merged.len(), "flushing delete tasks");

        for task in merged {
            let user_id = task.user_id.clone();
            match self.dispatch(task).await {
                Ok(count) => debug!(user_id = %user_id, count, "flushed delete task"),
                Err(err) => warn!(user_id = %user_id, error = %err, "failed to flush delete task"),
            }
        }
    }

    /// Deletes the shorts of one merged task that `task.user_id` owns.
    /// Returns how many shorts were handed to `delete_batch`.
    async fn dispatch(&self, task: DeleteTask) -> Result<usize> {
        let records = self
            .bounded("load_batch", self.storage.load_batch(&task.shorts))
            .await?;

        let owned = owned_shorts(&task.user_id, records);
        if owned.is_empty() {
            return Ok(0);
        }

        self.bounded("delete_batch", self.storage.delete_batch(&owned))
            .await?;
        Ok(owned.len())
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        timeout(self.operation_timeout, call)
            .await
            .map_err(|_| {
                StorageError::Timeout(format!(
                    "{operation} exceeded {}ms",
                    self.operation_timeout.as_millis()
                ))
            })?
    }
}

/// Receives every task currently buffered without waiting for more.
fn drain(tasks: &mut mpsc::Receiver<DeleteTask>) -> Vec<DeleteTask> {
    let mut drained = Vec::new();
    while let Ok(task) = tasks.try_recv() {
        drained.push(task);
    }
    drained
}

/// Merges tasks per user.
///
/// Users keep the order of their first task; each user's shorts keep arrival
/// order with repeats removed.
pub fn coalesce(tasks: impl IntoIterator<Item = DeleteTask>) -> Vec<DeleteTask> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<DeleteTask> = Vec::new();

    for task in tasks {
        match positions.get(&task.user_id) {
            Some(&position) => merged[position].shorts.extend(task.shorts),
            None => {
                positions.insert(task.user_id.clone(), merged.len());
                merged.push(task);
            }
        }
    }

    for task in &mut merged {
        let mut seen = HashSet::new();
        task.shorts.retain(|short| seen.insert(short.clone()));
    }

    merged
}

/// Keeps the shorts of records owned by `user_id`; logs the others.
fn owned_shorts(user_id: &str, records: Vec<Record>) -> Vec<String> {
    records
        .into_iter()
        .filter_map(|record| {
            if record.is_owned_by(user_id) {
                Some(record.short)
            } else {
                warn!(
                    user_id = %user_id,
                    short = %record.short,
                    owner = %record.user_id,
                    "user can't delete a record it does not own"
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStorage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use snipper_core::ServiceStats;

    /// Wraps the in-memory backend, recording `delete_batch` calls and
    /// failing any call that touches the short `"poison"`.
    #[derive(Default)]
    struct RecordingStorage {
        inner: InMemoryStorage,
        deletes: Mutex<Vec<Vec<String>>>,
        hang: bool,
    }

    impl RecordingStorage {
        fn with_records(records: Vec<Record>) -> Self {
            Self {
                inner: InMemoryStorage::with_records(records),
                ..Default::default()
            }
        }

        fn deletes(&self) -> Vec<Vec<String>> {
            self.deletes.lock().clone()
        }
    }

    #[async_trait]
    impl Storage for RecordingStorage {
        async fn store(&self, record: Record) -> Result<()> {
            self.inner.store(record).await
        }

        async fn store_batch(&self, records: Vec<Record>) -> Result<()> {
            self.inner.store_batch(records).await
        }

        async fn load(&self, short: &str) -> Result<Record> {
            self.inner.load(short).await
        }

        async fn load_batch(&self, shorts: &[String]) -> Result<Vec<Record>> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.inner.load_batch(shorts).await
        }

        async fn load_for_user(&self, user_id: &str) -> Result<Vec<Record>> {
            self.inner.load_for_user(user_id).await
        }

        async fn delete(&self, short: &str) -> Result<()> {
            self.inner.delete(short).await
        }

        async fn delete_batch(&self, shorts: &[String]) -> Result<()> {
            if shorts.iter().any(|short| short == "poison") {
                return Err(StorageError::Unavailable("poisoned batch".to_string()));
            }
            self.deletes.lock().push(shorts.to_vec());
            self.inner.delete_batch(shorts).await
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn stats(&self) -> Result<ServiceStats> {
            self.inner.stats().await
        }
    }

    fn record(short: &str, user_id: &str) -> Record {
        Record::new(short, format!("http://{short}.com"), user_id)
    }

    fn shorts(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn task(values: &[&str], user_id: &str) -> DeleteTask {
        DeleteTask::new(shorts(values), user_id)
    }

    fn quiet_config() -> DeleteQueueConfig {
        DeleteQueueConfig::builder()
            .flush_interval(Duration::from_secs(3600))
            .build()
    }

    async fn wait_until_deleted<S: Storage>(storage: &S, short: &str) {
        awaitility::at_most(Duration::from_secs(5))
            .poll_interval(Duration::from_millis(10))
            .until_async(|| async { storage.load(short).await.unwrap().deleted })
            .await;
    }

    #[test]
    fn coalesce_merges_tasks_of_the_same_user() {
        let merged = coalesce(vec![task(&["a", "b"], "u1"), task(&["b", "c"], "u1")]);

        assert_eq!(merged, vec![task(&["a", "b", "c"], "u1")]);
    }

    #[test]
    fn coalesce_keeps_users_apart_in_first_seen_order() {
        let merged = coalesce(vec![
            task(&["a"], "u2"),
            task(&["b"], "u1"),
            task(&["c"], "u2"),
        ]);

        assert_eq!(merged, vec![task(&["a", "c"], "u2"), task(&["b"], "u1")]);
    }

    #[test]
    fn owned_shorts_drops_foreign_records() {
        let owned = owned_shorts("u1", vec![record("a", "u1"), record("b", "u2")]);

        assert_eq!(owned, shorts(&["a"]));
    }

    #[test]
    fn default_config() {
        let config = DeleteQueueConfig::default();
        assert_eq!(config.buffer_size, 5);
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.operation_timeout, Duration::from_secs(30));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merged_tasks_are_dispatched_once() {
        let storage = Arc::new(RecordingStorage::with_records(vec![
            record("a", "u1"),
            record("b", "u1"),
            record("c", "u1"),
        ]));
        let (deleter, queue) = BatchDeleter::new(Arc::clone(&storage), quiet_config());
        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(deleter.start(shutdown));

        queue.enqueue(task(&["a", "b"], "u1")).await;
        queue.enqueue(task(&["b", "c"], "u1")).await;
        queue.flush_now();

        wait_until_deleted(storage.as_ref(), "c").await;
        assert_eq!(storage.deletes(), vec![shorts(&["a", "b", "c"])]);

        stop.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn foreign_shorts_survive_a_flush() {
        let storage = Arc::new(RecordingStorage::with_records(vec![
            record("mine", "u1"),
            record("theirs", "u2"),
        ]));
        let (deleter, queue) = BatchDeleter::new(Arc::clone(&storage), quiet_config());
        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(deleter.start(shutdown));

        queue
            .enqueue(task(&["mine", "theirs", "unknown"], "u1"))
            .await;
        queue.flush_now();

        wait_until_deleted(storage.as_ref(), "mine").await;
        assert!(!storage.load("theirs").await.unwrap().deleted);
        assert_eq!(storage.deletes(), vec![shorts(&["mine"])]);

        stop.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_channel_wakes_the_worker_early() {
        let storage = Arc::new(RecordingStorage::with_records(vec![
            record("a", "u1"),
            record("b", "u2"),
        ]));
        let config = DeleteQueueConfig::builder()
            .buffer_size(2)
            .flush_interval(Duration::from_secs(3600))
            .build();
        let (deleter, queue) = BatchDeleter::new(Arc::clone(&storage), config);
        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(deleter.start(shutdown));

        queue.queue_items(shorts(&["a"]), "u1");
        queue.queue_items(shorts(&["b"]), "u2");

        wait_until_deleted(storage.as_ref(), "a").await;
        wait_until_deleted(storage.as_ref(), "b").await;

        stop.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn huge_flush_interval_keeps_worker_alive() {
        let storage = Arc::new(RecordingStorage::with_records(vec![record("a", "u1")]));
        let config = DeleteQueueConfig::builder()
            .buffer_size(1)
            .flush_interval(Duration::from_secs(u64::MAX))
            .build();
        let (deleter, queue) = BatchDeleter::new(Arc::clone(&storage), config);
        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(deleter.start(shutdown));

        queue.enqueue(task(&["a"], "u1")).await;

        wait_until_deleted(storage.as_ref(), "a").await;
        assert!(!worker.is_finished());

        stop.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queue_items_returns_while_worker_is_stalled() {
        let storage = Arc::new(RecordingStorage::with_records(vec![
            record("a", "u1"),
            record("b", "u1"),
            record("c", "u1"),
        ]));
        let config = DeleteQueueConfig::builder()
            .buffer_size(1)
            .flush_interval(Duration::from_millis(20))
            .build();
        let (deleter, queue) = BatchDeleter::new(Arc::clone(&storage), config);

        // Nothing drains the channel yet, so all but the first send must wait.
        for short in ["a", "b", "c"] {
            queue.queue_items(shorts(&[short]), "u1");
        }
        tokio::task::yield_now().await;
        assert!(storage.deletes().is_empty());

        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(deleter.start(shutdown));

        for short in ["a", "b", "c"] {
            wait_until_deleted(storage.as_ref(), short).await;
        }

        stop.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ticker_flushes_without_pressure() {
        let storage = Arc::new(RecordingStorage::with_records(vec![record("a", "u1")]));
        let config = DeleteQueueConfig::builder()
            .flush_interval(Duration::from_millis(20))
            .build();
        let (deleter, queue) = BatchDeleter::new(Arc::clone(&storage), config);
        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(deleter.start(shutdown));

        queue.queue_items(shorts(&["a"]), "u1");

        wait_until_deleted(storage.as_ref(), "a").await;

        stop.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn one_failing_user_does_not_block_others() {
        let storage = Arc::new(RecordingStorage::with_records(vec![
            record("poison", "u1"),
            record("fine", "u2"),
        ]));
        let (deleter, queue) = BatchDeleter::new(Arc::clone(&storage), quiet_config());
        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(deleter.start(shutdown));

        queue.enqueue(task(&["poison"], "u1")).await;
        queue.enqueue(task(&["fine"], "u2")).await;
        queue.flush_now();

        wait_until_deleted(storage.as_ref(), "fine").await;
        assert!(!storage.load("poison").await.unwrap().deleted);

        stop.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_worker_after_final_flush() {
        let storage = Arc::new(RecordingStorage::with_records(vec![record("a", "u1")]));
        let (deleter, queue) = BatchDeleter::new(Arc::clone(&storage), quiet_config());
        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(deleter.start(shutdown));

        queue.enqueue(task(&["a"], "u1")).await;
        stop.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker should stop on shutdown")
            .unwrap();
        assert!(storage.load("a").await.unwrap().deleted);
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_stops_worker() {
        let storage = Arc::new(RecordingStorage::default());
        let (deleter, _queue) = BatchDeleter::new(storage, quiet_config());
        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(deleter.start(shutdown));

        drop(stop);

        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker should stop when the sender is dropped")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_storage_call_times_out() {
        let storage = Arc::new(RecordingStorage {
            hang: true,
            ..Default::default()
        });
        let dispatcher = Dispatcher {
            storage,
            operation_timeout: Duration::from_secs(30),
        };

        let err = dispatcher.dispatch(task(&["a"], "u1")).await.unwrap_err();

        assert!(matches!(err, StorageError::Timeout(_)));
    }
}
