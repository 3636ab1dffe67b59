//! LogReplicator - the background thread that replays the backing topic
//! into the `SchemaStore`.
//!
//! ```text
//!             subscribe (watermarks, seek)
//!   start ──> CATCHING_UP ──caught up──> LIVE
//!                 ^  │                     │
//!                 │  └── topic deleted ──> STOPPED <── stop()
//!                 └──── broker lost ───────┘
//! ```
//!
//! The replicator is the only caller of `SchemaStore::apply`. Records are
//! applied one at a time in offset order; batching only affects how many
//! are fetched per poll. Progress is published through the store's
//! `OffsetWatcher`, which is what `wait_until_replicated` blocks on.

mod offset_watcher;

pub use offset_watcher::{OffsetWatcher, OFFSET_EMPTY, OFFSET_UNINITIALIZED};

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::log::{LogConsumer, LogError};
use crate::store::{ApplyOutcome, Checkpoint, CheckpointStore, SchemaStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorState {
    CatchingUp,
    Live,
    Stopped,
}

/// Statistics from the replicator thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplicatorStats {
    pub records_applied: u64,
    pub records_skipped: u64,
    pub reconnects: u64,
    pub checkpoints_saved: u64,
}

/// Whether a replica at `current` has read everything up to the end
/// watermark `end` (the offset the next record will get).
pub fn is_caught_up(current: i64, end: u64) -> bool {
    if current == OFFSET_UNINITIALIZED {
        return false;
    }
    end == 0 || current >= end as i64 - 1
}

struct Progress {
    state: ReplicatorState,
    current: i64,
    /// End watermark captured when the current subscription started.
    end: u64,
}

struct Shared {
    progress: Mutex<Progress>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ReplicatorState) {
        let mut progress = self.lock();
        if progress.state != state {
            tracing::info!(from = ?progress.state, to = ?state, "replicator state changed");
            progress.state = state;
            self.changed.notify_all();
        }
    }
}

/// Read-only view of replication progress, shared with the write path.
#[derive(Clone)]
pub struct ReplicationStatus {
    shared: Arc<Shared>,
    watcher: Arc<OffsetWatcher>,
}

impl ReplicationStatus {
    pub fn state(&self) -> ReplicatorState {
        self.shared.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ReplicatorState::Live
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ReplicatorState::Stopped
    }

    /// Offset of the last record consumed, or one of the sentinels.
    pub fn current_offset(&self) -> i64 {
        self.shared.lock().current
    }

    /// Block until the replicator is LIVE.
    ///
    /// Fails with `Stopped` if it stopped instead, or `NotReady` on timeout.
    pub fn wait_until_live(&self, timeout: Duration) -> RegistryResult<()> {
        let deadline = Instant::now() + timeout;
        let mut progress = self.shared.lock();
        loop {
            match progress.state {
                ReplicatorState::Live => return Ok(()),
                ReplicatorState::Stopped => return Err(RegistryError::Stopped),
                ReplicatorState::CatchingUp => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RegistryError::NotReady);
            }
            let (guard, _) = self
                .shared
                .changed
                .wait_timeout(progress, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            progress = guard;
        }
    }

    /// Block until the record at `offset` has been applied to the store.
    ///
    /// A timeout does not mean the record is lost; it was appended and will
    /// be applied once the replicator gets to it.
    pub fn wait_until_replicated(&self, offset: u64, timeout: Duration) -> RegistryResult<()> {
        // read before the state so a stop in between still wakes us
        let interrupts = self.watcher.interrupts();
        if self.watcher.greatest_offset() >= offset as i64 {
            return Ok(());
        }
        if self.is_stopped() {
            return Err(RegistryError::Stopped);
        }
        if self.watcher.wait_for_offset_since(offset, timeout, interrupts) {
            Ok(())
        } else if self.is_stopped() {
            Err(RegistryError::Stopped)
        } else {
            Err(RegistryError::ReplicationTimeout {
                offset,
                waited_ms: timeout.as_millis() as u64,
            })
        }
    }
}

#[derive(Clone)]
struct Settings {
    topic: String,
    poll_timeout_ms: u64,
    batch_on_startup: usize,
    batch_after_startup: usize,
    backoff: Duration,
    backoff_max: Duration,
    checkpoint_interval: u64,
}

impl From<&RegistryConfig> for Settings {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            topic: config.topic_name.clone(),
            poll_timeout_ms: config.poll_timeout_ms,
            batch_on_startup: config.max_records_on_startup,
            batch_after_startup: config.max_records_after_startup,
            backoff: Duration::from_millis(config.reconnect_backoff_ms),
            backoff_max: Duration::from_millis(config.reconnect_backoff_max_ms),
            checkpoint_interval: config.checkpoint_interval,
        }
    }
}

/// The background replay thread.
///
/// ## Example
///
/// ```
/// use schema_log::log::InMemoryLog;
/// use schema_log::replicator::LogReplicator;
/// use schema_log::store::SchemaStore;
/// use schema_log::RegistryConfig;
/// use std::time::Duration;
///
/// let topic = InMemoryLog::new("_schemas");
/// let store = SchemaStore::default();
/// let replicator = LogReplicator::spawn(topic.new_consumer(), store, &RegistryConfig::default());
///
/// replicator.status().wait_until_live(Duration::from_secs(5)).unwrap();
/// let stats = replicator.stop();
/// assert_eq!(stats.records_applied, 0);
/// ```
pub struct LogReplicator {
    status: ReplicationStatus,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<ReplicatorStats>>,
}

impl LogReplicator {
    /// Spawn a replicator that replays the whole retained topic.
    pub fn spawn<C>(consumer: C, store: SchemaStore, config: &RegistryConfig) -> Self
    where
        C: LogConsumer + 'static,
    {
        Self::spawn_with_checkpoints(consumer, store, config, None)
    }

    /// Spawn a replicator that resumes from, and periodically writes,
    /// store checkpoints.
    pub fn spawn_with_checkpoints<C>(
        consumer: C,
        store: SchemaStore,
        config: &RegistryConfig,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
    ) -> Self
    where
        C: LogConsumer + 'static,
    {
        let (stop_tx, stop_rx) = channel();
        let status = ReplicationStatus {
            shared: Arc::new(Shared {
                progress: Mutex::new(Progress {
                    state: ReplicatorState::CatchingUp,
                    current: OFFSET_UNINITIALIZED,
                    end: 0,
                }),
                changed: Condvar::new(),
            }),
            watcher: store.watcher(),
        };

        let worker = Worker {
            consumer,
            store,
            shared: Arc::clone(&status.shared),
            settings: Settings::from(config),
            checkpoints,
            stop_rx,
            stats: ReplicatorStats::default(),
            since_checkpoint: 0,
        };
        let handle = thread::spawn(move || worker.run());

        Self {
            status,
            stop_tx,
            handle: Some(handle),
        }
    }

    pub fn status(&self) -> ReplicationStatus {
        self.status.clone()
    }

    /// Signal the replicator to stop and wait for it to finish.
    pub fn stop(mut self) -> ReplicatorStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            ReplicatorStats::default()
        }
    }

    /// Signal the replicator to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for LogReplicator {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

struct Worker<C> {
    consumer: C,
    store: SchemaStore,
    shared: Arc<Shared>,
    settings: Settings,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    stop_rx: Receiver<()>,
    stats: ReplicatorStats,
    since_checkpoint: u64,
}

impl<C: LogConsumer> Worker<C> {
    fn run(mut self) -> ReplicatorStats {
        self.restore_checkpoint();

        let mut backoff = self.settings.backoff;
        let mut subscribed = false;
        loop {
            match self.stop_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            let step = if subscribed {
                self.poll_once()
            } else {
                self.subscribe()
            };
            match step {
                Ok(()) => {
                    subscribed = true;
                    backoff = self.settings.backoff;
                }
                Err(LogError::TopicDeleted(topic)) => {
                    tracing::error!(topic = %topic, "backing topic deleted, replicator stopped");
                    break;
                }
                Err(err) => {
                    subscribed = false;
                    self.stats.reconnects += 1;
                    self.shared.set_state(ReplicatorState::CatchingUp);
                    tracing::warn!(
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "lost the backing topic, resubscribing"
                    );
                    match self.stop_rx.recv_timeout(backoff) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    backoff = (backoff * 2).min(self.settings.backoff_max);
                }
            }
        }

        self.save_checkpoint();
        self.shared.set_state(ReplicatorState::Stopped);
        self.store.watcher().interrupt();
        self.stats
    }

    /// Resolve the watermarks and position the consumer after the last
    /// applied record.
    fn subscribe(&mut self) -> Result<(), LogError> {
        let (begin, end) = self.consumer.watermarks()?;
        let applied = self.store.offset().map_err(store_error)?;
        if applied != OFFSET_EMPTY && applied + 1 < begin as i64 {
            tracing::warn!(
                applied,
                begin,
                "records were removed by retention before they were replicated"
            );
        }
        let next = (applied + 1).max(begin as i64) as u64;
        self.consumer.seek(next)?;

        let caught_up = {
            let mut progress = self.shared.lock();
            progress.current = applied.max(begin as i64 - 1);
            progress.end = end;
            is_caught_up(progress.current, end)
        };
        tracing::info!(
            topic = %self.settings.topic,
            begin,
            end,
            from = next,
            "subscribed to backing topic"
        );
        if caught_up {
            self.shared.set_state(ReplicatorState::Live);
        }
        Ok(())
    }

    fn poll_once(&mut self) -> Result<(), LogError> {
        let live = self.shared.lock().state == ReplicatorState::Live;
        let max_records = if live {
            self.settings.batch_after_startup
        } else {
            self.settings.batch_on_startup
        };

        let records = self.consumer.poll(max_records, self.settings.poll_timeout_ms)?;
        for record in &records {
            match self.store.apply(record).map_err(store_error)? {
                ApplyOutcome::Applied | ApplyOutcome::Unchanged => self.stats.records_applied += 1,
                ApplyOutcome::Skipped(_) => self.stats.records_skipped += 1,
                ApplyOutcome::AlreadyApplied => continue,
            }
            self.shared.lock().current = record.offset as i64;

            self.since_checkpoint += 1;
            if self.settings.checkpoint_interval > 0
                && self.since_checkpoint >= self.settings.checkpoint_interval
            {
                self.save_checkpoint();
            }
        }

        if !live {
            let position = self.consumer.position()?;
            let caught_up = {
                let progress = self.shared.lock();
                is_caught_up(progress.current, progress.end) || position >= progress.end
            };
            if caught_up {
                self.shared.set_state(ReplicatorState::Live);
            }
        }
        Ok(())
    }

    fn restore_checkpoint(&mut self) {
        let Some(checkpoints) = &self.checkpoints else {
            return;
        };
        match checkpoints.load(&self.settings.topic) {
            Ok(Some(checkpoint)) => match self.store.restore(&checkpoint.data) {
                Ok(offset) => tracing::info!(offset, "restored store checkpoint"),
                Err(err) => tracing::warn!(error = %err, "unusable checkpoint, replaying from the start"),
            },
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "failed to load checkpoint"),
        }
    }

    fn save_checkpoint(&mut self) {
        let Some(checkpoints) = &self.checkpoints else {
            return;
        };
        if self.since_checkpoint == 0 {
            return;
        }
        let saved = self.store.snapshot().and_then(|(offset, data)| {
            checkpoints.save(Checkpoint {
                topic: self.settings.topic.clone(),
                offset,
                data,
            })
        });
        match saved {
            Ok(()) => {
                self.stats.checkpoints_saved += 1;
                self.since_checkpoint = 0;
            }
            Err(err) => tracing::warn!(error = %err, "failed to save checkpoint"),
        }
    }
}

fn store_error(err: RegistryError) -> LogError {
    LogError::Other(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{InMemoryLog, LogProducer};
    use crate::record::{RegistryRecord, SchemaRegistration};
    use crate::store::InMemoryCheckpointStore;
    use crate::types::{SchemaType, VersionSpec};

    fn config() -> RegistryConfig {
        RegistryConfig {
            poll_timeout_ms: 5,
            reconnect_backoff_ms: 5,
            reconnect_backoff_max_ms: 20,
            ..RegistryConfig::default()
        }
    }

    fn register(log: &InMemoryLog, subject: &str, version: u32, id: u32) -> u64 {
        let record = RegistryRecord::RegisterSchema(SchemaRegistration {
            subject: subject.into(),
            version,
            id,
            schema: format!(r#"{{"type":"fixed","name":"F{}","size":{}}}"#, id, id),
            schema_type: SchemaType::Avro,
            references: Vec::new(),
            deleted: false,
        });
        let (key, value) = record.encode().unwrap();
        log.append(key, value, Vec::new()).unwrap()
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn readiness_rule() {
        assert!(!is_caught_up(OFFSET_UNINITIALIZED, 0));
        assert!(is_caught_up(OFFSET_EMPTY, 0));
        assert!(!is_caught_up(OFFSET_EMPTY, 1));
        assert!(is_caught_up(4, 5));
        assert!(!is_caught_up(3, 5));
        // ahead of the end captured at subscription
        assert!(is_caught_up(9, 5));
    }

    #[test]
    fn empty_topic_goes_live_immediately() {
        let log = InMemoryLog::new("_schemas");
        let replicator = LogReplicator::spawn(log.new_consumer(), SchemaStore::default(), &config());
        replicator.status().wait_until_live(WAIT).unwrap();
        assert_eq!(replicator.status().current_offset(), OFFSET_EMPTY);
        replicator.stop();
    }

    #[test]
    fn replays_then_follows_the_topic() {
        let log = InMemoryLog::new("_schemas");
        register(&log, "s", 1, 1);
        register(&log, "s", 2, 2);

        let store = SchemaStore::default();
        let replicator = LogReplicator::spawn(log.new_consumer(), store.clone(), &config());
        let status = replicator.status();
        status.wait_until_live(WAIT).unwrap();
        assert_eq!(store.list_versions("s", false).unwrap(), vec![1, 2]);

        let offset = register(&log, "s", 3, 3);
        status.wait_until_replicated(offset, WAIT).unwrap();
        assert_eq!(store.lookup("s", VersionSpec::Latest).unwrap().version, 3);

        let stats = replicator.stop();
        assert_eq!(stats.records_applied, 3);
        assert_eq!(status.state(), ReplicatorState::Stopped);
    }

    #[test]
    fn compacted_tail_still_reaches_live() {
        let log = InMemoryLog::new("_schemas");
        register(&log, "s", 1, 1);
        let (key, _) = RegistryRecord::Noop.encode().unwrap();
        log.append(key.clone(), Some(b"{}".to_vec()), Vec::new()).unwrap();
        log.append(key, None, Vec::new()).unwrap();
        log.compact(true);

        let replicator = LogReplicator::spawn(log.new_consumer(), SchemaStore::default(), &config());
        replicator.status().wait_until_live(WAIT).unwrap();
        replicator.stop();
    }

    #[test]
    fn wait_until_replicated_times_out() {
        let log = InMemoryLog::new("_schemas");
        let replicator = LogReplicator::spawn(log.new_consumer(), SchemaStore::default(), &config());
        let status = replicator.status();
        status.wait_until_live(WAIT).unwrap();
        assert_eq!(
            status.wait_until_replicated(7, Duration::from_millis(20)),
            Err(RegistryError::ReplicationTimeout {
                offset: 7,
                waited_ms: 20
            })
        );
        replicator.stop();
    }

    #[test]
    fn reconnects_after_broker_loss() {
        let log = InMemoryLog::new("_schemas");
        let store = SchemaStore::default();
        let replicator = LogReplicator::spawn(log.new_consumer(), store.clone(), &config());
        let status = replicator.status();
        status.wait_until_live(WAIT).unwrap();

        log.set_available(false);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(status.state(), ReplicatorState::CatchingUp);

        log.set_available(true);
        let offset = register(&log, "s", 1, 1);
        status.wait_until_replicated(offset, WAIT).unwrap();
        status.wait_until_live(WAIT).unwrap();

        let stats = replicator.stop();
        assert!(stats.reconnects >= 1);
        assert_eq!(stats.records_applied, 1);
    }

    #[test]
    fn deleted_topic_stops_the_replicator() {
        let log = InMemoryLog::new("_schemas");
        let replicator = LogReplicator::spawn(log.new_consumer(), SchemaStore::default(), &config());
        let status = replicator.status();
        status.wait_until_live(WAIT).unwrap();

        log.delete_topic();
        let deadline = Instant::now() + WAIT;
        while !status.is_stopped() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(status.is_stopped());
        assert_eq!(status.wait_until_live(WAIT), Err(RegistryError::Stopped));
        assert_eq!(
            status.wait_until_replicated(0, WAIT),
            Err(RegistryError::Stopped)
        );
        replicator.stop();
    }

    #[test]
    fn stopping_wakes_writers_waiting_for_replication() {
        let log = InMemoryLog::new("_schemas");
        let replicator = LogReplicator::spawn(log.new_consumer(), SchemaStore::default(), &config());
        let status = replicator.status();
        status.wait_until_live(WAIT).unwrap();

        let waiter = {
            let status = status.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let result = status.wait_until_replicated(42, Duration::from_secs(30));
                (result, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        log.delete_topic();

        let (result, waited) = waiter.join().unwrap();
        assert_eq!(result, Err(RegistryError::Stopped));
        assert!(waited < WAIT);
        replicator.stop();
    }

    #[test]
    fn resumes_from_a_checkpoint() {
        let log = InMemoryLog::new("_schemas");
        register(&log, "s", 1, 1);
        register(&log, "s", 2, 2);

        let checkpoints = InMemoryCheckpointStore::new();
        let config = RegistryConfig {
            checkpoint_interval: 1,
            ..config()
        };

        let first = LogReplicator::spawn_with_checkpoints(
            log.new_consumer(),
            SchemaStore::default(),
            &config,
            Some(Arc::new(checkpoints.clone())),
        );
        first.status().wait_until_live(WAIT).unwrap();
        let stats = first.stop();
        assert!(stats.checkpoints_saved >= 1);
        assert_eq!(checkpoints.load("_schemas").unwrap().unwrap().offset, 1);

        register(&log, "s", 3, 3);
        let store = SchemaStore::default();
        let second = LogReplicator::spawn_with_checkpoints(
            log.new_consumer(),
            store.clone(),
            &config,
            Some(Arc::new(checkpoints.clone())),
        );
        second.status().wait_until_replicated(2, WAIT).unwrap();
        assert_eq!(store.list_versions("s", false).unwrap(), vec![1, 2, 3]);
        // only the record after the checkpoint was replayed
        assert_eq!(second.stop().records_applied, 1);
    }
}
