//! In-memory topic for testing and single-process deployments.
//!
//! Behaves like a single-partition compacted topic: offsets are assigned
//! on append, consumers keep their own position, and compaction keeps only
//! the latest record per key. Broker outages and topic deletion can be
//! injected to exercise the replicator's recovery paths.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use super::{LogConsumer, LogError, LogProducer, LogRecord};

struct TopicState {
    name: String,
    records: Vec<LogRecord>,
    begin_offset: u64,
    next_offset: u64,
    available: bool,
    deleted: bool,
}

impl TopicState {
    fn check(&self) -> Result<(), LogError> {
        if self.deleted {
            return Err(LogError::TopicDeleted(self.name.clone()));
        }
        if !self.available {
            return Err(LogError::Unavailable(format!(
                "topic {} is unreachable",
                self.name
            )));
        }
        Ok(())
    }
}

/// In-memory compacted topic.
///
/// Features:
/// - Thread-safe (can be shared across threads via `Clone`)
/// - Independent consumers via `new_consumer()`
/// - `compact()` / `truncate_before()` to model retention
/// - `set_available()` / `delete_topic()` to model broker failures
#[derive(Clone)]
pub struct InMemoryLog {
    topic: Arc<RwLock<TopicState>>,
    /// Next offset this consumer will read.
    position: Arc<Mutex<u64>>,
}

impl InMemoryLog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            topic: Arc::new(RwLock::new(TopicState {
                name: name.into(),
                records: Vec::new(),
                begin_offset: 0,
                next_offset: 0,
                available: true,
                deleted: false,
            })),
            position: Arc::new(Mutex::new(0)),
        }
    }

    /// Create a consumer that shares the same topic but has its own position.
    pub fn new_consumer(&self) -> Self {
        Self {
            topic: Arc::clone(&self.topic),
            position: Arc::new(Mutex::new(0)),
        }
    }

    pub fn name(&self) -> String {
        self.topic
            .read()
            .map(|t| t.name.clone())
            .unwrap_or_default()
    }

    /// All retained records in offset order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.topic
            .read()
            .map(|t| t.records.clone())
            .unwrap_or_default()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.topic.read().map(|t| t.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset the next appended record will receive.
    pub fn end_offset(&self) -> u64 {
        self.topic.read().map(|t| t.next_offset).unwrap_or(0)
    }

    /// Current read position of this consumer.
    pub fn current_position(&self) -> u64 {
        self.position.lock().map(|p| *p).unwrap_or(0)
    }

    /// Keep only the latest record per key, like log compaction.
    ///
    /// Tombstones are kept unless `purge_tombstones` is set, in which case
    /// they are dropped together with the records they erased.
    pub fn compact(&self, purge_tombstones: bool) {
        let Ok(mut topic) = self.topic.write() else {
            return;
        };
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        let mut kept: Vec<LogRecord> = Vec::with_capacity(topic.records.len());
        for record in topic.records.iter().rev() {
            if !seen.insert(record.key.clone()) {
                continue;
            }
            if purge_tombstones && record.is_tombstone() {
                continue;
            }
            kept.push(record.clone());
        }
        kept.reverse();
        topic.records = kept;
    }

    /// Drop every record below `offset`, like time/size based retention.
    pub fn truncate_before(&self, offset: u64) {
        if let Ok(mut topic) = self.topic.write() {
            topic.records.retain(|r| r.offset >= offset);
            topic.begin_offset = topic.begin_offset.max(offset.min(topic.next_offset));
        }
    }

    /// Simulate the broker going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        if let Ok(mut topic) = self.topic.write() {
            topic.available = available;
        }
    }

    /// Delete the topic. Every later call fails with `TopicDeleted`.
    pub fn delete_topic(&self) {
        if let Ok(mut topic) = self.topic.write() {
            topic.deleted = true;
            topic.records.clear();
        }
    }

    fn poisoned() -> LogError {
        LogError::Other("in-memory topic lock poisoned".into())
    }
}

impl LogProducer for InMemoryLog {
    fn append(
        &self,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
        headers: Vec<(String, String)>,
    ) -> Result<u64, LogError> {
        let mut topic = self.topic.write().map_err(|_| Self::poisoned())?;
        topic.check()?;
        let offset = topic.next_offset;
        topic.records.push(LogRecord {
            offset,
            key,
            value,
            headers,
        });
        topic.next_offset += 1;
        Ok(offset)
    }
}

impl LogConsumer for InMemoryLog {
    fn seek(&self, offset: u64) -> Result<(), LogError> {
        let mut position = self.position.lock().map_err(|_| Self::poisoned())?;
        *position = offset;
        Ok(())
    }

    fn poll(&self, max_records: usize, timeout_ms: u64) -> Result<Vec<LogRecord>, LogError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let max_records = max_records.max(1);

        loop {
            {
                let topic = self.topic.read().map_err(|_| Self::poisoned())?;
                topic.check()?;
                let mut position = self.position.lock().map_err(|_| Self::poisoned())?;

                let start = topic.records.partition_point(|r| r.offset < *position);
                if start < topic.records.len() {
                    let batch: Vec<LogRecord> = topic.records[start..]
                        .iter()
                        .take(max_records)
                        .cloned()
                        .collect();
                    if let Some(last) = batch.last() {
                        *position = last.offset + 1;
                    }
                    return Ok(batch);
                }
                // nothing retained past the position: skip the compacted tail
                *position = (*position).max(topic.next_offset);
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            // Small sleep to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn position(&self) -> Result<u64, LogError> {
        let position = self.position.lock().map_err(|_| Self::poisoned())?;
        Ok(*position)
    }

    fn watermarks(&self) -> Result<(u64, u64), LogError> {
        let topic = self.topic.read().map_err(|_| Self::poisoned())?;
        topic.check()?;
        Ok((topic.begin_offset, topic.next_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(log: &InMemoryLog, key: &str, value: Option<&str>) -> u64 {
        log.append(
            key.as_bytes().to_vec(),
            value.map(|v| v.as_bytes().to_vec()),
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn append_assigns_sequential_offsets() {
        let log = InMemoryLog::new("_schemas");
        assert_eq!(append(&log, "a", Some("1")), 0);
        assert_eq!(append(&log, "b", Some("2")), 1);
        assert_eq!(log.watermarks().unwrap(), (0, 2));
    }

    #[test]
    fn poll_timeout_when_empty() {
        let log = InMemoryLog::new("_schemas");
        assert!(log.poll(10, 5).unwrap().is_empty());
    }

    #[test]
    fn poll_respects_batch_size_and_position() {
        let log = InMemoryLog::new("_schemas");
        for i in 0..5 {
            append(&log, &format!("k{}", i), Some("v"));
        }

        let consumer = log.new_consumer();
        let first = consumer.poll(2, 10).unwrap();
        assert_eq!(first.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![0, 1]);
        let rest = consumer.poll(10, 10).unwrap();
        assert_eq!(rest.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(consumer.current_position(), 5);
    }

    #[test]
    fn consumers_are_independent() {
        let log = InMemoryLog::new("_schemas");
        append(&log, "a", Some("1"));

        let c1 = log.new_consumer();
        let c2 = log.new_consumer();
        assert_eq!(c1.poll(10, 10).unwrap().len(), 1);
        assert_eq!(c2.poll(10, 10).unwrap().len(), 1);
    }

    #[test]
    fn seek_rewinds() {
        let log = InMemoryLog::new("_schemas");
        append(&log, "a", Some("1"));
        append(&log, "b", Some("2"));

        let consumer = log.new_consumer();
        consumer.poll(10, 10).unwrap();
        consumer.seek(1).unwrap();
        let again = consumer.poll(10, 10).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].offset, 1);
    }

    #[test]
    fn compaction_keeps_latest_per_key_and_preserves_offsets() {
        let log = InMemoryLog::new("_schemas");
        append(&log, "a", Some("1"));
        append(&log, "b", Some("1"));
        append(&log, "a", Some("2"));
        append(&log, "b", None);

        log.compact(false);
        let records = log.records();
        assert_eq!(records.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![2, 3]);
        assert!(records[1].is_tombstone());

        log.compact(true);
        let records = log.records();
        assert_eq!(records.len(), 1);

        let consumer = log.new_consumer();
        assert_eq!(consumer.poll(10, 5).unwrap().len(), 1);
        assert_eq!(consumer.position().unwrap(), 3);
        assert!(consumer.poll(10, 5).unwrap().is_empty());
        assert_eq!(consumer.position().unwrap(), 4);
        assert_eq!(records[0].value.as_deref(), Some(&b"2"[..]));
        // compaction never moves the watermarks
        assert_eq!(log.watermarks().unwrap(), (0, 4));
    }

    #[test]
    fn truncation_moves_begin_offset() {
        let log = InMemoryLog::new("_schemas");
        for i in 0..4 {
            append(&log, &format!("k{}", i), Some("v"));
        }
        log.truncate_before(3);
        assert_eq!(log.watermarks().unwrap(), (3, 4));

        let consumer = log.new_consumer();
        let records = consumer.poll(10, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].offset, 3);
    }

    #[test]
    fn unavailable_broker_fails_calls_until_restored() {
        let log = InMemoryLog::new("_schemas");
        log.set_available(false);
        assert!(matches!(
            log.append(b"k".to_vec(), None, Vec::new()),
            Err(LogError::Unavailable(_))
        ));
        assert!(matches!(log.poll(1, 1), Err(LogError::Unavailable(_))));

        log.set_available(true);
        assert!(log.append(b"k".to_vec(), None, Vec::new()).is_ok());
    }

    #[test]
    fn deleted_topic_is_permanent() {
        let log = InMemoryLog::new("_schemas");
        append(&log, "a", Some("1"));
        log.delete_topic();
        assert_eq!(
            log.watermarks(),
            Err(LogError::TopicDeleted("_schemas".into()))
        );
        log.set_available(true);
        assert!(matches!(log.poll(1, 1), Err(LogError::TopicDeleted(_))));
    }
}
