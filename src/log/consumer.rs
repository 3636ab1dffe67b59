use super::{LogError, LogRecord};

/// Reads the backing topic in offset order.
///
/// Pull-based, like the broker consumers it stands in for. Each consumer
/// owns its read position.
pub trait LogConsumer: Send + Sync {
    /// Move the read position so the next poll starts at `offset`.
    fn seek(&self, offset: u64) -> Result<(), LogError>;

    /// Poll up to `max_records` records, blocking until at least one is
    /// available or the timeout elapses (then returns an empty batch).
    fn poll(&self, max_records: usize, timeout_ms: u64) -> Result<Vec<LogRecord>, LogError>;

    /// Offset the next poll starts at. Moves past compacted gaps once the
    /// consumer has read everything retained.
    fn position(&self) -> Result<u64, LogError>;

    /// `(begin, end)` watermarks: the first retained offset and the offset
    /// the next appended record will receive.
    fn watermarks(&self) -> Result<(u64, u64), LogError>;
}
