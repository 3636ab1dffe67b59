use super::LogError;

/// Appends records to the backing topic.
///
/// Implementations might include:
/// - `InMemoryLog` - for tests and single-process deployments
/// - a Kafka producer with `acks=all` on a compacted topic
pub trait LogProducer: Send + Sync {
    /// Append one record and return the offset it was written at.
    ///
    /// The record is durable once this returns `Ok`.
    fn append(
        &self,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
        headers: Vec<(String, String)>,
    ) -> Result<u64, LogError>;
}
