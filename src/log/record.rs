//! Records read from and written to the backing topic.

use thiserror::Error;

/// One record of the backing topic.
///
/// A record without a value is a tombstone: after compaction it erases
/// every earlier record with the same key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Position in the topic. Strictly increasing, may have gaps after compaction.
    pub offset: u64,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    /// Record headers (writer epoch, tracing ids, ...).
    pub headers: Vec<(String, String)>,
}

impl LogRecord {
    pub fn new(offset: u64, key: Vec<u8>, value: Option<Vec<u8>>) -> Self {
        Self {
            offset,
            key,
            value,
            headers: Vec::new(),
        }
    }

    /// Add a header to the record.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header value with the given name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// The key as text (if valid UTF-8).
    pub fn key_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.key).ok()
    }
}

/// Errors from the backing topic collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// The broker cannot be reached. Transient; callers retry with backoff.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// The topic no longer exists. Unrecoverable without a restart.
    #[error("topic deleted: {0}")]
    TopicDeleted(String),
    #[error("offset {requested} out of range (log starts at {begin})")]
    OffsetOutOfRange { requested: u64, begin: u64 },
    #[error("log error: {0}")]
    Other(String),
}

impl LogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LogError::Unavailable(_) | LogError::OffsetOutOfRange { .. })
    }
}
