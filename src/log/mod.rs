//! Backing log - the compacted topic that is the registry's only durable state.
//!
//! The registry never talks to a broker client directly. It appends through
//! a `LogProducer` and replays through a `LogConsumer`; an in-memory topic
//! is included for tests and single-process deployments.
//!
//! ```text
//! MutationGateway --append--> ┌──────────────────────┐
//!                             │  topic "_schemas"    │  offsets 0..end
//! LogReplicator  <--poll----- └──────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use schema_log::log::{InMemoryLog, LogConsumer, LogProducer};
//!
//! let topic = InMemoryLog::new("_schemas");
//! let offset = topic.append(b"k".to_vec(), Some(b"v".to_vec()), Vec::new()).unwrap();
//! assert_eq!(offset, 0);
//!
//! let consumer = topic.new_consumer();
//! let records = consumer.poll(10, 10).unwrap();
//! assert_eq!(records[0].key, b"k");
//! ```

mod consumer;
mod in_memory;
mod producer;
mod record;

pub use consumer::LogConsumer;
pub use in_memory::InMemoryLog;
pub use producer::LogProducer;
pub use record::{LogError, LogRecord};
