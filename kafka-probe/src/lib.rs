pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod offsets;
pub mod probe;
pub mod producer;
pub mod types;

// Re-export main modules for library users
pub use config::KafkaConfig;
pub use error::{CloseError, ConnectionError, ProduceError};
pub use probe::KafkaProbe;
pub use producer::{CounterSnapshot, DeliveryReport, MessageId, SendReport, Submission};
pub use types::{LagReport, Message, OffsetRecord, PartitionLag};
