//! Partitioned BPMN process engine core with live process-instance migration.
//!
//! A [`partition::Partition`] owns an [`store::EngineStore`] and applies
//! [`command::Command`]s one at a time. Lifecycle commands drive instances
//! through [`engine`]; `MIGRATE_PROCESS_INSTANCE` moves a running instance
//! onto another deployed definition through [`migration`].

pub mod broker;
pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod expression;
pub mod keys;
pub mod migration;
pub mod model;
pub mod partition;
pub mod processor;
pub mod store;
pub mod store_memory;
pub mod subscription;
pub mod types;

pub use broker::Broker;
pub use command::{Command, CommandEnvelope, CommandResponse};
pub use config::{ConfigError, EngineConfig};
pub use error::{ProcessingError, Rejection, RejectionType};
pub use events::{Intent, Record, RecordValue, ValueType};
pub use migration::{MappingInstruction, ProcessInstanceMigration};
pub use model::{ProcessModel, ProcessModelProvider, ProcessRepository};
pub use partition::{Partition, PartitionHandle};
pub use store::EngineStore;
pub use store_memory::MemoryStore;
