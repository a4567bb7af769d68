//! Infrastructure for the procurement core: configuration, schema
//! provisioning, the store backends and the application services built on them.

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod notify;
pub mod services;
pub mod store;

pub use audit::AuditEntry;
pub use config::{Config, ConfigError};
pub use db::ReadyPool;
pub use error::{ServiceError, StoreError};
pub use notify::{NotificationSink, RecordingNotifier, TracingNotifier};
pub use services::{Procura, ServiceResult};
pub use store::{InMemoryStore, PostgresStore, ProcuraStore};
