pub mod config;
pub mod dialect;
pub mod handle;
pub mod registry;
pub mod rows;

pub use config::ConnectionConfig;
pub use dialect::{BackendAdapter, Dialect, GenericAdapter, PostgresAdapter, SqliteAdapter};
pub use handle::{PoolHandle, PoolStats, TestResult};
pub use registry::{ConnectionInfo, ConnectionRegistry, RegistryOptions, RegistrySummary};
pub use rows::{Cell, Record};
