mod config;
mod migrations;
mod pool;
mod queue;
mod registry;

pub use config::PostgresConfig;
pub use migrations::run_migrations;
pub use pool::connect;
pub use queue::PostgresQueueStore;
pub use registry::PostgresRegistry;
