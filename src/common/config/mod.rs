pub(crate) mod mysql;
pub(crate) mod pool;

pub use mysql::{DatabaseConfig, MySqlConfig};
pub use pool::PoolSettings;
