use std::sync::Arc;

use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Errors returned by this crate
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid environment configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The server could not be reached or refused the connection
    #[error("failed to connect to mysql: {0}")]
    Connection(#[source] sqlx::Error),

    /// The test container could not be launched, found or probed
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Connections were still open when a test database was closed
    #[error("found {count} open connection(s) to mysql database {database}")]
    LeakDetected {
        /// Database the connections belong to
        database: String,
        /// Number of open connections
        count: u32,
    },

    /// A create, grant or drop statement failed
    #[error("failed to execute statement: {0}")]
    Query(#[source] sqlx::Error),

    /// Migrations failed on a fresh database
    #[error("failed to migrate database: {0}")]
    Migrate(#[from] MigrateError),

    /// The shared server failed to start; repeated to every caller
    #[error("shared mysql server failed to start: {0}")]
    SharedServer(#[source] Arc<Error>),
}

/// Invalid environment configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `MYSQL_TIMEOUT` is not a duration
    #[error("invalid MYSQL_TIMEOUT {0:?}")]
    InvalidTimeout(String),
}

/// Failures while bringing up the test container
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The Docker daemon rejected a request
    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// A container with the name exists but could not be looked up
    #[error("failed to launch (or find) container {name}")]
    NotFound {
        /// Container name
        name: String,
    },

    /// The container does not publish the database port
    #[error("container {name} does not publish port {port}")]
    PortNotMapped {
        /// Container name
        name: String,
        /// Container port, e.g. `3306/tcp`
        port: String,
    },

    /// The database never accepted connections within the retry budget
    #[error("container {name} not ready after {attempts} attempt(s): {source}")]
    ProbeExhausted {
        /// Container name
        name: String,
        /// Probes made
        attempts: u32,
        /// Last probe failure
        #[source]
        source: sqlx::Error,
    },
}
