//! [![unsafe forbidden](https://img.shields.io/badge/unsafe-forbidden-success.svg)](https://github.com/rust-secure-code/safety-dance/)
//!
//! Disposable ``MySQL`` databases for integration tests with:
//! - One Docker container shared by every test in the process
//! - A fresh, migrated database per test
//! - Leak detection when the database is dropped
//!
//! ### Usage
//!
//! ```no_run
//! use mysql_testdb::{NoMigrations, SHARED_MYSQL, TestMySqlDb};
//!
//! async fn test() {
//!     let db = TestMySqlDb::create(&SHARED_MYSQL, &NoMigrations).await.unwrap();
//!     sqlx::query("SELECT 1").execute(&*db).await.unwrap();
//!     db.close().await.unwrap();
//! }
//! ```
//!
//! The container is launched on first use and reused by later runs. Call
//! [`SharedServer::stop`] once at the end of the run to remove it.
//!
//! ### Environment
//!
//! | Variable                | Default | Meaning                                  |
//! | ----------------------- | ------- | ---------------------------------------- |
//! | `MYSQL_TIMEOUT`         | `30s`   | How long to wait for a pooled connection |
//! | `MYSQL_MAX_CONNECTIONS` | `16`    | Maximum open connections per pool        |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(
    clippy::cargo,
    clippy::complexity,
    clippy::correctness,
    clippy::pedantic,
    clippy::perf,
    clippy::style,
    clippy::suspicious,
    clippy::unwrap_used
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::module_inception,
    clippy::missing_errors_doc,
    clippy::multiple_crate_versions
)]

mod classify;
mod common;
mod connect;
/// Container runtime
pub mod docker;
mod error;
/// Typed values and fields for structured log lines
pub mod logging;
mod metrics;
mod migrate;
mod provision;
mod server;
mod temp_db;
mod test_db;
mod util;

pub use classify::{MYSQL_ERR_DUPLICATE_KEY, unique_violation};
pub use common::config::{DatabaseConfig, MySqlConfig, PoolSettings};
pub use connect::MySqlConnector;
pub use error::{ConfigError, Error, ProvisionError};
pub use metrics::{MYSQL_CONNECTIONS, PoolStats};
pub use migrate::{Migrate, NoMigrations};
pub use provision::{
    CONTAINER_NAME, IMAGE_REPOSITORY, IMAGE_TAG, MYSQL_PORT, ProbeFuture, Provisioned,
    Provisioner, RetryPolicy,
};
pub use server::{ProvisionFuture, SHARED_MYSQL, SharedServer};
pub use temp_db::create_temporary_database;
pub use test_db::TestMySqlDb;
pub use util::DATABASE_NAME_PREFIX;
