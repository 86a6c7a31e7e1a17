use async_trait::async_trait;
use sqlx::{
    MySqlPool,
    migrate::{MigrateError, Migrator},
};

/// Brings a freshly created database up to the schema tests expect
#[async_trait]
pub trait Migrate: Send + Sync {
    /// Applies migrations through the pool
    async fn migrate(&self, pool: &MySqlPool) -> Result<(), MigrateError>;
}

#[async_trait]
impl Migrate for Migrator {
    async fn migrate(&self, pool: &MySqlPool) -> Result<(), MigrateError> {
        self.run(pool).await
    }
}

/// Leaves the database empty
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMigrations;

#[async_trait]
impl Migrate for NoMigrations {
    async fn migrate(&self, _pool: &MySqlPool) -> Result<(), MigrateError> {
        Ok(())
    }
}
