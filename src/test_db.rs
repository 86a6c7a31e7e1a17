use std::{env, ops::Deref, time::Duration};

use sqlx::{Executor, MySqlPool};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    common::{
        config::{DatabaseConfig, PoolSettings},
        statement::mysql,
    },
    connect::MySqlConnector,
    error::Error,
    migrate::Migrate,
    server::SharedServer,
    temp_db::create_temporary_database,
};

/// How long [`TestMySqlDb::close`] waits for released connections to finish closing
const RELEASE_GRACE: Duration = Duration::from_millis(500);

/// A freshly migrated, empty ``MySQL`` database owned by one test
///
/// Dereferences to the connection pool. Idle connections are disabled so every connection a
/// test returns is closed; [`close`](Self::close) then checks that none are still open.
/// # Example
/// ```no_run
/// use mysql_testdb::{NoMigrations, SHARED_MYSQL, TestMySqlDb};
///
/// async fn f() {
///     let db = TestMySqlDb::create(&SHARED_MYSQL, &NoMigrations).await.unwrap();
///     sqlx::query("SELECT 1").execute(&*db).await.unwrap();
///     db.close().await.unwrap();
/// }
/// ```
pub struct TestMySqlDb {
    pool: MySqlPool,
    name: String,
    shutdown: CancellationToken,
    closed: bool,
}

impl TestMySqlDb {
    /// Starts `server` if needed, creates a database on it and migrates it
    ///
    /// Pool settings are read from the environment before anything is allocated.
    pub async fn create(server: &SharedServer, migrations: &dyn Migrate) -> Result<Self, Error> {
        Self::create_with(server, migrations, |key| env::var(key).ok()).await
    }

    pub(crate) async fn create_with(
        server: &SharedServer,
        migrations: &dyn Migrate,
        lookup: impl Fn(&str) -> Option<String> + Send,
    ) -> Result<Self, Error> {
        let settings = PoolSettings::from_lookup(lookup)?;
        let config = server.start().await?;
        let name = create_temporary_database(&config).await?;

        let db_config = DatabaseConfig {
            database_name: name.clone(),
            mysql: config.mysql,
        };
        let shutdown = CancellationToken::new();
        let pool = MySqlConnector::new(&db_config, settings)
            .idle_connections(false)
            .connect_and_migrate(shutdown.clone(), migrations)
            .await?;

        tracing::debug!(database = %name, "test database ready");

        Ok(Self {
            pool,
            name,
            shutdown,
            closed: false,
        })
    }

    /// Name of the database
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops pool reporting, checks no connection leaked, drops the database and closes the pool
    ///
    /// Returns [`Error::LeakDetected`] without dropping anything if connections are still open.
    /// Tests should treat that as fatal: a leaked connection poisons the shared server for
    /// the tests that follow.
    pub async fn close(mut self) -> Result<(), Error> {
        self.closed = true;
        self.shutdown.cancel();

        let open = open_connections(&self.pool).await;
        if open != 0 {
            return Err(Error::LeakDetected {
                database: self.name.clone(),
                count: open,
            });
        }

        self.pool
            .execute(mysql::drop_database(&self.name).as_str())
            .await
            .map_err(Error::Query)?;

        self.pool.close().await;

        tracing::debug!(database = %self.name, "test database dropped");
        Ok(())
    }
}

impl Deref for TestMySqlDb {
    type Target = MySqlPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl Drop for TestMySqlDb {
    fn drop(&mut self) {
        if !self.closed {
            self.shutdown.cancel();
            tracing::warn!(database = %self.name, "test database dropped without close");
        }
    }
}

/// Open connections once returned ones have had a chance to close
async fn open_connections(pool: &MySqlPool) -> u32 {
    let deadline = Instant::now() + RELEASE_GRACE;
    loop {
        let open = pool.size();
        if open == 0 || Instant::now() >= deadline {
            return open;
        }
        sleep(Duration::from_millis(10)).await;
    }
}
