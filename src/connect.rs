use std::time::Duration;

use prometheus::IntGaugeVec;
use sqlx::{
    Connection, Executor, MySqlPool,
    mysql::{MySqlConnectOptions, MySqlPoolOptions},
};
use tokio::{
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tokio_util::sync::CancellationToken;

use crate::{
    common::{
        config::{DatabaseConfig, PoolSettings},
        statement::mysql,
    },
    error::Error,
    metrics::{MYSQL_CONNECTIONS, PoolStats},
    migrate::Migrate,
};

const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Opens pooled connections to one ``MySQL`` database
pub struct MySqlConnector {
    opts: MySqlConnectOptions,
    url: String,
    settings: PoolSettings,
    idle_connections_flag: bool,
}

impl MySqlConnector {
    /// Creates a connector for the database in `config`
    ///
    /// Missing credentials fall back to the [`MySqlConfig`](crate::MySqlConfig) defaults.
    /// Sessions use `utf8mb4` and accept dates a strict `sql_mode` would reject.
    #[must_use]
    pub fn new(config: &DatabaseConfig, settings: PoolSettings) -> Self {
        let mysql = config.mysql.clone().unwrap_or_default().with_defaults();
        let db_name = config.database_name.as_str();

        Self {
            opts: mysql.database_connect_options(db_name),
            url: mysql.connection_url(db_name),
            settings,
            idle_connections_flag: true,
        }
    }

    /// Keep released connections in the pool; when disabled every released connection is closed
    #[must_use]
    pub fn idle_connections(self, value: bool) -> Self {
        Self {
            idle_connections_flag: value,
            ..self
        }
    }

    /// Connection URL with the password redacted
    #[must_use]
    pub fn connection_url(&self) -> &str {
        &self.url
    }

    /// Opens the pool, checks the server answers and starts reporting pool occupancy
    ///
    /// Occupancy is published to the `mysql_connections` gauges once a minute until `token`
    /// is cancelled.
    pub async fn connect(&self, token: CancellationToken) -> Result<MySqlPool, Error> {
        let keep_idle = self.idle_connections_flag;
        let pool = MySqlPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.timeout)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute(mysql::ALLOW_INVALID_DATES).await?;
                    Ok(())
                })
            })
            .after_release(move |_conn, _meta| Box::pin(async move { Ok(keep_idle) }))
            .connect_lazy_with(self.opts.clone());

        // Check the database is up and working
        {
            let mut conn = pool.acquire().await.map_err(Error::Connection)?;
            conn.ping().await.map_err(Error::Connection)?;
        }

        tracing::debug!(url = %self.url, keep_idle, "connected to mysql");

        spawn_reporter(pool.clone(), &MYSQL_CONNECTIONS, REPORT_INTERVAL, token);

        Ok(pool)
    }

    /// Connects, then applies `migrations`
    pub async fn connect_and_migrate(
        &self,
        token: CancellationToken,
        migrations: &dyn Migrate,
    ) -> Result<MySqlPool, Error> {
        let pool = self.connect(token.clone()).await?;
        if let Err(err) = migrations.migrate(&pool).await {
            token.cancel();
            pool.close().await;
            return Err(err.into());
        }
        Ok(pool)
    }
}

pub(crate) fn spawn_reporter(
    pool: MySqlPool,
    gauges: &'static IntGaugeVec,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => PoolStats::of(&pool).publish(gauges),
            }
        }
        tracing::trace!("pool reporter stopped");
    })
}
