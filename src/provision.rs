use std::{fmt::Display, future::Future, io, iter, pin::Pin, time::Duration};

use sqlx::{Connection, MySqlConnection};
use tokio::time::{Instant, sleep, timeout};

use crate::{
    common::config::{DatabaseConfig, MySqlConfig},
    docker::{Container, ContainerRuntime, RunError, RunOptions},
    error::{Error, ProvisionError},
    logging::Valuer,
};

/// Name of the shared test container
pub const CONTAINER_NAME: &str = "mysql-test-container";
/// Image repository of the shared test container
pub const IMAGE_REPOSITORY: &str = "vaulty/mysql-volumeless";
/// Image tag of the shared test container
pub const IMAGE_TAG: &str = "8.0";
/// Port ``MySQL`` listens on inside the container
pub const MYSQL_PORT: &str = "3306/tcp";

/// Future returned by a readiness probe
pub type ProbeFuture = Pin<Box<dyn Future<Output = Result<(), sqlx::Error>> + Send + 'static>>;

type Probe = dyn Fn(MySqlConfig) -> ProbeFuture + Send + Sync + 'static;

/// Exponential backoff bounded by a total time budget
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    initial_interval: Duration,
    multiplier: u32,
    max_interval: Duration,
    max_elapsed: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy with defaults
    /// # Defaults
    /// - Initial interval: 500ms
    /// - Multiplier: 2
    /// - Max interval: 5s
    /// - Max elapsed: 60s
    #[must_use]
    pub fn new() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 2,
            max_interval: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(60),
        }
    }

    /// Sets the first wait
    #[must_use]
    pub fn initial_interval(self, value: Duration) -> Self {
        Self {
            initial_interval: value,
            ..self
        }
    }

    /// Sets the growth factor between waits
    #[must_use]
    pub fn multiplier(self, value: u32) -> Self {
        Self {
            multiplier: value.max(1),
            ..self
        }
    }

    /// Sets the longest single wait
    #[must_use]
    pub fn max_interval(self, value: Duration) -> Self {
        Self {
            max_interval: value,
            ..self
        }
    }

    /// Sets the total budget; no attempt starts after it is spent
    #[must_use]
    pub fn max_elapsed(self, value: Duration) -> Self {
        Self {
            max_elapsed: value,
            ..self
        }
    }

    fn intervals(self) -> impl Iterator<Item = Duration> {
        iter::successors(Some(self.initial_interval.min(self.max_interval)), move |prev| {
            Some(prev.saturating_mul(self.multiplier).min(self.max_interval))
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub(crate) struct RetryExhausted<E> {
    pub(crate) attempts: u32,
    pub(crate) error: E,
}

/// Runs `op` until it succeeds or the policy's budget is spent
///
/// An attempt still pending when the budget runs out fails with a timed-out I/O error.
pub(crate) async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    E: Display + From<io::Error>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let mut intervals = policy.intervals();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let remaining = policy.max_elapsed.saturating_sub(started.elapsed());
        let error = match timeout(remaining, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(_) => {
                io::Error::new(io::ErrorKind::TimedOut, "attempt outlived retry budget").into()
            }
        };

        let wait = intervals.next().unwrap_or(policy.max_interval);
        if started.elapsed() + wait > policy.max_elapsed {
            return Err(RetryExhausted { attempts, error });
        }

        tracing::debug!(
            attempt = attempts,
            wait = %Valuer::duration(wait),
            %error,
            "not ready, retrying"
        );
        sleep(wait).await;
    }
}

/// A ready container and how to reach it
pub struct Provisioned {
    /// Connection configuration with the published address filled in
    pub config: DatabaseConfig,
    /// Handle to the container
    pub container: Box<dyn Container>,
}

/// Finds or launches the test container and waits until ``MySQL`` accepts connections
pub struct Provisioner<R> {
    runtime: R,
    retry_policy: RetryPolicy,
    probe: Box<Probe>,
}

impl<R> Provisioner<R>
where
    R: ContainerRuntime,
{
    /// Creates a provisioner that probes readiness by connecting and pinging
    #[must_use]
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            retry_policy: RetryPolicy::new(),
            probe: Box::new(|config: MySqlConfig| -> ProbeFuture { Box::pin(ping(config)) }),
        }
    }

    /// Sets the readiness retry policy
    #[must_use]
    pub fn retry_policy(self, value: RetryPolicy) -> Self {
        Self {
            retry_policy: value,
            ..self
        }
    }

    /// Replaces the readiness probe
    #[must_use]
    pub fn probe(
        self,
        value: impl Fn(MySqlConfig) -> ProbeFuture + Send + Sync + 'static,
    ) -> Self {
        Self {
            probe: Box::new(value),
            ..self
        }
    }

    /// Brings up the container for `config`, filling in default credentials
    ///
    /// A container left behind by an earlier run is reused. If the database never becomes
    /// ready the container is removed before the error is returned.
    pub async fn run(&self, config: DatabaseConfig) -> Result<Provisioned, Error> {
        let mysql = config.mysql.unwrap_or_default().with_defaults();

        let container = self.find_or_launch(&mysql).await?;

        let Some(port) = container.mapped_port(MYSQL_PORT) else {
            let name = container.name().to_owned();
            release(container).await;
            return Err(ProvisionError::PortNotMapped {
                name,
                port: MYSQL_PORT.to_owned(),
            }
            .into());
        };
        let mysql = mysql.port(port);

        match retry(self.retry_policy, || (self.probe)(mysql.clone())).await {
            Ok(()) => Ok(Provisioned {
                config: DatabaseConfig {
                    database_name: config.database_name,
                    mysql: Some(mysql),
                },
                container,
            }),
            Err(RetryExhausted { attempts, error }) => {
                let name = container.name().to_owned();
                release(container).await;
                Err(ProvisionError::ProbeExhausted {
                    name,
                    attempts,
                    source: error,
                }
                .into())
            }
        }
    }

    async fn find_or_launch(&self, mysql: &MySqlConfig) -> Result<Box<dyn Container>, ProvisionError> {
        let opts = run_options(mysql);

        match self.runtime.run(&opts).await {
            Ok(container) => return Ok(container),
            Err(RunError::AlreadyExists(name)) => {
                tracing::debug!(%name, "container already exists, looking it up");
            }
            Err(RunError::Provision(err)) => return Err(err),
        }

        self.runtime
            .find_by_name(&opts.name)
            .await?
            .ok_or(ProvisionError::NotFound { name: opts.name })
    }
}

pub(crate) fn run_options(mysql: &MySqlConfig) -> RunOptions {
    RunOptions {
        name: CONTAINER_NAME.to_owned(),
        repository: IMAGE_REPOSITORY.to_owned(),
        tag: IMAGE_TAG.to_owned(),
        env: vec![
            format!("MYSQL_USER={}", mysql.user),
            format!("MYSQL_PASSWORD={}", mysql.password),
            format!("MYSQL_ROOT_PASSWORD={}", mysql.password),
        ],
        exposed_port: MYSQL_PORT.to_owned(),
    }
}

async fn ping(config: MySqlConfig) -> Result<(), sqlx::Error> {
    let mut conn = MySqlConnection::connect_with(&config.database_connect_options("")).await?;
    let result = conn.ping().await;
    conn.close().await.ok();
    result
}

async fn release(container: Box<dyn Container>) {
    let name = container.name().to_owned();
    if let Err(err) = container.close().await {
        tracing::warn!(%name, error = %err, "failed to remove container");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used)]

    use std::{
        future, io,
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicU32, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::time::timeout;

    use crate::{
        DatabaseConfig, Error, MySqlConfig,
        docker::{Container, ContainerRuntime, RunError, RunOptions},
        error::ProvisionError,
    };

    use super::{MYSQL_PORT, ProbeFuture, Provisioner, RetryPolicy, retry};

    #[derive(Default)]
    pub(crate) struct FakeRuntime {
        pub(crate) exists: bool,
        pub(crate) findable: bool,
        pub(crate) unmapped: bool,
        pub(crate) runs: AtomicU32,
        pub(crate) lookups: AtomicU32,
        pub(crate) closed: Arc<AtomicBool>,
        pub(crate) last_run: parking_lot::Mutex<Option<RunOptions>>,
    }

    struct FakeContainer {
        name: String,
        port: Option<u16>,
        closed: Arc<AtomicBool>,
    }

    impl FakeRuntime {
        fn container(&self, name: &str) -> Box<dyn Container> {
            Box::new(FakeContainer {
                name: name.to_owned(),
                port: (!self.unmapped).then_some(49153),
                closed: self.closed.clone(),
            })
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn run(&self, opts: &RunOptions) -> Result<Box<dyn Container>, RunError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            *self.last_run.lock() = Some(opts.clone());
            if self.exists {
                Err(RunError::AlreadyExists(opts.name.clone()))
            } else {
                Ok(self.container(&opts.name))
            }
        }

        async fn find_by_name(
            &self,
            name: &str,
        ) -> Result<Option<Box<dyn Container>>, ProvisionError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.findable.then(|| self.container(name)))
        }
    }

    #[async_trait]
    impl Container for FakeContainer {
        fn name(&self) -> &str {
            &self.name
        }

        fn mapped_port(&self, container_port: &str) -> Option<u16> {
            assert_eq!(container_port, MYSQL_PORT);
            self.port
        }

        async fn close(self: Box<Self>) -> Result<(), ProvisionError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn refused() -> sqlx::Error {
        sqlx::Error::Io(io::Error::from(io::ErrorKind::ConnectionRefused))
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new()
            .initial_interval(Duration::from_millis(100))
            .max_interval(Duration::from_secs(1))
            .max_elapsed(Duration::from_secs(5))
    }

    /// Probe failing `failures` times before succeeding
    pub(crate) fn flaky_probe(
        failures: u32,
        calls: Arc<AtomicU32>,
    ) -> impl Fn(MySqlConfig) -> ProbeFuture + Send + Sync + 'static {
        move |_config: MySqlConfig| -> ProbeFuture {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { if call > failures { Ok(()) } else { Err(refused()) } })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn launches_and_waits_until_ready() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = FakeRuntime::default();
        let provisioner = Provisioner::new(runtime)
            .retry_policy(fast_policy())
            .probe(flaky_probe(2, calls.clone()));

        let provisioned = provisioner.run(DatabaseConfig::default()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let mysql = provisioned.config.mysql.unwrap();
        assert_eq!(mysql, MySqlConfig::new().port(49153));
        assert_eq!(provisioned.container.name(), "mysql-test-container");

        let runtime = &provisioner.runtime;
        assert_eq!(runtime.runs.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.lookups.load(Ordering::SeqCst), 0);
        let opts = runtime.last_run.lock().clone().unwrap();
        assert_eq!(opts.repository, "vaulty/mysql-volumeless");
        assert_eq!(opts.tag, "8.0");
        assert_eq!(
            opts.env,
            [
                "MYSQL_USER=app",
                "MYSQL_PASSWORD=secret",
                "MYSQL_ROOT_PASSWORD=secret"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reuses_existing_container() {
        let runtime = FakeRuntime {
            exists: true,
            findable: true,
            ..Default::default()
        };
        let provisioner = Provisioner::new(runtime)
            .retry_policy(fast_policy())
            .probe(flaky_probe(0, Arc::default()));

        let provisioned = provisioner.run(DatabaseConfig::default()).await.unwrap();

        assert_eq!(provisioned.config.mysql.unwrap().port, 49153);
        assert_eq!(provisioner.runtime.runs.load(Ordering::SeqCst), 1);
        assert_eq!(provisioner.runtime.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn existing_but_missing_container_is_not_found() {
        let runtime = FakeRuntime {
            exists: true,
            findable: false,
            ..Default::default()
        };
        let provisioner = Provisioner::new(runtime).probe(flaky_probe(0, Arc::default()));

        let err = provisioner.run(DatabaseConfig::default()).await.err().unwrap();

        assert!(
            matches!(&err, Error::Provision(ProvisionError::NotFound { name }) if name == "mysql-test-container"),
            "{err:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn probe_exhaustion_removes_container() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = FakeRuntime::default();
        let closed = runtime.closed.clone();
        let provisioner = Provisioner::new(runtime)
            .retry_policy(fast_policy())
            .probe(flaky_probe(u32::MAX, calls.clone()));

        let err = provisioner.run(DatabaseConfig::default()).await.err().unwrap();

        let Error::Provision(ProvisionError::ProbeExhausted { attempts, .. }) = &err else {
            panic!("unexpected error {err:?}");
        };
        assert!(*attempts > 1);
        assert_eq!(*attempts, calls.load(Ordering::SeqCst));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_is_bounded_by_budget() {
        let runtime = FakeRuntime::default();
        let closed = runtime.closed.clone();
        let provisioner = Provisioner::new(runtime)
            .retry_policy(fast_policy())
            .probe(|_config: MySqlConfig| -> ProbeFuture { Box::pin(future::pending()) });

        let started = tokio::time::Instant::now();
        let err = timeout(Duration::from_secs(600), provisioner.run(DatabaseConfig::default()))
            .await
            .expect("provisioning must give up once the budget is spent")
            .err()
            .unwrap();

        let Error::Provision(ProvisionError::ProbeExhausted {
            attempts, source, ..
        }) = &err
        else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(*attempts, 1);
        assert!(
            matches!(source, sqlx::Error::Io(e) if e.kind() == io::ErrorKind::TimedOut),
            "{source:?}"
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn unpublished_port_removes_container() {
        let runtime = FakeRuntime {
            unmapped: true,
            ..Default::default()
        };
        let closed = runtime.closed.clone();
        let provisioner = Provisioner::new(runtime).probe(flaky_probe(0, Arc::default()));

        let err = provisioner.run(DatabaseConfig::default()).await.err().unwrap();

        assert!(
            matches!(err, Error::Provision(ProvisionError::PortNotMapped { .. })),
            "{err:?}"
        );
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn caller_credentials_are_kept() {
        let provisioner =
            Provisioner::new(FakeRuntime::default()).probe(flaky_probe(0, Arc::default()));
        let config = DatabaseConfig::new(
            "",
            MySqlConfig::new()
                .user("reader".to_owned())
                .password("hunter2".to_owned()),
        );

        let mysql = provisioner.run(config).await.unwrap().config.mysql.unwrap();

        assert_eq!(mysql.user, "reader");
        assert_eq!(mysql.password, "hunter2");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backs_off_within_budget() {
        let policy = RetryPolicy::new()
            .initial_interval(Duration::from_secs(1))
            .multiplier(2)
            .max_interval(Duration::from_secs(4))
            .max_elapsed(Duration::from_secs(20));

        let intervals = policy.intervals().take(5).collect::<Vec<_>>();
        assert_eq!(
            intervals,
            [1, 2, 4, 4, 4].map(Duration::from_secs).to_vec()
        );

        let started = tokio::time::Instant::now();
        let err = retry(policy, || async { Err::<(), _>(refused()) })
            .await
            .unwrap_err();
        // waits of 1 + 2 + 4 + 4 + 4 + 4 fit in 20s, a fifth 4s wait would not
        assert_eq!(err.attempts, 7);
        assert!(
            matches!(&err.error, sqlx::Error::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused),
            "{:?}",
            err.error
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(19) && elapsed < Duration::from_secs(20));
    }
}
