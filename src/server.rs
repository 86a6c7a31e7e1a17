use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, LazyLock},
};

use parking_lot::Mutex;
use tokio::{sync::OnceCell, time::Instant};

use crate::{
    common::config::DatabaseConfig,
    docker::{Container, DockerRuntime},
    error::Error,
    logging::Fields,
    provision::{Provisioned, Provisioner},
};

/// Future returned by a server's provisioning function
pub type ProvisionFuture = Pin<Box<dyn Future<Output = Result<Provisioned, Error>> + Send + 'static>>;

type Provision = dyn Fn() -> ProvisionFuture + Send + Sync + 'static;

/// The process-wide ``MySQL`` test server, running in Docker
pub static SHARED_MYSQL: LazyLock<SharedServer> = LazyLock::new(SharedServer::docker);

/// A database server provisioned at most once per process and shared by every test
///
/// The container is deliberately left running when the process exits so the next test run
/// can reuse it. Remove it with [`SharedServer::stop`] or by hand.
pub struct SharedServer {
    provision: Box<Provision>,
    started: OnceCell<Result<DatabaseConfig, Arc<Error>>>,
    container: Mutex<Option<Box<dyn Container>>>,
}

impl SharedServer {
    /// Creates a server brought up by `provision` on first [`start`](Self::start)
    pub fn new(provision: impl Fn() -> ProvisionFuture + Send + Sync + 'static) -> Self {
        Self {
            provision: Box::new(provision),
            started: OnceCell::new(),
            container: Mutex::new(None),
        }
    }

    /// Creates a server backed by the local Docker daemon
    #[must_use]
    pub fn docker() -> Self {
        Self::new(|| -> ProvisionFuture {
            Box::pin(async {
                let runtime = DockerRuntime::connect()?;
                Provisioner::new(runtime)
                    .run(DatabaseConfig::default())
                    .await
            })
        })
    }

    /// Starts the server, or finds the one a previous test run left behind
    ///
    /// Safe to call from any number of tests concurrently: provisioning runs once and every
    /// caller observes its outcome. A failed start is returned to every later caller too.
    pub async fn start(&self) -> Result<DatabaseConfig, Error> {
        let started = self
            .started
            .get_or_init(|| async {
                let begun = Instant::now();
                match (self.provision)().await {
                    Ok(Provisioned { config, container }) => {
                        let mut fields = Fields::new()
                            .with("container", container.name())
                            .with("elapsed", begun.elapsed());
                        if let Some(mysql) = &config.mysql {
                            fields = fields.with("address", mysql.address());
                        }
                        tracing::info!(fields = %fields, "mysql server ready");
                        *self.container.lock() = Some(container);
                        Ok(config)
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "mysql server failed to start");
                        Err(Arc::new(err))
                    }
                }
            })
            .await;

        started.clone().map_err(Error::SharedServer)
    }

    /// Configuration of a successfully started server
    #[must_use]
    pub fn config(&self) -> Option<&DatabaseConfig> {
        self.started.get().and_then(|started| started.as_ref().ok())
    }

    /// Stops the server and removes its container and volumes
    ///
    /// Does nothing if the server was never started or is already stopped.
    pub async fn stop(&self) -> Result<(), Error> {
        let container = self.container.lock().take();
        if let Some(container) = container {
            container.close().await?;
        }
        Ok(())
    }
}
