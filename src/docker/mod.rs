use std::env;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ProvisionError;

mod engine;

pub use engine::{DockerContainer, DockerRuntime};

/// Reports whether Docker-backed tests can run on this machine
///
/// Docker must be on `PATH`. Hosted macOS CI runners are excluded as they ship without a daemon.
#[must_use]
pub fn enabled() -> bool {
    if cfg!(target_os = "macos") && env::var("CI").is_ok_and(|value| value == "true") {
        return false;
    }
    env::var_os("PATH").is_some_and(|paths| {
        env::split_paths(&paths)
            .any(|dir| dir.join("docker").is_file() || dir.join("docker.exe").is_file())
    })
}

/// What to launch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOptions {
    /// Container name, unique per Docker host
    pub name: String,
    /// Image repository
    pub repository: String,
    /// Image tag
    pub tag: String,
    /// `KEY=value` environment entries
    pub env: Vec<String>,
    /// Port to publish, e.g. `3306/tcp`
    pub exposed_port: String,
}

/// Launch failures
#[derive(Debug, Error)]
pub enum RunError {
    /// A container with the requested name already exists
    #[error("container {0} already exists")]
    AlreadyExists(String),

    /// Any other failure
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Container runtime the provisioner drives
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launches a new container
    async fn run(&self, opts: &RunOptions) -> Result<Box<dyn Container>, RunError>;

    /// Looks up a container by name, starting it if it is stopped
    async fn find_by_name(&self, name: &str)
    -> Result<Option<Box<dyn Container>>, ProvisionError>;
}

/// Handle to a launched container
#[async_trait]
pub trait Container: Send + Sync {
    /// Container name
    fn name(&self) -> &str;

    /// Host port published for `container_port`, e.g. `3306/tcp`
    fn mapped_port(&self, container_port: &str) -> Option<u16>;

    /// Stops and removes the container together with its volumes
    async fn close(self: Box<Self>) -> Result<(), ProvisionError>;
}
