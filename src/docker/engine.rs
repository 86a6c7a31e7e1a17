use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
        StartContainerOptions,
    },
    errors::Error as DockerError,
    image::CreateImageOptions,
    models::{ContainerInspectResponse, HostConfig},
};
use futures::TryStreamExt;

use crate::error::ProvisionError;

use super::{Container, ContainerRuntime, RunError, RunOptions};

/// Docker Engine runtime, talking to the local daemon
#[derive(Clone, Debug)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> Result<Self, ProvisionError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    async fn ensure_image(&self, repository: &str, tag: &str) -> Result<(), ProvisionError> {
        let image = format!("{repository}:{tag}");
        if self.docker.inspect_image(&image).await.is_ok() {
            return Ok(());
        }

        tracing::info!(%image, "pulling image");
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: repository,
                    tag,
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInspectResponse>, ProvisionError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => Ok(Some(response)),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn handle(&self, name: &str, response: ContainerInspectResponse) -> Box<dyn Container> {
        let ports = response
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(container_port, bindings)| {
                bindings?
                    .into_iter()
                    .find_map(|binding| binding.host_port?.parse::<u16>().ok())
                    .map(|host_port| (container_port, host_port))
            })
            .collect();

        Box::new(DockerContainer {
            docker: self.docker.clone(),
            name: name.to_owned(),
            ports,
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, opts: &RunOptions) -> Result<Box<dyn Container>, RunError> {
        let RunOptions {
            name,
            repository,
            tag,
            env,
            exposed_port,
        } = opts;

        self.ensure_image(repository, tag).await?;

        let config = Config {
            image: Some(format!("{repository}:{tag}")),
            env: Some(env.clone()),
            exposed_ports: Some(HashMap::from([(exposed_port.clone(), HashMap::new())])),
            host_config: Some(HostConfig {
                publish_all_ports: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        match self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    ..Default::default()
                }),
                config,
            )
            .await
        {
            Ok(_) => {}
            Err(DockerError::DockerResponseServerError {
                status_code: 409, ..
            }) => return Err(RunError::AlreadyExists(name.clone())),
            Err(err) => return Err(ProvisionError::from(err).into()),
        }

        tracing::info!(%name, image = %format!("{repository}:{tag}"), "launched container");

        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(ProvisionError::from)?;

        let response = self.inspect(name).await?.ok_or_else(|| ProvisionError::NotFound {
            name: name.clone(),
        })?;
        Ok(self.handle(name, response))
    }

    async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Box<dyn Container>>, ProvisionError> {
        let Some(mut response) = self.inspect(name).await? else {
            return Ok(None);
        };

        let running = response
            .state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false);
        if !running {
            tracing::info!(%name, "starting stopped container");
            self.docker
                .start_container(name, None::<StartContainerOptions<String>>)
                .await?;
            let Some(restarted) = self.inspect(name).await? else {
                return Ok(None);
            };
            response = restarted;
        }

        Ok(Some(self.handle(name, response)))
    }
}

/// Container launched or found through [`DockerRuntime`]
#[derive(Debug)]
pub struct DockerContainer {
    docker: Docker,
    name: String,
    ports: HashMap<String, u16>,
}

#[async_trait]
impl Container for DockerContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn mapped_port(&self, container_port: &str) -> Option<u16> {
        self.ports.get(container_port).copied()
    }

    async fn close(self: Box<Self>) -> Result<(), ProvisionError> {
        self.docker
            .remove_container(
                &self.name,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        tracing::info!(name = %self.name, "removed container");
        Ok(())
    }
}
