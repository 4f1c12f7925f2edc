//! Managed service lifecycle.

use crate::config::ServiceConfig;
use crate::directory::Directory;
use crate::engine::{Engine, Inbound};
use crate::error::ServiceError;
use crate::handler::DeviceHandler;
use crate::source::UpdateSource;
use crate::status::StatusReporter;
use anyhow::Context;
use devlink_core::{Config, Incoming, PubSub};
use devlink_directory::{DirectoryClient, ServiceNode};
use devlink_mqtt::MqttTransport;
use devlink_proto::TopicScheme;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// A running service: the update source feeding the engine task.
pub struct ManagedService<P: PubSub + 'static> {
    service: ServiceNode,
    scheme: TopicScheme,
    transport: Arc<P>,
    status: StatusReporter,
    shutdown_status: Option<String>,
    queue: mpsc::Sender<Inbound>,
    source: UpdateSource,
    shutdown: oneshot::Sender<()>,
    engine: JoinHandle<()>,
}

impl<P: PubSub + 'static> ManagedService<P> {
    /// Start managing the devices linked to `config.service_id`.
    ///
    /// `incoming` must carry every publish the transport receives. One
    /// handler is built with `factory` for each device that links.
    ///
    /// # Errors
    ///
    /// Returns error if the service lookup, the events subscription or the
    /// device snapshot fails. Nothing keeps running in that case.
    pub async fn start<D, H, F>(
        config: &ServiceConfig,
        directory: &D,
        transport: Arc<P>,
        incoming: mpsc::Receiver<Incoming>,
        factory: F,
    ) -> Result<Self, ServiceError>
    where
        D: Directory,
        H: DeviceHandler,
        F: FnMut() -> H + Send + 'static,
    {
        let service = directory.service_info(&config.service_id).await?;
        let scheme = config.topic_scheme(&service);
        Self::launch(config, service, scheme, directory, transport, incoming, factory).await
    }

    async fn launch<D, H, F>(
        config: &ServiceConfig,
        service: ServiceNode,
        scheme: TopicScheme,
        directory: &D,
        transport: Arc<P>,
        incoming: mpsc::Receiver<Incoming>,
        factory: F,
    ) -> Result<Self, ServiceError>
    where
        D: Directory,
        H: DeviceHandler,
        F: FnMut() -> H + Send + 'static,
    {
        let service_id = config.service_id.as_str();
        tracing::info!(service_id, name = %service.name, topic = %scheme.service, "Starting service");

        let pubsub: Arc<dyn PubSub> = transport.clone();
        let (queue, inbound) = mpsc::channel(config.runtime.queue_capacity.max(1));

        let source = UpdateSource::start(
            Arc::clone(&pubsub),
            &scheme,
            directory,
            service_id,
            incoming,
            queue.clone(),
        )
        .await?;

        let engine = Engine::new(
            scheme.clone(),
            Arc::clone(&pubsub),
            config.runtime.cache_capacity,
            factory,
        );
        let (shutdown, shutdown_rx) = oneshot::channel();
        let engine = tokio::spawn(engine.run(inbound, shutdown_rx));

        Ok(Self {
            service,
            status: StatusReporter::new(pubsub, &scheme),
            shutdown_status: config.runtime.shutdown_status.clone(),
            scheme,
            transport,
            queue,
            source,
            shutdown,
            engine,
        })
    }

    /// The service as described by the directory.
    #[must_use]
    pub fn service(&self) -> &ServiceNode {
        &self.service
    }

    /// Topics of the service.
    #[must_use]
    pub fn topics(&self) -> &TopicScheme {
        &self.scheme
    }

    /// The transport the service runs on.
    #[must_use]
    pub fn transport(&self) -> &Arc<P> {
        &self.transport
    }

    /// Publish a service status report.
    ///
    /// # Errors
    ///
    /// Returns error if the report cannot be published.
    pub fn set_status(&self, message: &str) -> Result<(), ServiceError> {
        self.status.report_service(message)
    }

    /// Linked devices and their configs, as seen by the engine once it
    /// has processed everything queued before this call.
    ///
    /// # Errors
    ///
    /// Returns error if the engine has stopped.
    pub async fn devices(&self) -> Result<BTreeMap<String, Config>, ServiceError> {
        let (reply, answer) = oneshot::channel();
        self.queue
            .send(Inbound::Inspect(reply))
            .await
            .map_err(|_| ServiceError::Stopped)?;
        answer.await.map_err(|_| ServiceError::Stopped)
    }

    /// Stop the update source, then the engine, waiting for both.
    ///
    /// The configured shutdown status is published first. Linked devices
    /// are not unlinked. Returns the transport so the caller can close it.
    pub async fn stop(self) -> Arc<P> {
        if let Some(status) = &self.shutdown_status {
            if let Err(err) = self.status.report_service(status) {
                tracing::warn!(error = %err, "Failed to publish shutdown status");
            }
        }

        self.source.stop().await;

        let _ = self.shutdown.send(());
        if let Err(err) = self.engine.await {
            tracing::error!(error = %err, "Engine task failed");
        }

        tracing::info!(service_id = %self.service.id, "Service stopped");
        self.transport
    }

    /// Run until Ctrl+C, then stop.
    pub async fn run_until_shutdown(self) -> Arc<P> {
        tracing::info!("Service running, press Ctrl+C to stop");

        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
        }

        tracing::info!("Shutdown signal received");
        self.stop().await
    }
}

impl<P: PubSub + 'static> std::fmt::Debug for ManagedService<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedService")
            .field("service_id", &self.service.id)
            .field("topic", &self.scheme.service)
            .finish_non_exhaustive()
    }
}

impl ManagedService<MqttTransport> {
    /// Connect to the directory and the broker described by `config` and
    /// start the service.
    ///
    /// # Errors
    ///
    /// Returns error if a client cannot be created or the service fails
    /// to start. The broker connection is closed again on failure.
    pub async fn connect<H, F>(config: &ServiceConfig, factory: F) -> anyhow::Result<Self>
    where
        H: DeviceHandler,
        F: FnMut() -> H + Send + 'static,
    {
        let directory = DirectoryClient::new(config.directory_config())
            .context("Failed to create directory client")?;
        let service = directory
            .service_info(&config.service_id)
            .await
            .context("Failed to fetch service")?;
        let scheme = config.topic_scheme(&service);

        let (transport, incoming) = MqttTransport::connect(&config.mqtt_config(&scheme)?)
            .context("Failed to create MQTT transport")?;
        let transport = Arc::new(transport);

        let started = Self::launch(
            config,
            service,
            scheme,
            &directory,
            Arc::clone(&transport),
            incoming,
            factory,
        )
        .await;
        match started {
            Ok(service) => Ok(service),
            Err(err) => {
                transport.disconnect().await;
                Err(err).context("Failed to start service")
            }
        }
    }
}
