// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;
use volman_types::{DeviceHandle, DeviceKind, DeviceProperties, VolumeError};

use crate::bus::{EventBus, EventStream};
use crate::config::Config;
use crate::credentials::{NoPrompt, SecretPrompt};
use crate::monitor::{MonitorHandle, VolumeMonitor};
use crate::orchestrator::{MountTarget, OperationTicket, Orchestrator, PendingOperation};
use crate::persistence::{DataPersistence, MemoryPersistence};
use crate::policy::{self, PolicyDecision};
use crate::registry::DeviceRegistry;
use crate::service::MountService;
use crate::translator::PropertyTranslator;

#[derive(Default)]
pub struct VolumeManagerBuilder {
    service: Option<Arc<dyn MountService>>,
    prompt: Option<Arc<dyn SecretPrompt>>,
    store: Option<Arc<dyn DataPersistence>>,
    config: Option<Config>,
    runtime: Option<Handle>,
}

impl VolumeManagerBuilder {
    pub fn service(mut self, service: Arc<dyn MountService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn prompt(mut self, prompt: Arc<dyn SecretPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn store(mut self, store: Arc<dyn DataPersistence>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Runtime that runs mount operations. Defaults to the runtime current
    /// at `build()`, if any.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<VolumeManager, VolumeError> {
        let service = self.service.ok_or_else(|| {
            VolumeError::MonitorUnavailable("no mount service was provided".to_string())
        })?;
        let config = self.config.unwrap_or_default();
        let prompt = self.prompt.unwrap_or_else(|| Arc::new(NoPrompt));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryPersistence::new()));

        let registry = Arc::new(DeviceRegistry::new());
        let bus = Arc::new(EventBus::new(config.event_capacity));
        let mut orchestrator =
            Orchestrator::new(service.clone(), registry.clone(), bus.clone(), prompt);
        if let Some(runtime) = self.runtime {
            orchestrator = orchestrator.with_runtime(runtime);
        }

        Ok(VolumeManager {
            service,
            registry,
            bus,
            orchestrator,
            translator: PropertyTranslator::new(store),
            config,
        })
    }
}

/// Entry point tying the registry, monitor and orchestrator together
pub struct VolumeManager {
    service: Arc<dyn MountService>,
    registry: Arc<DeviceRegistry>,
    bus: Arc<EventBus>,
    orchestrator: Orchestrator,
    translator: PropertyTranslator,
    config: Config,
}

impl VolumeManager {
    pub fn builder() -> VolumeManagerBuilder {
        VolumeManagerBuilder::default()
    }

    /// Populate the registry and start following service events.
    pub async fn start(&self) -> Result<MonitorHandle, VolumeError> {
        let handle =
            VolumeMonitor::start(self.service.clone(), self.registry.clone(), self.bus.clone())
                .await?;
        info!("Volume manager started");
        Ok(handle)
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn translator(&self) -> &PropertyTranslator {
        &self.translator
    }

    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    pub fn mount(&self, target: MountTarget) -> Result<OperationTicket, VolumeError> {
        self.orchestrator.mount(target)
    }

    pub fn unmount(&self, target: MountTarget) -> Result<OperationTicket, VolumeError> {
        self.orchestrator.unmount(target)
    }

    pub fn eject(&self, target: MountTarget) -> Result<OperationTicket, VolumeError> {
        self.orchestrator.eject(target)
    }

    pub fn pending(&self) -> Vec<PendingOperation> {
        self.orchestrator.pending()
    }

    async fn handle(&self, id: &str, kind: DeviceKind) -> Result<DeviceHandle, VolumeError> {
        self.service
            .device_handle(id, kind)
            .await?
            .ok_or_else(|| VolumeError::NotFound(id.to_string()))
    }

    pub async fn block_info(&self, id: &str) -> Result<DeviceProperties, VolumeError> {
        let handle = self.handle(id, DeviceKind::Block).await?;
        Ok(self.translator.load(&handle))
    }

    pub async fn protocol_info(&self, id: &str) -> Result<DeviceProperties, VolumeError> {
        let handle = self.handle(id, DeviceKind::Protocol).await?;
        Ok(self.translator.load(&handle))
    }

    pub async fn is_mountable(&self, id: &str) -> Result<PolicyDecision, VolumeError> {
        Ok(policy::is_mountable_block_dev(&self.block_info(id).await?))
    }

    pub async fn is_ejectable(&self, id: &str) -> Result<PolicyDecision, VolumeError> {
        Ok(policy::is_ejectable_block_dev(&self.block_info(id).await?))
    }
}
