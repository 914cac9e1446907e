// SPDX-License-Identifier: GPL-3.0-only

//! Mount, unmount and eject requests.
//!
//! Each request is resolved against the registry, checked, and then run
//! on its own task. At most one operation is in flight per target; a
//! second request for the same target is refused with
//! [`VolumeError::Busy`] before anything reaches the mount service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use volman_types::{
    DeviceEvent, DiskInfo, Mount, OperationId, OperationKind, ServiceError, Volume, VolumeError,
    path_to_file_uri, uri_scheme,
};

use crate::bus::EventBus;
use crate::credentials::{CredentialBridge, SecretPrompt};
use crate::registry::{DeviceRegistry, Upsert};
use crate::service::MountService;

/// What a caller wants to operate on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountTarget {
    /// Device file, mount path or URI
    Path(String),
    DiskInfo(DiskInfo),
    /// Device file such as `/dev/sdb1`
    Device(String),
    /// Root URI of an existing mount
    MountedRoot(String),
    /// Registry id of a volume or mount
    Id(String),
}

impl std::fmt::Display for MountTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(p) => write!(f, "path {p}"),
            Self::DiskInfo(d) => write!(f, "disk {}", d.id),
            Self::Device(d) => write!(f, "device {d}"),
            Self::MountedRoot(r) => write!(f, "root {r}"),
            Self::Id(id) => write!(f, "id {id}"),
        }
    }
}

#[derive(Debug, Clone)]
enum Resolved {
    Volume(Volume),
    Mount(Mount),
    /// URI with no volume or mount behind it yet
    Location(String),
}

impl Resolved {
    fn id(&self) -> &str {
        match self {
            Self::Volume(v) => &v.id,
            Self::Mount(m) => &m.id,
            Self::Location(uri) => uri,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub target_id: String,
    pub request: MountTarget,
}

type OperationResult = Result<DiskInfo, VolumeError>;

struct PendingEntry {
    operation: PendingOperation,
    responder: oneshot::Sender<OperationResult>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingEntry>>>;

/// Handle to a dispatched operation. Dropping it does not cancel the
/// operation.
#[derive(Debug)]
pub struct OperationTicket {
    operation_id: OperationId,
    kind: OperationKind,
    target_id: String,
    receiver: oneshot::Receiver<OperationResult>,
}

impl OperationTicket {
    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub async fn wait(self) -> OperationResult {
        self.receiver.await.unwrap_or_else(|_| {
            Err(VolumeError::OsOperationFailed(ServiceError::Failed(
                "operation was abandoned".to_string(),
            )))
        })
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    service: Arc<dyn MountService>,
    registry: Arc<DeviceRegistry>,
    bus: Arc<EventBus>,
    prompt: Arc<dyn SecretPrompt>,
    pending: PendingMap,
    /// Runtime the service calls are spawned on
    runtime: Option<Handle>,
}

impl Orchestrator {
    pub fn new(
        service: Arc<dyn MountService>,
        registry: Arc<DeviceRegistry>,
        bus: Arc<EventBus>,
        prompt: Arc<dyn SecretPrompt>,
    ) -> Self {
        Self {
            service,
            registry,
            bus,
            prompt,
            pending: Arc::new(Mutex::new(HashMap::new())),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Spawn service calls on `runtime`, so requests can come from threads
    /// outside it.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn mount(&self, target: MountTarget) -> Result<OperationTicket, VolumeError> {
        self.dispatch(OperationKind::Mount, target)
    }

    pub fn unmount(&self, target: MountTarget) -> Result<OperationTicket, VolumeError> {
        self.dispatch(OperationKind::Unmount, target)
    }

    pub fn eject(&self, target: MountTarget) -> Result<OperationTicket, VolumeError> {
        self.dispatch(OperationKind::Eject, target)
    }

    /// Operations dispatched but not yet completed
    pub fn pending(&self) -> Vec<PendingOperation> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|entry| entry.operation.clone())
            .collect()
    }

    pub fn is_pending(&self, target_id: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(target_id)
    }

    fn resolve(&self, kind: OperationKind, target: &MountTarget) -> Result<Resolved, VolumeError> {
        let not_found = || VolumeError::NotFound(target.to_string());

        let resolved = self.registry.read_with(|state| {
            let by_id = |id: &str| -> Option<Resolved> {
                if let Some(volume) = state.volume(id) {
                    return Some(Resolved::Volume(volume.clone()));
                }
                let mount = state.mount(id)?;
                // A mount backed by a known volume is operated through the volume.
                match mount.volume_id.as_deref().and_then(|v| state.volume(v)) {
                    Some(volume) => Some(Resolved::Volume(volume.clone())),
                    None => Some(Resolved::Mount(mount.clone())),
                }
            };

            let by_root = |uri: &str| -> Option<Resolved> {
                if let Some(volume) = state.volume_by_mounted_root_uri(uri) {
                    return Some(Resolved::Volume(volume.clone()));
                }
                if let Some(mount) = state.mount_by_root_uri(uri) {
                    return by_id(&mount.id);
                }
                let scheme = uri_scheme(uri)?;
                (kind == OperationKind::Mount && scheme != "file")
                    .then(|| Resolved::Location(uri.to_string()))
            };

            let by_device = |device: &str| -> Option<Resolved> {
                state
                    .volume_by_unix_device(device)
                    .map(|v| Resolved::Volume(v.clone()))
            };

            match target {
                MountTarget::Id(id) => by_id(id),
                MountTarget::DiskInfo(info) => by_id(&info.id),
                MountTarget::Device(device) => by_device(device),
                MountTarget::MountedRoot(uri) => by_root(uri),
                MountTarget::Path(path) => {
                    let direct = if path.starts_with("/dev/") {
                        by_device(path)
                    } else if path.contains("://") {
                        by_root(path)
                    } else if path.starts_with('/') {
                        path_to_file_uri(path).and_then(|uri| by_root(&uri))
                    } else {
                        by_id(path)
                    };
                    direct.or_else(|| {
                        state
                            .disk_info_for_path(path)
                            .and_then(|info| by_id(&info.id))
                    })
                }
            }
        });

        resolved.ok_or_else(not_found)
    }

    fn dispatch(
        &self,
        kind: OperationKind,
        target: MountTarget,
    ) -> Result<OperationTicket, VolumeError> {
        let resolved = self.resolve(kind, &target)?;
        let target_id = resolved.id().to_string();

        match (&kind, &resolved) {
            (OperationKind::Unmount, Resolved::Volume(volume)) if !volume.is_mounted() => {
                return Err(VolumeError::NotMounted(target_id));
            }
            (OperationKind::Unmount | OperationKind::Eject, Resolved::Location(_)) => {
                return Err(VolumeError::NotFound(target_id));
            }
            _ => {}
        }

        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            return Err(VolumeError::MonitorUnavailable(
                "no tokio runtime to run the operation on".to_string(),
            ));
        };

        let operation_id = OperationId::new();
        let (responder, receiver) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.contains_key(&target_id) {
                return Err(VolumeError::Busy(target_id));
            }
            pending.insert(
                target_id.clone(),
                PendingEntry {
                    operation: PendingOperation {
                        operation_id,
                        kind,
                        target_id: target_id.clone(),
                        request: target,
                    },
                    responder,
                },
            );
        }

        info!(%operation_id, operation = %kind, target = %target_id, "Dispatching operation");

        let this = self.clone();
        runtime.spawn(async move {
            let result = this.run(kind, resolved).await;
            this.complete(operation_id, kind, result);
        });

        Ok(OperationTicket {
            operation_id,
            kind,
            target_id,
            receiver,
        })
    }

    /// Call the service and fold a successful result into the registry.
    /// Returns the result plus the registry event to publish, if any.
    async fn run(
        &self,
        kind: OperationKind,
        resolved: Resolved,
    ) -> (String, Result<(DiskInfo, Option<DeviceEvent>), VolumeError>) {
        let target_id = resolved.id().to_string();
        let bridge = Arc::new(CredentialBridge::new(self.prompt.clone()));

        let result = match (kind, resolved) {
            (OperationKind::Mount, Resolved::Volume(volume)) => {
                match self.service.mount_volume(volume.clone(), bridge).await {
                    Ok(root) => Ok(self.mounted(&volume, &root)),
                    Err(ServiceError::AlreadyMounted(at)) => {
                        info!(target = %volume.id, %at, "Volume already mounted");
                        Ok((self.current_info(&volume), None))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            (OperationKind::Mount, Resolved::Mount(mount)) => {
                match self
                    .service
                    .mount_location(mount.root_uri.clone(), bridge)
                    .await
                {
                    Ok(mount) => Ok(self.location_mounted(mount)),
                    Err(ServiceError::AlreadyMounted(_)) => Ok((
                        self.registry
                            .disk_info(&mount.id)
                            .unwrap_or_else(|| DiskInfo::from_mount(&mount)),
                        None,
                    )),
                    Err(e) => Err(e.into()),
                }
            }
            (OperationKind::Mount, Resolved::Location(uri)) => {
                match self.service.mount_location(uri.clone(), bridge).await {
                    Ok(mount) => Ok(self.location_mounted(mount)),
                    Err(ServiceError::AlreadyMounted(_)) => self
                        .registry
                        .mount_by_root_uri(&uri)
                        .map(|m| (DiskInfo::from_mount(&m), None))
                        .ok_or_else(|| VolumeError::NotFound(uri.clone())),
                    Err(e) => Err(e.into()),
                }
            }

            (OperationKind::Unmount, Resolved::Volume(volume)) => {
                let root = volume.mounted_root_uri.clone().unwrap_or_default();
                self.service
                    .unmount(root)
                    .await
                    .map(|()| self.unmounted(&target_id, &volume_fallback(&volume)))
                    .map_err(VolumeError::from)
            }
            (OperationKind::Unmount, Resolved::Mount(mount)) => self
                .service
                .unmount(mount.root_uri.clone())
                .await
                .map(|()| self.unmounted(&target_id, &DiskInfo::from_mount(&mount)))
                .map_err(VolumeError::from),

            (OperationKind::Eject, Resolved::Volume(volume)) => self
                .service
                .eject_volume(volume.clone())
                .await
                .map(|()| self.unmounted(&target_id, &volume_fallback(&volume)))
                .map_err(VolumeError::from),
            (OperationKind::Eject, Resolved::Mount(mount)) => self
                .service
                .eject_mount(mount.clone())
                .await
                .map(|()| self.unmounted(&target_id, &DiskInfo::from_mount(&mount)))
                .map_err(VolumeError::from),

            (OperationKind::Unmount | OperationKind::Eject, Resolved::Location(uri)) => {
                Err(VolumeError::NotFound(uri))
            }
        };

        (target_id, result)
    }

    fn current_info(&self, volume: &Volume) -> DiskInfo {
        self.registry
            .disk_info(&volume.id)
            .unwrap_or_else(|| DiskInfo::from_volume(volume))
    }

    fn mounted(&self, volume: &Volume, root: &str) -> (DiskInfo, Option<DeviceEvent>) {
        match self.registry.mark_mounted(&volume.id, root) {
            Some(t) if t.transitioned => (
                t.disk_info.clone(),
                Some(DeviceEvent::MountAdded(t.disk_info)),
            ),
            Some(t) => (t.disk_info, None),
            None => {
                // The volume vanished while the call was in flight.
                let mut gone = volume.clone();
                gone.mounted_root_uri = Some(root.to_string());
                (DiskInfo::from_volume(&gone), None)
            }
        }
    }

    fn location_mounted(&self, mount: Mount) -> (DiskInfo, Option<DeviceEvent>) {
        let id = mount.id.clone();
        let derived = DiskInfo::from_mount(&mount);
        let outcome = self.registry.transaction(|state| {
            let outcome = state.upsert_mount(mount);
            (outcome, state.disk_info(&id).cloned())
        });
        match outcome {
            (Upsert::Inserted, Some(info)) => (info.clone(), Some(DeviceEvent::MountAdded(info))),
            (_, info) => (info.unwrap_or(derived), None),
        }
    }

    fn unmounted(&self, target_id: &str, fallback: &DiskInfo) -> (DiskInfo, Option<DeviceEvent>) {
        match self.registry.mark_unmounted(target_id) {
            Some(t) if t.transitioned => (
                t.disk_info.clone(),
                Some(DeviceEvent::MountRemoved(t.disk_info)),
            ),
            Some(t) => (t.disk_info, None),
            None => (fallback.clone(), None),
        }
    }

    /// Settle the pending entry, hand the result to the ticket, then
    /// publish. Publishing never waits on subscribers.
    fn complete(
        &self,
        operation_id: OperationId,
        kind: OperationKind,
        (target_id, result): (String, Result<(DiskInfo, Option<DeviceEvent>), VolumeError>),
    ) {
        let entry = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&target_id);

        let (outcome, events) = match result {
            Ok((disk_info, registry_event)) => {
                info!(%operation_id, operation = %kind, target = %target_id, "Operation completed");
                let completed = DeviceEvent::OperationCompleted {
                    operation_id,
                    operation: kind,
                    target_id: target_id.clone(),
                    disk_info: Some(disk_info.clone()),
                };
                let events: Vec<DeviceEvent> =
                    registry_event.into_iter().chain([completed]).collect();
                (Ok(disk_info), events)
            }
            Err(err) => {
                error!(%operation_id, operation = %kind, target = %target_id, "Operation failed: {err}");
                let failed = DeviceEvent::OperationFailed {
                    operation_id,
                    operation: kind,
                    target_id: target_id.clone(),
                    error: err.report(),
                };
                (Err(err), vec![failed])
            }
        };

        match entry {
            Some(entry) => {
                // The caller may have dropped the ticket.
                let _ = entry.responder.send(outcome);
            }
            None => warn!(target = %target_id, "Completed operation had no pending entry"),
        }

        for event in events {
            self.bus.publish(event);
        }
    }
}

/// Disk info for a volume that is no longer mounted
fn volume_fallback(volume: &Volume) -> DiskInfo {
    let mut unmounted = volume.clone();
    unmounted.mounted_root_uri = None;
    DiskInfo::from_volume(&unmounted)
}
