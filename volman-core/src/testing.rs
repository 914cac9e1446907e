// SPDX-License-Identifier: GPL-3.0-only

//! In-process mount service used by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use volman_types::{
    DeviceHandle, DeviceKind, Drive, MonitorEvent, Mount, ServiceError, Volume, VolumeError,
};

use crate::credentials::{CredentialBridge, SecretRequest};
use crate::service::{MonitorEventStream, MountService, ServiceResult};

#[derive(Default)]
struct FakeState {
    drives: Vec<Drive>,
    volumes: Vec<Volume>,
    mounts: Vec<Mount>,
    handles: HashMap<String, DeviceHandle>,

    /// Delivered right after subscription, before enumeration runs
    early_events: Vec<MonitorEvent>,
    sender: Option<mpsc::Sender<MonitorEvent>>,

    mount_result: Option<ServiceResult<String>>,
    location_result: Option<ServiceResult<Mount>>,
    unmount_result: Option<ServiceResult<()>>,
    eject_result: Option<ServiceResult<()>>,

    calls: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeMountService {
    state: Arc<Mutex<FakeState>>,
    gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl FakeMountService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drive(self, drive: Drive) -> Self {
        self.state.lock().unwrap().drives.push(drive);
        self
    }

    pub fn with_volume(self, volume: Volume) -> Self {
        self.state.lock().unwrap().volumes.push(volume);
        self
    }

    pub fn with_mount(self, mount: Mount) -> Self {
        self.state.lock().unwrap().mounts.push(mount);
        self
    }

    pub fn with_handle(self, id: &str, handle: DeviceHandle) -> Self {
        self.state
            .lock()
            .unwrap()
            .handles
            .insert(id.to_string(), handle);
        self
    }

    pub fn with_early_event(self, event: MonitorEvent) -> Self {
        self.state.lock().unwrap().early_events.push(event);
        self
    }

    pub fn set_mount_result(&self, result: ServiceResult<String>) {
        self.state.lock().unwrap().mount_result = Some(result);
    }

    pub fn set_location_result(&self, result: ServiceResult<Mount>) {
        self.state.lock().unwrap().location_result = Some(result);
    }

    pub fn set_unmount_result(&self, result: ServiceResult<()>) {
        self.state.lock().unwrap().unmount_result = Some(result);
    }

    pub fn set_eject_result(&self, result: ServiceResult<()>) {
        self.state.lock().unwrap().eject_result = Some(result);
    }

    /// Block every following operation until [`FakeMountService::release`].
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.notify_waiters();
            gate.notify_one();
        }
    }

    pub async fn emit(&self, event: MonitorEvent) {
        let sender = self.state.lock().unwrap().sender.clone();
        sender
            .expect("emit before subscribe")
            .send(event)
            .await
            .expect("monitor stream dropped");
    }

    /// Close the event stream, ending the monitor task.
    pub fn close(&self) {
        self.state.lock().unwrap().sender = None;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    async fn wait_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl MountService for FakeMountService {
    async fn list_drives(&self) -> ServiceResult<Vec<Drive>> {
        Ok(self.state.lock().unwrap().drives.clone())
    }

    async fn list_volumes(&self) -> ServiceResult<Vec<Volume>> {
        Ok(self.state.lock().unwrap().volumes.clone())
    }

    async fn list_mounts(&self) -> ServiceResult<Vec<Mount>> {
        Ok(self.state.lock().unwrap().mounts.clone())
    }

    async fn subscribe(&self) -> ServiceResult<MonitorEventStream> {
        let (sender, receiver) = mpsc::channel(32);
        let early = {
            let mut state = self.state.lock().unwrap();
            state.sender = Some(sender.clone());
            std::mem::take(&mut state.early_events)
        };
        for event in early {
            let _ = sender.send(event).await;
        }
        Ok(MonitorEventStream::new(receiver))
    }

    async fn mount_volume(
        &self,
        volume: Volume,
        credentials: Arc<CredentialBridge>,
    ) -> ServiceResult<String> {
        self.record(format!("mount:{}", volume.id));

        if volume.encrypted {
            credentials
                .ask_password(SecretRequest::passphrase(format!("Unlock {}", volume.id)))
                .await
                .map_err(|e| match e {
                    VolumeError::AuthCancelled => ServiceError::AuthCancelled,
                    other => ServiceError::Failed(other.to_string()),
                })?;
        }

        self.wait_gate().await;
        let scripted = self.state.lock().unwrap().mount_result.clone();
        scripted.unwrap_or_else(|| Ok(format!("file:///media/{}", volume.id)))
    }

    async fn mount_location(
        &self,
        uri: String,
        _credentials: Arc<CredentialBridge>,
    ) -> ServiceResult<Mount> {
        self.record(format!("mount_location:{uri}"));
        self.wait_gate().await;
        let scripted = self.state.lock().unwrap().location_result.clone();
        scripted.unwrap_or_else(|| {
            Ok(Mount {
                id: uri.clone(),
                name: uri.clone(),
                root_uri: uri,
                can_unmount: true,
                ..Default::default()
            })
        })
    }

    async fn unmount(&self, root_uri: String) -> ServiceResult<()> {
        self.record(format!("unmount:{root_uri}"));
        self.wait_gate().await;
        let scripted = self.state.lock().unwrap().unmount_result.clone();
        scripted.unwrap_or(Ok(()))
    }

    async fn eject_volume(&self, volume: Volume) -> ServiceResult<()> {
        self.record(format!("eject:{}", volume.id));
        self.wait_gate().await;
        let scripted = self.state.lock().unwrap().eject_result.clone();
        scripted.unwrap_or(Ok(()))
    }

    async fn eject_mount(&self, mount: Mount) -> ServiceResult<()> {
        self.record(format!("eject_mount:{}", mount.id));
        self.wait_gate().await;
        let scripted = self.state.lock().unwrap().eject_result.clone();
        scripted.unwrap_or(Ok(()))
    }

    async fn device_handle(
        &self,
        id: &str,
        kind: DeviceKind,
    ) -> ServiceResult<Option<DeviceHandle>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .handles
            .get(id)
            .filter(|h| h.kind() == kind)
            .cloned())
    }
}

pub fn drive(id: &str) -> Drive {
    Drive {
        id: id.to_string(),
        name: format!("Drive {id}"),
        removable: true,
        ejectable: true,
        ..Default::default()
    }
}

pub fn volume(id: &str, drive_id: Option<&str>) -> Volume {
    Volume {
        id: id.to_string(),
        label: id.to_uppercase(),
        drive_id: drive_id.map(str::to_string),
        unix_device: Some(format!("/dev/{id}")),
        can_mount: true,
        can_eject: true,
        removable: true,
        size: 8_000_000_000,
        ..Default::default()
    }
}

pub fn mount_of(volume_id: &str, root_uri: &str) -> Mount {
    Mount {
        id: root_uri.to_string(),
        name: volume_id.to_uppercase(),
        root_uri: root_uri.to_string(),
        volume_id: Some(volume_id.to_string()),
        can_unmount: true,
        ..Default::default()
    }
}
