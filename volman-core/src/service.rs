// SPDX-License-Identifier: GPL-3.0-only

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use volman_types::{DeviceHandle, DeviceKind, Drive, MonitorEvent, Mount, ServiceError, Volume};

use crate::credentials::CredentialBridge;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Stream of raw change notifications from the OS mount service
pub struct MonitorEventStream {
    receiver: mpsc::Receiver<MonitorEvent>,
}

impl MonitorEventStream {
    pub fn new(receiver: mpsc::Receiver<MonitorEvent>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.receiver.recv().await
    }

    /// Drain whatever is already buffered without waiting.
    pub fn try_recv(&mut self) -> Option<MonitorEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for MonitorEventStream {
    type Item = MonitorEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// The operating system's volume/mount service.
///
/// Completions are delivered by returning from the async methods; the
/// orchestrator runs each call on its own task.
#[async_trait]
pub trait MountService: Send + Sync {
    async fn list_drives(&self) -> ServiceResult<Vec<Drive>>;
    async fn list_volumes(&self) -> ServiceResult<Vec<Volume>>;
    async fn list_mounts(&self) -> ServiceResult<Vec<Mount>>;

    /// Start delivering change events. Events that occur after this call
    /// returns are buffered in the stream.
    async fn subscribe(&self) -> ServiceResult<MonitorEventStream>;

    /// Mount a volume and return the root URI of the new mount.
    async fn mount_volume(
        &self,
        volume: Volume,
        credentials: Arc<CredentialBridge>,
    ) -> ServiceResult<String>;

    /// Mount a location URI that has no volume, such as a network share.
    async fn mount_location(
        &self,
        uri: String,
        credentials: Arc<CredentialBridge>,
    ) -> ServiceResult<Mount>;

    async fn unmount(&self, root_uri: String) -> ServiceResult<()>;
    async fn eject_volume(&self, volume: Volume) -> ServiceResult<()>;
    async fn eject_mount(&self, mount: Mount) -> ServiceResult<()>;

    /// Resolve a live device handle for an entity id.
    async fn device_handle(&self, id: &str, kind: DeviceKind)
    -> ServiceResult<Option<DeviceHandle>>;
}
