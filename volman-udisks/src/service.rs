// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use udisks2::{drive::DriveProxy, encrypted::EncryptedProxy, filesystem::FilesystemProxy};
use volman_core::{
    Config, CredentialBridge, MonitorEventStream, MountService, SecretRequest, ServiceResult,
};
use volman_types::{
    DeviceHandle, DeviceKind, Drive, Mount, ServiceError, Volume, file_uri_to_path,
    path_to_file_uri,
};
use zbus::{Connection, zvariant::Value};

use crate::dbus::{UDISKS_ROOT, UDisks2ObjectManagerProxy};
use crate::error::{credential_error, service_error, udisks_error};
use crate::network::{self, NetworkMount};
use crate::objects::ObjectTree;
use crate::signals::{SharedTree, SignalStreams, lock_tree, spawn_watcher};

/// What has to happen before a volume's filesystem can be mounted
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MountPlan {
    /// Mount this filesystem object directly
    Filesystem(String),
    /// Unlock this encrypted container first, then mount its cleartext device
    Unlock(String),
}

pub(crate) fn mount_plan(tree: &ObjectTree, volume_id: &str) -> ServiceResult<MountPlan> {
    let path = tree
        .resolve_block(volume_id)
        .ok_or_else(|| ServiceError::NotFound(volume_id.to_string()))?;
    if let Some(fs) = tree.filesystem_object(&path) {
        return Ok(MountPlan::Filesystem(fs));
    }
    if tree.is_encrypted(&path) {
        return match tree.cleartext_of(&path) {
            // Unlocked, but the cleartext device has no filesystem.
            Some(clear) => Err(ServiceError::Unsupported(format!(
                "{clear} has no mountable filesystem"
            ))),
            None => Ok(MountPlan::Unlock(path)),
        };
    }
    Err(ServiceError::Unsupported(format!(
        "{volume_id} has no mountable filesystem"
    )))
}

/// Everything to tear down before ejecting the drive behind a volume
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct EjectPlan {
    pub drive: String,
    pub unmount: Vec<String>,
    pub lock: Vec<String>,
}

pub(crate) fn eject_plan(tree: &ObjectTree, volume_id: &str) -> ServiceResult<EjectPlan> {
    let path = tree
        .resolve_block(volume_id)
        .ok_or_else(|| ServiceError::NotFound(volume_id.to_string()))?;
    let drive = tree.drive_of(&path).ok_or_else(|| {
        ServiceError::Unsupported(format!("{volume_id} is not on an ejectable drive"))
    })?;

    let mut plan = EjectPlan {
        drive: drive.clone(),
        ..Default::default()
    };
    for volume in tree
        .volumes()
        .into_iter()
        .filter(|v| v.drive_id.as_deref() == Some(drive.as_str()))
    {
        if let Some(fs) = tree.filesystem_object(&volume.id)
            && !tree.mount_points(&fs).is_empty()
        {
            plan.unmount.push(fs);
        }
        if volume.encrypted && tree.cleartext_of(&volume.id).is_some() {
            plan.lock.push(volume.id);
        }
    }
    Ok(plan)
}

/// [`MountService`] backed by UDisks2 on the system bus
pub struct UDisksMountService {
    connection: Connection,
    config: Config,
    tree: SharedTree,
}

impl UDisksMountService {
    /// Connect to the system bus and read the initial object tree.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let connection = Connection::system().await?;
        let service = Self {
            connection,
            config,
            tree: SharedTree::default(),
        };
        let tree = service.refresh().await?;
        info!("Connected to UDisks2 ({} objects)", tree.len());
        Ok(service)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Re-read every managed object and replace the cached tree.
    async fn refresh(&self) -> ServiceResult<ObjectTree> {
        let object_manager = UDisks2ObjectManagerProxy::new(&self.connection)
            .await
            .map_err(|e| service_error(e, UDISKS_ROOT))?;
        let managed = object_manager
            .get_managed_objects()
            .await
            .map_err(|e| service_error(e, UDISKS_ROOT))?;
        let tree = ObjectTree::from_managed(managed);
        *lock_tree(&self.tree) = tree.clone();
        Ok(tree)
    }

    fn network_mounts(&self) -> Vec<NetworkMount> {
        network::list_network_mounts(&self.config).unwrap_or_else(|e| {
            warn!("Failed to read network mounts: {e}");
            Vec::new()
        })
    }

    async fn unlock(
        &self,
        container: &str,
        volume: &Volume,
        bridge: &CredentialBridge,
    ) -> ServiceResult<String> {
        let name = if volume.name.is_empty() {
            volume.unix_device.clone().unwrap_or_else(|| container.to_string())
        } else {
            volume.name.clone()
        };
        let credentials = bridge
            .ask_password(SecretRequest::passphrase(format!(
                "Enter a passphrase to unlock {name}"
            )))
            .await
            .map_err(credential_error)?;

        let proxy = EncryptedProxy::builder(&self.connection)
            .path(container.to_string())
            .map_err(|e| service_error(e, container))?
            .build()
            .await
            .map_err(|e| service_error(e, container))?;

        let opts: HashMap<&str, Value<'_>> = HashMap::new();
        let cleartext = proxy
            .unlock(&credentials.secret, opts)
            .await
            .map_err(|e| udisks_error(e, container))?;
        info!("Unlocked {container} as {}", cleartext.as_str());
        Ok(cleartext.to_string())
    }

    async fn mount_filesystem(&self, path: &str) -> ServiceResult<String> {
        let proxy = FilesystemProxy::builder(&self.connection)
            .path(path.to_string())
            .map_err(|e| service_error(e, path))?
            .build()
            .await
            .map_err(|e| service_error(e, path))?;

        let opts: HashMap<&str, Value<'_>> = HashMap::new();
        let mount_path = proxy
            .mount(opts)
            .await
            .map_err(|e| udisks_error(e, path))?;
        info!("Mounted {path} at {mount_path}");
        Ok(mount_path)
    }

    async fn unmount_filesystem(&self, path: &str) -> ServiceResult<()> {
        let proxy = FilesystemProxy::builder(&self.connection)
            .path(path.to_string())
            .map_err(|e| service_error(e, path))?
            .build()
            .await
            .map_err(|e| service_error(e, path))?;

        let opts: HashMap<&str, Value<'_>> = HashMap::new();
        proxy
            .unmount(opts)
            .await
            .map_err(|e| udisks_error(e, path))?;
        info!("Unmounted {path}");
        Ok(())
    }

    async fn lock(&self, container: &str) -> ServiceResult<()> {
        let proxy = EncryptedProxy::builder(&self.connection)
            .path(container.to_string())
            .map_err(|e| service_error(e, container))?
            .build()
            .await
            .map_err(|e| service_error(e, container))?;

        let opts: HashMap<&str, Value<'_>> = HashMap::new();
        proxy
            .lock(opts)
            .await
            .map_err(|e| udisks_error(e, container))
    }

    async fn eject_drive(&self, drive: &str) -> ServiceResult<()> {
        let proxy = DriveProxy::builder(&self.connection)
            .path(drive.to_string())
            .map_err(|e| service_error(e, drive))?
            .build()
            .await
            .map_err(|e| service_error(e, drive))?;

        proxy
            .eject(HashMap::new())
            .await
            .map_err(|e| udisks_error(e, drive))?;
        info!("Ejected {drive}");
        Ok(())
    }
}

#[async_trait]
impl MountService for UDisksMountService {
    async fn list_drives(&self) -> ServiceResult<Vec<Drive>> {
        Ok(self.refresh().await?.drives())
    }

    async fn list_volumes(&self) -> ServiceResult<Vec<Volume>> {
        Ok(self.refresh().await?.volumes())
    }

    async fn list_mounts(&self) -> ServiceResult<Vec<Mount>> {
        let mut mounts = self.refresh().await?.mounts();
        mounts.extend(self.network_mounts().into_iter().map(|n| n.mount));
        Ok(mounts)
    }

    async fn subscribe(&self) -> ServiceResult<MonitorEventStream> {
        let streams = SignalStreams::open(&self.connection)
            .await
            .map_err(|e| service_error(e, UDISKS_ROOT))?;
        // Baseline for the first diff.
        self.refresh().await?;

        let (sender, receiver) = mpsc::channel(self.config.monitor_capacity);
        spawn_watcher(streams, self.tree.clone(), sender);
        debug!("Watching UDisks2 signals");
        Ok(MonitorEventStream::new(receiver))
    }

    async fn mount_volume(
        &self,
        volume: Volume,
        credentials: Arc<CredentialBridge>,
    ) -> ServiceResult<String> {
        let tree = self.refresh().await?;
        let filesystem = match mount_plan(&tree, &volume.id)? {
            MountPlan::Filesystem(path) => path,
            MountPlan::Unlock(container) => {
                self.unlock(&container, &volume, &credentials).await?
            }
        };

        let mount_path = self.mount_filesystem(&filesystem).await?;
        path_to_file_uri(&mount_path).ok_or_else(|| {
            ServiceError::Failed(format!("{filesystem} mounted at a relative path {mount_path}"))
        })
    }

    async fn mount_location(
        &self,
        uri: String,
        _credentials: Arc<CredentialBridge>,
    ) -> ServiceResult<Mount> {
        Err(ServiceError::Unsupported(format!(
            "UDisks2 cannot mount locations: {uri}"
        )))
    }

    async fn unmount(&self, root_uri: String) -> ServiceResult<()> {
        let Some(mount_path) = file_uri_to_path(&root_uri) else {
            return Err(ServiceError::Unsupported(format!(
                "{root_uri} is not a UDisks2 mount"
            )));
        };

        let tree = self.refresh().await?;
        match tree.block_for_mount_path(&mount_path) {
            Some(block) => self.unmount_filesystem(&block).await,
            None if self
                .network_mounts()
                .iter()
                .any(|n| n.mount.mount_path == mount_path) =>
            {
                Err(ServiceError::Unsupported(format!(
                    "{root_uri} is not a UDisks2 mount"
                )))
            }
            None => Err(ServiceError::NotMounted(root_uri)),
        }
    }

    async fn eject_volume(&self, volume: Volume) -> ServiceResult<()> {
        let tree = self.refresh().await?;
        let plan = eject_plan(&tree, &volume.id)?;

        for filesystem in &plan.unmount {
            self.unmount_filesystem(filesystem).await?;
        }
        for container in &plan.lock {
            self.lock(container).await?;
        }
        self.eject_drive(&plan.drive).await
    }

    async fn eject_mount(&self, mount: Mount) -> ServiceResult<()> {
        let Some(volume_id) = mount.volume_id.clone() else {
            return Err(ServiceError::Unsupported(format!(
                "{} has no drive to eject",
                mount.root_uri
            )));
        };
        let volume = self
            .refresh()
            .await?
            .volume(&volume_id)
            .ok_or(ServiceError::NotFound(volume_id))?;
        self.eject_volume(volume).await
    }

    async fn device_handle(
        &self,
        id: &str,
        kind: DeviceKind,
    ) -> ServiceResult<Option<DeviceHandle>> {
        match kind {
            DeviceKind::Block => Ok(self
                .refresh()
                .await?
                .block_device(id)
                .map(DeviceHandle::Block)),
            DeviceKind::Protocol => Ok(self
                .network_mounts()
                .into_iter()
                .find(|n| n.mount.id == id || n.mount.mount_path == id)
                .map(|n| {
                    DeviceHandle::Protocol(network::protocol_device(&n.mount, &n.fs_type))
                })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbus::FILESYSTEM_IFACE;
    use crate::objects::fixtures::{CLEAR, DISK, DRIVE, LUKS, PART, aay, props, unlock, usb_stick};

    #[test]
    fn plain_filesystems_mount_directly() {
        let tree = usb_stick();
        assert_eq!(
            mount_plan(&tree, PART).unwrap(),
            MountPlan::Filesystem(PART.to_string())
        );
        assert_eq!(
            mount_plan(&tree, "/dev/sdb1").unwrap(),
            MountPlan::Filesystem(PART.to_string())
        );
    }

    #[test]
    fn locked_containers_unlock_first() {
        let mut tree = usb_stick();
        assert_eq!(
            mount_plan(&tree, LUKS).unwrap(),
            MountPlan::Unlock(LUKS.to_string())
        );

        unlock(&mut tree, &[]);
        assert_eq!(
            mount_plan(&tree, LUKS).unwrap(),
            MountPlan::Filesystem(CLEAR.to_string())
        );
    }

    #[test]
    fn blocks_without_filesystem_are_refused() {
        let tree = usb_stick();
        assert!(matches!(
            mount_plan(&tree, DISK),
            Err(ServiceError::Unsupported(_))
        ));
        assert!(matches!(
            mount_plan(&tree, "/dev/sdz"),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn eject_tears_down_every_volume_on_the_drive() {
        let mut tree = usb_stick();
        unlock(&mut tree, &["/media/secret"]);

        let plan = eject_plan(&tree, PART).unwrap();
        assert_eq!(plan.drive, DRIVE);
        assert_eq!(plan.unmount, vec![PART.to_string(), CLEAR.to_string()]);
        assert_eq!(plan.lock, vec![LUKS.to_string()]);
    }

    #[test]
    fn eject_of_an_idle_drive_only_ejects() {
        let mut tree = usb_stick();
        tree.update_properties(
            PART,
            FILESYSTEM_IFACE,
            props(vec![("MountPoints", aay(&[]))]),
            &[],
        );

        let plan = eject_plan(&tree, LUKS).unwrap();
        assert_eq!(
            plan,
            EjectPlan {
                drive: DRIVE.to_string(),
                ..Default::default()
            }
        );
    }
}
