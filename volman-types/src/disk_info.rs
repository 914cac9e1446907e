// SPDX-License-Identifier: GPL-3.0-only

//! UI-facing projection of a volume or a volume-less mount.
//!
//! A [`DiskInfo`] is never edited in place: the registry recomputes it from the
//! entity it was derived from whenever that entity changes.

use serde::{Deserialize, Serialize};

use crate::common::{file_uri_to_path, volume_label};
use crate::entity::{Mount, Volume};

/// Which entity a [`DiskInfo`] was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskInfoSource {
    Volume,
    Mount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    /// Id of the source volume or mount
    pub id: String,
    pub source: DiskInfoSource,
    pub name: String,

    /// Device file, empty for volume-less mounts
    pub unix_device: String,
    pub uuid: String,
    pub drive_id: Option<String>,

    pub mounted_root_uri: Option<String>,
    pub activation_root: Option<String>,

    /// Local mount path, empty when not mounted
    pub mount_point: String,

    pub icons: Vec<String>,
    pub can_mount: bool,
    pub can_unmount: bool,
    pub can_eject: bool,
    pub removable: bool,
    pub encrypted: bool,
    pub size: u64,
}

impl DiskInfo {
    /// Project a volume. Volume-level attributes (device, activation root) win.
    pub fn from_volume(volume: &Volume) -> Self {
        let mounted = volume.is_mounted();
        let mount_point = volume
            .mounted_root_uri
            .as_deref()
            .and_then(file_uri_to_path)
            .unwrap_or_default();

        let name = if !volume.name.is_empty() {
            volume.name.clone()
        } else if !volume.label.is_empty() {
            volume.label.clone()
        } else if volume.size > 0 {
            volume_label(volume.size)
        } else {
            volume.unix_device.clone().unwrap_or_default()
        };

        Self {
            id: volume.id.clone(),
            source: DiskInfoSource::Volume,
            name,
            unix_device: volume.unix_device.clone().unwrap_or_default(),
            uuid: volume.uuid.clone().unwrap_or_default(),
            drive_id: volume.drive_id.clone(),
            mounted_root_uri: volume.mounted_root_uri.clone().filter(|u| !u.is_empty()),
            activation_root: volume.activation_root.clone(),
            mount_point,
            icons: volume.icons.clone(),
            can_mount: volume.can_mount && !mounted,
            can_unmount: mounted,
            can_eject: volume.can_eject,
            removable: volume.removable,
            encrypted: volume.encrypted,
            size: volume.size,
        }
    }

    /// Project a mount that has no backing volume. Falls back to mount-level
    /// attributes (root URI, local path).
    pub fn from_mount(mount: &Mount) -> Self {
        let mount_point = if mount.mount_path.is_empty() {
            file_uri_to_path(&mount.root_uri).unwrap_or_default()
        } else {
            mount.mount_path.clone()
        };

        let name = if mount.name.is_empty() {
            mount.root_uri.clone()
        } else {
            mount.name.clone()
        };

        Self {
            id: mount.id.clone(),
            source: DiskInfoSource::Mount,
            name,
            unix_device: String::new(),
            uuid: String::new(),
            drive_id: mount.drive_id.clone(),
            mounted_root_uri: Some(mount.root_uri.clone()),
            activation_root: None,
            mount_point,
            icons: mount.icons.clone(),
            can_mount: false,
            can_unmount: mount.can_unmount,
            can_eject: mount.can_eject,
            removable: false,
            encrypted: false,
            size: 0,
        }
    }

    pub fn is_mounted(&self) -> bool {
        !self.mount_point.is_empty() || self.mounted_root_uri.is_some()
    }
}
