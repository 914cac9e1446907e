// SPDX-License-Identifier: GPL-3.0-only

//! Drive, volume and mount entities as reported by the OS mount service

use serde::{Deserialize, Serialize};

/// A physical or virtual drive exposed by the mount service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drive {
    /// Stable identifier (UDisks2 drive object path)
    pub id: String,

    /// Display name (e.g., "SanDisk Cruzer")
    pub name: String,

    /// Themed icon names, most specific first
    pub icons: Vec<String>,

    /// Symbolic icon names, most specific first
    pub symbolic_icons: Vec<String>,

    /// Whole-disk device file (e.g., "/dev/sdb")
    pub unix_device: Option<String>,

    pub ejectable: bool,
    pub media_removable: bool,
    pub removable: bool,
    pub has_media: bool,
    pub can_power_off: bool,
}

/// A mountable unit, optionally hosted on a [`Drive`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Stable identifier (UDisks2 block object path)
    pub id: String,

    pub name: String,

    /// Filesystem UUID
    pub uuid: Option<String>,

    /// Filesystem label, empty when unset
    pub label: String,

    pub icons: Vec<String>,

    /// Owning drive, if any
    pub drive_id: Option<String>,

    /// Device file (e.g., "/dev/sdb1")
    pub unix_device: Option<String>,

    /// Root URI of the active mount (e.g., "file:///media/usb1")
    pub mounted_root_uri: Option<String>,

    /// Where the volume would be mounted when activated, if known ahead of time
    pub activation_root: Option<String>,

    pub can_mount: bool,
    pub can_eject: bool,
    pub should_automount: bool,

    /// Copied from the owning drive at normalization time
    pub removable: bool,

    /// Encrypted container rather than a plain filesystem
    pub encrypted: bool,

    /// Size in bytes
    pub size: u64,
}

impl Volume {
    pub fn is_mounted(&self) -> bool {
        self.mounted_root_uri
            .as_deref()
            .is_some_and(|uri| !uri.is_empty())
    }
}

/// An active filesystem attachment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Stable identifier (the root URI for local mounts)
    pub id: String,

    pub name: String,

    /// Mounted root URI (e.g., "file:///media/usb1", "smb://nas/share")
    pub root_uri: String,

    /// Local mount path, empty for URIs with no local path
    pub mount_path: String,

    /// Backing volume; `None` for "no-volume" mounts such as network shares
    pub volume_id: Option<String>,

    pub drive_id: Option<String>,

    pub can_unmount: bool,
    pub can_eject: bool,

    pub icons: Vec<String>,
}

/// The entity families kept by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Drive,
    Volume,
    Mount,
    DiskInfo,
}

/// Any registry entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "entity")]
pub enum Entity {
    Drive(Drive),
    Volume(Volume),
    Mount(Mount),
    DiskInfo(crate::DiskInfo),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Self::Drive(d) => &d.id,
            Self::Volume(v) => &v.id,
            Self::Mount(m) => &m.id,
            Self::DiskInfo(d) => &d.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Drive(_) => EntityKind::Drive,
            Self::Volume(_) => EntityKind::Volume,
            Self::Mount(_) => EntityKind::Mount,
            Self::DiskInfo(_) => EntityKind::DiskInfo,
        }
    }
}
