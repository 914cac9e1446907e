// SPDX-License-Identifier: GPL-3.0-only

//! Live device handles.
//!
//! A handle is resolved once into either a block device or a protocol
//! (network/virtual) device. Both share a small capability set; everything
//! else is kind-specific.

use serde::{Deserialize, Serialize};

use crate::properties::PropertyValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Block,
    Protocol,
}

/// MBR partition type codes that mark an extended partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedPartitionType {
    /// 0x05
    Extended,
    /// 0x0f
    Win95ExtendedLba,
    /// 0x85
    LinuxExtended,
    /// 0xc5
    DrDosSecuredExtended,
    /// 0xd5
    MultiuserDosExtended,
}

impl ExtendedPartitionType {
    pub const ALL: [Self; 5] = [
        Self::Extended,
        Self::Win95ExtendedLba,
        Self::LinuxExtended,
        Self::DrDosSecuredExtended,
        Self::MultiuserDosExtended,
    ];

    pub fn code(self) -> u8 {
        match self {
            Self::Extended => 0x05,
            Self::Win95ExtendedLba => 0x0f,
            Self::LinuxExtended => 0x85,
            Self::DrDosSecuredExtended => 0xc5,
            Self::MultiuserDosExtended => 0xd5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Parse a partition type as reported for DOS tables ("0x05", "05", "5").
    /// GPT type GUIDs and empty strings never match.
    pub fn parse(type_id: &str) -> Option<Self> {
        let raw = type_id.trim();
        let hex = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .unwrap_or(raw);
        if hex.is_empty() || hex.len() > 2 {
            return None;
        }
        u8::from_str_radix(hex, 16).ok().and_then(Self::from_code)
    }
}

/// Snapshot of a block device as read from the mount service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Service object path
    pub path: String,
    /// First mount point, empty when not mounted
    pub mount_point: String,
    pub mount_points: Vec<String>,
    /// Filesystem type (e.g., "vfat", "iso9660"), empty when none
    pub file_system: String,
    pub size_total: u64,

    /// Device file (e.g., "/dev/sr0")
    pub device: String,
    pub id_label: String,
    /// Owning drive object path, empty when none
    pub drive: String,

    pub removable: bool,
    pub optical: bool,
    pub optical_blank: bool,
    pub can_power_off: bool,
    pub ejectable: bool,
    pub is_encrypted: bool,
    pub is_loop_device: bool,
    pub has_file_system: bool,
    pub has_partition_table: bool,
    pub has_partition: bool,
    pub hint_system: bool,
    pub hint_ignore: bool,

    /// Media compatibility list (e.g., ["optical_cd", "optical_dvd"])
    pub media_compatibility: Vec<String>,
    /// Partition type id, empty when the device is not a partition
    pub partition_type: String,

    // Properties some devices do not report.
    pub uuid: Option<PropertyValue>,
    pub fs_version: Option<PropertyValue>,
    pub media: Option<PropertyValue>,
    pub read_only: Option<PropertyValue>,
    pub media_removable: Option<PropertyValue>,
    pub media_available: Option<PropertyValue>,
    pub crypto_backing_device: Option<PropertyValue>,
    pub cleartext_device: Option<PropertyValue>,
    pub connection_bus: Option<PropertyValue>,
}

/// Snapshot of a protocol (network or virtual) device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDevice {
    pub path: String,
    pub mount_point: String,
    pub file_system: String,
    pub size_total: u64,
    pub size_usage: u64,
    pub display_name: String,
    pub device_icons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "device")]
pub enum DeviceHandle {
    Block(BlockDevice),
    Protocol(ProtocolDevice),
}

impl DeviceHandle {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Block(_) => DeviceKind::Block,
            Self::Protocol(_) => DeviceKind::Protocol,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Block(b) => &b.path,
            Self::Protocol(p) => &p.path,
        }
    }

    pub fn mount_point(&self) -> &str {
        match self {
            Self::Block(b) => &b.mount_point,
            Self::Protocol(p) => &p.mount_point,
        }
    }

    pub fn file_system(&self) -> &str {
        match self {
            Self::Block(b) => &b.file_system,
            Self::Protocol(p) => &p.file_system,
        }
    }

    pub fn size_total(&self) -> u64 {
        match self {
            Self::Block(b) => b.size_total,
            Self::Protocol(p) => p.size_total,
        }
    }

    pub fn as_block(&self) -> Option<&BlockDevice> {
        match self {
            Self::Block(b) => Some(b),
            Self::Protocol(_) => None,
        }
    }

    pub fn as_protocol(&self) -> Option<&ProtocolDevice> {
        match self {
            Self::Block(_) => None,
            Self::Protocol(p) => Some(p),
        }
    }
}
