// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::disk_info::DiskInfo;
use crate::entity::{Drive, Mount, Volume};
use crate::error::ErrorReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Mount,
    Unmount,
    Eject,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Eject => "eject",
        })
    }
}

/// Raw change notification from the OS mount service, already normalized
/// into entity shapes. Removals carry only the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum MonitorEvent {
    DriveAdded(Drive),
    DriveChanged(Drive),
    DriveRemoved(String),
    VolumeAdded(Volume),
    VolumeChanged(Volume),
    VolumeRemoved(String),
    MountAdded(Mount),
    MountChanged(Mount),
    MountRemoved(String),
}

/// Notification published to application subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum DeviceEvent {
    MountAdded(DiskInfo),
    MountRemoved(DiskInfo),
    VolumeAdded(DiskInfo),
    VolumeRemoved(DiskInfo),
    DiskChanged(DiskInfo),
    OperationCompleted {
        operation_id: OperationId,
        operation: OperationKind,
        target_id: String,
        disk_info: Option<DiskInfo>,
    },
    OperationFailed {
        operation_id: OperationId,
        operation: OperationKind,
        target_id: String,
        error: ErrorReport,
    },
}

impl DeviceEvent {
    /// Id of the volume, mount or operation target the event is about
    pub fn subject_id(&self) -> &str {
        match self {
            Self::MountAdded(d)
            | Self::MountRemoved(d)
            | Self::VolumeAdded(d)
            | Self::VolumeRemoved(d)
            | Self::DiskChanged(d) => &d.id,
            Self::OperationCompleted { target_id, .. } | Self::OperationFailed { target_id, .. } => {
                target_id
            }
        }
    }
}
