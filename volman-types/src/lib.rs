// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the volman device/volume lifecycle subsystem
//!
//! These types are shared by every layer:
//!
//! - **volman-udisks**: normalizes UDisks2 objects into these entities
//! - **volman-core**: stores them in the registry and derives [`DiskInfo`]
//! - applications: consume [`DeviceEvent`]s and [`DiskInfo`] snapshots
//!
//! ## Entities
//! - `Drive` → physical or virtual drive
//! - `Volume` → mountable unit, optionally on a drive
//! - `Mount` → active attachment, optionally backed by a volume
//! - `DiskInfo` → projection of a volume or a volume-less mount

pub mod common;
pub mod device;
pub mod disk_info;
pub mod entity;
pub mod error;
pub mod event;
pub mod properties;

pub use common::{
    bytes_to_pretty, file_uri_to_path, path_to_file_uri, size_label, uri_scheme, volume_label,
};
pub use device::{BlockDevice, DeviceHandle, DeviceKind, ExtendedPartitionType, ProtocolDevice};
pub use disk_info::{DiskInfo, DiskInfoSource};
pub use entity::{Drive, Entity, EntityKind, Mount, Volume};
pub use error::{ErrorReport, ServiceError, VolumeError, VolumeErrorKind};
pub use event::{DeviceEvent, MonitorEvent, OperationId, OperationKind};
pub use properties::{DeviceProperties, PropertyValue, keys};
