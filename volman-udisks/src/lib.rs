// SPDX-License-Identifier: GPL-3.0-only

//! UDisks2 implementation of the volman mount service contract.
//!
//! Drives, volumes and mounts are projected from the UDisks2 object tree;
//! network shares are read from mountinfo. Live changes come from the
//! ObjectManager and PropertiesChanged signals.

pub mod bytestring;
pub mod dbus;
pub mod error;
pub mod network;
pub mod objects;
pub mod service;
mod signals;

pub use network::{NetworkMount, list_network_mounts, network_root_uri};
pub use objects::{ObjectTree, Snapshot};
pub use service::UDisksMountService;
