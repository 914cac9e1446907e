// SPDX-License-Identifier: GPL-3.0-only

//! Device and volume lifecycle core.
//!
//! [`VolumeManager`] wires the pieces together:
//!
//! - [`DeviceRegistry`]: drives, volumes, mounts and derived disk infos
//! - [`VolumeMonitor`]: folds [`MountService`] events into the registry
//! - [`Orchestrator`]: mount/unmount/eject with one pending operation per target
//! - [`EventBus`]: fan-out of [`volman_types::DeviceEvent`]s
//! - [`PropertyTranslator`] and [`policy`]: device property maps and rules

pub mod bus;
pub mod config;
pub mod credentials;
pub mod logging;
pub mod manager;
pub mod monitor;
pub mod orchestrator;
pub mod persistence;
pub mod policy;
pub mod registry;
pub mod service;
pub mod translator;

#[cfg(test)]
pub(crate) mod testing;

pub use bus::{EventBus, EventStream};
pub use config::{Config, LoggingConfig, LoggingLevel};
pub use credentials::{
    AskPasswordFlag, AskPasswordFlags, BridgeState, CredentialBridge, Credentials, NoPrompt,
    PasswordSave, SecretPrompt, SecretReply, SecretRequest,
};
pub use manager::{VolumeManager, VolumeManagerBuilder};
pub use monitor::{MonitorHandle, VolumeMonitor};
pub use orchestrator::{MountTarget, OperationTicket, Orchestrator, PendingOperation};
pub use persistence::{DataPersistence, JsonFilePersistence, MemoryPersistence, ValueMap};
pub use policy::{PolicyDecision, is_ejectable_block_dev, is_mountable_block_dev};
pub use registry::{DeviceRegistry, MountTransition, RegistrySnapshot, RegistryState, Upsert};
pub use service::{MonitorEventStream, MountService, ServiceResult};
pub use translator::PropertyTranslator;
