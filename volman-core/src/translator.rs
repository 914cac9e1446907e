// SPDX-License-Identifier: GPL-3.0-only

//! Flattens device handles into [`DeviceProperties`] maps.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use volman_types::{
    BlockDevice, DeviceHandle, DeviceProperties, ExtendedPartitionType, PropertyValue,
    ProtocolDevice, keys, volume_label,
};

use crate::persistence::{DataPersistence, ValueMap};

pub const OPTICAL_NAMESPACE: &str = "BurnAttribute";
pub const BURN_TOTAL_SIZE: &str = "BurnTotalSize";
pub const BURN_USED_SIZE: &str = "BurnUsedSize";
pub const BURN_MEDIA_TYPE: &str = "BurnMediaType";
pub const BURN_WRITE_SPEED: &str = "BurnWriteSpeed";

/// Persistence key for an optical device: the device path without `/dev/`.
pub fn optical_tag(device: &str) -> String {
    device.chars().skip(5).collect()
}

fn to_json(value: Option<&PropertyValue>) -> Value {
    match value {
        None => Value::Null,
        Some(PropertyValue::Bool(b)) => Value::from(*b),
        Some(PropertyValue::UInt(n)) => Value::from(*n),
        Some(PropertyValue::Int(n)) => Value::from(*n),
        Some(PropertyValue::Str(s)) => Value::from(s.as_str()),
        Some(PropertyValue::StrList(list)) => Value::from(list.clone()),
    }
}

fn json_u64(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn json_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn json_str_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

pub struct PropertyTranslator {
    store: Arc<dyn DataPersistence>,
}

impl PropertyTranslator {
    pub fn new(store: Arc<dyn DataPersistence>) -> Self {
        Self { store }
    }

    pub fn load(&self, handle: &DeviceHandle) -> DeviceProperties {
        match handle {
            DeviceHandle::Block(block) => self.load_block_info(block),
            DeviceHandle::Protocol(protocol) => self.load_protocol_info(protocol),
        }
    }

    pub fn load_block_info(&self, dev: &BlockDevice) -> DeviceProperties {
        let mut props = DeviceProperties::new();

        props.insert(keys::ID, dev.path.as_str());
        props.insert(keys::MOUNT_POINT, dev.mount_point.as_str());
        props.insert(keys::FILESYSTEM, dev.file_system.as_str());
        props.insert(keys::SIZE_TOTAL, dev.size_total);

        props.insert_or_empty(keys::UUID, dev.uuid.clone());
        props.insert_or_empty(keys::FS_VERSION, dev.fs_version.clone());
        props.insert(keys::DEVICE, dev.device.as_str());
        props.insert(keys::ID_LABEL, dev.id_label.as_str());
        props.insert_or_empty(keys::MEDIA, dev.media.clone());
        props.insert_or_empty(keys::READ_ONLY, dev.read_only.clone());
        props.insert(keys::REMOVABLE, dev.removable);
        props.insert_or_empty(keys::MEDIA_REMOVABLE, dev.media_removable.clone());
        props.insert(keys::OPTICAL, dev.optical);
        props.insert(keys::OPTICAL_BLANK, dev.optical_blank);
        props.insert_or_empty(keys::MEDIA_AVAILABLE, dev.media_available.clone());
        props.insert(keys::CAN_POWER_OFF, dev.can_power_off);
        props.insert(keys::EJECTABLE, dev.ejectable);
        props.insert(keys::IS_ENCRYPTED, dev.is_encrypted);
        props.insert(keys::IS_LOOP_DEVICE, dev.is_loop_device);
        props.insert(keys::HAS_FILESYSTEM, dev.has_file_system);
        props.insert(keys::HAS_PARTITION_TABLE, dev.has_partition_table);
        props.insert(keys::HAS_PARTITION, dev.has_partition);
        props.insert(keys::HINT_SYSTEM, dev.hint_system);
        props.insert(keys::HINT_IGNORE, dev.hint_ignore);
        props.insert_or_empty(keys::CRYPTO_BACKING_DEVICE, dev.crypto_backing_device.clone());
        props.insert(keys::DRIVE, dev.drive.as_str());
        props.insert(keys::MOUNT_POINTS, dev.mount_points.clone());
        props.insert(keys::MEDIA_COMPATIBILITY, dev.media_compatibility.clone());
        props.insert(
            keys::OPTICAL_DRIVE,
            dev.media_compatibility.join(", ").contains("optical"),
        );
        props.insert_or_empty(keys::CLEARTEXT_DEVICE, dev.cleartext_device.clone());
        props.insert_or_empty(keys::CONNECTION_BUS, dev.connection_bus.clone());

        let display_name = if dev.id_label.is_empty() {
            volume_label(dev.size_total)
        } else {
            dev.id_label.clone()
        };
        props.insert(keys::DISPLAY_NAME, display_name);

        props.insert(
            keys::HAS_EXTENDED_PARTITION,
            ExtendedPartitionType::parse(&dev.partition_type).is_some(),
        );

        if props.get_bool(keys::OPTICAL_DRIVE) && props.get_bool(keys::OPTICAL) {
            self.read_optical_info(&mut props);
        }

        props
    }

    pub fn load_protocol_info(&self, dev: &ProtocolDevice) -> DeviceProperties {
        let mut props = DeviceProperties::new();
        props.insert(keys::ID, dev.path.as_str());
        props.insert(keys::FILESYSTEM, dev.file_system.as_str());
        props.insert(keys::SIZE_TOTAL, dev.size_total);
        props.insert(keys::SIZE_USED, dev.size_usage);
        props.insert(keys::SIZE_FREE, dev.size_total.saturating_sub(dev.size_usage));
        props.insert(keys::MOUNT_POINT, dev.mount_point.as_str());
        props.insert(keys::DISPLAY_NAME, dev.display_name.as_str());
        props.insert(keys::DEVICE_ICON, dev.device_icons.clone());
        props
    }

    /// Cache the usage figures of an optical disc so they survive
    /// re-reads of a device that does not report them itself.
    pub fn persist_optical_info(&self, props: &DeviceProperties) {
        let tag = optical_tag(&props.get_str(keys::DEVICE));
        if tag.is_empty() {
            warn!("optical usage not persisted: device path is too short");
            return;
        }

        let mut info = ValueMap::new();
        info.insert(BURN_TOTAL_SIZE.to_string(), to_json(props.get(keys::SIZE_TOTAL)));
        info.insert(BURN_USED_SIZE.to_string(), to_json(props.get(keys::SIZE_USED)));
        info.insert(
            BURN_MEDIA_TYPE.to_string(),
            to_json(props.get(keys::OPTICAL_MEDIA_TYPE)),
        );
        info.insert(
            BURN_WRITE_SPEED.to_string(),
            to_json(props.get(keys::OPTICAL_WRITE_SPEED)),
        );

        self.store.set_value(OPTICAL_NAMESPACE, &tag, info);
        if let Err(e) = self.store.sync() {
            warn!("failed to sync optical usage for {tag}: {e:#}");
        }
        debug!(tag, "optical usage persisted");
    }

    pub fn read_optical_info(&self, props: &mut DeviceProperties) {
        if let Err(e) = self.store.reload() {
            warn!("failed to reload persistence store: {e:#}");
        }

        let tag = optical_tag(&props.get_str(keys::DEVICE));
        if !self.store.keys(OPTICAL_NAMESPACE).contains(&tag) {
            return;
        }
        let Some(info) = self.store.value(OPTICAL_NAMESPACE, &tag) else {
            return;
        };

        let total = json_u64(info.get(BURN_TOTAL_SIZE));
        let used = json_u64(info.get(BURN_USED_SIZE));
        props.insert(keys::SIZE_TOTAL, total);
        props.insert(keys::SIZE_USED, used);
        props.insert(keys::SIZE_FREE, total.saturating_sub(used));
        props.insert(keys::OPTICAL_MEDIA_TYPE, json_i64(info.get(BURN_MEDIA_TYPE)));
        props.insert(
            keys::OPTICAL_WRITE_SPEED,
            json_str_list(info.get(BURN_WRITE_SPEED)),
        );

        debug!(tag, total, used, "optical usage loaded");
    }
}
