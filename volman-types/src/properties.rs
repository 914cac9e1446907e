// SPDX-License-Identifier: GPL-3.0-only

//! Flat, loosely-typed device property maps.
//!
//! The property translator turns a device handle into a [`DeviceProperties`]
//! map. Readers use the lossy getters, so a property that the device did not
//! report (stored as an empty string) reads as `false`, `0` or `""`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Well-known property keys
pub mod keys {
    pub const ID: &str = "id";
    pub const MOUNT_POINT: &str = "mount_point";
    pub const MOUNT_POINTS: &str = "mount_points";
    pub const FILESYSTEM: &str = "filesystem";
    pub const FS_VERSION: &str = "fs_version";
    pub const SIZE_TOTAL: &str = "size_total";
    pub const SIZE_USED: &str = "size_used";
    pub const SIZE_FREE: &str = "size_free";
    pub const UUID: &str = "uuid";
    pub const DEVICE: &str = "device";
    pub const ID_LABEL: &str = "id_label";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const DEVICE_ICON: &str = "device_icon";
    pub const MEDIA: &str = "media";
    pub const MEDIA_COMPATIBILITY: &str = "media_compatibility";
    pub const MEDIA_REMOVABLE: &str = "media_removable";
    pub const MEDIA_AVAILABLE: &str = "media_available";
    pub const READ_ONLY: &str = "read_only";
    pub const REMOVABLE: &str = "removable";
    pub const OPTICAL: &str = "optical";
    pub const OPTICAL_BLANK: &str = "optical_blank";
    pub const OPTICAL_DRIVE: &str = "optical_drive";
    pub const OPTICAL_MEDIA_TYPE: &str = "optical_media_type";
    pub const OPTICAL_WRITE_SPEED: &str = "optical_write_speed";
    pub const CAN_POWER_OFF: &str = "can_power_off";
    pub const EJECTABLE: &str = "ejectable";
    pub const IS_ENCRYPTED: &str = "is_encrypted";
    pub const IS_LOOP_DEVICE: &str = "is_loop_device";
    pub const HAS_FILESYSTEM: &str = "has_filesystem";
    pub const HAS_PARTITION_TABLE: &str = "has_partition_table";
    pub const HAS_PARTITION: &str = "has_partition";
    pub const HAS_EXTENDED_PARTITION: &str = "has_extended_partition";
    pub const HINT_SYSTEM: &str = "hint_system";
    pub const HINT_IGNORE: &str = "hint_ignore";
    pub const CRYPTO_BACKING_DEVICE: &str = "crypto_backing_device";
    pub const CLEARTEXT_DEVICE: &str = "cleartext_device";
    pub const DRIVE: &str = "drive";
    pub const CONNECTION_BUS: &str = "connection_bus";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Str(String),
    StrList(Vec<String>),
}

impl PropertyValue {
    /// The value stored for a property the device did not report.
    pub fn missing() -> Self {
        Self::Str(String::new())
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::UInt(n) => *n != 0,
            Self::Int(n) => *n != 0,
            Self::Str(s) => matches!(s.trim(), "true" | "1"),
            Self::StrList(_) => false,
        }
    }

    pub fn as_u64(&self) -> u64 {
        match self {
            Self::Bool(b) => u64::from(*b),
            Self::UInt(n) => *n,
            Self::Int(n) => u64::try_from(*n).unwrap_or(0),
            Self::Str(s) => s.trim().parse().unwrap_or(0),
            Self::StrList(_) => 0,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Bool(b) => i64::from(*b),
            Self::UInt(n) => i64::try_from(*n).unwrap_or(i64::MAX),
            Self::Int(n) => *n,
            Self::Str(s) => s.trim().parse().unwrap_or(0),
            Self::StrList(_) => 0,
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::UInt(n) => n.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Str(s) => s.clone(),
            Self::StrList(list) => list.join(", "),
        }
    }

    pub fn to_string_list(&self) -> Vec<String> {
        match self {
            Self::StrList(list) => list.clone(),
            Self::Str(s) if s.is_empty() => Vec::new(),
            other => vec![other.to_display_string()],
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        Self::StrList(value)
    }
}

/// Flat property map for a block or protocol device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceProperties(BTreeMap<String, PropertyValue>);

impl DeviceProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<PropertyValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Store an optional property, falling back to an empty string.
    pub fn insert_or_empty(&mut self, key: &str, value: Option<PropertyValue>) {
        self.0
            .insert(key.to_string(), value.unwrap_or_else(PropertyValue::missing));
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).is_some_and(PropertyValue::as_bool)
    }

    pub fn get_str(&self, key: &str) -> String {
        self.get(key)
            .map(PropertyValue::to_display_string)
            .unwrap_or_default()
    }

    pub fn get_u64(&self, key: &str) -> u64 {
        self.get(key).map(PropertyValue::as_u64).unwrap_or(0)
    }

    pub fn get_i64(&self, key: &str) -> i64 {
        self.get(key).map(PropertyValue::as_i64).unwrap_or(0)
    }

    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(PropertyValue::to_string_list)
            .unwrap_or_default()
    }
}

impl FromIterator<(String, PropertyValue)> for DeviceProperties {
    fn from_iter<T: IntoIterator<Item = (String, PropertyValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_empty_values_read_as_defaults() {
        let mut props = DeviceProperties::new();
        props.insert_or_empty(keys::READ_ONLY, None);

        assert!(!props.get_bool(keys::READ_ONLY));
        assert_eq!(props.get_str(keys::READ_ONLY), "");
        assert!(!props.get_bool(keys::HINT_IGNORE));
        assert_eq!(props.get_u64(keys::SIZE_TOTAL), 0);
        assert!(props.get_str_list(keys::MOUNT_POINTS).is_empty());
    }

    #[test]
    fn lossy_getters_convert_between_shapes() {
        let mut props = DeviceProperties::new();
        props.insert(keys::SIZE_TOTAL, "4096");
        props.insert(keys::OPTICAL, 1u64);
        props.insert(
            keys::MEDIA_COMPATIBILITY,
            vec!["optical_cd".to_string(), "optical_dvd".to_string()],
        );

        assert_eq!(props.get_u64(keys::SIZE_TOTAL), 4096);
        assert!(props.get_bool(keys::OPTICAL));
        assert_eq!(
            props.get_str(keys::MEDIA_COMPATIBILITY),
            "optical_cd, optical_dvd"
        );
    }

    #[test]
    fn untagged_values_keep_their_shape_through_json() {
        let mut props = DeviceProperties::new();
        props.insert(keys::REMOVABLE, true);
        props.insert(keys::SIZE_TOTAL, 42u64);
        props.insert(keys::ID, "/dev/sr0");

        let json = serde_json::to_string(&props).expect("serialize props");
        let parsed: DeviceProperties = serde_json::from_str(&json).expect("deserialize props");
        assert_eq!(parsed, props);
    }
}
