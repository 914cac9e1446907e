// SPDX-License-Identifier: GPL-3.0-only

//! Cached UDisks2 object tree and its projection onto drives, volumes and mounts.

use std::collections::{BTreeMap, HashMap};

use volman_types::{
    BlockDevice, Drive, MonitorEvent, Mount, PropertyValue, Volume, path_to_file_uri,
    volume_label,
};
use zbus::zvariant::{OwnedObjectPath, OwnedValue};

use crate::bytestring::{bytestring_property, mount_points_property};
use crate::dbus::{
    BLOCK_IFACE, DRIVE_IFACE, ENCRYPTED_IFACE, FILESYSTEM_IFACE, LOOP_IFACE, PARTITION_IFACE,
    PARTITION_TABLE_IFACE,
};

pub type Properties = HashMap<String, OwnedValue>;
pub type Interfaces = HashMap<String, Properties>;

fn as_string(value: &OwnedValue) -> Option<String> {
    String::try_from(value.clone()).ok()
}

fn as_u64(value: &OwnedValue) -> Option<u64> {
    if let Ok(parsed) = u64::try_from(value.clone()) {
        Some(parsed)
    } else {
        u32::try_from(value.clone()).ok().map(u64::from)
    }
}

fn as_bool(value: &OwnedValue) -> Option<bool> {
    bool::try_from(value.clone()).ok()
}

/// Object path property, `None` for the "/" placeholder.
fn as_object_path(value: &OwnedValue) -> Option<String> {
    let path = OwnedObjectPath::try_from(value.clone())
        .map(|p| p.to_string())
        .ok()
        .or_else(|| as_string(value))?;
    (!path.is_empty() && path != "/").then_some(path)
}

fn as_string_list(value: &OwnedValue) -> Vec<String> {
    Vec::<String>::try_from(value.clone()).unwrap_or_default()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Default)]
pub struct ObjectTree {
    objects: BTreeMap<String, Interfaces>,
}

impl ObjectTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_managed(managed: HashMap<OwnedObjectPath, Interfaces>) -> Self {
        let objects = managed
            .into_iter()
            .map(|(path, interfaces)| (path.to_string(), interfaces))
            .collect();
        Self { objects }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Merge interfaces announced by `InterfacesAdded`.
    pub fn add_interfaces(&mut self, path: &str, interfaces: Interfaces) {
        let entry = self.objects.entry(path.to_string()).or_default();
        for (name, props) in interfaces {
            entry.insert(name, props);
        }
    }

    /// Drop interfaces announced by `InterfacesRemoved`; the object goes
    /// away with its last interface.
    pub fn remove_interfaces(&mut self, path: &str, interfaces: &[String]) {
        if let Some(entry) = self.objects.get_mut(path) {
            for name in interfaces {
                entry.remove(name);
            }
            if entry.is_empty() {
                self.objects.remove(path);
            }
        }
    }

    /// Apply a `PropertiesChanged` signal. Returns false when the object or
    /// interface is not cached.
    pub fn update_properties(
        &mut self,
        path: &str,
        interface: &str,
        changed: Properties,
        invalidated: &[String],
    ) -> bool {
        let Some(props) = self
            .objects
            .get_mut(path)
            .and_then(|entry| entry.get_mut(interface))
        else {
            return false;
        };
        for name in invalidated {
            props.remove(name);
        }
        props.extend(changed);
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.contains_key(path)
    }

    pub fn has_interface(&self, path: &str, interface: &str) -> bool {
        self.objects
            .get(path)
            .is_some_and(|entry| entry.contains_key(interface))
    }

    fn prop(&self, path: &str, interface: &str, name: &str) -> Option<&OwnedValue> {
        self.objects.get(path)?.get(interface)?.get(name)
    }

    fn string(&self, path: &str, interface: &str, name: &str) -> Option<String> {
        non_empty(self.prop(path, interface, name).and_then(as_string))
    }

    fn flag(&self, path: &str, interface: &str, name: &str) -> bool {
        self.prop(path, interface, name)
            .and_then(as_bool)
            .unwrap_or(false)
    }

    fn number(&self, path: &str, interface: &str, name: &str) -> u64 {
        self.prop(path, interface, name)
            .and_then(as_u64)
            .unwrap_or(0)
    }

    fn object_path(&self, path: &str, interface: &str, name: &str) -> Option<String> {
        self.prop(path, interface, name).and_then(as_object_path)
    }

    fn block_paths(&self) -> impl Iterator<Item = &String> {
        self.objects
            .iter()
            .filter(|(_, entry)| entry.contains_key(BLOCK_IFACE))
            .map(|(path, _)| path)
    }

    /// Device file of a block object, preferring the stable alias.
    pub fn unix_device(&self, path: &str) -> Option<String> {
        ["PreferredDevice", "Device"].into_iter().find_map(|name| {
            non_empty(
                self.prop(path, BLOCK_IFACE, name)
                    .and_then(bytestring_property),
            )
        })
    }

    pub fn mount_points(&self, path: &str) -> Vec<String> {
        self.prop(path, FILESYSTEM_IFACE, "MountPoints")
            .map(mount_points_property)
            .unwrap_or_default()
    }

    pub fn drive_of(&self, path: &str) -> Option<String> {
        self.object_path(path, BLOCK_IFACE, "Drive")
            .filter(|drive| self.has_interface(drive, DRIVE_IFACE))
    }

    pub fn cleartext_of(&self, path: &str) -> Option<String> {
        self.object_path(path, ENCRYPTED_IFACE, "CleartextDevice")
            .filter(|clear| self.contains(clear))
    }

    /// Object carrying the filesystem for a volume: itself, or the unlocked
    /// cleartext device of an encrypted container.
    pub fn filesystem_object(&self, path: &str) -> Option<String> {
        if self.has_interface(path, FILESYSTEM_IFACE) {
            return Some(path.to_string());
        }
        self.cleartext_of(path)
            .filter(|clear| self.has_interface(clear, FILESYSTEM_IFACE))
    }

    pub fn is_encrypted(&self, path: &str) -> bool {
        self.has_interface(path, ENCRYPTED_IFACE)
    }

    /// Block object whose filesystem is mounted at `mount_path`.
    pub fn block_for_mount_path(&self, mount_path: &str) -> Option<String> {
        let wanted = mount_path.trim_end_matches('/');
        self.block_paths()
            .find(|path| {
                self.mount_points(path)
                    .iter()
                    .any(|mp| mp.trim_end_matches('/') == wanted)
            })
            .cloned()
    }

    /// Resolve a volume id, device file ("/dev/sdb1") or kernel name ("sdb1")
    /// to a block object path.
    pub fn resolve_block(&self, id: &str) -> Option<String> {
        if self.has_interface(id, BLOCK_IFACE) {
            return Some(id.to_string());
        }
        let device = if id.starts_with('/') {
            id.to_string()
        } else {
            format!("/dev/{id}")
        };
        self.block_paths()
            .find(|path| {
                path.rsplit('/').next() == Some(id)
                    || ["PreferredDevice", "Device"].into_iter().any(|name| {
                        self.prop(path, BLOCK_IFACE, name)
                            .and_then(bytestring_property)
                            .is_some_and(|d| d == device)
                    })
            })
            .cloned()
    }

    fn drive_icons(&self, drive: &str) -> (Vec<String>, Vec<String>) {
        let optical = self.flag(drive, DRIVE_IFACE, "Optical")
            || self
                .prop(drive, DRIVE_IFACE, "MediaCompatibility")
                .map(as_string_list)
                .unwrap_or_default()
                .iter()
                .any(|m| m.starts_with("optical"));
        let base = if optical {
            "drive-optical"
        } else if self.flag(drive, DRIVE_IFACE, "MediaRemovable")
            || self.flag(drive, DRIVE_IFACE, "Removable")
        {
            "drive-removable-media"
        } else {
            "drive-harddisk"
        };
        (vec![base.to_string()], vec![format!("{base}-symbolic")])
    }

    fn drive_entity(&self, path: &str) -> Drive {
        let vendor = self.string(path, DRIVE_IFACE, "Vendor").unwrap_or_default();
        let model = self.string(path, DRIVE_IFACE, "Model").unwrap_or_default();
        let name = match format!("{vendor} {model}").trim() {
            "" => self
                .string(path, DRIVE_IFACE, "Id")
                .unwrap_or_else(|| "Drive".to_string()),
            joined => joined.to_string(),
        };
        let unix_device = self
            .block_paths()
            .find(|block| {
                self.drive_of(block).as_deref() == Some(path)
                    && !self.has_interface(block, PARTITION_IFACE)
                    && self.object_path(block, BLOCK_IFACE, "CryptoBackingDevice").is_none()
            })
            .and_then(|block| self.unix_device(block));
        let (icons, symbolic_icons) = self.drive_icons(path);

        Drive {
            id: path.to_string(),
            name,
            icons,
            symbolic_icons,
            unix_device,
            ejectable: self.flag(path, DRIVE_IFACE, "Ejectable"),
            media_removable: self.flag(path, DRIVE_IFACE, "MediaRemovable"),
            removable: self.flag(path, DRIVE_IFACE, "Removable"),
            has_media: self.flag(path, DRIVE_IFACE, "MediaAvailable"),
            can_power_off: self.flag(path, DRIVE_IFACE, "CanPowerOff"),
        }
    }

    fn is_volume(&self, path: &str) -> bool {
        let Some(entry) = self.objects.get(path) else {
            return false;
        };
        entry.contains_key(BLOCK_IFACE)
            && (entry.contains_key(FILESYSTEM_IFACE) || entry.contains_key(ENCRYPTED_IFACE))
            && !self.flag(path, BLOCK_IFACE, "HintIgnore")
            && !self.flag(path, PARTITION_IFACE, "IsContainer")
            // Unlocked cleartext devices are reported through their container.
            && self.object_path(path, BLOCK_IFACE, "CryptoBackingDevice").is_none()
    }

    fn volume_entity(&self, path: &str) -> Volume {
        let drive_id = self.drive_of(path);
        let size = self.number(path, BLOCK_IFACE, "Size");
        let label = self.string(path, BLOCK_IFACE, "IdLabel").unwrap_or_default();
        let name = self
            .string(path, BLOCK_IFACE, "HintName")
            .or_else(|| (!label.is_empty()).then(|| label.clone()))
            .unwrap_or_else(|| volume_label(size));
        let icons = match self.string(path, BLOCK_IFACE, "HintIconName") {
            Some(icon) => vec![icon],
            None => drive_id
                .as_deref()
                .map(|drive| self.drive_icons(drive).0)
                .unwrap_or_else(|| vec!["drive-harddisk".to_string()]),
        };
        let mounted_root_uri = self
            .filesystem_object(path)
            .and_then(|fs| self.mount_points(&fs).into_iter().next())
            .and_then(|mp| path_to_file_uri(&mp));
        let (can_eject, removable) = match drive_id.as_deref() {
            Some(drive) => (
                self.flag(drive, DRIVE_IFACE, "Ejectable"),
                self.flag(drive, DRIVE_IFACE, "Removable")
                    || self.flag(drive, DRIVE_IFACE, "MediaRemovable"),
            ),
            None => (false, false),
        };

        Volume {
            id: path.to_string(),
            name,
            uuid: self.string(path, BLOCK_IFACE, "IdUUID"),
            label,
            icons,
            drive_id,
            unix_device: self.unix_device(path),
            mounted_root_uri,
            activation_root: None,
            can_mount: true,
            can_eject,
            should_automount: self.flag(path, BLOCK_IFACE, "HintAuto"),
            removable,
            encrypted: self.is_encrypted(path),
            size,
        }
    }

    pub fn drives(&self) -> Vec<Drive> {
        self.objects
            .iter()
            .filter(|(_, entry)| entry.contains_key(DRIVE_IFACE))
            .map(|(path, _)| self.drive_entity(path))
            .collect()
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.block_paths()
            .filter(|path| self.is_volume(path))
            .map(|path| self.volume_entity(path))
            .collect()
    }

    pub fn volume(&self, path: &str) -> Option<Volume> {
        self.is_volume(path).then(|| self.volume_entity(path))
    }

    fn volume_mounts(&self, volume: &Volume) -> Vec<Mount> {
        let Some(fs) = self.filesystem_object(&volume.id) else {
            return Vec::new();
        };
        self.mount_points(&fs)
            .into_iter()
            .filter_map(|mount_path| {
                let root_uri = path_to_file_uri(&mount_path)?;
                Some(Mount {
                    id: root_uri.clone(),
                    name: volume.name.clone(),
                    root_uri,
                    mount_path,
                    volume_id: Some(volume.id.clone()),
                    drive_id: volume.drive_id.clone(),
                    can_unmount: true,
                    can_eject: volume.can_eject,
                    icons: volume.icons.clone(),
                })
            })
            .collect()
    }

    pub fn mounts(&self) -> Vec<Mount> {
        self.volumes()
            .iter()
            .flat_map(|volume| self.volume_mounts(volume))
            .collect()
    }

    /// Snapshot of a block object for the property translator.
    pub fn block_device(&self, id: &str) -> Option<BlockDevice> {
        let path = self.resolve_block(id)?;
        let drive = self.drive_of(&path);
        let fs = self
            .filesystem_object(&path)
            .unwrap_or_else(|| path.clone());
        let mount_points = self.mount_points(&fs);
        let drive_flag = |name: &str| {
            drive
                .as_deref()
                .is_some_and(|d| self.flag(d, DRIVE_IFACE, name))
        };
        let drive_value = |name: &str| -> Option<PropertyValue> {
            let value = self.prop(drive.as_deref()?, DRIVE_IFACE, name)?;
            as_bool(value)
                .map(PropertyValue::from)
                .or_else(|| as_string(value).map(PropertyValue::from))
        };
        let block_string =
            |name: &str| self.string(&path, BLOCK_IFACE, name).map(PropertyValue::from);

        Some(BlockDevice {
            path: path.clone(),
            mount_point: mount_points.first().cloned().unwrap_or_default(),
            mount_points,
            file_system: self.string(&fs, BLOCK_IFACE, "IdType").unwrap_or_default(),
            size_total: self.number(&path, BLOCK_IFACE, "Size"),
            device: self.unix_device(&path).unwrap_or_default(),
            id_label: self.string(&path, BLOCK_IFACE, "IdLabel").unwrap_or_default(),
            drive: drive.clone().unwrap_or_default(),
            removable: drive_flag("Removable") || drive_flag("MediaRemovable"),
            optical: drive_flag("Optical"),
            optical_blank: drive_flag("OpticalBlank"),
            can_power_off: drive_flag("CanPowerOff"),
            ejectable: drive_flag("Ejectable"),
            is_encrypted: self.is_encrypted(&path),
            is_loop_device: self.has_interface(&path, LOOP_IFACE),
            has_file_system: self.has_interface(&path, FILESYSTEM_IFACE),
            has_partition_table: self.has_interface(&path, PARTITION_TABLE_IFACE),
            has_partition: self.has_interface(&path, PARTITION_IFACE),
            hint_system: self.flag(&path, BLOCK_IFACE, "HintSystem"),
            hint_ignore: self.flag(&path, BLOCK_IFACE, "HintIgnore"),
            media_compatibility: drive
                .as_deref()
                .and_then(|d| self.prop(d, DRIVE_IFACE, "MediaCompatibility"))
                .map(as_string_list)
                .unwrap_or_default(),
            partition_type: self
                .string(&path, PARTITION_IFACE, "Type")
                .unwrap_or_default(),
            uuid: block_string("IdUUID"),
            fs_version: block_string("IdVersion"),
            media: drive_value("Media"),
            read_only: self
                .prop(&path, BLOCK_IFACE, "ReadOnly")
                .and_then(as_bool)
                .map(PropertyValue::from),
            media_removable: drive_value("MediaRemovable"),
            media_available: drive_value("MediaAvailable"),
            crypto_backing_device: self
                .object_path(&path, BLOCK_IFACE, "CryptoBackingDevice")
                .map(PropertyValue::from),
            cleartext_device: self.cleartext_of(&path).map(PropertyValue::from),
            connection_bus: drive_value("ConnectionBus"),
        })
    }
}

/// Entities derived from one version of the tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    drives: BTreeMap<String, Drive>,
    volumes: BTreeMap<String, Volume>,
    mounts: BTreeMap<String, Mount>,
}

impl Snapshot {
    pub fn of(tree: &ObjectTree) -> Self {
        Self {
            drives: tree.drives().into_iter().map(|d| (d.id.clone(), d)).collect(),
            volumes: tree
                .volumes()
                .into_iter()
                .map(|v| (v.id.clone(), v))
                .collect(),
            mounts: tree.mounts().into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    /// Events turning `self` into `next`.
    ///
    /// Additions go parents first and removals children first, so a
    /// consumer never sees a mount whose volume it does not know yet.
    pub fn diff(&self, next: &Snapshot) -> Vec<MonitorEvent> {
        let mut events = Vec::new();

        for (id, drive) in &next.drives {
            match self.drives.get(id) {
                None => events.push(MonitorEvent::DriveAdded(drive.clone())),
                Some(old) if old != drive => events.push(MonitorEvent::DriveChanged(drive.clone())),
                Some(_) => {}
            }
        }
        for (id, volume) in &next.volumes {
            match self.volumes.get(id) {
                None => events.push(MonitorEvent::VolumeAdded(volume.clone())),
                Some(old) if old != volume => {
                    events.push(MonitorEvent::VolumeChanged(volume.clone()))
                }
                Some(_) => {}
            }
        }
        for id in self.mounts.keys() {
            if !next.mounts.contains_key(id) {
                events.push(MonitorEvent::MountRemoved(id.clone()));
            }
        }
        for (id, mount) in &next.mounts {
            match self.mounts.get(id) {
                None => events.push(MonitorEvent::MountAdded(mount.clone())),
                Some(old) if old != mount => events.push(MonitorEvent::MountChanged(mount.clone())),
                Some(_) => {}
            }
        }
        for id in self.volumes.keys() {
            if !next.volumes.contains_key(id) {
                events.push(MonitorEvent::VolumeRemoved(id.clone()));
            }
        }
        for id in self.drives.keys() {
            if !next.drives.contains_key(id) {
                events.push(MonitorEvent::DriveRemoved(id.clone()));
            }
        }

        events
    }
}
