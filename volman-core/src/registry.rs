// SPDX-License-Identifier: GPL-3.0-only

//! In-memory store of drives, volumes, mounts and derived disk infos.
//!
//! All maps and their index lists live in one [`RegistryState`] behind a
//! single `RwLock`, so a mutation that touches several maps is never
//! partially visible. Compound updates go through
//! [`DeviceRegistry::transaction`].

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use volman_types::{
    DiskInfo, Drive, Entity, EntityKind, Mount, Volume, file_uri_to_path, path_to_file_uri,
};

/// Outcome of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

impl Upsert {
    fn compare<T: PartialEq>(previous: Option<&T>, current: &T) -> Self {
        match previous {
            None => Self::Inserted,
            Some(prev) if prev == current => Self::Unchanged,
            Some(_) => Self::Updated,
        }
    }
}

/// Result of an operation-driven mount state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTransition {
    pub disk_info: DiskInfo,
    /// `false` when the registry already showed the requested state
    pub transitioned: bool,
}

fn same_uri(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

fn remove_key(keys: &mut Vec<String>, id: &str) -> bool {
    let before = keys.len();
    keys.retain(|k| k != id);
    keys.len() != before
}

fn push_key(keys: &mut Vec<String>, id: &str) {
    if !keys.iter().any(|k| k == id) {
        keys.push(id.to_string());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryState {
    drives: HashMap<String, Drive>,
    volumes: HashMap<String, Volume>,
    mounts: HashMap<String, Mount>,
    disk_infos: HashMap<String, DiskInfo>,

    drive_keys: Vec<String>,
    volumes_drive_keys: Vec<String>,
    volumes_no_drive_keys: Vec<String>,
    mount_keys: Vec<String>,
    no_volume_mount_keys: Vec<String>,
}

/// A consistent copy of the whole registry
pub type RegistrySnapshot = RegistryState;

impl RegistryState {
    // ----- indexing -------------------------------------------------------

    fn volume_has_drive(&self, volume: &Volume) -> bool {
        volume
            .drive_id
            .as_deref()
            .is_some_and(|id| self.drives.contains_key(id))
    }

    fn mount_has_volume(&self, mount: &Mount) -> bool {
        mount
            .volume_id
            .as_deref()
            .is_some_and(|id| self.volumes.contains_key(id))
    }

    fn index_volume(&mut self, id: &str) {
        let Some(volume) = self.volumes.get(id) else {
            remove_key(&mut self.volumes_drive_keys, id);
            remove_key(&mut self.volumes_no_drive_keys, id);
            return;
        };

        if self.volume_has_drive(volume) {
            remove_key(&mut self.volumes_no_drive_keys, id);
            push_key(&mut self.volumes_drive_keys, id);
        } else {
            remove_key(&mut self.volumes_drive_keys, id);
            push_key(&mut self.volumes_no_drive_keys, id);
        }
    }

    fn index_mount(&mut self, id: &str) {
        let Some(mount) = self.mounts.get(id) else {
            remove_key(&mut self.mount_keys, id);
            remove_key(&mut self.no_volume_mount_keys, id);
            self.disk_infos.remove(id);
            return;
        };

        push_key(&mut self.mount_keys, id);
        if self.mount_has_volume(mount) {
            remove_key(&mut self.no_volume_mount_keys, id);
            self.disk_infos.remove(id);
        } else {
            let info = DiskInfo::from_mount(mount);
            push_key(&mut self.no_volume_mount_keys, id);
            self.disk_infos.insert(id.to_string(), info);
        }
    }

    fn refresh_volume_info(&mut self, id: &str) {
        match self.volumes.get(id) {
            Some(volume) => {
                let info = DiskInfo::from_volume(volume);
                self.disk_infos.insert(id.to_string(), info);
            }
            None => {
                self.disk_infos.remove(id);
            }
        }
    }

    fn reindex_volumes_of_drive(&mut self, drive_id: &str) {
        let ids: Vec<String> = self
            .volumes
            .values()
            .filter(|v| v.drive_id.as_deref() == Some(drive_id))
            .map(|v| v.id.clone())
            .collect();
        for id in ids {
            self.index_volume(&id);
        }
    }

    fn reindex_mounts_of_volume(&mut self, volume_id: &str) {
        let ids: Vec<String> = self
            .mounts
            .values()
            .filter(|m| m.volume_id.as_deref() == Some(volume_id))
            .map(|m| m.id.clone())
            .collect();
        for id in ids {
            self.index_mount(&id);
        }
    }

    // ----- mutations ------------------------------------------------------

    pub fn upsert_drive(&mut self, drive: Drive) -> Upsert {
        let id = drive.id.clone();
        let outcome = Upsert::compare(self.drives.get(&id), &drive);
        self.drives.insert(id.clone(), drive);
        push_key(&mut self.drive_keys, &id);
        if outcome == Upsert::Inserted {
            self.reindex_volumes_of_drive(&id);
        }
        outcome
    }

    pub fn upsert_volume(&mut self, volume: Volume) -> Upsert {
        let id = volume.id.clone();
        let outcome = Upsert::compare(self.volumes.get(&id), &volume);
        self.volumes.insert(id.clone(), volume);
        self.index_volume(&id);
        self.refresh_volume_info(&id);
        if outcome == Upsert::Inserted {
            self.reindex_mounts_of_volume(&id);
        }
        outcome
    }

    pub fn upsert_mount(&mut self, mount: Mount) -> Upsert {
        let id = mount.id.clone();
        let outcome = Upsert::compare(self.mounts.get(&id), &mount);
        self.mounts.insert(id.clone(), mount);
        self.index_mount(&id);
        outcome
    }

    /// Remove a drive. Its volumes move into the no-drive index.
    pub fn remove_drive(&mut self, id: &str) -> Option<Drive> {
        let drive = self.drives.remove(id)?;
        remove_key(&mut self.drive_keys, id);
        self.reindex_volumes_of_drive(id);
        Some(drive)
    }

    /// Remove a volume. Mounts that referenced it become no-volume mounts.
    pub fn remove_volume(&mut self, id: &str) -> Option<Volume> {
        let volume = self.volumes.remove(id)?;
        self.index_volume(id);
        self.disk_infos.remove(id);
        self.reindex_mounts_of_volume(id);
        Some(volume)
    }

    pub fn remove_mount(&mut self, id: &str) -> Option<Mount> {
        let mount = self.mounts.remove(id)?;
        self.index_mount(id);
        Some(mount)
    }

    pub fn remove(&mut self, kind: EntityKind, id: &str) -> Option<Entity> {
        match kind {
            EntityKind::Drive => self.remove_drive(id).map(Entity::Drive),
            EntityKind::Volume => self.remove_volume(id).map(Entity::Volume),
            EntityKind::Mount => self.remove_mount(id).map(Entity::Mount),
            // Disk infos follow their source entity and cannot be removed directly.
            EntityKind::DiskInfo => None,
        }
    }

    /// Record that a volume is mounted at `root_uri`.
    pub fn mark_mounted(&mut self, volume_id: &str, root_uri: &str) -> Option<MountTransition> {
        let volume = self.volumes.get_mut(volume_id)?;
        let transitioned = !volume
            .mounted_root_uri
            .as_deref()
            .is_some_and(|current| same_uri(current, root_uri));
        volume.mounted_root_uri = Some(root_uri.to_string());
        self.refresh_volume_info(volume_id);

        Some(MountTransition {
            disk_info: self.disk_infos.get(volume_id)?.clone(),
            transitioned,
        })
    }

    /// Record that a volume or a no-volume mount is no longer mounted.
    /// Mount entities belonging to the target are dropped.
    pub fn mark_unmounted(&mut self, target_id: &str) -> Option<MountTransition> {
        if let Some(volume) = self.volumes.get_mut(target_id) {
            let previous_root = volume.mounted_root_uri.take();
            let stale: Vec<String> = self
                .mounts
                .values()
                .filter(|m| {
                    m.volume_id.as_deref() == Some(target_id)
                        || previous_root
                            .as_deref()
                            .is_some_and(|root| same_uri(root, &m.root_uri))
                })
                .map(|m| m.id.clone())
                .collect();
            for id in &stale {
                self.remove_mount(id);
            }
            self.refresh_volume_info(target_id);

            return Some(MountTransition {
                disk_info: self.disk_infos.get(target_id)?.clone(),
                transitioned: previous_root.is_some() || !stale.is_empty(),
            });
        }

        let info = self.disk_infos.get(target_id).cloned()?;
        self.remove_mount(target_id)?;
        let mut disk_info = info;
        disk_info.mount_point.clear();
        disk_info.can_unmount = false;
        Some(MountTransition {
            disk_info,
            transitioned: true,
        })
    }

    /// Remove a single mount entity. If it was the mounted root of its
    /// volume, the volume's root is cleared too and the transition is
    /// reported.
    pub fn detach_mount(&mut self, id: &str) -> Option<(Mount, Option<MountTransition>)> {
        let mount = self.remove_mount(id)?;

        let Some(volume_id) = mount.volume_id.clone() else {
            return Some((mount, None));
        };
        let Some(volume) = self.volumes.get_mut(&volume_id) else {
            return Some((mount, None));
        };
        let shown_here = volume
            .mounted_root_uri
            .as_deref()
            .is_some_and(|root| same_uri(root, &mount.root_uri));
        if !shown_here {
            return Some((mount, None));
        }

        volume.mounted_root_uri = None;
        self.refresh_volume_info(&volume_id);
        let transition = self
            .disk_infos
            .get(&volume_id)
            .cloned()
            .map(|disk_info| MountTransition {
                disk_info,
                transitioned: true,
            });
        Some((mount, transition))
    }

    /// Recompute every disk info from its source entity.
    pub fn update_disk_infos(&mut self) {
        self.disk_infos.clear();
        for volume in self.volumes.values() {
            self.disk_infos
                .insert(volume.id.clone(), DiskInfo::from_volume(volume));
        }
        for id in &self.no_volume_mount_keys {
            if let Some(mount) = self.mounts.get(id) {
                self.disk_infos.insert(id.clone(), DiskInfo::from_mount(mount));
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // ----- queries --------------------------------------------------------

    pub fn drive(&self, id: &str) -> Option<&Drive> {
        self.drives.get(id)
    }

    pub fn volume(&self, id: &str) -> Option<&Volume> {
        self.volumes.get(id)
    }

    pub fn mount(&self, id: &str) -> Option<&Mount> {
        self.mounts.get(id)
    }

    pub fn disk_info(&self, id: &str) -> Option<&DiskInfo> {
        self.disk_infos.get(id)
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<Entity> {
        match kind {
            EntityKind::Drive => self.drive(id).cloned().map(Entity::Drive),
            EntityKind::Volume => self.volume(id).cloned().map(Entity::Volume),
            EntityKind::Mount => self.mount(id).cloned().map(Entity::Mount),
            EntityKind::DiskInfo => self.disk_info(id).cloned().map(Entity::DiskInfo),
        }
    }

    pub fn drives(&self) -> Vec<Drive> {
        self.drive_keys
            .iter()
            .filter_map(|k| self.drives.get(k).cloned())
            .collect()
    }

    /// Volumes on a known drive first, then orphaned ones
    pub fn volumes(&self) -> Vec<Volume> {
        self.volumes_drive_keys
            .iter()
            .chain(&self.volumes_no_drive_keys)
            .filter_map(|k| self.volumes.get(k).cloned())
            .collect()
    }

    pub fn mounts(&self) -> Vec<Mount> {
        self.mount_keys
            .iter()
            .filter_map(|k| self.mounts.get(k).cloned())
            .collect()
    }

    /// Disk infos in volume order, then no-volume mounts
    pub fn disk_infos(&self) -> Vec<DiskInfo> {
        self.volumes_drive_keys
            .iter()
            .chain(&self.volumes_no_drive_keys)
            .chain(&self.no_volume_mount_keys)
            .filter_map(|k| self.disk_infos.get(k).cloned())
            .collect()
    }

    pub fn list_all(&self, kind: EntityKind) -> Vec<Entity> {
        match kind {
            EntityKind::Drive => self.drives().into_iter().map(Entity::Drive).collect(),
            EntityKind::Volume => self.volumes().into_iter().map(Entity::Volume).collect(),
            EntityKind::Mount => self.mounts().into_iter().map(Entity::Mount).collect(),
            EntityKind::DiskInfo => self
                .disk_infos()
                .into_iter()
                .map(Entity::DiskInfo)
                .collect(),
        }
    }

    pub fn drive_keys(&self) -> &[String] {
        &self.drive_keys
    }

    pub fn volumes_drive_keys(&self) -> &[String] {
        &self.volumes_drive_keys
    }

    pub fn volumes_no_drive_keys(&self) -> &[String] {
        &self.volumes_no_drive_keys
    }

    pub fn no_volume_mount_keys(&self) -> &[String] {
        &self.no_volume_mount_keys
    }

    /// Project a volume or mount id without consulting the cached disk infos.
    pub fn derive_disk_info(&self, id: &str) -> Option<DiskInfo> {
        if let Some(volume) = self.volumes.get(id) {
            return Some(DiskInfo::from_volume(volume));
        }
        self.mounts.get(id).map(DiskInfo::from_mount)
    }

    pub fn volume_by_unix_device(&self, unix_device: &str) -> Option<&Volume> {
        self.volumes
            .values()
            .find(|v| v.unix_device.as_deref() == Some(unix_device))
    }

    pub fn volume_by_mounted_root_uri(&self, uri: &str) -> Option<&Volume> {
        self.volumes.values().find(|v| {
            v.mounted_root_uri
                .as_deref()
                .is_some_and(|root| same_uri(root, uri))
        })
    }

    pub fn mount_by_root_uri(&self, uri: &str) -> Option<&Mount> {
        self.mounts.values().find(|m| same_uri(&m.root_uri, uri))
    }

    /// Disk info for a device file, local mount path or root URI.
    pub fn disk_info_for_path(&self, path: &str) -> Option<&DiskInfo> {
        let as_uri = path_to_file_uri(path);
        let as_local = file_uri_to_path(path);

        self.disk_infos.values().find(|info| {
            (!info.unix_device.is_empty() && info.unix_device == path)
                || (!info.mount_point.is_empty()
                    && (info.mount_point == path
                        || as_local.as_deref() == Some(info.mount_point.as_str())))
                || info.mounted_root_uri.as_deref().is_some_and(|root| {
                    same_uri(root, path) || as_uri.as_deref().is_some_and(|u| same_uri(root, u))
                })
        })
    }

    /// Verify that every index list agrees with the primary maps.
    pub fn check_consistency(&self) -> Result<(), String> {
        fn unique(name: &str, keys: &[String]) -> Result<HashSet<String>, String> {
            let set: HashSet<String> = keys.iter().cloned().collect();
            if set.len() != keys.len() {
                return Err(format!("{name} contains duplicate keys"));
            }
            Ok(set)
        }

        let drive_keys = unique("drive_keys", &self.drive_keys)?;
        if drive_keys != self.drives.keys().cloned().collect() {
            return Err("drive_keys does not match drives".to_string());
        }

        let with_drive = unique("volumes_drive_keys", &self.volumes_drive_keys)?;
        let without_drive = unique("volumes_no_drive_keys", &self.volumes_no_drive_keys)?;
        if !with_drive.is_disjoint(&without_drive) {
            return Err("a volume is indexed both with and without a drive".to_string());
        }
        let all_volumes: HashSet<String> = with_drive.union(&without_drive).cloned().collect();
        if all_volumes != self.volumes.keys().cloned().collect() {
            return Err("volume indexes do not match volumes".to_string());
        }
        for id in &with_drive {
            if !self.volume_has_drive(&self.volumes[id]) {
                return Err(format!("volume {id} is indexed under a missing drive"));
            }
        }
        for id in &without_drive {
            if self.volume_has_drive(&self.volumes[id]) {
                return Err(format!("volume {id} has a drive but is indexed as orphaned"));
            }
        }

        let mount_keys = unique("mount_keys", &self.mount_keys)?;
        if mount_keys != self.mounts.keys().cloned().collect() {
            return Err("mount_keys does not match mounts".to_string());
        }
        let no_volume = unique("no_volume_mount_keys", &self.no_volume_mount_keys)?;
        let expected: HashSet<String> = self
            .mounts
            .values()
            .filter(|m| !self.mount_has_volume(m))
            .map(|m| m.id.clone())
            .collect();
        if no_volume != expected {
            return Err("no_volume_mount_keys does not match mounts without volume".to_string());
        }

        let info_keys: HashSet<String> = self.disk_infos.keys().cloned().collect();
        let expected_infos: HashSet<String> = all_volumes.union(&no_volume).cloned().collect();
        if info_keys != expected_infos {
            return Err("disk infos do not match volumes and no-volume mounts".to_string());
        }
        for (id, info) in &self.disk_infos {
            if self.derive_disk_info(id).as_ref() != Some(info) {
                return Err(format!("disk info {id} is stale"));
            }
        }

        Ok(())
    }
}

/// Shared registry handle
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    state: RwLock<RegistryState>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a compound mutation under a single write lock.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut RegistryState) -> R) -> R {
        f(&mut self.write())
    }

    /// Run a read-only query against a consistent view.
    pub fn read_with<R>(&self, f: impl FnOnce(&RegistryState) -> R) -> R {
        f(&self.read())
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.read().clone()
    }

    pub fn upsert_drive(&self, drive: Drive) -> Upsert {
        self.write().upsert_drive(drive)
    }

    pub fn upsert_volume(&self, volume: Volume) -> Upsert {
        self.write().upsert_volume(volume)
    }

    pub fn upsert_mount(&self, mount: Mount) -> Upsert {
        self.write().upsert_mount(mount)
    }

    pub fn remove(&self, kind: EntityKind, id: &str) -> Option<Entity> {
        self.write().remove(kind, id)
    }

    pub fn remove_drive(&self, id: &str) -> Option<Drive> {
        self.write().remove_drive(id)
    }

    pub fn remove_volume(&self, id: &str) -> Option<Volume> {
        self.write().remove_volume(id)
    }

    pub fn remove_mount(&self, id: &str) -> Option<Mount> {
        self.write().remove_mount(id)
    }

    pub fn mark_mounted(&self, volume_id: &str, root_uri: &str) -> Option<MountTransition> {
        self.write().mark_mounted(volume_id, root_uri)
    }

    pub fn mark_unmounted(&self, target_id: &str) -> Option<MountTransition> {
        self.write().mark_unmounted(target_id)
    }

    pub fn update_disk_infos(&self) {
        self.write().update_disk_infos();
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<Entity> {
        self.read().get(kind, id)
    }

    pub fn drive(&self, id: &str) -> Option<Drive> {
        self.read().drive(id).cloned()
    }

    pub fn volume(&self, id: &str) -> Option<Volume> {
        self.read().volume(id).cloned()
    }

    pub fn mount(&self, id: &str) -> Option<Mount> {
        self.read().mount(id).cloned()
    }

    pub fn disk_info(&self, id: &str) -> Option<DiskInfo> {
        self.read().disk_info(id).cloned()
    }

    pub fn list_all(&self, kind: EntityKind) -> Vec<Entity> {
        self.read().list_all(kind)
    }

    pub fn drives(&self) -> Vec<Drive> {
        self.read().drives()
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.read().volumes()
    }

    pub fn mounts(&self) -> Vec<Mount> {
        self.read().mounts()
    }

    pub fn disk_infos(&self) -> Vec<DiskInfo> {
        self.read().disk_infos()
    }

    pub fn derive_disk_info(&self, id: &str) -> Option<DiskInfo> {
        self.read().derive_disk_info(id)
    }

    pub fn volume_by_unix_device(&self, unix_device: &str) -> Option<Volume> {
        self.read().volume_by_unix_device(unix_device).cloned()
    }

    pub fn volume_by_mounted_root_uri(&self, uri: &str) -> Option<Volume> {
        self.read().volume_by_mounted_root_uri(uri).cloned()
    }

    pub fn mount_by_root_uri(&self, uri: &str) -> Option<Mount> {
        self.read().mount_by_root_uri(uri).cloned()
    }

    pub fn disk_info_for_path(&self, path: &str) -> Option<DiskInfo> {
        self.read().disk_info_for_path(path).cloned()
    }

    pub fn check_consistency(&self) -> Result<(), String> {
        self.read().check_consistency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(id: &str) -> Drive {
        Drive {
            id: id.to_string(),
            name: format!("Drive {id}"),
            removable: true,
            ..Default::default()
        }
    }

    fn volume(id: &str, drive_id: Option<&str>) -> Volume {
        Volume {
            id: id.to_string(),
            label: id.to_uppercase(),
            drive_id: drive_id.map(str::to_string),
            unix_device: Some(format!("/dev/{id}")),
            can_mount: true,
            ..Default::default()
        }
    }

    fn mount(root: &str, volume_id: Option<&str>) -> Mount {
        Mount {
            id: root.to_string(),
            root_uri: root.to_string(),
            volume_id: volume_id.map(str::to_string),
            can_unmount: true,
            ..Default::default()
        }
    }

    #[test]
    fn orphaned_volumes_are_indexed_separately() {
        let registry = DeviceRegistry::new();
        registry.upsert_drive(drive("d1"));
        registry.upsert_drive(drive("d2"));
        registry.upsert_volume(volume("sda1", Some("d1")));
        registry.upsert_volume(volume("sdb1", Some("d2")));
        registry.upsert_volume(volume("loop0", None));

        let snap = registry.snapshot();
        assert_eq!(snap.volumes_drive_keys(), ["sda1", "sdb1"]);
        assert_eq!(snap.volumes_no_drive_keys(), ["loop0"]);
        registry.check_consistency().unwrap();
    }

    #[test]
    fn removing_a_drive_reindexes_its_volumes_without_deleting_them() {
        let registry = DeviceRegistry::new();
        registry.upsert_drive(drive("d1"));
        registry.upsert_volume(volume("sdb1", Some("d1")));
        registry.upsert_volume(volume("sdb2", Some("d1")));

        assert!(registry.remove_drive("d1").is_some());

        let snap = registry.snapshot();
        assert!(snap.volumes_drive_keys().is_empty());
        assert_eq!(snap.volumes_no_drive_keys(), ["sdb1", "sdb2"]);
        assert!(registry.volume("sdb1").is_some());
        registry.check_consistency().unwrap();

        // The drive coming back adopts its volumes again.
        registry.upsert_drive(drive("d1"));
        assert_eq!(registry.snapshot().volumes_drive_keys(), ["sdb1", "sdb2"]);
        registry.check_consistency().unwrap();
    }

    #[test]
    fn volume_arriving_before_its_drive_is_adopted_later() {
        let registry = DeviceRegistry::new();
        registry.upsert_volume(volume("sdc1", Some("d3")));
        assert_eq!(registry.snapshot().volumes_no_drive_keys(), ["sdc1"]);

        registry.upsert_drive(drive("d3"));
        let snap = registry.snapshot();
        assert_eq!(snap.volumes_drive_keys(), ["sdc1"]);
        assert!(snap.volumes_no_drive_keys().is_empty());
    }

    #[test]
    fn mounts_without_volume_get_their_own_disk_info() {
        let registry = DeviceRegistry::new();
        registry.upsert_mount(mount("smb://nas/share", None));
        registry.upsert_mount(mount("file:///media/usb1", Some("sdb1")));

        let snap = registry.snapshot();
        assert_eq!(
            snap.no_volume_mount_keys(),
            ["smb://nas/share", "file:///media/usb1"]
        );
        assert!(snap.disk_info("smb://nas/share").is_some());

        // Once the volume is known the mount stops being a no-volume mount.
        registry.upsert_volume(volume("sdb1", None));
        let snap = registry.snapshot();
        assert_eq!(snap.no_volume_mount_keys(), ["smb://nas/share"]);
        assert!(snap.disk_info("file:///media/usb1").is_none());
        registry.check_consistency().unwrap();

        // And becomes one again when the volume goes away.
        registry.remove_volume("sdb1");
        assert_eq!(registry.snapshot().no_volume_mount_keys().len(), 2);
        registry.check_consistency().unwrap();
    }

    #[test]
    fn repeated_upserts_are_idempotent() {
        let registry = DeviceRegistry::new();
        assert_eq!(registry.upsert_volume(volume("sdb1", None)), Upsert::Inserted);
        let first = registry.snapshot();
        assert_eq!(registry.upsert_volume(volume("sdb1", None)), Upsert::Unchanged);
        assert_eq!(registry.snapshot(), first);

        let mut changed = volume("sdb1", None);
        changed.label = "RENAMED".to_string();
        assert_eq!(registry.upsert_volume(changed), Upsert::Updated);
        assert_eq!(registry.disk_info("sdb1").unwrap().name, "RENAMED");
    }

    #[test]
    fn removing_absent_ids_is_a_noop() {
        let registry = DeviceRegistry::new();
        registry.upsert_volume(volume("sdb1", None));
        let before = registry.snapshot();

        assert!(registry.remove(EntityKind::Drive, "nope").is_none());
        assert!(registry.remove(EntityKind::Volume, "nope").is_none());
        assert!(registry.remove(EntityKind::Mount, "nope").is_none());
        assert!(registry.remove(EntityKind::DiskInfo, "sdb1").is_none());
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn mark_mounted_and_unmounted_report_transitions() {
        let registry = DeviceRegistry::new();
        registry.upsert_volume(volume("sdb1", None));

        let mounted = registry.mark_mounted("sdb1", "file:///media/usb1").unwrap();
        assert!(mounted.transitioned);
        assert_eq!(mounted.disk_info.mount_point, "/media/usb1");

        let again = registry.mark_mounted("sdb1", "file:///media/usb1/").unwrap();
        assert!(!again.transitioned);

        registry.upsert_mount(mount("file:///media/usb1", Some("sdb1")));
        let unmounted = registry.mark_unmounted("sdb1").unwrap();
        assert!(unmounted.transitioned);
        assert!(unmounted.disk_info.mount_point.is_empty());
        assert!(registry.mounts().is_empty());

        let twice = registry.mark_unmounted("sdb1").unwrap();
        assert!(!twice.transitioned);
        registry.check_consistency().unwrap();
    }

    #[test]
    fn lookups_resolve_devices_paths_and_uris() {
        let registry = DeviceRegistry::new();
        let mut usb = volume("sdb1", None);
        usb.mounted_root_uri = Some("file:///media/usb1".to_string());
        registry.upsert_volume(usb);
        registry.upsert_mount(mount("smb://nas/share", None));

        assert_eq!(registry.volume_by_unix_device("/dev/sdb1").unwrap().id, "sdb1");
        assert_eq!(
            registry
                .volume_by_mounted_root_uri("file:///media/usb1")
                .unwrap()
                .id,
            "sdb1"
        );
        assert!(registry.mount_by_root_uri("smb://nas/share/").is_some());
        assert_eq!(registry.disk_info_for_path("/media/usb1").unwrap().id, "sdb1");
        assert_eq!(registry.disk_info_for_path("/dev/sdb1").unwrap().id, "sdb1");
        assert_eq!(
            registry.disk_info_for_path("smb://nas/share").unwrap().id,
            "smb://nas/share"
        );
        assert!(registry.disk_info_for_path("/dev/sdz").is_none());
    }

    #[test]
    fn list_all_follows_index_order() {
        let registry = DeviceRegistry::new();
        registry.upsert_volume(volume("loop0", None));
        registry.upsert_drive(drive("d1"));
        registry.upsert_volume(volume("sda1", Some("d1")));

        let ids: Vec<String> = registry
            .list_all(EntityKind::Volume)
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        assert_eq!(ids, ["sda1", "loop0"]);
        assert_eq!(registry.list_all(EntityKind::DiskInfo).len(), 2);
    }

    #[test]
    fn update_disk_infos_matches_incremental_state() {
        let registry = DeviceRegistry::new();
        registry.upsert_drive(drive("d1"));
        registry.upsert_volume(volume("sda1", Some("d1")));
        registry.upsert_mount(mount("smb://nas/share", None));
        let incremental = registry.snapshot();

        registry.update_disk_infos();
        assert_eq!(registry.snapshot(), incremental);
        registry.check_consistency().unwrap();

        registry.clear();
        assert!(registry.disk_infos().is_empty());
    }
}
