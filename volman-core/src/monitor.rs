// SPDX-License-Identifier: GPL-3.0-only

//! Folds OS mount service events into the registry and republishes them
//! as [`DeviceEvent`]s.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use volman_types::{DeviceEvent, MonitorEvent, Mount, ServiceError, Volume, VolumeError};

use crate::bus::EventBus;
use crate::registry::{DeviceRegistry, RegistryState, Upsert};
use crate::service::MountService;

pub struct MonitorHandle {
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the processing task to end (the service stream closed or
    /// the handle was stopped).
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

pub struct VolumeMonitor;

impl VolumeMonitor {
    /// Subscribe, enumerate, then start processing change events.
    pub async fn start(
        service: Arc<dyn MountService>,
        registry: Arc<DeviceRegistry>,
        bus: Arc<EventBus>,
    ) -> Result<MonitorHandle, VolumeError> {
        let unavailable = |e: ServiceError| VolumeError::MonitorUnavailable(e.to_string());

        // Subscribing first buffers anything that changes while we enumerate.
        let mut stream = service.subscribe().await.map_err(unavailable)?;

        let drives = service.list_drives().await.map_err(unavailable)?;
        let volumes = service.list_volumes().await.map_err(unavailable)?;
        let mounts = service.list_mounts().await.map_err(unavailable)?;

        registry.transaction(|state| {
            for drive in drives {
                state.upsert_drive(drive);
            }
            for volume in volumes {
                state.upsert_volume(volume);
            }
            for mount in mounts {
                state.upsert_mount(mount);
            }
            state.update_disk_infos();
        });

        registry.read_with(|state| {
            info!(
                drives = state.drive_keys().len(),
                volumes_with_drive = state.volumes_drive_keys().len(),
                volumes_without_drive = state.volumes_no_drive_keys().len(),
                mounts_without_volume = state.no_volume_mount_keys().len(),
                "Volume monitor started"
            );
        });

        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                for device_event in Self::apply_event(&registry, event) {
                    bus.publish(device_event);
                }
            }
            warn!("Mount service event stream closed");
        });

        Ok(MonitorHandle { task })
    }

    /// Apply one service event to the registry and return the events to
    /// publish. Idempotent: re-applying an event yields no further events.
    pub fn apply_event(registry: &DeviceRegistry, event: MonitorEvent) -> Vec<DeviceEvent> {
        debug!(?event, "Monitor event");
        registry.transaction(|state| fold(state, event))
    }
}

fn fold(state: &mut RegistryState, event: MonitorEvent) -> Vec<DeviceEvent> {
    match event {
        MonitorEvent::DriveAdded(drive) | MonitorEvent::DriveChanged(drive) => {
            let id = drive.id.clone();
            let outcome = state.upsert_drive(drive);
            debug!(drive = %id, ?outcome, "Drive upserted");
            Vec::new()
        }
        MonitorEvent::DriveRemoved(id) => {
            if state.remove_drive(&id).is_some() {
                debug!(drive = %id, "Drive removed");
            }
            Vec::new()
        }

        MonitorEvent::VolumeAdded(volume) => {
            let id = volume.id.clone();
            if state.volume(&id).is_some() {
                state.upsert_volume(volume);
                return Vec::new();
            }
            state.upsert_volume(volume);
            state
                .disk_info(&id)
                .cloned()
                .map(DeviceEvent::VolumeAdded)
                .into_iter()
                .collect()
        }
        MonitorEvent::VolumeChanged(volume) => volume_changed(state, volume),
        MonitorEvent::VolumeRemoved(id) => volume_removed(state, &id),

        MonitorEvent::MountAdded(mount) => {
            if state.mount(&mount.id).is_some() {
                state.upsert_mount(mount);
                return Vec::new();
            }
            mount_added(state, mount)
        }
        MonitorEvent::MountChanged(mount) => {
            if state.mount(&mount.id).is_none() {
                return mount_added(state, mount);
            }
            let subject = mount
                .volume_id
                .clone()
                .filter(|v| state.volume(v).is_some())
                .unwrap_or_else(|| mount.id.clone());
            let before = state.disk_info(&subject).cloned();
            if state.upsert_mount(mount) == Upsert::Unchanged {
                return Vec::new();
            }
            let after = state.disk_info(&subject).cloned();
            match after {
                Some(info) if before.as_ref() != Some(&info) => {
                    vec![DeviceEvent::DiskChanged(info)]
                }
                _ => Vec::new(),
            }
        }
        MonitorEvent::MountRemoved(id) => {
            let last = state.disk_info(&id).cloned();
            let Some((mount, transition)) = state.detach_mount(&id) else {
                return Vec::new();
            };
            debug!(mount = %mount.id, "Mount removed");
            match (transition, last) {
                (Some(t), _) => vec![DeviceEvent::MountRemoved(t.disk_info)],
                // A no-volume mount reports its last known state.
                (None, Some(mut info)) => {
                    info.mount_point.clear();
                    info.can_unmount = false;
                    vec![DeviceEvent::MountRemoved(info)]
                }
                (None, None) => Vec::new(),
            }
        }
    }
}

/// A volume that goes away while mounted first reports the unmount. Mounts
/// that outlive it are announced again as no-volume mounts.
fn volume_removed(state: &mut RegistryState, id: &str) -> Vec<DeviceEvent> {
    let Some(last) = state.disk_info(id).cloned() else {
        state.remove_volume(id);
        return Vec::new();
    };
    let was_mounted = state.volume(id).is_some_and(|v| v.is_mounted());
    let orphans: Vec<String> = state
        .mounts()
        .into_iter()
        .filter(|m| m.volume_id.as_deref() == Some(id))
        .map(|m| m.id)
        .collect();

    if state.remove_volume(id).is_none() {
        return Vec::new();
    }

    let mut events = Vec::new();
    if was_mounted {
        let mut unmounted = last.clone();
        unmounted.mount_point.clear();
        unmounted.can_unmount = false;
        events.push(DeviceEvent::MountRemoved(unmounted));
    }
    events.push(DeviceEvent::VolumeRemoved(last));
    events.extend(
        orphans
            .iter()
            .filter_map(|mount_id| state.disk_info(mount_id).cloned())
            .map(DeviceEvent::MountAdded),
    );
    events
}

fn mount_added(state: &mut RegistryState, mount: Mount) -> Vec<DeviceEvent> {
    let id = mount.id.clone();
    let root = mount.root_uri.clone();
    let volume_id = mount.volume_id.clone().filter(|v| state.volume(v).is_some());
    state.upsert_mount(mount);

    match volume_id {
        Some(volume_id) => state
            .mark_mounted(&volume_id, &root)
            .filter(|t| t.transitioned)
            .map(|t| DeviceEvent::MountAdded(t.disk_info))
            .into_iter()
            .collect(),
        None => state
            .disk_info(&id)
            .cloned()
            .map(DeviceEvent::MountAdded)
            .into_iter()
            .collect(),
    }
}

fn volume_changed(state: &mut RegistryState, volume: Volume) -> Vec<DeviceEvent> {
    let id = volume.id.clone();
    let Some(before) = state.disk_info(&id).cloned() else {
        state.upsert_volume(volume);
        return state
            .disk_info(&id)
            .cloned()
            .map(DeviceEvent::VolumeAdded)
            .into_iter()
            .collect();
    };

    if state.upsert_volume(volume) == Upsert::Unchanged {
        return Vec::new();
    }
    let Some(after) = state.disk_info(&id).cloned() else {
        return Vec::new();
    };

    match (before.is_mounted(), after.is_mounted()) {
        (false, true) => vec![DeviceEvent::MountAdded(after)],
        (true, false) => vec![DeviceEvent::MountRemoved(after)],
        _ if before != after => vec![DeviceEvent::DiskChanged(after)],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMountService, drive, mount_of, volume};

    fn ids(events: &[DeviceEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                DeviceEvent::MountAdded(d) => format!("mount_added:{}", d.id),
                DeviceEvent::MountRemoved(d) => format!("mount_removed:{}", d.id),
                DeviceEvent::VolumeAdded(d) => format!("volume_added:{}", d.id),
                DeviceEvent::VolumeRemoved(d) => format!("volume_removed:{}", d.id),
                DeviceEvent::DiskChanged(d) => format!("disk_changed:{}", d.id),
                other => format!("{other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn startup_enumerates_without_events() {
        let service = FakeMountService::new()
            .with_drive(drive("d1"))
            .with_drive(drive("d2"))
            .with_volume(volume("sda1", Some("d1")))
            .with_volume(volume("sdb1", Some("d2")))
            .with_volume(volume("loop0", None));
        let registry = Arc::new(DeviceRegistry::new());
        let bus = Arc::new(EventBus::new(8));
        let mut events = bus.subscribe();

        let handle = VolumeMonitor::start(Arc::new(service.clone()), registry.clone(), bus)
            .await
            .unwrap();

        let snap = registry.snapshot();
        assert_eq!(snap.drive_keys().len(), 2);
        assert_eq!(snap.volumes_drive_keys().len() + snap.volumes_no_drive_keys().len(), 3);
        assert_eq!(snap.volumes_no_drive_keys(), ["loop0"]);
        assert_eq!(snap.disk_infos().len(), 3);
        registry.check_consistency().unwrap();

        service.close();
        handle.join().await;
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn events_raised_during_enumeration_are_not_lost() {
        // The volume shows up in both the buffered stream and the listing.
        let service = FakeMountService::new()
            .with_volume(volume("sdb1", None))
            .with_early_event(MonitorEvent::VolumeAdded(volume("sdb1", None)))
            .with_early_event(MonitorEvent::VolumeAdded(volume("sdc1", None)));
        let registry = Arc::new(DeviceRegistry::new());
        let bus = Arc::new(EventBus::new(8));
        let mut events = bus.subscribe();

        let handle = VolumeMonitor::start(Arc::new(service.clone()), registry.clone(), bus)
            .await
            .unwrap();
        service.close();
        handle.join().await;

        assert_eq!(
            events.recv().await,
            Some(DeviceEvent::VolumeAdded(registry.disk_info("sdc1").unwrap()))
        );
        assert!(events.try_recv().is_none());
        assert_eq!(registry.volumes().len(), 2);
    }

    #[tokio::test]
    async fn unavailable_service_fails_startup() {
        struct Broken;

        #[async_trait::async_trait]
        impl MountService for Broken {
            async fn list_drives(&self) -> crate::service::ServiceResult<Vec<volman_types::Drive>> {
                Err(ServiceError::Failed("no bus".into()))
            }
            async fn list_volumes(&self) -> crate::service::ServiceResult<Vec<Volume>> {
                Ok(Vec::new())
            }
            async fn list_mounts(&self) -> crate::service::ServiceResult<Vec<Mount>> {
                Ok(Vec::new())
            }
            async fn subscribe(&self) -> crate::service::ServiceResult<crate::service::MonitorEventStream> {
                let (_tx, rx) = tokio::sync::mpsc::channel(1);
                Ok(crate::service::MonitorEventStream::new(rx))
            }
            async fn mount_volume(
                &self,
                _volume: Volume,
                _credentials: Arc<crate::credentials::CredentialBridge>,
            ) -> crate::service::ServiceResult<String> {
                unreachable!()
            }
            async fn mount_location(
                &self,
                _uri: String,
                _credentials: Arc<crate::credentials::CredentialBridge>,
            ) -> crate::service::ServiceResult<Mount> {
                unreachable!()
            }
            async fn unmount(&self, _root_uri: String) -> crate::service::ServiceResult<()> {
                unreachable!()
            }
            async fn eject_volume(&self, _volume: Volume) -> crate::service::ServiceResult<()> {
                unreachable!()
            }
            async fn eject_mount(&self, _mount: Mount) -> crate::service::ServiceResult<()> {
                unreachable!()
            }
            async fn device_handle(
                &self,
                _id: &str,
                _kind: volman_types::DeviceKind,
            ) -> crate::service::ServiceResult<Option<volman_types::DeviceHandle>> {
                Ok(None)
            }
        }

        let result = VolumeMonitor::start(
            Arc::new(Broken),
            Arc::new(DeviceRegistry::new()),
            Arc::new(EventBus::new(1)),
        )
        .await;
        assert!(matches!(result, Err(VolumeError::MonitorUnavailable(_))));
    }

    #[test]
    fn folding_an_event_twice_changes_nothing() {
        let registry = DeviceRegistry::new();
        let stream = [
            MonitorEvent::DriveAdded(drive("d1")),
            MonitorEvent::VolumeAdded(volume("sdb1", Some("d1"))),
            MonitorEvent::MountAdded(mount_of("sdb1", "file:///media/SDB1")),
            MonitorEvent::MountRemoved("file:///media/SDB1".to_string()),
            MonitorEvent::VolumeRemoved("sdb1".to_string()),
            MonitorEvent::DriveRemoved("d1".to_string()),
        ];

        for event in stream {
            VolumeMonitor::apply_event(&registry, event.clone());
            let once = registry.snapshot();
            assert!(VolumeMonitor::apply_event(&registry, event).is_empty());
            assert_eq!(registry.snapshot(), once);
            registry.check_consistency().unwrap();
        }
    }

    #[test]
    fn any_arrival_order_keeps_the_indexes_consistent() {
        let events = [
            MonitorEvent::DriveAdded(drive("d1")),
            MonitorEvent::DriveAdded(drive("d2")),
            MonitorEvent::VolumeAdded(volume("sda1", Some("d1"))),
            MonitorEvent::VolumeAdded(volume("sdb1", Some("d2"))),
            MonitorEvent::VolumeAdded(volume("loop0", None)),
            MonitorEvent::MountAdded(mount_of("sdb1", "file:///media/SDB1")),
            MonitorEvent::MountAdded(Mount {
                id: "smb://nas/share".to_string(),
                root_uri: "smb://nas/share".to_string(),
                ..Default::default()
            }),
            MonitorEvent::DriveRemoved("d2".to_string()),
        ];

        // Rotations and reversals of the stream.
        let mut orders: Vec<Vec<MonitorEvent>> = Vec::new();
        for shift in 0..events.len() {
            let mut order = events.to_vec();
            order.rotate_left(shift);
            orders.push(order.clone());
            order.reverse();
            orders.push(order);
        }

        for order in orders {
            let registry = DeviceRegistry::new();
            for event in order {
                VolumeMonitor::apply_event(&registry, event);
                registry.check_consistency().unwrap();
            }
            assert_eq!(registry.volumes().len(), 3);
            assert_eq!(registry.snapshot().no_volume_mount_keys(), ["smb://nas/share"]);
        }
    }

    #[test]
    fn orphaned_volume_is_adopted_when_its_drive_arrives() {
        let registry = DeviceRegistry::new();
        VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeAdded(volume("sdc1", Some("d3"))));
        assert_eq!(registry.snapshot().volumes_no_drive_keys(), ["sdc1"]);

        let events = VolumeMonitor::apply_event(&registry, MonitorEvent::DriveAdded(drive("d3")));
        assert!(events.is_empty());
        assert_eq!(registry.snapshot().volumes_drive_keys(), ["sdc1"]);
    }

    #[test]
    fn volume_mount_lifecycle_emits_each_transition_once() {
        let registry = DeviceRegistry::new();
        let added =
            VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeAdded(volume("sdb1", None)));
        assert_eq!(ids(&added), ["volume_added:sdb1"]);

        let mounted = VolumeMonitor::apply_event(
            &registry,
            MonitorEvent::MountAdded(mount_of("sdb1", "file:///media/SDB1")),
        );
        assert_eq!(ids(&mounted), ["mount_added:sdb1"]);
        assert_eq!(registry.disk_info("sdb1").unwrap().mount_point, "/media/SDB1");

        // The backend also reports the volume property change.
        let mut now_mounted = volume("sdb1", None);
        now_mounted.mounted_root_uri = Some("file:///media/SDB1".to_string());
        let changed = VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeChanged(now_mounted));
        assert!(changed.is_empty());

        let unmounted = VolumeMonitor::apply_event(
            &registry,
            MonitorEvent::MountRemoved("file:///media/SDB1".to_string()),
        );
        assert_eq!(ids(&unmounted), ["mount_removed:sdb1"]);
        assert!(registry.disk_info("sdb1").unwrap().mount_point.is_empty());

        let changed =
            VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeChanged(volume("sdb1", None)));
        assert!(changed.is_empty());

        let removed =
            VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeRemoved("sdb1".to_string()));
        assert_eq!(ids(&removed), ["volume_removed:sdb1"]);
    }

    #[test]
    fn removing_a_mounted_volume_reports_the_unmount_first() {
        let registry = DeviceRegistry::new();
        VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeAdded(volume("sdb1", None)));
        VolumeMonitor::apply_event(
            &registry,
            MonitorEvent::MountAdded(mount_of("sdb1", "file:///media/SDB1")),
        );

        let removed =
            VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeRemoved("sdb1".to_string()));
        assert_eq!(
            ids(&removed),
            [
                "mount_removed:sdb1",
                "volume_removed:sdb1",
                "mount_added:file:///media/SDB1"
            ]
        );
        let DeviceEvent::MountRemoved(unmounted) = &removed[0] else {
            panic!("expected MountRemoved, got {:?}", removed[0]);
        };
        assert!(unmounted.mount_point.is_empty());
        assert_eq!(
            registry.snapshot().no_volume_mount_keys(),
            ["file:///media/SDB1"]
        );
        registry.check_consistency().unwrap();

        // The orphaned mount still unmounts exactly once.
        let gone = VolumeMonitor::apply_event(
            &registry,
            MonitorEvent::MountRemoved("file:///media/SDB1".to_string()),
        );
        assert_eq!(ids(&gone), ["mount_removed:file:///media/SDB1"]);
    }

    #[test]
    fn volume_property_change_before_mount_signal_is_not_duplicated() {
        let registry = DeviceRegistry::new();
        VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeAdded(volume("sdb1", None)));

        let mut now_mounted = volume("sdb1", None);
        now_mounted.mounted_root_uri = Some("file:///media/SDB1".to_string());
        let changed = VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeChanged(now_mounted));
        assert_eq!(ids(&changed), ["mount_added:sdb1"]);

        let mounted = VolumeMonitor::apply_event(
            &registry,
            MonitorEvent::MountAdded(mount_of("sdb1", "file:///media/SDB1")),
        );
        assert!(mounted.is_empty());

        let changed =
            VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeChanged(volume("sdb1", None)));
        assert_eq!(ids(&changed), ["mount_removed:sdb1"]);

        let unmounted = VolumeMonitor::apply_event(
            &registry,
            MonitorEvent::MountRemoved("file:///media/SDB1".to_string()),
        );
        assert!(unmounted.is_empty());
        registry.check_consistency().unwrap();
    }

    #[test]
    fn label_change_emits_disk_changed_only_on_difference() {
        let registry = DeviceRegistry::new();
        VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeAdded(volume("sdb1", None)));

        let same =
            VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeChanged(volume("sdb1", None)));
        assert!(same.is_empty());

        let mut relabeled = volume("sdb1", None);
        relabeled.label = "BACKUP".to_string();
        let changed = VolumeMonitor::apply_event(&registry, MonitorEvent::VolumeChanged(relabeled));
        assert_eq!(ids(&changed), ["disk_changed:sdb1"]);
    }

    #[test]
    fn network_mount_lifecycle() {
        let registry = DeviceRegistry::new();
        let share = Mount {
            id: "smb://nas/share".to_string(),
            name: "share".to_string(),
            root_uri: "smb://nas/share".to_string(),
            mount_path: "/run/user/1000/gvfs/share".to_string(),
            can_unmount: true,
            ..Default::default()
        };

        let added = VolumeMonitor::apply_event(&registry, MonitorEvent::MountAdded(share.clone()));
        assert_eq!(ids(&added), ["mount_added:smb://nas/share"]);

        let mut renamed = share;
        renamed.name = "Share on NAS".to_string();
        let changed = VolumeMonitor::apply_event(&registry, MonitorEvent::MountChanged(renamed));
        assert_eq!(ids(&changed), ["disk_changed:smb://nas/share"]);

        let removed = VolumeMonitor::apply_event(
            &registry,
            MonitorEvent::MountRemoved("smb://nas/share".to_string()),
        );
        assert_eq!(ids(&removed), ["mount_removed:smb://nas/share"]);
        assert!(registry.disk_infos().is_empty());
    }

    #[tokio::test]
    async fn processing_task_publishes_folded_events() {
        let service = FakeMountService::new();
        let registry = Arc::new(DeviceRegistry::new());
        let bus = Arc::new(EventBus::new(8));
        let mut events = bus.subscribe();

        let handle = VolumeMonitor::start(Arc::new(service.clone()), registry.clone(), bus)
            .await
            .unwrap();

        service
            .emit(MonitorEvent::VolumeAdded(volume("sdb1", None)))
            .await;
        let event = events.recv().await.unwrap();
        assert_eq!(event.subject_id(), "sdb1");
        assert!(matches!(event, DeviceEvent::VolumeAdded(_)));

        handle.stop();
    }
}
