// SPDX-License-Identifier: GPL-3.0-only

//! Mountability and ejectability rules for block devices.

use volman_types::{DeviceProperties, VolumeError, keys};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Refusal {
    EmptyId,
    Ignored,
    AlreadyMounted(String),
    NoFilesystem,
    Encrypted,
    NotEjectable,
}

impl Refusal {
    fn reason(&self) -> String {
        match self {
            Self::EmptyId => "block id is empty".to_string(),
            Self::Ignored => "device is ignored".to_string(),
            Self::AlreadyMounted(at) => format!("device is already mounted at: {at}"),
            Self::NoFilesystem => "device does not have a filesystem interface".to_string(),
            Self::Encrypted => "device is encrypted".to_string(),
            Self::NotEjectable => {
                "device is not removable or is not an ejectable optical item".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    /// Empty when allowed
    pub reason: String,
    refusal: Option<Refusal>,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
            refusal: None,
        }
    }

    fn refuse(refusal: Refusal) -> Self {
        Self {
            allowed: false,
            reason: refusal.reason(),
            refusal: Some(refusal),
        }
    }

    pub fn into_result(self, id: &str) -> Result<(), VolumeError> {
        let Some(refusal) = self.refusal else {
            return Ok(());
        };
        Err(match refusal {
            Refusal::EmptyId => VolumeError::NotFound(id.to_string()),
            Refusal::Ignored => VolumeError::Ignored(id.to_string()),
            Refusal::AlreadyMounted(at) => VolumeError::AlreadyMounted(at),
            Refusal::NoFilesystem => VolumeError::NoFilesystem(id.to_string()),
            Refusal::Encrypted => VolumeError::Encrypted(id.to_string()),
            Refusal::NotEjectable => VolumeError::NotRemovableOrEjectable(id.to_string()),
        })
    }
}

pub fn is_mountable_block_dev(props: &DeviceProperties) -> PolicyDecision {
    if props.get_str(keys::ID).is_empty() {
        return PolicyDecision::refuse(Refusal::EmptyId);
    }
    if props.get_bool(keys::HINT_IGNORE) {
        return PolicyDecision::refuse(Refusal::Ignored);
    }
    let mount_point = props.get_str(keys::MOUNT_POINT);
    if !mount_point.is_empty() {
        return PolicyDecision::refuse(Refusal::AlreadyMounted(mount_point));
    }
    if !props.get_bool(keys::HAS_FILESYSTEM) {
        return PolicyDecision::refuse(Refusal::NoFilesystem);
    }
    if props.get_bool(keys::IS_ENCRYPTED) {
        return PolicyDecision::refuse(Refusal::Encrypted);
    }
    PolicyDecision::allow()
}

pub fn is_ejectable_block_dev(props: &DeviceProperties) -> PolicyDecision {
    if props.get_bool(keys::REMOVABLE) {
        return PolicyDecision::allow();
    }
    if props.get_bool(keys::OPTICAL) && props.get_bool(keys::EJECTABLE) {
        return PolicyDecision::allow();
    }
    PolicyDecision::refuse(Refusal::NotEjectable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, bool)]) -> DeviceProperties {
        let mut props = DeviceProperties::new();
        props.insert(keys::ID, "/org/freedesktop/UDisks2/block_devices/sdb1");
        props.insert(keys::MOUNT_POINT, "");
        for (key, value) in pairs {
            props.insert(key, *value);
        }
        props
    }

    #[test]
    fn mountable_when_filesystem_and_not_mounted() {
        let decision = is_mountable_block_dev(&props(&[(keys::HAS_FILESYSTEM, true)]));
        assert!(decision.allowed);
        assert!(decision.reason.is_empty());
        assert!(decision.into_result("sdb1").is_ok());
    }

    #[test]
    fn checks_run_in_order() {
        let mut empty = DeviceProperties::new();
        empty.insert(keys::HINT_IGNORE, true);
        assert_eq!(is_mountable_block_dev(&empty).reason, "block id is empty");

        let ignored = props(&[(keys::HINT_IGNORE, true), (keys::IS_ENCRYPTED, true)]);
        assert_eq!(is_mountable_block_dev(&ignored).reason, "device is ignored");

        let mut mounted = props(&[(keys::HAS_FILESYSTEM, false)]);
        mounted.insert(keys::MOUNT_POINT, "/media/usb1");
        let decision = is_mountable_block_dev(&mounted);
        assert_eq!(decision.reason, "device is already mounted at: /media/usb1");
        assert_eq!(
            decision.into_result("sdb1"),
            Err(VolumeError::AlreadyMounted("/media/usb1".to_string()))
        );

        let no_fs = props(&[(keys::IS_ENCRYPTED, true)]);
        assert_eq!(
            is_mountable_block_dev(&no_fs).reason,
            "device does not have a filesystem interface"
        );

        let encrypted = props(&[(keys::HAS_FILESYSTEM, true), (keys::IS_ENCRYPTED, true)]);
        assert_eq!(
            is_mountable_block_dev(&encrypted).into_result("sdb1"),
            Err(VolumeError::Encrypted("sdb1".to_string()))
        );
    }

    #[test]
    fn ejectable_cases() {
        let removable = props(&[(keys::REMOVABLE, true), (keys::OPTICAL, false)]);
        assert!(is_ejectable_block_dev(&removable).allowed);

        // Optical media in a fixed drive, with no drive compatibility hint.
        let disc = props(&[
            (keys::REMOVABLE, false),
            (keys::OPTICAL, true),
            (keys::EJECTABLE, true),
        ]);
        assert!(is_ejectable_block_dev(&disc).allowed);

        let fixed = is_ejectable_block_dev(&props(&[
            (keys::REMOVABLE, false),
            (keys::OPTICAL, false),
        ]));
        assert!(!fixed.allowed);
        assert_eq!(
            fixed.reason,
            "device is not removable or is not an ejectable optical item"
        );
        assert_eq!(
            fixed.into_result("sda"),
            Err(VolumeError::NotRemovableOrEjectable("sda".to_string()))
        );

        let tray_locked = props(&[(keys::OPTICAL, true), (keys::EJECTABLE, false)]);
        assert!(!is_ejectable_block_dev(&tray_locked).allowed);

        // An empty optical drive has no media to eject.
        let empty_drive = props(&[(keys::OPTICAL_DRIVE, true), (keys::EJECTABLE, true)]);
        assert!(!is_ejectable_block_dev(&empty_drive).allowed);
    }
}
