// SPDX-License-Identifier: GPL-3.0-only

//! UDisks2 reports device files and mount points as NUL-terminated `ay`.

use zbus::zvariant::OwnedValue;

/// `ay` form of a path, as UDisks2 expects it in method options.
pub fn to_bytestring(path: &str) -> Vec<u8> {
    path.bytes().chain(std::iter::once(0)).collect()
}

/// Text up to the first NUL. Invalid UTF-8 is replaced, not rejected.
pub fn from_bytestring(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Decode an `ay` property, `None` when the value has another type.
pub fn bytestring_property(value: &OwnedValue) -> Option<String> {
    Vec::<u8>::try_from(value.clone())
        .ok()
        .map(|bytes| from_bytestring(&bytes))
}

/// Decode an `aay` property such as `Filesystem.MountPoints`, dropping
/// empty entries.
pub fn mount_points_property(value: &OwnedValue) -> Vec<String> {
    let Ok(entries) = Vec::<Vec<u8>>::try_from(value.clone()) else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|entry| from_bytestring(entry))
        .filter(|path| !path.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use zbus::zvariant::Value;

    fn owned(value: Value<'_>) -> OwnedValue {
        OwnedValue::try_from(value).unwrap()
    }

    #[test]
    fn text_stops_at_the_first_nul() {
        assert_eq!(from_bytestring(b"/run/media/me/DISK\0junk"), "/run/media/me/DISK");
        assert_eq!(from_bytestring(b"/dev/sr0"), "/dev/sr0");
        assert_eq!(to_bytestring("/dev/sr0"), b"/dev/sr0\0");
    }

    #[test]
    fn device_property_decodes() {
        let device = owned(Value::from(to_bytestring("/dev/sdb1")));
        assert_eq!(bytestring_property(&device).as_deref(), Some("/dev/sdb1"));
        assert_eq!(bytestring_property(&OwnedValue::from(7u32)), None);
    }

    #[test]
    fn mount_points_skip_empty_entries() {
        let mounts = owned(Value::from(vec![
            to_bytestring("/media/a"),
            b"\0".to_vec(),
            Vec::new(),
            b"/media/b".to_vec(),
        ]));
        assert_eq!(mount_points_property(&mounts), ["/media/a", "/media/b"]);

        assert!(mount_points_property(&OwnedValue::from(true)).is_empty());
    }
}
