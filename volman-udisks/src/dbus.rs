// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;

use zbus::zvariant;
use zbus_macros::proxy;

pub const UDISKS_SERVICE: &str = "org.freedesktop.UDisks2";
pub const UDISKS_ROOT: &str = "/org/freedesktop/UDisks2";

pub const DRIVE_IFACE: &str = "org.freedesktop.UDisks2.Drive";
pub const BLOCK_IFACE: &str = "org.freedesktop.UDisks2.Block";
pub const FILESYSTEM_IFACE: &str = "org.freedesktop.UDisks2.Filesystem";
pub const ENCRYPTED_IFACE: &str = "org.freedesktop.UDisks2.Encrypted";
pub const PARTITION_IFACE: &str = "org.freedesktop.UDisks2.Partition";
pub const PARTITION_TABLE_IFACE: &str = "org.freedesktop.UDisks2.PartitionTable";
pub const LOOP_IFACE: &str = "org.freedesktop.UDisks2.Loop";

#[proxy(
    default_service = "org.freedesktop.UDisks2",
    default_path = "/org/freedesktop/UDisks2",
    interface = "org.freedesktop.DBus.ObjectManager"
)]
pub trait UDisks2ObjectManager {
    fn get_managed_objects(
        &self,
    ) -> zbus::Result<
        HashMap<
            zvariant::OwnedObjectPath,
            HashMap<String, HashMap<String, zvariant::OwnedValue>>,
        >,
    >;

    #[zbus(signal)]
    fn interfaces_added(
        &self,
        object_path: zvariant::OwnedObjectPath,
        interfaces_and_properties: HashMap<String, HashMap<String, zvariant::OwnedValue>>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    fn interfaces_removed(
        &self,
        object_path: zvariant::OwnedObjectPath,
        interfaces: Vec<String>,
    ) -> zbus::Result<()>;
}
