// SPDX-License-Identifier: GPL-3.0-only

//! Network shares are not UDisks2 objects; they are read from mountinfo.

use std::path::Path;

use anyhow::Result;
use tracing::debug;
use volman_core::Config;
use volman_types::{Mount, ProtocolDevice, path_to_file_uri};

const NETWORK_ICON: &str = "folder-remote";

/// Best-effort root URI for a network mount source.
///
/// `//host/share` (cifs) becomes `smb://host/share`, `host:/export` (nfs)
/// becomes `nfs://host/export` and `user@host:/path` (sshfs) becomes
/// `sftp://user@host/path`. Anything else falls back to the local path.
pub fn network_root_uri(fs_type: &str, source: &str, mount_point: &str) -> Option<String> {
    let scheme = match fs_type {
        "cifs" | "smb3" | "smbfs" => "smb",
        "nfs" | "nfs4" => "nfs",
        "sshfs" | "fuse.sshfs" => "sftp",
        "davfs" | "fuse.davfs2" => {
            if source.starts_with("http://") || source.starts_with("https://") {
                return Some(source.to_string());
            }
            ""
        }
        _ => "",
    };

    let remote = if let Some(rest) = source.strip_prefix("//") {
        Some(rest.to_string())
    } else if let Some((host, path)) = source.split_once(':') {
        (!host.is_empty()).then(|| format!("{host}/{}", path.trim_start_matches('/')))
    } else {
        None
    };

    match remote {
        Some(remote) if !scheme.is_empty() => Some(format!(
            "{scheme}://{}",
            remote.trim_end_matches('/')
        )),
        _ => path_to_file_uri(mount_point),
    }
}

/// Mount entry for one network filesystem.
pub fn network_mount(fs_type: &str, source: &str, mount_point: &str) -> Option<Mount> {
    let root_uri = network_root_uri(fs_type, source, mount_point)?;
    let name = Path::new(mount_point)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| source.to_string());

    Some(Mount {
        id: root_uri.clone(),
        name,
        root_uri,
        mount_path: mount_point.to_string(),
        volume_id: None,
        drive_id: None,
        can_unmount: true,
        can_eject: false,
        icons: vec![NETWORK_ICON.to_string()],
    })
}

/// Protocol device handle for a network mount. Sizes are not queried.
pub fn protocol_device(mount: &Mount, fs_type: &str) -> ProtocolDevice {
    ProtocolDevice {
        path: mount.root_uri.clone(),
        mount_point: mount.mount_path.clone(),
        file_system: fs_type.to_string(),
        size_total: 0,
        size_usage: 0,
        display_name: mount.name.clone(),
        device_icons: mount.icons.clone(),
    }
}

/// A network mount together with its filesystem type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMount {
    pub mount: Mount,
    pub fs_type: String,
}

/// Network filesystems currently mounted in this process' namespace.
pub fn list_network_mounts(config: &Config) -> Result<Vec<NetworkMount>> {
    let infos = procfs::process::Process::myself()?.mountinfo()?;
    let mut mounts: Vec<NetworkMount> = Vec::new();

    for info in infos {
        if !config.is_network_filesystem(&info.fs_type) {
            continue;
        }
        let source = info.mount_source.clone().unwrap_or_default();
        let mount_point = info.mount_point.to_string_lossy().to_string();
        let Some(mount) = network_mount(&info.fs_type, &source, &mount_point) else {
            continue;
        };
        if mounts.iter().any(|m| m.mount.id == mount.id) {
            debug!("Skipping duplicate network mount {}", mount.id);
            continue;
        }
        mounts.push(NetworkMount {
            mount,
            fs_type: info.fs_type.clone(),
        });
    }

    Ok(mounts)
}
