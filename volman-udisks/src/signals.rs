// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use volman_types::MonitorEvent;
use zbus::zvariant::OwnedValue;
use zbus::{Connection, MatchRule, MessageStream, message::Type as MessageType};

use crate::dbus::{InterfacesAddedStream, InterfacesRemovedStream, UDisks2ObjectManagerProxy};
use crate::dbus::{UDISKS_ROOT, UDISKS_SERVICE};
use crate::objects::{ObjectTree, Snapshot};

pub type SharedTree = Arc<Mutex<ObjectTree>>;

pub fn lock_tree(tree: &Mutex<ObjectTree>) -> MutexGuard<'_, ObjectTree> {
    tree.lock().unwrap_or_else(|e| e.into_inner())
}

/// Subscriptions to every UDisks2 change signal.
///
/// Opened before the tree is re-read so nothing that happens in between is
/// missed.
pub struct SignalStreams {
    added: InterfacesAddedStream,
    removed: InterfacesRemovedStream,
    properties: MessageStream,
}

impl SignalStreams {
    pub async fn open(connection: &Connection) -> zbus::Result<Self> {
        let object_manager = UDisks2ObjectManagerProxy::new(connection).await?;
        let added = object_manager.receive_interfaces_added().await?;
        let removed = object_manager.receive_interfaces_removed().await?;

        let rule = MatchRule::builder()
            .msg_type(MessageType::Signal)
            .sender(UDISKS_SERVICE)?
            .interface("org.freedesktop.DBus.Properties")?
            .member("PropertiesChanged")?
            .path_namespace(UDISKS_ROOT)?
            .build();
        let properties = MessageStream::for_match_rule(rule, connection, None).await?;

        Ok(Self {
            added,
            removed,
            properties,
        })
    }
}

/// Fold signals into the shared tree and forward the entity diff of every
/// change. Stops when the receiver is dropped or the bus goes away.
pub fn spawn_watcher(
    streams: SignalStreams,
    tree: SharedTree,
    sender: mpsc::Sender<MonitorEvent>,
) -> tokio::task::JoinHandle<()> {
    let SignalStreams {
        mut added,
        mut removed,
        mut properties,
    } = streams;
    let mut previous = Snapshot::of(&lock_tree(&tree));

    tokio::spawn(async move {
        loop {
            let changed = tokio::select! {
                _ = sender.closed() => break,
                maybe_added = added.next() => {
                    let Some(signal) = maybe_added else {
                        break;
                    };
                    match signal.args() {
                        Ok(args) => {
                            trace!("InterfacesAdded on {}", args.object_path.as_str());
                            lock_tree(&tree).add_interfaces(
                                args.object_path.as_str(),
                                args.interfaces_and_properties,
                            );
                            true
                        }
                        Err(e) => {
                            warn!("Failed to parse InterfacesAdded signal args: {e}");
                            false
                        }
                    }
                }
                maybe_removed = removed.next() => {
                    let Some(signal) = maybe_removed else {
                        break;
                    };
                    match signal.args() {
                        Ok(args) => {
                            trace!("InterfacesRemoved on {}", args.object_path.as_str());
                            lock_tree(&tree)
                                .remove_interfaces(args.object_path.as_str(), &args.interfaces);
                            true
                        }
                        Err(e) => {
                            warn!("Failed to parse InterfacesRemoved signal args: {e}");
                            false
                        }
                    }
                }
                maybe_message = properties.next() => {
                    let Some(message) = maybe_message else {
                        break;
                    };
                    match message {
                        Ok(message) => {
                            let header = message.header();
                            let Some(path) = header.path().map(|p| p.to_string()) else {
                                continue;
                            };
                            match message
                                .body()
                                .deserialize::<(String, HashMap<String, OwnedValue>, Vec<String>)>()
                            {
                                Ok((interface, changed, invalidated)) => lock_tree(&tree)
                                    .update_properties(&path, &interface, changed, &invalidated),
                                Err(e) => {
                                    warn!("Failed to parse PropertiesChanged on {path}: {e}");
                                    false
                                }
                            }
                        }
                        Err(e) => {
                            warn!("PropertiesChanged stream error: {e}");
                            false
                        }
                    }
                }
            };

            if !changed {
                continue;
            }

            let next = Snapshot::of(&lock_tree(&tree));
            for event in previous.diff(&next) {
                debug!("UDisks2 change: {event:?}");
                if sender.send(event).await.is_err() {
                    debug!("Monitor event receiver dropped");
                    return;
                }
            }
            previous = next;
        }
        debug!("UDisks2 signal watcher stopped");
    })
}
