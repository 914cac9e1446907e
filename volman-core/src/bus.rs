// SPDX-License-Identifier: GPL-3.0-only

use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use volman_types::DeviceEvent;

/// Fan-out of [`DeviceEvent`]s to any number of subscribers.
///
/// Each subscriber owns a bounded channel. Publishing never waits: a
/// subscriber whose channel is full misses the event.
#[derive(Debug)]
pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<mpsc::Sender<DeviceEvent>>>,
}

pub struct EventStream {
    receiver: mpsc::Receiver<DeviceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> EventStream {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sender);
        EventStream { receiver }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|s| !s.is_closed());
        subscribers.len()
    }

    /// Deliver `event` to every live subscriber and prune closed ones.
    /// Returns how many subscribers received it.
    pub fn publish(&self, event: DeviceEvent) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());

        let mut delivered = 0usize;
        subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(subject = event.subject_id(), "Event subscriber is full, event skipped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Device event receiver dropped");
                false
            }
        });
        delivered
    }
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<DeviceEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DeviceEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = DeviceEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
