//! Request/notification seam to the media forwarding engine
//!
//! The engine itself (and the process pipe used to reach it) lives outside
//! this crate behind [`ChannelTransport`]. Requests are typed, notifications
//! are routed to the listener registered for their target id (a room id).

use crate::types::{PeerId, ProducerId, RoomId};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Request {method} failed: {reason}")]
    Request { method: &'static str, reason: String },

    #[error("No async runtime available to send {method}")]
    NoRuntime { method: &'static str },

    #[error("A notification listener for {0} is already registered")]
    ListenerExists(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInternal {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInternal {
    pub room_id: RoomId,
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePeerData {
    pub peer_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioLevelsEventData {
    pub enabled: bool,
}

/// Request sent to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method")]
pub enum ChannelRequest {
    #[serde(rename = "room.close")]
    RoomClose { internal: RoomInternal },

    #[serde(rename = "room.dump")]
    RoomDump { internal: RoomInternal },

    #[serde(rename = "room.createPeer")]
    RoomCreatePeer {
        internal: PeerInternal,
        data: CreatePeerData,
    },

    #[serde(rename = "room.setAudioLevelsEvent")]
    RoomSetAudioLevelsEvent {
        internal: RoomInternal,
        data: AudioLevelsEventData,
    },

    #[serde(rename = "peer.close")]
    PeerClose { internal: PeerInternal },
}

impl ChannelRequest {
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::RoomClose { .. } => "room.close",
            Self::RoomDump { .. } => "room.dump",
            Self::RoomCreatePeer { .. } => "room.createPeer",
            Self::RoomSetAudioLevelsEvent { .. } => "room.setAudioLevelsEvent",
            Self::PeerClose { .. } => "peer.close",
        }
    }
}

/// Notification pushed by the engine for one room
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum Notification {
    /// The engine tore the room down on its own
    Close,
    /// Periodic `(producer id, level)` report, higher level is louder
    AudioLevels(Vec<(ProducerId, i16)>),
}

/// Transport used to reach the forwarding engine
#[async_trait]
pub trait ChannelTransport: Send + Sync + 'static {
    async fn request(&self, request: ChannelRequest) -> Result<serde_json::Value, ChannelError>;
}

type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

/// Callback run when a queued request fails
pub(crate) type ErrorCallback = Box<dyn FnOnce(ChannelError) + Send>;

struct QueuedRequest {
    request: ChannelRequest,
    on_error: ErrorCallback,
}

pub struct Channel {
    transport: Arc<dyn ChannelTransport>,
    listeners: DashMap<String, NotificationHandler>,
    /// Sender side of the fire-and-forget queue, created with its worker on
    /// first use
    queue: Mutex<Option<mpsc::UnboundedSender<QueuedRequest>>>,
}

impl Channel {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            listeners: DashMap::new(),
            queue: Mutex::new(None),
        })
    }

    pub async fn request(&self, request: ChannelRequest) -> Result<serde_json::Value, ChannelError> {
        send(self.transport.as_ref(), request).await
    }

    /// Send a request without waiting for the response
    ///
    /// Requests reach the engine in the order they were spawned. `on_error`
    /// runs on the queue worker if the engine rejects the request, or
    /// immediately when there is no runtime to send it from.
    pub fn spawn_request<F>(&self, request: ChannelRequest, on_error: F)
    where
        F: FnOnce(ChannelError) + Send + 'static,
    {
        if let Err((e, on_error)) = self.enqueue(request, Box::new(on_error)) {
            on_error(e);
        }
    }

    /// Queue a request, handing the callback back when it cannot be queued
    ///
    /// Lets a caller holding a lock defer the failure path until it released it.
    pub(crate) fn enqueue(
        &self,
        request: ChannelRequest,
        on_error: ErrorCallback,
    ) -> Result<(), (ChannelError, ErrorCallback)> {
        let mut queue = self.queue.lock();
        let job = QueuedRequest { request, on_error };

        let job = match queue.as_ref() {
            Some(sender) => match sender.send(job) {
                Ok(()) => return Ok(()),
                // The worker's runtime has shut down
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let method = job.request.method();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(method, "No runtime available, dropping channel request");
            *queue = None;
            return Err((ChannelError::NoRuntime { method }, job.on_error));
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(run_queue(Arc::clone(&self.transport), receiver));
        debug!("Started channel request worker");

        if let Err(mpsc::error::SendError(job)) = sender.send(job) {
            *queue = None;
            return Err((ChannelError::Closed, job.on_error));
        }
        *queue = Some(sender);
        Ok(())
    }

    /// Route notifications for `target_id` to `handler`
    ///
    /// Fails with [`ChannelError::ListenerExists`] when the target already has
    /// a listener; the existing one stays in place.
    pub fn on_notification<F>(&self, target_id: impl Into<String>, handler: F) -> Result<(), ChannelError>
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        match self.listeners.entry(target_id.into()) {
            Entry::Occupied(entry) => Err(ChannelError::ListenerExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(handler));
                Ok(())
            }
        }
    }

    pub fn remove_notification_listener(&self, target_id: &str) {
        self.listeners.remove(target_id);
    }

    #[must_use]
    pub fn has_notification_listener(&self, target_id: &str) -> bool {
        self.listeners.contains_key(target_id)
    }

    /// Deliver a notification from the engine; returns false when nobody
    /// listens for `target_id`
    pub fn notify(&self, target_id: &str, notification: Notification) -> bool {
        // Clone the handler out so it may remove its own listener
        let handler = self
            .listeners
            .get(target_id)
            .map(|entry| Arc::clone(entry.value()));

        match handler {
            Some(handler) => {
                handler(notification);
                true
            }
            None => {
                debug!(target_id, "Dropping notification without listener");
                false
            }
        }
    }
}

async fn send(
    transport: &dyn ChannelTransport,
    request: ChannelRequest,
) -> Result<serde_json::Value, ChannelError> {
    let method = request.method();
    debug!(method, "Sending channel request");

    let result = transport.request(request).await;
    if let Err(e) = &result {
        warn!(method, error = %e, "Channel request failed");
    }
    result
}

/// Send queued requests one at a time until every sender is gone
async fn run_queue(
    transport: Arc<dyn ChannelTransport>,
    mut receiver: mpsc::UnboundedReceiver<QueuedRequest>,
) {
    while let Some(QueuedRequest { request, on_error }) = receiver.recv().await {
        if let Err(e) = send(transport.as_ref(), request).await {
            on_error(e);
        }
    }
    debug!("Channel request worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_request_wire_format() {
        let request = ChannelRequest::RoomSetAudioLevelsEvent {
            internal: RoomInternal {
                room_id: RoomId::from("r1"),
            },
            data: AudioLevelsEventData { enabled: true },
        };
        assert_eq!(request.method(), "room.setAudioLevelsEvent");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "method": "room.setAudioLevelsEvent",
                "internal": { "roomId": "r1" },
                "data": { "enabled": true }
            })
        );
    }

    #[test]
    fn test_audio_levels_notification_parsing() {
        let notification: Notification = serde_json::from_value(json!({
            "event": "audiolevels",
            "data": [["p1", -20], ["p2", -70]]
        }))
        .unwrap();
        assert_eq!(
            notification,
            Notification::AudioLevels(vec![
                (ProducerId::from("p1"), -20),
                (ProducerId::from("p2"), -70),
            ])
        );
    }

    #[test]
    fn test_notification_routing() {
        let channel = Channel::new(RecordingTransport::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        channel
            .on_notification("room-a", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(channel.notify("room-a", Notification::Close));
        assert!(!channel.notify("room-b", Notification::Close));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        channel.remove_notification_listener("room-a");
        assert!(!channel.has_notification_listener("room-a"));
        assert!(!channel.notify("room-a", Notification::Close));
    }

    #[test]
    fn test_listener_may_remove_itself() {
        let channel = Channel::new(RecordingTransport::new());
        let weak = Arc::downgrade(&channel);
        channel
            .on_notification("room-a", move |_| {
                if let Some(channel) = weak.upgrade() {
                    channel.remove_notification_listener("room-a");
                }
            })
            .unwrap();

        assert!(channel.notify("room-a", Notification::Close));
        assert!(!channel.has_notification_listener("room-a"));
    }

    #[tokio::test]
    async fn test_spawned_request_failure_reaches_callback() {
        let transport = RecordingTransport::new();
        transport.fail_method("room.close");
        let channel = Channel::new(transport.clone());

        let (tx, rx) = tokio::sync::oneshot::channel();
        channel.spawn_request(
            ChannelRequest::RoomClose {
                internal: RoomInternal {
                    room_id: RoomId::from("r1"),
                },
            },
            move |e| {
                let _ = tx.send(e);
            },
        );

        let error = rx.await.unwrap();
        assert!(matches!(error, ChannelError::Request { method: "room.close", .. }));
        assert_eq!(transport.methods(), ["room.close"]);
    }

    #[test]
    fn test_spawn_without_runtime_reports_error() {
        let channel = Channel::new(RecordingTransport::new());
        let failed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failed);
        channel.spawn_request(
            ChannelRequest::RoomDump {
                internal: RoomInternal {
                    room_id: RoomId::from("r1"),
                },
            },
            move |e| {
                assert_eq!(e, ChannelError::NoRuntime { method: "room.dump" });
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_listener_is_rejected() {
        let channel = Channel::new(RecordingTransport::new());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        channel
            .on_notification("room-a", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let counter = Arc::clone(&second);
        let err = channel
            .on_notification("room-a", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap_err();
        assert_eq!(err, ChannelError::ListenerExists("room-a".to_string()));

        assert!(channel.notify("room-a", Notification::Close));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_spawned_requests_keep_their_order() {
        let transport = RecordingTransport::new();
        let channel = Channel::new(transport.clone());

        let mut expected = Vec::new();
        for i in 0..500 {
            let enabled = i % 2 == 0;
            expected.push(enabled);
            channel.spawn_request(
                ChannelRequest::RoomSetAudioLevelsEvent {
                    internal: RoomInternal {
                        room_id: RoomId::from("r1"),
                    },
                    data: AudioLevelsEventData { enabled },
                },
                |_| {},
            );
        }

        transport.wait_for_requests(expected.len()).await;
        assert_eq!(transport.audio_levels_toggles(), expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failures_reported_in_order() {
        let transport = RecordingTransport::new();
        transport.fail_method("peer.close");
        let channel = Channel::new(transport.clone());

        let failures = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..50 {
            let sink = Arc::clone(&failures);
            channel.spawn_request(
                ChannelRequest::PeerClose {
                    internal: PeerInternal {
                        room_id: RoomId::from("r1"),
                        peer_id: PeerId::from(format!("peer-{i}")),
                    },
                },
                move |_| sink.lock().push(i),
            );
        }

        transport.wait_for_requests(50).await;
        // The last callback may still be running
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while failures.lock().len() < 50 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*failures.lock(), (0..50).collect::<Vec<_>>());
    }
}
