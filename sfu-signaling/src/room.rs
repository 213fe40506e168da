//! SFU Room management
//!
//! A room owns:
//! - the per-kind capability set, aggregated once at creation
//! - the peer registry (by peer name) and a flattened producer index
//! - the `audiolevels` fan-out, enabled on the engine only while somebody listens
//!
//! Local state changes are synchronous. Requests to the engine are fire-and-
//! forget; failures surface as close notifications of the affected entity.

use crate::capabilities::{aggregate, CapabilitySet};
use crate::channel::{
    AudioLevelsEventData, Channel, ChannelError, ChannelRequest, CreatePeerData, Notification,
    PeerInternal, RoomInternal,
};
use crate::error::{Error, Result};
use crate::event::{Emitter, Subscription};
use crate::peer::Peer;
use crate::producer::Producer;
use crate::rtp_parameters::RtpCapabilities;
use crate::types::{MediaKind, PeerId, ProducerId, RoomId};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Resolved audio level of one producer
#[derive(Debug, Clone)]
pub struct AudioLevel {
    pub peer: Arc<Peer>,
    pub producer: Arc<Producer>,
    /// Higher is louder
    pub level: i16,
}

#[derive(Default)]
struct RoomHandlers {
    new_peer: Emitter<Arc<Peer>>,
    new_producer: Emitter<Arc<Producer>>,
    audio_levels: Emitter<Vec<AudioLevel>>,
    close: Emitter<()>,
}

impl RoomHandlers {
    fn clear(&self) {
        self.new_peer.clear();
        self.new_producer.clear();
        self.audio_levels.clear();
        self.close.clear();
    }
}

#[derive(Default)]
struct RoomState {
    peers: IndexMap<String, Arc<Peer>>,
    producers: HashMap<ProducerId, Arc<Producer>>,
    audio_levels_listener_count: usize,
}

pub struct Room {
    id: RoomId,
    capabilities: CapabilitySet,
    channel: Arc<Channel>,
    closed: AtomicBool,
    state: Mutex<RoomState>,
    handlers: RoomHandlers,
    me: Weak<Room>,
}

impl Room {
    /// Create a room from a flat capability list
    ///
    /// Fails with [`Error::AlreadyExists`] when another room with the same id
    /// is still registered on the channel.
    pub fn create(
        id: RoomId,
        capabilities: &RtpCapabilities,
        channel: Arc<Channel>,
    ) -> Result<Arc<Self>> {
        let room = Arc::new_cyclic(|me| Self {
            id,
            capabilities: aggregate(capabilities),
            channel,
            closed: AtomicBool::new(false),
            state: Mutex::new(RoomState::default()),
            handlers: RoomHandlers::default(),
            me: me.clone(),
        });

        let weak = Arc::downgrade(&room);
        room.channel
            .on_notification(room.id.as_str(), move |notification| {
                if let Some(room) = weak.upgrade() {
                    room.handle_notification(notification);
                }
            })
            .map_err(|_| Error::AlreadyExists(format!("room {}", room.id)))?;

        info!(
            room_id = %room.id,
            kinds = ?room.capabilities.kinds().collect::<Vec<_>>(),
            "Created room"
        );

        Ok(room)
    }

    #[must_use]
    pub const fn id(&self) -> &RoomId {
        &self.id
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn capability_set(&self) -> &CapabilitySet {
        &self.capabilities
    }

    #[must_use]
    pub fn capabilities(&self, kind: MediaKind) -> Arc<RtpCapabilities> {
        self.capabilities.get(kind)
    }

    /// Capabilities for a kind given by name (`audio`, `video` or `depth`)
    pub fn get_capabilities(&self, kind: &str) -> Result<Arc<RtpCapabilities>> {
        let kind = kind.parse::<MediaKind>()?;
        Ok(self.capabilities(kind))
    }

    /// Create and register a peer
    ///
    /// The peer is visible through [`Room::get_peer`] as soon as this returns.
    /// The engine is told afterwards; if it refuses, the peer closes with the
    /// engine error as reason instead of this call failing.
    pub fn create_peer(&self, peer_name: &str) -> Result<Arc<Peer>> {
        if peer_name.is_empty() {
            return Err(Error::InvalidArgument("peer name must not be empty".to_string()));
        }

        // `close` flips the flag under the same lock, so a peer is either
        // drained by the teardown or never inserted
        let (peer, rejected) = {
            let mut state = self.state.lock();
            if self.closed() {
                return Err(Error::InvalidState(format!("room {} is closed", self.id)));
            }
            if state.peers.contains_key(peer_name) {
                return Err(Error::AlreadyExists(format!("peer {peer_name}")));
            }

            let peer = Peer::new(
                PeerId::random(),
                peer_name.to_string(),
                self.id.clone(),
                Arc::clone(&self.channel),
            );
            state.peers.insert(peer_name.to_string(), Arc::clone(&peer));

            // Queued under the lock so it cannot trail a concurrent room.close
            let weak_peer = Arc::downgrade(&peer);
            let rejected = self
                .channel
                .enqueue(
                    ChannelRequest::RoomCreatePeer {
                        internal: PeerInternal {
                            room_id: self.id.clone(),
                            peer_id: peer.id().clone(),
                        },
                        data: CreatePeerData {
                            peer_name: peer_name.to_string(),
                        },
                    },
                    Box::new(move |e: ChannelError| {
                        error!(error = %e, "room.createPeer request failed, closing peer");
                        if let Some(peer) = weak_peer.upgrade() {
                            peer.close_local(Some(Arc::new(Error::Channel(e))));
                        }
                    }),
                )
                .err();
            (peer, rejected)
        };

        let room = self.me.clone();
        let peer_id = peer.id().clone();
        let name = peer_name.to_string();
        peer.on_close(move |_| {
            if let Some(room) = room.upgrade() {
                room.remove_peer(&name, &peer_id);
            }
        })
        .detach();

        let room = self.me.clone();
        peer.on_new_producer(move |producer| {
            if let Some(room) = room.upgrade() {
                room.index_producer(producer);
            }
        })
        .detach();

        info!(
            room_id = %self.id,
            peer_name,
            peer_id = %peer.id(),
            "Created peer"
        );

        self.handlers.new_peer.emit(&peer);

        if let Some((e, on_error)) = rejected {
            on_error(e);
        }

        Ok(peer)
    }

    #[must_use]
    pub fn get_peer(&self, peer_name: &str) -> Option<Arc<Peer>> {
        self.state.lock().peers.get(peer_name).cloned()
    }

    #[must_use]
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.state.lock().peers.values().cloned().collect()
    }

    #[must_use]
    pub fn get_producer(&self, id: &ProducerId) -> Option<Arc<Producer>> {
        self.state.lock().producers.get(id).cloned()
    }

    #[must_use]
    pub fn producers(&self) -> Vec<Arc<Producer>> {
        self.state.lock().producers.values().cloned().collect()
    }

    pub fn on_new_peer<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Arc<Peer>) + Send + Sync + 'static,
    {
        self.handlers.new_peer.subscribe(handler)
    }

    pub fn on_new_producer<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Arc<Producer>) + Send + Sync + 'static,
    {
        self.handlers.new_producer.subscribe(handler)
    }

    pub fn on_close<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers.close.subscribe(move |()| handler())
    }

    /// Listen to audio levels, sorted loudest first
    ///
    /// The first listener enables the event on the engine, dropping the last
    /// one disables it again.
    pub fn on_audio_levels<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&[AudioLevel]) + Send + Sync + 'static,
    {
        let inner = self
            .handlers
            .audio_levels
            .subscribe(move |levels: &Vec<AudioLevel>| handler(levels));

        {
            let mut state = self.state.lock();
            state.audio_levels_listener_count += 1;
            if state.audio_levels_listener_count == 1 {
                self.set_audio_levels_event(true);
            }
        }

        let room = self.me.clone();
        Subscription::new(move || {
            inner.unsubscribe();
            if let Some(room) = room.upgrade() {
                room.release_audio_levels_listener();
            }
        })
    }

    #[must_use]
    pub fn audio_levels_listener_count(&self) -> usize {
        self.state.lock().audio_levels_listener_count
    }

    /// Read-only snapshot of the room as seen by the engine
    pub async fn dump(&self) -> Result<serde_json::Value> {
        if self.closed() {
            return Err(Error::InvalidState(format!("room {} is closed", self.id)));
        }

        let dump = self
            .channel
            .request(ChannelRequest::RoomDump {
                internal: self.internal(),
            })
            .await?;
        Ok(dump)
    }

    /// Close the room and tell the engine about it
    pub fn close(&self) {
        {
            let _state = self.state.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }

            let room_id = self.id.clone();
            self.channel.spawn_request(
                ChannelRequest::RoomClose {
                    internal: self.internal(),
                },
                move |e| warn!(room_id = %room_id, error = %e, "room.close request failed"),
            );
        }

        self.teardown();
    }

    /// Engine tore the room down; do not echo a close request back
    fn close_from_engine(&self) {
        {
            let _state = self.state.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
        }

        debug!(room_id = %self.id, "Room closed by engine");
        self.teardown();
    }

    fn teardown(&self) {
        self.channel.remove_notification_listener(self.id.as_str());

        let peers: Vec<_> = {
            let mut state = self.state.lock();
            state.producers.clear();
            state.peers.drain(..).map(|(_, peer)| peer).collect()
        };

        // The room.close request already covers every peer on the engine side
        for peer in peers {
            peer.close_local(None);
        }

        info!(room_id = %self.id, "Room closed");

        self.handlers.close.emit(&());
        self.handlers.clear();
    }

    fn handle_notification(&self, notification: Notification) {
        match notification {
            Notification::Close => self.close_from_engine(),
            Notification::AudioLevels(levels) => self.dispatch_audio_levels(levels),
        }
    }

    fn dispatch_audio_levels(&self, raw: Vec<(ProducerId, i16)>) {
        if self.closed() {
            return;
        }

        let mut levels: Vec<AudioLevel> = {
            let state = self.state.lock();
            raw.into_iter()
                .filter_map(|(producer_id, level)| {
                    let producer = state.producers.get(&producer_id)?;
                    let peer = producer.peer().filter(|peer| !peer.closed())?;
                    Some(AudioLevel {
                        peer,
                        producer: Arc::clone(producer),
                        level,
                    })
                })
                .collect()
        };

        levels.sort_by(|a, b| b.level.cmp(&a.level));
        self.handlers.audio_levels.emit(&levels);
    }

    fn index_producer(&self, producer: &Arc<Producer>) {
        if self.closed() || producer.closed() {
            return;
        }

        self.state
            .lock()
            .producers
            .insert(producer.id().clone(), Arc::clone(producer));

        let room = self.me.clone();
        let producer_id = producer.id().clone();
        producer
            .on_close(move || {
                if let Some(room) = room.upgrade() {
                    room.state.lock().producers.remove(&producer_id);
                }
            })
            .detach();

        debug!(room_id = %self.id, producer_id = %producer.id(), "Indexed producer");

        self.handlers.new_producer.emit(producer);
    }

    fn remove_peer(&self, name: &str, peer_id: &PeerId) {
        let mut state = self.state.lock();
        // A newer peer may have reused the name
        if state.peers.get(name).is_some_and(|peer| peer.id() == peer_id) {
            state.peers.shift_remove(name);
            debug!(room_id = %self.id, peer_name = name, "Removed peer");
        }
    }

    fn release_audio_levels_listener(&self) {
        let mut state = self.state.lock();
        if state.audio_levels_listener_count == 0 {
            return;
        }
        state.audio_levels_listener_count -= 1;
        if state.audio_levels_listener_count == 0 {
            self.set_audio_levels_event(false);
        }
    }

    /// Called with the state lock held so toggles are queued in counter order
    fn set_audio_levels_event(&self, enabled: bool) {
        if self.closed() {
            return;
        }

        debug!(room_id = %self.id, enabled, "Toggling audio levels event");

        let room_id = self.id.clone();
        self.channel.spawn_request(
            ChannelRequest::RoomSetAudioLevelsEvent {
                internal: self.internal(),
                data: AudioLevelsEventData { enabled },
            },
            move |e| {
                warn!(
                    room_id = %room_id,
                    enabled,
                    error = %e,
                    "room.setAudioLevelsEvent request failed"
                );
            },
        );
    }

    fn internal(&self) -> RoomInternal {
        RoomInternal {
            room_id: self.id.clone(),
        }
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("closed", &self.closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{default_capabilities, video_rtp_parameters, RecordingTransport};
    use std::sync::atomic::AtomicUsize;

    fn test_room(transport: &Arc<RecordingTransport>) -> Arc<Room> {
        Room::create(
            RoomId::from("test-room"),
            &default_capabilities(),
            Channel::new(transport.clone()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_peer_validation() {
        let transport = RecordingTransport::new();
        let room = test_room(&transport);

        assert!(matches!(room.create_peer(""), Err(Error::InvalidArgument(_))));

        let alice = room.create_peer("alice").unwrap();
        assert!(Arc::ptr_eq(&room.get_peer("alice").unwrap(), &alice));

        assert!(matches!(
            room.create_peer("alice"),
            Err(Error::AlreadyExists(_))
        ));
        // The original peer is untouched
        assert!(!alice.closed());
        assert_eq!(room.peers().len(), 1);
        assert!(room.get_peer("bob").is_none());

        transport.wait_for_requests(1).await;
        assert_eq!(transport.methods(), ["room.createPeer"]);
    }

    #[tokio::test]
    async fn test_failed_peer_confirmation_closes_peer() {
        let transport = RecordingTransport::new();
        transport.fail_method("room.createPeer");
        let room = test_room(&transport);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let peer = room.create_peer("alice").unwrap();
        peer.on_close(move |reason| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(reason.as_ref().map(ToString::to_string));
            }
        })
        .detach();

        // Visible before the engine answered
        assert!(room.get_peer("alice").is_some());

        let reason = rx.await.unwrap();
        assert!(reason.unwrap().contains("room.createPeer"));
        assert!(peer.closed());
        assert!(room.get_peer("alice").is_none());
        // No peer.close echoed back to the engine
        assert_eq!(transport.methods(), ["room.createPeer"]);

        // The name is free again
        assert!(room.create_peer("alice").is_ok());
    }

    #[tokio::test]
    async fn test_producer_index_follows_lifecycle() {
        let transport = RecordingTransport::new();
        let room = test_room(&transport);
        let announced = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&announced);
        room.on_new_producer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .detach();

        let alice = room.create_peer("alice").unwrap();
        let producer = alice
            .create_producer(MediaKind::Video, video_rtp_parameters())
            .unwrap();

        assert_eq!(announced.load(Ordering::SeqCst), 1);
        assert!(room.get_producer(producer.id()).is_some());

        producer.close();
        assert!(room.get_producer(producer.id()).is_none());
        assert!(room.producers().is_empty());
    }

    #[tokio::test]
    async fn test_engine_close_does_not_echo() {
        let transport = RecordingTransport::new();
        let channel = Channel::new(transport.clone());
        let room = Room::create(RoomId::from("r1"), &default_capabilities(), Arc::clone(&channel)).unwrap();
        let alice = room.create_peer("alice").unwrap();
        transport.wait_for_requests(1).await;

        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        room.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .detach();

        assert!(channel.notify("r1", Notification::Close));
        assert!(room.closed());
        assert!(alice.closed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!channel.has_notification_listener("r1"));

        room.close();
        tokio::task::yield_now().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.methods(), ["room.createPeer"]);
    }

    #[tokio::test]
    async fn test_operations_on_closed_room() {
        let transport = RecordingTransport::new();
        let room = test_room(&transport);
        room.close();

        assert!(matches!(room.create_peer("alice"), Err(Error::InvalidState(_))));
        assert!(matches!(room.dump().await, Err(Error::InvalidState(_))));
        // Capabilities stay readable
        assert!(!room.capabilities(MediaKind::Audio).codecs.is_empty());
    }

    #[tokio::test]
    async fn test_dump_returns_engine_snapshot() {
        let transport = RecordingTransport::new();
        let room = test_room(&transport);

        let dump = room.dump().await.unwrap();
        assert_eq!(dump["method"], "room.dump");

        transport.fail_method("room.dump");
        assert!(matches!(room.dump().await, Err(Error::Channel(_))));
    }

    #[test]
    fn test_get_capabilities_by_name() {
        let room = test_room(&RecordingTransport::new());

        let video = room.get_capabilities("video").unwrap();
        assert!(video.codecs.iter().any(|c| c.mime_type == "video/VP8"));

        let err = room.get_capabilities("sound").unwrap_err();
        assert!(matches!(err, Error::UnsupportedKind(_)));
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_audio_levels_resolution_and_order() {
        let transport = RecordingTransport::new();
        let channel = Channel::new(transport.clone());
        let room = Room::create(RoomId::from("r1"), &default_capabilities(), Arc::clone(&channel)).unwrap();

        let alice = room.create_peer("alice").unwrap();
        let bob = room.create_peer("bob").unwrap();
        let p1 = alice
            .create_producer(MediaKind::Audio, Default::default())
            .unwrap();
        let p2 = bob
            .create_producer(MediaKind::Audio, Default::default())
            .unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let _sub = room.on_audio_levels(move |levels| {
            *sink.lock() = levels
                .iter()
                .map(|l| (l.peer.name().to_string(), l.producer.id().clone(), l.level))
                .collect();
        });

        channel.notify(
            "r1",
            Notification::AudioLevels(vec![
                (p1.id().clone(), 10),
                (ProducerId::from("unknown"), 50),
                (p2.id().clone(), 90),
            ]),
        );

        assert_eq!(
            *received.lock(),
            vec![
                ("bob".to_string(), p2.id().clone(), 90),
                ("alice".to_string(), p1.id().clone(), 10),
            ]
        );

        // Producers of a departed peer are dropped
        bob.close();
        channel.notify(
            "r1",
            Notification::AudioLevels(vec![(p2.id().clone(), 90), (p1.id().clone(), 10)]),
        );
        assert_eq!(received.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_audio_levels_reference_counting() {
        let transport = RecordingTransport::new();
        let room = test_room(&transport);

        let first = room.on_audio_levels(|_| {});
        let second = room.on_audio_levels(|_| {});
        assert_eq!(room.audio_levels_listener_count(), 2);

        transport.wait_for_requests(1).await;
        assert_eq!(transport.audio_levels_toggles(), [true]);

        first.unsubscribe();
        tokio::task::yield_now().await;
        assert_eq!(transport.audio_levels_toggles(), [true]);

        drop(second);
        transport.wait_for_requests(2).await;
        assert_eq!(transport.audio_levels_toggles(), [true, false]);
        assert_eq!(room.audio_levels_listener_count(), 0);

        // A fresh listener enables again
        let _third = room.on_audio_levels(|_| {});
        transport.wait_for_requests(3).await;
        assert_eq!(transport.audio_levels_toggles(), [true, false, true]);
    }

    #[tokio::test]
    async fn test_room_close_twice() {
        let transport = RecordingTransport::new();
        let room = test_room(&transport);
        let alice = room.create_peer("alice").unwrap();
        transport.wait_for_requests(1).await;

        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        room.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .detach();

        room.close();
        room.close();

        transport.wait_for_requests(2).await;
        tokio::task::yield_now().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.methods(), ["room.createPeer", "room.close"]);
        assert!(alice.closed());
        assert!(room.peers().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_room_id_is_rejected() {
        let transport = RecordingTransport::new();
        let channel = Channel::new(transport.clone());
        let room = Room::create(RoomId::from("r1"), &default_capabilities(), Arc::clone(&channel)).unwrap();

        let duplicate = Room::create(RoomId::from("r1"), &default_capabilities(), Arc::clone(&channel));
        assert!(matches!(duplicate, Err(Error::AlreadyExists(_))));

        // The first room keeps its notifications
        assert!(channel.notify("r1", Notification::Close));
        assert!(room.closed());
        assert!(!channel.has_notification_listener("r1"));

        // The id is free once the first room is gone
        let reopened = Room::create(RoomId::from("r1"), &default_capabilities(), Arc::clone(&channel)).unwrap();
        assert!(channel.has_notification_listener("r1"));
        assert!(!reopened.closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_audio_levels_toggles_follow_subscription_order() {
        let transport = RecordingTransport::new();
        let room = test_room(&transport);

        let mut expected = Vec::new();
        let mut keep = None;
        for _ in 0..300 {
            drop(keep.take());
            let first = room.on_audio_levels(|_| {});
            drop(first);
            keep = Some(room.on_audio_levels(|_| {}));
            expected.extend([true, false, true, false]);
        }
        // The last subscription is still alive
        expected.pop();

        transport.wait_for_requests(expected.len()).await;
        assert_eq!(transport.audio_levels_toggles(), expected);
        assert_eq!(room.audio_levels_listener_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_create_peer_racing_close() {
        for round in 0..50 {
            let transport = RecordingTransport::new();
            let room = test_room(&transport);

            let creator = {
                let room = Arc::clone(&room);
                tokio::task::spawn_blocking(move || {
                    (0..20)
                        .filter_map(|i| room.create_peer(&format!("peer-{round}-{i}")).ok())
                        .collect::<Vec<_>>()
                })
            };
            room.close();
            let created = creator.await.unwrap();

            // Every peer that made it in was torn down with the room
            assert!(room.peers().is_empty());
            assert!(created.iter().all(|peer| peer.closed()));

            transport.wait_for_requests(created.len() + 1).await;
            let methods = transport.methods();
            assert_eq!(methods.last(), Some(&"room.close"));
            assert_eq!(methods.len(), created.len() + 1);
        }
    }

    #[tokio::test]
    async fn test_create_peer_after_engine_close() {
        let transport = RecordingTransport::new();
        let channel = Channel::new(transport.clone());
        let room = Room::create(RoomId::from("r1"), &default_capabilities(), Arc::clone(&channel)).unwrap();

        channel.notify("r1", Notification::Close);
        assert!(matches!(room.create_peer("alice"), Err(Error::InvalidState(_))));
        assert!(room.peers().is_empty());

        tokio::task::yield_now().await;
        assert!(transport.requests().is_empty());
    }
}
