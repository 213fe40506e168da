//! Room participant
//!
//! This module handles:
//! - Peer lifecycle (engine-signaled and local close)
//! - Ownership of the peer's producers and consumers
//! - `newproducer` and `close` notifications consumed by the room

use crate::channel::{Channel, ChannelRequest, PeerInternal};
use crate::consumer::Consumer;
use crate::error::{Error, Result};
use crate::event::{Emitter, Subscription};
use crate::producer::Producer;
use crate::rtp_parameters::RtpParameters;
use crate::types::{ConsumerId, MediaKind, PeerId, ProducerId, RoomId};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Why a peer closed; `None` for a regular close
pub type CloseReason = Option<Arc<Error>>;

#[derive(Default)]
struct PeerHandlers {
    new_producer: Emitter<Arc<Producer>>,
    close: Emitter<CloseReason>,
}

pub struct Peer {
    id: PeerId,
    name: String,
    room_id: RoomId,
    channel: Arc<Channel>,
    closed: AtomicBool,
    producers: Mutex<IndexMap<ProducerId, Arc<Producer>>>,
    consumers: Mutex<IndexMap<ConsumerId, Arc<Consumer>>>,
    handlers: PeerHandlers,
    me: Weak<Peer>,
}

impl Peer {
    pub(crate) fn new(id: PeerId, name: String, room_id: RoomId, channel: Arc<Channel>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            name,
            room_id,
            channel,
            closed: AtomicBool::new(false),
            producers: Mutex::new(IndexMap::new()),
            consumers: Mutex::new(IndexMap::new()),
            handlers: PeerHandlers::default(),
            me: me.clone(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> &PeerId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn producers(&self) -> Vec<Arc<Producer>> {
        self.producers.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn consumers(&self) -> Vec<Arc<Consumer>> {
        self.consumers.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn get_producer(&self, id: &ProducerId) -> Option<Arc<Producer>> {
        self.producers.lock().get(id).cloned()
    }

    /// Register media sent by this peer
    pub fn create_producer(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<Producer>> {
        if self.closed() {
            return Err(Error::InvalidState(format!("peer {} is closed", self.name)));
        }

        let producer = Producer::new(kind, rtp_parameters, self.me.clone());
        self.producers
            .lock()
            .insert(producer.id().clone(), Arc::clone(&producer));

        let peer = self.me.clone();
        let producer_id = producer.id().clone();
        producer
            .on_close(move || {
                if let Some(peer) = peer.upgrade() {
                    peer.producers.lock().shift_remove(&producer_id);
                }
            })
            .detach();

        info!(
            room_id = %self.room_id,
            peer_name = %self.name,
            producer_id = %producer.id(),
            kind = %kind,
            "Created producer"
        );

        self.handlers.new_producer.emit(&producer);

        Ok(producer)
    }

    /// Register media forwarded from `producer` to this peer
    pub fn create_consumer(
        &self,
        producer: &Producer,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<Consumer>> {
        if self.closed() {
            return Err(Error::InvalidState(format!("peer {} is closed", self.name)));
        }
        if producer.closed() {
            return Err(Error::InvalidState(format!(
                "producer {} is closed",
                producer.id()
            )));
        }

        let consumer = Consumer::new(producer.kind(), producer.id().clone(), rtp_parameters);
        self.consumers
            .lock()
            .insert(consumer.id().clone(), Arc::clone(&consumer));

        let peer = self.me.clone();
        let consumer_id = consumer.id().clone();
        consumer
            .on_close(move || {
                if let Some(peer) = peer.upgrade() {
                    peer.consumers.lock().shift_remove(&consumer_id);
                }
            })
            .detach();

        // The consumer cannot outlive its source
        let weak_consumer = Arc::downgrade(&consumer);
        consumer.follow_source(producer.on_close(move || {
            if let Some(consumer) = weak_consumer.upgrade() {
                consumer.close();
            }
        }));

        debug!(
            peer_name = %self.name,
            consumer_id = %consumer.id(),
            producer_id = %producer.id(),
            "Created consumer"
        );

        Ok(consumer)
    }

    pub fn on_new_producer<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Arc<Producer>) + Send + Sync + 'static,
    {
        self.handlers.new_producer.subscribe(handler)
    }

    pub fn on_close<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CloseReason) + Send + Sync + 'static,
    {
        self.handlers.close.subscribe(handler)
    }

    /// Close the peer and tell the engine about it
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let name = self.name.clone();
        self.channel.spawn_request(
            ChannelRequest::PeerClose {
                internal: self.internal(),
            },
            move |e| warn!(peer_name = %name, error = %e, "peer.close request failed"),
        );

        self.teardown(None);
    }

    /// Close without signaling the engine, either because the engine already
    /// knows (room teardown) or because it never accepted the peer
    pub(crate) fn close_local(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.teardown(reason);
    }

    fn teardown(&self, reason: CloseReason) {
        match &reason {
            Some(error) => warn!(
                room_id = %self.room_id,
                peer_name = %self.name,
                error = %error,
                "Peer closed on error"
            ),
            None => info!(room_id = %self.room_id, peer_name = %self.name, "Peer closed"),
        }

        // Take everything out first so close handlers never see our locks held
        let consumers: Vec<_> = self.consumers.lock().drain(..).map(|(_, c)| c).collect();
        let producers: Vec<_> = self.producers.lock().drain(..).map(|(_, p)| p).collect();

        for consumer in consumers {
            consumer.close();
        }
        for producer in producers {
            producer.close();
        }

        self.handlers.close.emit(&reason);
        self.handlers.close.clear();
        self.handlers.new_producer.clear();
    }

    fn internal(&self) -> PeerInternal {
        PeerInternal {
            room_id: self.room_id.clone(),
            peer_id: self.id.clone(),
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        debug!(peer_id = %self.id, peer_name = %self.name, "Peer dropped");
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.closed())
            .finish_non_exhaustive()
    }
}
