//! Outbound media source of a peer

use crate::event::{Emitter, Subscription};
use crate::peer::Peer;
use crate::rtp_parameters::RtpParameters;
use crate::types::{MediaKind, ProducerId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

pub struct Producer {
    id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    /// Owning peer; the peer keeps the producer alive, not the other way round
    peer: Weak<Peer>,
    closed: AtomicBool,
    close_handlers: Emitter<()>,
}

impl Producer {
    pub(crate) fn new(kind: MediaKind, rtp_parameters: RtpParameters, peer: Weak<Peer>) -> Arc<Self> {
        Arc::new(Self {
            id: ProducerId::random(),
            kind,
            rtp_parameters,
            peer,
            closed: AtomicBool::new(false),
            close_handlers: Emitter::new(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> &ProducerId {
        &self.id
    }

    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub const fn rtp_parameters(&self) -> &RtpParameters {
        &self.rtp_parameters
    }

    /// Owning peer, if it is still alive
    #[must_use]
    pub fn peer(&self) -> Option<Arc<Peer>> {
        self.peer.upgrade()
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn on_close<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.close_handlers.subscribe(move |()| handler())
    }

    #[cfg(test)]
    pub(crate) fn close_listener_count(&self) -> usize {
        self.close_handlers.len()
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(producer_id = %self.id, kind = %self.kind, "Producer closed");

        self.close_handlers.emit(&());
        self.close_handlers.clear();
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("closed", &self.closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_close_is_idempotent() {
        let producer = Producer::new(MediaKind::Audio, RtpParameters::default(), Weak::new());
        let closes = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&closes);
        producer
            .on_close(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .detach();

        producer.close();
        producer.close();
        assert!(producer.closed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(producer.peer().is_none());
    }
}
