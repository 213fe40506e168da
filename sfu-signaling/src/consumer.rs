//! Inbound, forwarded media sink of a peer

use crate::event::{Emitter, Subscription};
use crate::rtp_parameters::RtpParameters;
use crate::types::{ConsumerId, MediaKind, ProducerId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct Consumer {
    id: ConsumerId,
    kind: MediaKind,
    producer_id: ProducerId,
    rtp_parameters: RtpParameters,
    closed: AtomicBool,
    paused: AtomicBool,
    close_handlers: Emitter<()>,
    /// Close handler registered on the source producer
    source: Mutex<Option<Subscription>>,
}

impl Consumer {
    pub(crate) fn new(
        kind: MediaKind,
        producer_id: ProducerId,
        rtp_parameters: RtpParameters,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ConsumerId::random(),
            kind,
            producer_id,
            rtp_parameters,
            closed: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            close_handlers: Emitter::new(),
            source: Mutex::new(None),
        })
    }

    #[must_use]
    pub const fn id(&self) -> &ConsumerId {
        &self.id
    }

    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub const fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    /// Parameters negotiated with the receiving endpoint
    #[must_use]
    pub const fn rtp_parameters(&self) -> &RtpParameters {
        &self.rtp_parameters
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether media is currently forwarded to the endpoint
    #[must_use]
    pub fn active(&self) -> bool {
        !self.closed() && !self.paused.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            debug!(consumer_id = %self.id, "Consumer paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            debug!(consumer_id = %self.id, "Consumer resumed");
        }
    }

    pub fn on_close<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.close_handlers.subscribe(move |()| handler())
    }

    /// Keep the producer-side close handler until this consumer closes
    pub(crate) fn follow_source(&self, subscription: Subscription) {
        let mut source = self.source.lock();
        if !self.closed() {
            *source = Some(subscription);
        }
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(consumer_id = %self.id, producer_id = %self.producer_id, "Consumer closed");

        let source = self.source.lock().take();
        drop(source);

        self.close_handlers.emit(&());
        self.close_handlers.clear();
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("producer_id", &self.producer_id)
            .field("closed", &self.closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_resume_and_close() {
        let consumer = Consumer::new(
            MediaKind::Video,
            ProducerId::from("p1"),
            RtpParameters::default(),
        );
        assert!(consumer.active());

        consumer.pause();
        assert!(!consumer.active());
        consumer.resume();
        assert!(consumer.active());

        consumer.close();
        consumer.close();
        assert!(consumer.closed());
        // Resuming a closed consumer does not revive it
        consumer.resume();
        assert!(!consumer.active());
    }
}
