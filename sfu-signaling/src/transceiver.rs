//! SDP media section of a peer connection
//!
//! A transceiver is bound to at most one endpoint: a producer (media received
//! from the remote side) or a consumer (media sent to it). Its direction is
//! never stored; it is derived from the binding and the endpoint's liveness
//! every time it is read.

use crate::consumer::Consumer;
use crate::error::{Error, Result};
use crate::event::{Emitter, Subscription};
use crate::media_section::{
    CandidateLine, Connection, Direction, DtlsSetup, ExtMap, Fmtp, MediaObject, RtcpFbLine,
    RtpMap, SdpType, SsrcGroup, SsrcLine, ICE_COMPONENT_RTP, MEDIA_PROTOCOL, PLACEHOLDER_PORT,
    UNAVAILABLE_PAYLOADS,
};
use crate::producer::Producer;
use crate::rtp_parameters::{CodecParameters, RtcpFeedback, RtpCapabilities};
use crate::transport::{DtlsRole, MediaTransport};
use crate::types::MediaKind;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Endpoint a transceiver is bound to
///
/// The subscription keeps the transceiver listening to the endpoint's close
/// and is dropped together with the binding.
#[derive(Default)]
enum Binding {
    #[default]
    None,
    Producer {
        producer: Weak<Producer>,
        _on_close: Subscription,
    },
    Consumer {
        consumer: Weak<Consumer>,
        _on_close: Subscription,
    },
}

pub struct Transceiver {
    mid: String,
    kind: MediaKind,
    capabilities: Arc<RtpCapabilities>,
    transport: Arc<dyn MediaTransport>,
    closed: AtomicBool,
    binding: Mutex<Binding>,
    close_handlers: Emitter<()>,
    me: Weak<Transceiver>,
}

impl Transceiver {
    pub fn new(
        mid: impl Into<String>,
        kind: MediaKind,
        capabilities: Arc<RtpCapabilities>,
        transport: Arc<dyn MediaTransport>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            mid: mid.into(),
            kind,
            capabilities,
            transport,
            closed: AtomicBool::new(false),
            binding: Mutex::new(Binding::None),
            close_handlers: Emitter::new(),
            me: me.clone(),
        })
    }

    #[must_use]
    pub fn mid(&self) -> &str {
        &self.mid
    }

    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn producer(&self) -> Option<Arc<Producer>> {
        match &*self.binding.lock() {
            Binding::Producer { producer, .. } => producer.upgrade(),
            _ => None,
        }
    }

    #[must_use]
    pub fn consumer(&self) -> Option<Arc<Consumer>> {
        match &*self.binding.lock() {
            Binding::Consumer { consumer, .. } => consumer.upgrade(),
            _ => None,
        }
    }

    /// Bind media received from the remote endpoint
    pub fn set_producer(&self, producer: &Arc<Producer>) -> Result<()> {
        self.check_bindable(producer.kind(), producer.closed())?;

        let transceiver = self.me.clone();
        let on_close = producer.on_close(move || {
            if let Some(transceiver) = transceiver.upgrade() {
                transceiver.close();
            }
        });

        let previous = {
            let mut binding = self.binding.lock();
            if matches!(*binding, Binding::Consumer { .. }) {
                return Err(Error::ContractViolation(format!(
                    "transceiver {} already has a consumer",
                    self.mid
                )));
            }
            std::mem::replace(
                &mut *binding,
                Binding::Producer {
                    producer: Arc::downgrade(producer),
                    _on_close: on_close,
                },
            )
        };
        drop(previous);

        debug!(mid = %self.mid, producer_id = %producer.id(), "Bound producer");
        Ok(())
    }

    /// Bind media forwarded to the remote endpoint
    pub fn set_consumer(&self, consumer: &Arc<Consumer>) -> Result<()> {
        self.check_bindable(consumer.kind(), consumer.closed())?;

        let transceiver = self.me.clone();
        let on_close = consumer.on_close(move || {
            if let Some(transceiver) = transceiver.upgrade() {
                transceiver.close();
            }
        });

        let previous = {
            let mut binding = self.binding.lock();
            if matches!(*binding, Binding::Producer { .. }) {
                return Err(Error::ContractViolation(format!(
                    "transceiver {} already has a producer",
                    self.mid
                )));
            }
            std::mem::replace(
                &mut *binding,
                Binding::Consumer {
                    consumer: Arc::downgrade(consumer),
                    _on_close: on_close,
                },
            )
        };
        drop(previous);

        debug!(mid = %self.mid, consumer_id = %consumer.id(), "Bound consumer");
        Ok(())
    }

    fn check_bindable(&self, kind: MediaKind, endpoint_closed: bool) -> Result<()> {
        if self.closed() {
            return Err(Error::InvalidState(format!(
                "transceiver {} is closed",
                self.mid
            )));
        }
        if endpoint_closed {
            return Err(Error::InvalidState(format!(
                "cannot bind a closed endpoint to transceiver {}",
                self.mid
            )));
        }
        if kind != self.kind {
            return Err(Error::InvalidArgument(format!(
                "transceiver {} carries {} but endpoint is {kind}",
                self.mid, self.kind
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        if self.closed() {
            return Direction::Inactive;
        }

        match &*self.binding.lock() {
            Binding::None => Direction::Inactive,
            Binding::Producer { producer, .. } => match producer.upgrade() {
                Some(producer) if !producer.closed() => Direction::Recvonly,
                _ => Direction::Inactive,
            },
            Binding::Consumer { consumer, .. } => match consumer.upgrade() {
                Some(consumer) if consumer.active() => Direction::Sendonly,
                _ => Direction::Inactive,
            },
        }
    }

    pub fn on_close<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.close_handlers.subscribe(move |()| handler())
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let binding = std::mem::take(&mut *self.binding.lock());
        drop(binding);

        debug!(mid = %self.mid, kind = %self.kind, "Transceiver closed");

        self.close_handlers.emit(&());
        self.close_handlers.clear();
    }

    /// Build the media section for an offer or an answer
    #[must_use]
    pub fn to_media_object(&self, sdp_type: SdpType) -> MediaObject {
        let consumer = self.consumer();
        let mut media = MediaObject {
            r#type: self.kind.to_string(),
            port: PLACEHOLDER_PORT,
            protocol: MEDIA_PROTOCOL.to_string(),
            payloads: String::new(),
            connection: Connection::default(),
            mid: self.mid.clone(),
            ice_ufrag: None,
            ice_pwd: None,
            candidates: Vec::new(),
            setup: Some(dtls_setup(sdp_type, self.transport.dtls_local_role())),
            direction: self.direction(),
            rtp: Vec::new(),
            fmtp: Vec::new(),
            rtcp_fb: Vec::new(),
            ext: Vec::new(),
            rtcp_mux: false,
            rtcp_rsize: false,
            ssrcs: Vec::new(),
            ssrc_groups: Vec::new(),
            msid: None,
        };

        if !self.transport.closed() {
            let ice = self.transport.ice_local_parameters();
            media.ice_ufrag = Some(ice.username_fragment);
            media.ice_pwd = Some(ice.password);
            media.candidates = self
                .transport
                .ice_local_candidates()
                .into_iter()
                .map(|candidate| CandidateLine {
                    component: ICE_COMPONENT_RTP,
                    foundation: candidate.foundation,
                    ip: candidate.ip,
                    port: candidate.port,
                    priority: candidate.priority,
                    transport: candidate.protocol,
                    r#type: candidate.r#type,
                    tcptype: candidate.tcp_type,
                })
                .collect();
        }

        let mut payloads = Vec::new();
        match &consumer {
            Some(consumer) => {
                let parameters = consumer.rtp_parameters();
                for codec in &parameters.codecs {
                    push_codec(
                        &mut media,
                        &mut payloads,
                        CodecLine {
                            payload: codec.payload_type,
                            name: codec.codec_name(),
                            rate: codec.clock_rate,
                            channels: codec.channels,
                            parameters: &codec.parameters,
                            feedback: &codec.rtcp_feedback,
                        },
                    );
                }
                media.ext = parameters
                    .header_extensions
                    .iter()
                    .map(|ext| ExtMap {
                        value: ext.id,
                        uri: ext.uri.clone(),
                    })
                    .collect();
            }
            None => {
                for codec in self.capabilities.codecs_for(self.kind) {
                    push_codec(
                        &mut media,
                        &mut payloads,
                        CodecLine {
                            payload: codec.preferred_payload_type,
                            name: codec.codec_name(),
                            rate: codec.clock_rate,
                            channels: codec.num_channels,
                            parameters: &codec.parameters,
                            feedback: &codec.rtcp_feedback,
                        },
                    );
                }
                media.ext = self
                    .capabilities
                    .header_extensions_for(self.kind)
                    .map(|ext| ExtMap {
                        value: ext.preferred_id,
                        uri: ext.uri.clone(),
                    })
                    .collect();
            }
        }

        if let Some(consumer) = consumer.filter(|consumer| !consumer.closed()) {
            let parameters = consumer.rtp_parameters();
            // Without a CNAME there is nothing meaningful to announce per SSRC
            if let Some(cname) = parameters.rtcp.cname.as_deref() {
                for encoding in &parameters.encodings {
                    media.ssrcs.push(SsrcLine {
                        id: encoding.ssrc,
                        attribute: "cname".to_string(),
                        value: cname.to_string(),
                    });

                    if let Some(rtx_ssrc) = encoding.rtx_ssrc() {
                        media.ssrcs.push(SsrcLine {
                            id: rtx_ssrc,
                            attribute: "cname".to_string(),
                            value: cname.to_string(),
                        });
                        media.ssrc_groups.push(SsrcGroup {
                            semantics: "FID".to_string(),
                            ssrcs: format!("{} {rtx_ssrc}", encoding.ssrc),
                        });
                    }
                }
            }
            media.msid = parameters.msid().map(str::to_string);
        }

        if payloads.is_empty() {
            media.port = 0;
            media.payloads = UNAVAILABLE_PAYLOADS.to_string();
            media.direction = Direction::Inactive;
        } else {
            media.payloads = payloads.join(" ");
            media.rtcp_mux = true;
            media.rtcp_rsize = true;
        }

        media
    }
}

impl std::fmt::Debug for Transceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transceiver")
            .field("mid", &self.mid)
            .field("kind", &self.kind)
            .field("closed", &self.closed())
            .finish_non_exhaustive()
    }
}

const fn dtls_setup(sdp_type: SdpType, role: DtlsRole) -> DtlsSetup {
    match (sdp_type, role) {
        (SdpType::Offer, _) => DtlsSetup::Actpass,
        (SdpType::Answer, DtlsRole::Server) => DtlsSetup::Passive,
        (SdpType::Answer, DtlsRole::Client | DtlsRole::Auto) => DtlsSetup::Active,
    }
}

/// Codec fields shared by capabilities and negotiated parameters
struct CodecLine<'a> {
    payload: u8,
    name: &'a str,
    rate: u32,
    channels: Option<u8>,
    parameters: &'a CodecParameters,
    feedback: &'a [RtcpFeedback],
}

fn push_codec(media: &mut MediaObject, payloads: &mut Vec<String>, codec: CodecLine<'_>) {
    payloads.push(codec.payload.to_string());

    media.rtp.push(RtpMap {
        payload: codec.payload,
        codec: codec.name.to_string(),
        rate: codec.rate,
        encoding: codec.channels.filter(|channels| *channels > 1),
    });

    if !codec.parameters.is_empty() {
        let config = codec
            .parameters
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(";");
        media.fmtp.push(Fmtp {
            payload: codec.payload,
            config,
        });
    }

    media
        .rtcp_fb
        .extend(codec.feedback.iter().map(|fb| RtcpFbLine {
            payload: codec.payload,
            r#type: fb.r#type.clone(),
            subtype: fb.parameter.clone().filter(|p| !p.is_empty()),
        }));
}
