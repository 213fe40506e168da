//! Test helpers and fixtures for sfu-signaling tests
//!
//! Provides an in-memory engine transport that records every request, a fake
//! WebRTC transport and a few RTP parameter fixtures.

use crate::channel::{ChannelError, ChannelRequest, ChannelTransport};
use crate::config::RoomConfig;
use crate::rtp_parameters::{
    RtcpFeedback, RtcpParameters, RtpCapabilities, RtpCodecParameters, RtpEncodingParameters,
    RtpHeaderExtensionParameters, RtpParameters,
};
use crate::transport::{
    DtlsRole, IceCandidate, IceCandidateType, IceParameters, MediaTransport, Protocol,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long [`RecordingTransport::wait_for_requests`] waits before giving up
const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Engine stand-in that records requests and answers them with their own JSON
#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<ChannelRequest>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject every following request with this method
    pub fn fail_method(&self, method: &'static str) {
        self.failing.lock().insert(method);
    }

    pub fn requests(&self) -> Vec<ChannelRequest> {
        self.requests.lock().clone()
    }

    pub fn methods(&self) -> Vec<&'static str> {
        self.requests
            .lock()
            .iter()
            .map(ChannelRequest::method)
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.method() == method)
            .count()
    }

    /// `enabled` flags of every `room.setAudioLevelsEvent` seen so far
    pub fn audio_levels_toggles(&self) -> Vec<bool> {
        self.requests
            .lock()
            .iter()
            .filter_map(|request| match request {
                ChannelRequest::RoomSetAudioLevelsEvent { data, .. } => Some(data.enabled),
                _ => None,
            })
            .collect()
    }

    /// Wait until at least `count` requests were recorded
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive in time.
    pub async fn wait_for_requests(&self, count: usize) {
        let wait = async {
            while self.requests.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        if tokio::time::timeout(WAIT_TIMEOUT, wait).await.is_err() {
            panic!(
                "expected {count} requests, got {:?}",
                self.methods()
            );
        }
    }
}

#[async_trait]
impl ChannelTransport for RecordingTransport {
    async fn request(&self, request: ChannelRequest) -> Result<serde_json::Value, ChannelError> {
        let method = request.method();
        let response = serde_json::to_value(&request).unwrap_or_default();
        self.requests.lock().push(request);

        if self.failing.lock().contains(method) {
            return Err(ChannelError::Request {
                method,
                reason: "rejected by test transport".to_string(),
            });
        }
        Ok(response)
    }
}

/// WebRTC transport stand-in with one host candidate
pub struct FakeMediaTransport {
    closed: AtomicBool,
    dtls_role: Mutex<DtlsRole>,
}

impl FakeMediaTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            dtls_role: Mutex::new(DtlsRole::Auto),
        })
    }

    pub fn set_dtls_role(&self, role: DtlsRole) {
        *self.dtls_role.lock() = role;
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl MediaTransport for FakeMediaTransport {
    fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ice_local_parameters(&self) -> IceParameters {
        IceParameters {
            username_fragment: "ufrag".to_string(),
            password: "pwd".to_string(),
        }
    }

    fn ice_local_candidates(&self) -> Vec<IceCandidate> {
        vec![IceCandidate {
            foundation: "udpcandidate".to_string(),
            priority: 1_076_302_079,
            ip: IpAddr::from([127, 0, 0, 1]),
            protocol: Protocol::Udp,
            port: 40000,
            r#type: IceCandidateType::Host,
            tcp_type: None,
        }]
    }

    fn dtls_local_role(&self) -> DtlsRole {
        *self.dtls_role.lock()
    }
}

/// Flat capabilities a room is usually created with
pub fn default_capabilities() -> RtpCapabilities {
    RoomConfig::default().capabilities()
}

/// Negotiated single-stream VP8 parameters
pub fn video_rtp_parameters() -> RtpParameters {
    RtpParameters {
        codecs: vec![RtpCodecParameters {
            mime_type: "video/VP8".to_string(),
            payload_type: 100,
            clock_rate: 90000,
            channels: None,
            parameters: Default::default(),
            rtcp_feedback: vec![
                RtcpFeedback::new("nack"),
                RtcpFeedback::new("nack").with_parameter("pli"),
            ],
        }],
        header_extensions: vec![RtpHeaderExtensionParameters {
            uri: "urn:3gpp:video-orientation".to_string(),
            id: 4,
        }],
        encodings: vec![RtpEncodingParameters {
            ssrc: 1111,
            rtx: None,
        }],
        rtcp: RtcpParameters {
            cname: Some("cname-1".to_string()),
            ..RtcpParameters::default()
        },
        user_parameters: serde_json::Map::new(),
    }
}
