//! SFU signaling core
//!
//! The control plane of a Selective Forwarding Unit. Media itself is moved by
//! a separate forwarding engine reached through a request/notification
//! [`Channel`]; this crate keeps the authoritative model of rooms, peers and
//! their media endpoints and turns it into SDP media sections.
//!
//! ## Architecture
//!
//! - **`Room`**: per-kind capabilities, peer registry, producer index and the
//!   `audiolevels` fan-out
//! - **`Peer`**: a participant owning its producers and consumers
//! - **`Transceiver`**: one SDP media section bound to a producer or consumer
//! - **`codecs`**: key frame detection per codec family (VP8, H264)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sfu_signaling::{bootstrap, Channel, Room, RoomId};
//!
//! let config = bootstrap::init(Some("sfu.toml"))?;
//! let channel = Channel::new(engine_transport);
//!
//! let room = Room::create(RoomId::random(), &config.room.capabilities(), channel)?;
//! let peer = room.create_peer("alice")?;
//! let _levels = room.on_audio_levels(|levels| {
//!     for level in levels {
//!         tracing::debug!(peer = level.peer.name(), level = level.level);
//!     }
//! });
//! ```

pub mod bootstrap;
pub mod capabilities;
pub mod channel;
pub mod codecs;
pub mod config;
mod consumer;
mod error;
pub mod event;
pub mod logging;
pub mod media_section;
mod peer;
mod producer;
mod room;
pub mod rtp_packet;
pub mod rtp_parameters;
pub mod test_helpers;
mod transceiver;
pub mod transport;
mod types;

pub use capabilities::CapabilitySet;
pub use channel::{Channel, ChannelError, ChannelTransport, Notification};
pub use config::SfuConfig;
pub use consumer::Consumer;
pub use error::{Error, Result};
pub use event::Subscription;
pub use media_section::{Direction, MediaObject, SdpType};
pub use peer::{CloseReason, Peer};
pub use producer::Producer;
pub use room::{AudioLevel, Room};
pub use rtp_packet::RtpPacket;
pub use rtp_parameters::{RtpCapabilities, RtpCodecMimeType, RtpParameters};
pub use transceiver::Transceiver;
pub use transport::MediaTransport;
pub use types::{ConsumerId, MediaKind, PeerId, ProducerId, RoomId};
