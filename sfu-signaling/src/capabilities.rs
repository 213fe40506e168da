//! Per-kind capability aggregation
//!
//! A room is configured with one flat capability list where every entry is
//! tagged with a media kind or with the wildcard. Aggregation partitions that
//! list into one capability list per kind:
//!
//! - explicit entries go to their own kind only
//! - wildcard entries are deep-cloned and re-tagged for every kind
//! - entries with an unknown kind are dropped
//! - a kind without codecs gets no header extensions or FEC mechanisms either
//!
//! Input order is kept, since codec order expresses payload type preference.

use crate::rtp_parameters::{CapabilityKind, RtpCapabilities};
use crate::types::MediaKind;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Capabilities of a room, one immutable list per media kind
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    kinds: BTreeMap<MediaKind, Arc<RtpCapabilities>>,
}

impl CapabilitySet {
    /// Capabilities for `kind`; empty when the kind is not negotiable
    #[must_use]
    pub fn get(&self, kind: MediaKind) -> Arc<RtpCapabilities> {
        self.kinds.get(&kind).cloned().unwrap_or_default()
    }

    /// Kinds that have at least one codec
    pub fn kinds(&self) -> impl Iterator<Item = MediaKind> + '_ {
        self.kinds
            .iter()
            .filter(|(_, caps)| !caps.codecs.is_empty())
            .map(|(kind, _)| *kind)
    }
}

/// Split a flat capability list into one list per media kind
#[must_use]
pub fn aggregate(flat: &RtpCapabilities) -> CapabilitySet {
    let kinds = MediaKind::ALL
        .into_iter()
        .map(|kind| (kind, Arc::new(aggregate_kind(flat, kind))))
        .collect::<BTreeMap<_, _>>();

    for (kind, caps) in &kinds {
        debug!(
            kind = %kind,
            codecs = caps.codecs.len(),
            header_extensions = caps.header_extensions.len(),
            "Aggregated capabilities"
        );
    }

    CapabilitySet { kinds }
}

fn aggregate_kind(flat: &RtpCapabilities, kind: MediaKind) -> RtpCapabilities {
    let codecs: Vec<_> = flat
        .codecs_for(kind)
        .map(|codec| {
            let mut codec = codec.clone();
            codec.kind = CapabilityKind::Media(kind);
            codec
        })
        .collect();

    if codecs.is_empty() {
        return RtpCapabilities::default();
    }

    let header_extensions = flat
        .header_extensions_for(kind)
        .map(|ext| {
            let mut ext = ext.clone();
            ext.kind = CapabilityKind::Media(kind);
            ext
        })
        .collect();

    RtpCapabilities {
        codecs,
        header_extensions,
        fec_mechanisms: flat.fec_mechanisms.clone(),
    }
}
