// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The [`Dissector`] trait: the interface every L7 protocol implementation
//! plugs into the classification engine through (spec §4.5, §6, §9
//! "Polymorphism").

use std::fmt::Debug;

use flow_info::FlowInfoItem;
use net::PacketInfo;

/// A single extracted field surfaced to callers after a match (spec §6
/// `get_extracted_fields`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedField {
    /// Field name, as declared by the dissector.
    pub name: &'static str,
    /// Field value, always surfaced as text; dissectors own their own
    /// internal typed representation.
    pub value: String,
}

/// Outcome of one [`Dissector::dissect`] call (spec §4.5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DissectOutcome {
    /// The payload matches this protocol; classification may commit.
    Matches,
    /// The payload conclusively does not match; the candidate should be
    /// dropped from the flow's candidate set.
    NoMatches,
    /// Not enough data yet to decide either way.
    NeedMoreData,
}

/// Everything about a flow a dissector may want besides the payload
/// itself: the caller-configured accuracy hint (`set_protocol_accuracy`)
/// and the running per-direction counters the engine maintains on every
/// `FlowRecord`. Threaded through rather than just stored inertly, so a
/// dissector can e.g. demand more corroborating bytes at `High` accuracy
/// than at `Low`.
#[derive(Debug, Clone, Copy)]
pub struct DissectCtx {
    /// Accuracy level configured for this protocol, `Medium` if unset.
    pub accuracy: crate::config::ProtocolAccuracy,
    /// Packets seen so far in each direction (0 = first-seen direction).
    pub packets_seen: [u64; 2],
    /// Bytes seen so far in each direction.
    pub bytes_seen: [u64; 2],
}

/// One protocol implementation.
///
/// Implementations must not retain borrows past the call (spec §9: "Spec
/// forbids dissectors retaining pointers past return") — any state that
/// needs to survive across packets belongs in the `tracking` slot, which
/// the flow table owns.
pub trait Dissector: Debug + Send + Sync {
    /// The protocol's lookup name, used by `get_protocol_id`/`get_protocol_string`.
    fn name(&self) -> &'static str;

    /// Attempt to classify `payload` as this protocol.
    ///
    /// `tracking` is the flow's opaque per-protocol state slot; a
    /// dissector that needs to remember something between calls (e.g. a
    /// partially-parsed request) stores it there.
    fn dissect(
        &self,
        info: &PacketInfo<'_>,
        payload: &[u8],
        tracking: &mut Option<Box<dyn FlowInfoItem>>,
        ctx: &DissectCtx,
    ) -> DissectOutcome;

    /// Extract fields from `tracking` into the result, if field extraction
    /// is enabled for this protocol. Default: no fields.
    fn get_extracted_fields(
        &self,
        _tracking: &Option<Box<dyn FlowInfoItem>>,
    ) -> Vec<ExtractedField> {
        Vec::new()
    }

    /// Number of fields this dissector can produce, used to size output
    /// buffers ahead of a call.
    fn field_count(&self) -> usize {
        0
    }

    /// Well-known ports this protocol is commonly found on, used only to
    /// order dissector attempts (spec §4.5 step 2, §9 "Port hint") — never
    /// to commit a classification.
    fn port_hints(&self) -> &[u16] {
        &[]
    }
}
