// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! [`FlowRecord`]: one entry in the flow table (spec §3).

use std::fmt::Debug;

use flow_info::FlowInfoItem;

use crate::bitset::ProtocolBitset;
use crate::flow_key::{FlowKey, ObservedTuple};
use crate::tcp_track::TcpTrackingState;

/// Numeric identifier for a known L7 protocol, assigned by the dissector
/// registry at `enable_protocol`/registration time.
pub type ProtocolId = u16;

/// A flow's classification outcome (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L7Protocol {
    /// No dissector has matched yet, and the candidate set is non-empty.
    NotDetermined,
    /// A dissector matched.
    Known(ProtocolId),
    /// The candidate set emptied, or the trial budget was exhausted,
    /// without a match.
    Unknown,
}

impl L7Protocol {
    /// True once classification has left [`L7Protocol::NotDetermined`].
    /// Spec invariant: once true, this never flips back.
    #[must_use]
    pub fn is_determined(&self) -> bool {
        !matches!(self, L7Protocol::NotDetermined)
    }
}

/// One entry in the flow table.
#[derive(Debug)]
pub struct FlowRecord {
    /// Normalized key this record is stored under.
    pub key: FlowKey,
    /// The tuple observed on the packet that created this flow; used to
    /// derive each subsequent packet's direction.
    pub first_seen: ObservedTuple,
    /// Current classification state.
    pub l7_protocol: L7Protocol,
    /// Bitset over known protocols still considered plausible.
    pub candidate_set: ProtocolBitset,
    /// Kept in sync with `candidate_set.popcount()` (spec §3 invariant).
    pub candidate_count: u32,
    /// Count of packets on which classification was attempted without a
    /// match, while `l7_protocol == NotDetermined`.
    pub trials: u32,
    /// Snapshot of the engine's TCP-reordering mode, taken at flow
    /// creation (spec §4.4: selectable per engine, effective at creation).
    pub tcp_reordering_enabled: bool,
    /// Per-protocol opaque tracking state (TCP control blocks, HTTP
    /// parser state, etc.), owned by dissectors.
    pub tracking: Option<Box<dyn FlowInfoItem>>,
    /// The most recent reordered contiguous TCP byte run, if any. Freed on
    /// the next rebuild or on flow deletion.
    pub last_rebuilt_tcp_data: Option<Vec<u8>>,
    /// Opaque pointer set by callbacks (spec §6 `callbacks_fields_set_udata`).
    pub user_data: Option<Box<dyn FlowInfoItem>>,
    /// TCP connection-tracking state machine; `None` for non-TCP flows.
    pub tcp_state: Option<TcpTrackingState>,
    /// Packets observed in each direction (ambient bookkeeping, not in the
    /// source's essential attribute list but cheap and broadly useful).
    pub packets_seen: [u64; 2],
    /// Bytes observed in each direction.
    pub bytes_seen: [u64; 2],
}

impl FlowRecord {
    /// Create a new, unclassified flow record.
    #[must_use]
    pub fn new(
        key: FlowKey,
        first_seen: ObservedTuple,
        initial_candidates: ProtocolBitset,
        tcp_reordering_enabled: bool,
    ) -> Self {
        let candidate_count = initial_candidates.popcount();
        let tcp_state = if first_seen.l4_proto == crate::TCP_PROTO_NUMBER {
            Some(TcpTrackingState::new())
        } else {
            None
        };
        FlowRecord {
            key,
            first_seen,
            l7_protocol: L7Protocol::NotDetermined,
            candidate_set: initial_candidates,
            candidate_count,
            trials: 0,
            tcp_reordering_enabled,
            tracking: None,
            last_rebuilt_tcp_data: None,
            user_data: None,
            tcp_state,
            packets_seen: [0, 0],
            bytes_seen: [0, 0],
        }
    }

    /// Clear bit `id` from the candidate set, keeping `candidate_count` in
    /// sync (spec §3 invariant `candidate_count == popcount(candidate_set)`).
    pub fn reject_candidate(&mut self, id: ProtocolId) {
        if self.candidate_set.test(id as usize) {
            self.candidate_set.clear(id as usize);
            self.candidate_count = self.candidate_set.popcount();
        }
    }

    /// Commit a match. Spec invariant: once left `NotDetermined`, never
    /// changes again — enforced here by only transitioning from
    /// `NotDetermined`.
    pub fn commit_protocol(&mut self, id: ProtocolId) {
        if matches!(self.l7_protocol, L7Protocol::NotDetermined) {
            self.l7_protocol = L7Protocol::Known(id);
        }
    }

    /// Mark the flow `Unknown` (candidate set exhausted or trial budget
    /// hit). Only takes effect while still `NotDetermined`.
    pub fn mark_unknown(&mut self) {
        if matches!(self.l7_protocol, L7Protocol::NotDetermined) {
            self.l7_protocol = L7Protocol::Unknown;
        }
    }

    /// Record the most recent TCP-reordering rebuild, replacing (and thus
    /// freeing) any previous one.
    pub fn set_rebuilt_tcp_data(&mut self, data: Vec<u8>) {
        self.last_rebuilt_tcp_data = Some(data);
    }

    /// Direction index (0 or 1) for a packet relative to `first_seen`,
    /// used to index `packets_seen`/`bytes_seen`.
    #[must_use]
    pub fn direction_index(&self, observed: &ObservedTuple) -> usize {
        match observed.direction_relative_to(&self.first_seen) {
            crate::flow_key::Direction::Forward => 0,
            crate::flow_key::Direction::Reverse => 1,
        }
    }

    /// Record a packet in the given direction.
    pub fn record_packet(&mut self, direction_index: usize, bytes: u64) {
        self.packets_seen[direction_index] += 1;
        self.bytes_seen[direction_index] += bytes;
    }
}
