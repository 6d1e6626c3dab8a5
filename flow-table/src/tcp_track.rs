// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! TCP stream reordering and connection-state tracking (spec §4.4).

use tracing::trace;

/// Per-direction TCP connection state machine:
/// `CLOSED -> SYN_SENT -> ESTABLISHED -> FIN_WAIT -> CLOSED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpConnState {
    /// No SYN observed yet in this direction.
    Closed,
    /// A SYN has been observed.
    SynSent,
    /// The handshake is complete for this direction.
    Established,
    /// A FIN has been observed; waiting for the final ACK/close.
    FinWait,
}

/// Outcome of feeding one TCP segment to [`TcpTrackingState::on_segment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentResult {
    /// The segment arrived in sequence; classification may proceed on its
    /// payload immediately.
    InOrder,
    /// The segment arrived ahead of the expected sequence number and has
    /// been buffered; the classifier must skip this packet.
    OutOfOrder,
    /// This segment filled a gap; `bytes` is the contiguous run (this
    /// segment concatenated with any now-contiguous buffered segments).
    /// Ownership passes to `FlowRecord::last_rebuilt_tcp_data`.
    Rebuilt {
        /// The rebuilt contiguous payload.
        bytes: Vec<u8>,
    },
    /// The out-of-order buffer for this flow is full; the segment was
    /// dropped rather than buffered.
    BufferFull,
}

const DEFAULT_MAX_BUFFERED_BYTES: usize = 1 << 20;

#[derive(Debug)]
struct DirectionState {
    conn_state: TcpConnState,
    /// Set once a SYN has actually been observed in this direction, so a
    /// direction that never started a handshake can be told apart from one
    /// that has torn back down to `Closed`.
    handshake_started: bool,
    expected_seq: Option<u32>,
    /// Out-of-order segments awaiting a gap-filling segment, sorted by
    /// sequence number.
    pending: Vec<(u32, Vec<u8>)>,
    buffered_bytes: usize,
}

impl DirectionState {
    fn new() -> Self {
        DirectionState {
            conn_state: TcpConnState::Closed,
            handshake_started: false,
            expected_seq: None,
            pending: Vec::new(),
            buffered_bytes: 0,
        }
    }

    fn advance_flags(&mut self, syn: bool, fin: bool) {
        if syn {
            self.handshake_started = true;
        }
        self.conn_state = match (self.conn_state, syn, fin) {
            (TcpConnState::Closed, true, _) => TcpConnState::SynSent,
            (TcpConnState::SynSent, _, _) => TcpConnState::Established,
            (TcpConnState::Established, _, true) => TcpConnState::FinWait,
            (TcpConnState::FinWait, _, _) => TcpConnState::Closed,
            (state, ..) => state,
        };
    }
}

/// Full per-flow TCP tracking state (both directions).
#[derive(Debug)]
pub struct TcpTrackingState {
    dirs: [DirectionState; 2],
    max_buffered_bytes: usize,
}

impl TcpTrackingState {
    /// Build tracking state with the default per-flow out-of-order buffer
    /// cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer_cap(DEFAULT_MAX_BUFFERED_BYTES)
    }

    /// Build tracking state with an explicit per-flow buffer cap.
    #[must_use]
    pub fn with_buffer_cap(max_buffered_bytes: usize) -> Self {
        TcpTrackingState {
            dirs: [DirectionState::new(), DirectionState::new()],
            max_buffered_bytes,
        }
    }

    /// True once both directions have started a handshake and subsequently
    /// reached `CLOSED` (i.e. a real teardown, not a direction that never
    /// saw a SYN).
    #[must_use]
    pub fn connection_terminated(&self) -> bool {
        self.dirs
            .iter()
            .all(|d| d.handshake_started && d.conn_state == TcpConnState::Closed)
    }

    /// Feed one segment. `direction` selects which per-direction state
    /// machine/sequence tracker this segment belongs to (0 or 1, per
    /// `FlowRecord::direction_index`).
    ///
    /// When `reordering_enabled` is false ("light tracking", spec §4.4),
    /// no buffering happens: flags still drive the state machine but every
    /// payload is reported `InOrder` immediately.
    pub fn on_segment(
        &mut self,
        direction: usize,
        seq: u32,
        syn: bool,
        fin: bool,
        rst: bool,
        payload: &[u8],
        reordering_enabled: bool,
    ) -> SegmentResult {
        let dir = &mut self.dirs[direction];
        if rst {
            dir.conn_state = TcpConnState::Closed;
            dir.expected_seq = Some(seq);
            return SegmentResult::InOrder;
        }
        dir.advance_flags(syn, fin);

        if !reordering_enabled {
            dir.expected_seq = Some(seq.wrapping_add(payload.len() as u32));
            return SegmentResult::InOrder;
        }

        let expected = *dir.expected_seq.get_or_insert(seq);

        if payload.is_empty() {
            // Pure control segment (SYN/FIN/ACK with no data): does not
            // advance the byte stream.
            return SegmentResult::InOrder;
        }

        if seq == expected {
            dir.expected_seq = Some(expected.wrapping_add(payload.len() as u32));
            let mut rebuilt = payload.to_vec();
            Self::drain_contiguous(dir, &mut rebuilt);
            if rebuilt.len() == payload.len() {
                SegmentResult::InOrder
            } else {
                SegmentResult::Rebuilt { bytes: rebuilt }
            }
        } else if seq_greater(seq, expected) {
            if dir.buffered_bytes + payload.len() > self.max_buffered_bytes {
                trace!(direction, "tcp out-of-order buffer full, dropping segment");
                return SegmentResult::BufferFull;
            }
            dir.buffered_bytes += payload.len();
            dir.pending.push((seq, payload.to_vec()));
            dir.pending.sort_unstable_by_key(|(s, _)| *s);
            SegmentResult::OutOfOrder
        } else {
            // Old/retransmitted data below the expected sequence: treat as
            // already delivered, nothing to classify again.
            SegmentResult::OutOfOrder
        }
    }

    fn drain_contiguous(dir: &mut DirectionState, acc: &mut Vec<u8>) {
        loop {
            let Some(expected) = dir.expected_seq else {
                break;
            };
            let Some(pos) = dir.pending.iter().position(|(s, _)| *s == expected) else {
                break;
            };
            let (_, bytes) = dir.pending.remove(pos);
            dir.buffered_bytes = dir.buffered_bytes.saturating_sub(bytes.len());
            dir.expected_seq = Some(expected.wrapping_add(bytes.len() as u32));
            acc.extend_from_slice(&bytes);
        }
    }
}

impl Default for TcpTrackingState {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequence-number comparison that accounts for 32-bit wraparound, per
/// RFC 793 §3.3.
fn seq_greater(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) < (1u32 << 31) && a != b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_segments_advance_expected_seq() {
        let mut tcp = TcpTrackingState::new();
        let r1 = tcp.on_segment(0, 0, true, false, false, b"", true);
        assert_eq!(r1, SegmentResult::InOrder);
        let r2 = tcp.on_segment(0, 1, false, false, false, b"hello", true);
        assert_eq!(r2, SegmentResult::InOrder);
    }

    #[test]
    fn out_of_order_then_gap_fill_rebuilds() {
        let mut tcp = TcpTrackingState::new();
        let _ = tcp.on_segment(0, 0, true, false, false, b"", true);
        // B arrives first at seq 101 (after a 1-byte SYN's implicit seq).
        let r_b = tcp.on_segment(0, 101, false, false, false, b"B", true);
        assert_eq!(r_b, SegmentResult::OutOfOrder);
        // A fills the gap at seq 1..101
        let a_payload = vec![b'A'; 100];
        let r_a = tcp.on_segment(0, 1, false, false, false, &a_payload, true);
        match r_a {
            SegmentResult::Rebuilt { bytes } => {
                assert_eq!(bytes.len(), 101);
                assert_eq!(bytes[100], b'B');
            }
            other => panic!("expected Rebuilt, got {other:?}"),
        }
    }

    #[test]
    fn light_tracking_never_buffers() {
        let mut tcp = TcpTrackingState::new();
        let r = tcp.on_segment(0, 500, false, false, false, b"future", false);
        assert_eq!(r, SegmentResult::InOrder);
    }

    #[test]
    fn both_directions_closed_signals_termination() {
        let mut tcp = TcpTrackingState::new();
        let _ = tcp.on_segment(0, 0, true, false, false, b"", true);
        let _ = tcp.on_segment(1, 0, true, false, false, b"", true);
        let _ = tcp.on_segment(0, 1, false, true, false, b"", true);
        let _ = tcp.on_segment(1, 1, false, true, false, b"", true);
        // Final ACKs close out each direction's FIN_WAIT.
        let _ = tcp.on_segment(0, 1, false, false, false, b"", true);
        let _ = tcp.on_segment(1, 1, false, false, false, b"", true);
        assert!(tcp.connection_terminated());
    }

    #[test]
    fn missing_syn_never_signals_termination() {
        // Capture starts mid-stream: no SYN ever observed in either
        // direction. A single segment per direction must not be mistaken
        // for a completed teardown.
        let mut tcp = TcpTrackingState::new();
        let _ = tcp.on_segment(0, 1000, false, false, false, b"mid-stream", true);
        let _ = tcp.on_segment(1, 2000, false, false, false, b"reply", true);
        assert!(!tcp.connection_terminated());
    }

    #[test]
    fn rst_immediately_closes_direction() {
        let mut tcp = TcpTrackingState::new();
        let _ = tcp.on_segment(0, 0, true, false, false, b"", true);
        let r = tcp.on_segment(0, 50, false, false, true, b"", true);
        assert_eq!(r, SegmentResult::InOrder);
    }
}
