// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-call result codes returned by the header parser, the reassembly
//! subsystems, and the classification engine.
//!
//! A [`Status`] is never an `Err` the caller has to unwrap through a panic
//! path: every outcome that the original C core signaled with a signed byte
//! is a first-class variant here, and callers are expected to match on it
//! rather than treat it as an exceptional condition.

/// Outcome of one `get_protocol`/`parse_l3_l4`/reassembly call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Status {
    /// Parsing and (if applicable) classification were attempted.
    #[error("ok")]
    Ok,
    /// The datagram is a non-terminal IPv4/IPv6 fragment; it has been
    /// buffered and no classification was attempted.
    #[error("fragment held pending reassembly")]
    IpFragment,
    /// This call completed reassembly; the caller now owns a heap buffer
    /// (see [`crate::packet_info::PacketData::Owned`]) that must be freed
    /// once processing finishes.
    #[error("fragment reassembly complete")]
    IpLastFragment,
    /// A TCP segment arrived out of sequence order and has been buffered;
    /// classification was deferred for this packet.
    #[error("tcp segment buffered out of order")]
    TcpOutOfOrder,
    /// Both directions of a TCP flow reached `CLOSED`; the flow will be
    /// evicted from the flow table after this call returns.
    #[error("tcp connection terminated")]
    TcpConnectionTerminated,
    /// The first nibble of the first byte was neither 4 nor 6.
    #[error("unsupported ip version")]
    WrongIpVersion,
    /// An IPSec header (AH/ESP) was encountered; the payload cannot be
    /// inspected without decryption/authentication material.
    #[error("ipsec not supported")]
    IpsecNotSupported,
    /// An IP or extension header claimed a length that would run past the
    /// capture length.
    #[error("l3 header truncated")]
    L3TruncatedPacket,
    /// The L4 header claimed a length that would run past the capture
    /// length, or the capture ended before a full L4 header was seen.
    #[error("l4 header truncated")]
    L4TruncatedPacket,
    /// The L4 protocol is not one the engine classifies (not TCP or UDP).
    #[error("transport protocol not supported")]
    TransportProtocolNotSupported,
    /// The flow table's live-flow cap was hit; no `FlowRecord` was created.
    #[error("max flows reached")]
    MaxFlows,
}

impl Status {
    /// True for every status that is not a hard parse/resource failure —
    /// i.e. every status other than the ones spec §7 classifies as
    /// "input malformed" or "resource exhaustion".
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Status::WrongIpVersion
                | Status::IpsecNotSupported
                | Status::L3TruncatedPacket
                | Status::L4TruncatedPacket
                | Status::TransportProtocolNotSupported
                | Status::MaxFlows
        )
    }
}
