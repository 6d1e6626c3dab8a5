// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! [`PacketInfo`]: the per-call record produced by the header parser.

use std::net::IpAddr;

/// Ownership of the bytes a [`PacketInfo`] points at.
///
/// The original core disambiguates ownership only by status code (a
/// borrowed slice from the caller, or a heap buffer owned by reassembly,
/// depending on whether `IP_LAST_FRAGMENT` was returned). That convention
/// is a footgun to reimplement: this sum type makes ownership explicit in
/// the type instead.
#[derive(Debug, Clone)]
pub enum PacketData<'buf> {
    /// Bytes borrowed from the caller's buffer for the duration of this call.
    Borrowed(&'buf [u8]),
    /// A heap buffer produced by fragment reassembly. The caller owns this
    /// and it is freed when the `PacketInfo` (or its clone) is dropped.
    Owned(Box<[u8]>),
}

impl PacketData<'_> {
    /// Borrow the underlying bytes regardless of ownership.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        match self {
            PacketData::Borrowed(b) => b,
            PacketData::Owned(b) => b,
        }
    }

    /// True if this packet owns a heap buffer (i.e. came from reassembly).
    #[must_use]
    pub fn is_owned(&self) -> bool {
        matches!(self, PacketData::Owned(_))
    }
}

/// L4 protocol as seen by the classification engine. Only TCP and UDP
/// flows are tracked and classified; everything else is reported but not
/// tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L4Protocol {
    /// TCP segment.
    Tcp,
    /// UDP datagram.
    Udp,
    /// Any other IP protocol number (ICMP, GRE, ESP, ...).
    Other(u8),
}

/// Per-packet record produced by the header parser (spec §3, §4.1).
///
/// Created fresh for every call; never retained across calls unless the
/// caller explicitly stores it (e.g. to pass to
/// `stateful_get_app_protocol`).
#[derive(Debug, Clone)]
pub struct PacketInfo<'buf> {
    /// IP version of the innermost (post-tunnel) header, 4 or 6.
    pub ip_version: u8,
    /// Source address of the innermost header.
    pub src_addr: IpAddr,
    /// Destination address of the innermost header.
    pub dst_addr: IpAddr,
    /// L4 protocol of the innermost non-tunnel, non-extension header.
    pub l4_protocol: L4Protocol,
    /// Source port, if `l4_protocol` is TCP or UDP.
    pub src_port: Option<u16>,
    /// Destination port, if `l4_protocol` is TCP or UDP.
    pub dst_port: Option<u16>,
    /// Byte offset of the L4 header within `data`.
    pub l4_offset: usize,
    /// Byte offset of the L7 payload within `data`.
    pub l7_offset: usize,
    /// Length in bytes of the L7 payload.
    pub payload_len: usize,
    /// The (possibly reassembled) datagram bytes.
    pub data: PacketData<'buf>,
    /// Caller-supplied, monotonically non-decreasing timestamp.
    pub timestamp: u64,
}

impl<'buf> PacketInfo<'buf> {
    /// The L7 payload slice, per `l7_offset`/`payload_len`.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let bytes = self.data.bytes();
        let end = (self.l7_offset + self.payload_len).min(bytes.len());
        let start = self.l7_offset.min(end);
        &bytes[start..end]
    }

    /// True if this packet carries no L7 payload (e.g. a bare TCP ACK).
    #[must_use]
    pub fn is_payload_empty(&self) -> bool {
        self.payload_len == 0
    }
}
