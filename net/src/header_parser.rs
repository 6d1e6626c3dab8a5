// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The L3/L4 header walk (spec §4.1): from the IP header through L4,
//! across IPv6 extension-header chains and 4-in-4/4-in-6/6-in-6 tunnels.

use std::net::IpAddr;

use tracing::{debug, trace};

use crate::ip::NextHeader;
use crate::ipv4::Ipv4;
use crate::ipv6::{ExtensionHeader, Ipv6};
use crate::packet_info::{L4Protocol, PacketData, PacketInfo};
use crate::reassembly::{Ipv4FragmentId, Ipv4Reassembly, Ipv6FragmentId, Ipv6Reassembly};
use crate::status::Status;
use crate::tcp::Tcp;
use crate::udp::Udp;

/// Default cap on tunnel-nesting depth (spec §4.1: "implementations should
/// cap it, e.g. 8 layers").
pub const DEFAULT_MAX_TUNNEL_DEPTH: usize = 8;

/// The fragment-reassembly contexts the header walk may dispatch into.
/// Either may be absent, meaning reassembly is disabled for that IP
/// version (spec §6 `ipv4_fragmentation_enable`/`ipv6_fragmentation_enable`).
#[derive(Default)]
pub struct ReassemblyContexts {
    /// IPv4 reassembly context, if enabled.
    pub v4: Option<Ipv4Reassembly>,
    /// IPv6 reassembly context, if enabled.
    pub v6: Option<Ipv6Reassembly>,
}

/// Parse from the IP header through L4, walking tunnels and extension
/// headers as needed. Returns `(PacketInfo, Status)` — `PacketInfo` is
/// `None` whenever `Status` does not represent "parsing succeeded, caller
/// may proceed" (spec §4.1 contract: "produce a `PacketInfo` and a status").
pub fn parse<'buf>(
    buf: &'buf [u8],
    capture_length: usize,
    timestamp: u64,
    max_tunnel_depth: usize,
    reassembly: &mut ReassemblyContexts,
) -> (Option<PacketInfo<'buf>>, Status) {
    parse_inner(
        PacketData::Borrowed(buf),
        capture_length,
        timestamp,
        max_tunnel_depth,
        reassembly,
    )
}

fn parse_inner<'buf>(
    data: PacketData<'buf>,
    capture_length: usize,
    timestamp: u64,
    max_tunnel_depth: usize,
    reassembly: &mut ReassemblyContexts,
) -> (Option<PacketInfo<'buf>>, Status) {
    let mut depth = 0usize;
    let mut cursor = 0usize;
    let mut working_len = capture_length;

    loop {
        if depth > max_tunnel_depth {
            debug!(depth, "tunnel depth exceeded");
            return (None, Status::L3TruncatedPacket);
        }
        depth += 1;

        let buf = data.bytes();
        let remaining = &buf[cursor..];
        if remaining.is_empty() {
            return (None, Status::L3TruncatedPacket);
        }
        let version = remaining[0] >> 4;

        match version {
            4 => {
                let ipv4 = match Ipv4::parse(remaining, working_len - cursor) {
                    Ok(ipv4) => ipv4,
                    Err(_) => return (None, Status::L3TruncatedPacket),
                };
                let src = IpAddr::V4(ipv4.source());
                let dst = IpAddr::V4(ipv4.destination());
                let header_len = ipv4.header_len();
                let total_len = ipv4.total_len();
                working_len = cursor + total_len;

                if ipv4.is_fragment() {
                    return handle_ipv4_fragment(
                        &data,
                        cursor,
                        &ipv4,
                        timestamp,
                        reassembly,
                        max_tunnel_depth,
                    );
                }

                let l4_offset = cursor + header_len;
                match walk_l4_or_tunnel(
                    &data,
                    ipv4.next_header(),
                    l4_offset,
                    working_len,
                    src,
                    dst,
                    4,
                    timestamp,
                ) {
                    WalkResult::Done(info) => return (Some(info), Status::Ok),
                    WalkResult::Tunnel { next_cursor } => {
                        cursor = next_cursor;
                        continue;
                    }
                    WalkResult::Error(status) => return (None, status),
                }
            }
            6 => {
                let ipv6 = match Ipv6::parse(remaining, working_len - cursor) {
                    Ok(ipv6) => ipv6,
                    Err(_) => return (None, Status::L3TruncatedPacket),
                };
                let src = IpAddr::V6(ipv6.source());
                let dst = IpAddr::V6(ipv6.destination());
                working_len = cursor + ipv6.total_len();

                let result = walk_ipv6_chain(
                    &data,
                    cursor + ipv6.header_len(),
                    ipv6.next_header(),
                    working_len,
                    src,
                    dst,
                    timestamp,
                    reassembly,
                    max_tunnel_depth,
                );
                match result {
                    WalkResult::Done(info) => return (Some(info), Status::Ok),
                    WalkResult::Tunnel { next_cursor } => {
                        cursor = next_cursor;
                        continue;
                    }
                    WalkResult::Error(status) => return (None, status),
                    WalkResult::Final(info, status) => return (info, status),
                }
            }
            _ => return (None, Status::WrongIpVersion),
        }
    }
}

enum WalkResult<'buf> {
    Done(PacketInfo<'buf>),
    Tunnel { next_cursor: usize },
    Error(Status),
    /// Bypasses the normal `Done => Status::Ok` wrapping: used when a
    /// sub-walk already determined the exact status to report (e.g.
    /// `Status::IpLastFragment` after reassembly completes).
    Final(Option<PacketInfo<'buf>>, Status),
}

#[allow(clippy::too_many_arguments)]
fn walk_ipv6_chain<'buf>(
    data: &PacketData<'buf>,
    mut cursor: usize,
    mut next_header: NextHeader,
    working_len: usize,
    src: IpAddr,
    dst: IpAddr,
    timestamp: u64,
    reassembly: &mut ReassemblyContexts,
    max_tunnel_depth: usize,
) -> WalkResult<'buf> {
    loop {
        if next_header.is_ipv6_extension() {
            let buf = data.bytes();
            if cursor >= working_len || cursor >= buf.len() {
                return WalkResult::Error(Status::L3TruncatedPacket);
            }
            let ext = match ExtensionHeader::parse(&buf[cursor..working_len.min(buf.len())]) {
                Ok(ext) => ext,
                Err(_) => return WalkResult::Error(Status::L3TruncatedPacket),
            };
            cursor += ext.header_len;
            next_header = ext.next_header;
            continue;
        }

        if next_header == NextHeader::FRAGMENT {
            let (info, status) = handle_ipv6_fragment(
                data,
                cursor,
                src,
                dst,
                timestamp,
                reassembly,
                max_tunnel_depth,
            );
            return WalkResult::Final(info, status);
        }

        return walk_l4_or_tunnel(data, next_header, cursor, working_len, src, dst, 6, timestamp);
    }
}

#[allow(clippy::too_many_arguments)]
fn walk_l4_or_tunnel<'buf>(
    data: &PacketData<'buf>,
    next_header: NextHeader,
    offset: usize,
    working_len: usize,
    src: IpAddr,
    dst: IpAddr,
    ip_version: u8,
    timestamp: u64,
) -> WalkResult<'buf> {
    let buf = data.bytes();

    if next_header == NextHeader::IPV4 || next_header == NextHeader::IPV6 {
        trace!(?next_header, "descending into tunnel");
        return WalkResult::Tunnel { next_cursor: offset };
    }

    if next_header == NextHeader::AUTH || next_header == NextHeader::ESP {
        return WalkResult::Error(Status::IpsecNotSupported);
    }

    if offset > working_len || offset > buf.len() {
        return WalkResult::Error(Status::L4TruncatedPacket);
    }
    let l4_slice_end = working_len.min(buf.len());
    let l4_slice = &buf[offset..l4_slice_end];

    if next_header == NextHeader::TCP {
        let tcp = match Tcp::parse(l4_slice) {
            Ok(tcp) => tcp,
            Err(_) => return WalkResult::Error(Status::L4TruncatedPacket),
        };
        let header_len = tcp.header_len();
        let l7_offset = offset + header_len;
        let payload_len = l4_slice_end.saturating_sub(l7_offset);
        return WalkResult::Done(build_packet_info(
            data.clone_view(),
            ip_version,
            src,
            dst,
            L4Protocol::Tcp,
            Some(tcp.source_port()),
            Some(tcp.destination_port()),
            offset,
            l7_offset,
            payload_len,
            timestamp,
        ));
    }

    if next_header == NextHeader::UDP {
        let udp = match Udp::parse(l4_slice) {
            Ok(udp) => udp,
            Err(_) => return WalkResult::Error(Status::L4TruncatedPacket),
        };
        let l7_offset = offset + crate::udp::HEADER_LEN;
        let payload_len = l4_slice_end.saturating_sub(l7_offset);
        return WalkResult::Done(build_packet_info(
            data.clone_view(),
            ip_version,
            src,
            dst,
            L4Protocol::Udp,
            Some(udp.source_port()),
            Some(udp.destination_port()),
            offset,
            l7_offset,
            payload_len,
            timestamp,
        ));
    }

    // "Anything else: terminate, leaving L4 offset at current position and
    // L4 protocol set to `next_header`" (spec §4.1 step 4).
    WalkResult::Done(build_packet_info(
        data.clone_view(),
        ip_version,
        src,
        dst,
        L4Protocol::Other(next_header.as_u8()),
        None,
        None,
        offset,
        offset,
        l4_slice_end.saturating_sub(offset),
        timestamp,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_packet_info<'buf>(
    data: PacketData<'buf>,
    ip_version: u8,
    src: IpAddr,
    dst: IpAddr,
    l4_protocol: L4Protocol,
    src_port: Option<u16>,
    dst_port: Option<u16>,
    l4_offset: usize,
    l7_offset: usize,
    payload_len: usize,
    timestamp: u64,
) -> PacketInfo<'buf> {
    PacketInfo {
        ip_version,
        src_addr: src,
        dst_addr: dst,
        l4_protocol,
        src_port,
        dst_port,
        l4_offset,
        l7_offset,
        payload_len,
        data,
        timestamp,
    }
}

fn handle_ipv4_fragment<'buf>(
    data: &PacketData<'buf>,
    ip_cursor: usize,
    ipv4: &Ipv4,
    timestamp: u64,
    reassembly: &mut ReassemblyContexts,
    max_tunnel_depth: usize,
) -> (Option<PacketInfo<'buf>>, Status) {
    let Some(ctx) = reassembly.v4.as_mut() else {
        return (None, Status::IpFragment);
    };

    let header_len = ipv4.header_len();
    let offset_in_datagram = ipv4.fragment_offset().byte_offset();
    let buf = data.bytes();
    let total_len = ipv4.total_len();
    let fragment_payload = &buf[ip_cursor + header_len..ip_cursor + total_len];

    let id = Ipv4FragmentId {
        src: ipv4.source(),
        dst: ipv4.destination(),
        identification: ipv4.identification(),
        protocol: ipv4.next_header().as_u8(),
    };

    match ctx.insert(
        id,
        offset_in_datagram,
        fragment_payload,
        ipv4.more_fragments(),
        timestamp,
    ) {
        crate::reassembly::InsertOutcome::Held | crate::reassembly::InsertOutcome::Drop => {
            (None, Status::IpFragment)
        }
        crate::reassembly::InsertOutcome::Complete(reassembled) => {
            // Re-parse from the reassembled buffer; the restarted walk owns
            // its own depth budget (spec doesn't double-count reassembly).
            let reassembled_len = reassembled.len();
            let (info, status) = parse_inner(
                PacketData::Owned(reassembled),
                reassembled_len,
                timestamp,
                max_tunnel_depth,
                reassembly,
            );
            match (info, status) {
                (Some(mut info), Status::Ok) => {
                    // Tag the caller that this buffer must be released.
                    debug_assert!(info.data.is_owned());
                    info.timestamp = timestamp;
                    (Some(info), Status::IpLastFragment)
                }
                (info, status) => (info, status),
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_ipv6_fragment<'buf>(
    data: &PacketData<'buf>,
    frag_header_offset: usize,
    src: IpAddr,
    dst: IpAddr,
    timestamp: u64,
    reassembly: &mut ReassemblyContexts,
    max_tunnel_depth: usize,
) -> (Option<PacketInfo<'buf>>, Status) {
    let Some(ctx) = reassembly.v6.as_mut() else {
        return (None, Status::IpFragment);
    };
    let (IpAddr::V6(src6), IpAddr::V6(dst6)) = (src, dst) else {
        return (None, Status::L3TruncatedPacket);
    };

    let buf = data.bytes();
    if buf.len() < frag_header_offset + 8 {
        return (None, Status::L3TruncatedPacket);
    }
    let frag_header = &buf[frag_header_offset..frag_header_offset + 8];
    let next_header = NextHeader::new(frag_header[0]);
    let offset_and_flags = u16::from_be_bytes([frag_header[2], frag_header[3]]);
    let fragment_offset = usize::from(offset_and_flags >> 3) * 8;
    let more_fragments = offset_and_flags & 1 != 0;
    let identification = u32::from_be_bytes([
        frag_header[4],
        frag_header[5],
        frag_header[6],
        frag_header[7],
    ]);

    let payload = &buf[frag_header_offset + 8..];

    let id = Ipv6FragmentId {
        src: src6,
        dst: dst6,
        identification,
        protocol: next_header.as_u8(),
    };

    match ctx.insert(id, fragment_offset, payload, more_fragments, timestamp) {
        crate::reassembly::InsertOutcome::Held | crate::reassembly::InsertOutcome::Drop => {
            (None, Status::IpFragment)
        }
        crate::reassembly::InsertOutcome::Complete(reassembled) => {
            // The reassembled buffer is the post-IPv6-header payload: there is
            // no IP header left to re-parse, so continue the walk directly at
            // L4 with the next_header carried by the fragment header. A
            // nested tunnel re-enters parse_inner on the reassembled bytes,
            // the same way handle_ipv4_fragment resets its depth budget.
            let reassembled_len = reassembled.len();
            let owned = PacketData::Owned(reassembled);
            match walk_l4_or_tunnel(&owned, next_header, 0, reassembled_len, src, dst, 6, timestamp)
            {
                WalkResult::Done(mut info) => {
                    debug_assert!(info.data.is_owned());
                    info.timestamp = timestamp;
                    (Some(info), Status::IpLastFragment)
                }
                WalkResult::Tunnel { next_cursor: _ } => {
                    let (info, status) =
                        parse_inner(owned, reassembled_len, timestamp, max_tunnel_depth, reassembly);
                    match (info, status) {
                        (Some(mut info), Status::Ok) => {
                            debug_assert!(info.data.is_owned());
                            info.timestamp = timestamp;
                            (Some(info), Status::IpLastFragment)
                        }
                        (info, status) => (info, status),
                    }
                }
                WalkResult::Error(status) => (None, status),
                WalkResult::Final(info, status) => (info, status),
            }
        }
    }
}

impl<'buf> PacketData<'buf> {
    fn clone_view(&self) -> PacketData<'buf> {
        match self {
            PacketData::Borrowed(b) => PacketData::Borrowed(b),
            PacketData::Owned(b) => PacketData::Owned(b.clone()),
        }
    }
}
