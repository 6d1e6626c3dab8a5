// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The classification engine facade (spec §4.5, §6).
//!
//! Spec §9 "Concurrency" asks for per-partition handles the caller drives
//! directly rather than a `tid`-parameterized API. We get there by having
//! the engine pick a flow's partition from its normalized key (so the
//! caller never supplies one), while still keeping partitions internally
//! independent so a future multi-threaded harness can shard by partition
//! index without touching this code.

use std::collections::HashMap;

use tracing::{debug, trace};

use flow_table::{
    Direction, Endpoint, FlowKey, FlowRecord, FlowTable, FlowTableConfig, L7Protocol,
    ObservedTuple, ProtocolBitset, SegmentResult, TCP_PROTO_NUMBER, UDP_PROTO_NUMBER,
};
use net::header_parser::{self, ReassemblyContexts};
use net::{L4Protocol, PacketInfo, Status};

use crate::config::{EngineConfig, L7SkipKey, ProtocolAccuracy};
use crate::dissector::{DissectCtx, DissectOutcome, ExtractedField};
use crate::registry::{DissectorRegistry, ProtocolId};

/// Result of a full classification attempt (spec §6 `get_protocol`).
#[derive(Debug, Clone)]
pub struct ProtocolResult {
    /// Status code for this call.
    pub status: Status,
    /// L4 protocol observed, if parsing succeeded.
    pub l4_protocol: Option<L4Protocol>,
    /// Classification outcome for the flow this packet belongs to.
    pub l7_protocol: Option<L7Protocol>,
    /// Extracted fields, if field extraction is enabled for the matched
    /// protocol.
    pub fields: Vec<ExtractedField>,
}

impl ProtocolResult {
    fn status_only(status: Status) -> Self {
        ProtocolResult {
            status,
            l4_protocol: None,
            l7_protocol: None,
            fields: Vec::new(),
        }
    }
}

/// The classification engine: owns the dissector registry, flow table,
/// and per-partition reassembly contexts.
pub struct Engine {
    config: EngineConfig,
    registry: DissectorRegistry,
    flow_table: FlowTable,
    reassembly: Vec<ReassemblyContexts>,
    tcp_port_hints: HashMap<u16, ProtocolId>,
    udp_port_hints: HashMap<u16, ProtocolId>,
}

impl Engine {
    /// `init(size_v4, size_v6, max_flows_v4, max_flows_v6, num_partitions)`.
    /// `size_v4`/`size_v6` correspond to the fragmentation table sizes
    /// already folded into `config.ipv4_fragmentation`/`ipv6_fragmentation`
    /// by the builder; `max_flows_v4`/`max_flows_v6` collapse to
    /// `config.max_flows_per_partition` (flows are partitioned by hash,
    /// not by IP version).
    #[must_use]
    pub fn new(config: EngineConfig, registry: DissectorRegistry) -> Self {
        let mut tcp_port_hints = HashMap::new();
        let mut udp_port_hints = HashMap::new();
        for id in registry.ids() {
            if let Some(d) = registry.get(id) {
                for &port in d.port_hints() {
                    tcp_port_hints.entry(port).or_insert(id);
                    udp_port_hints.entry(port).or_insert(id);
                }
            }
        }

        let table_config = FlowTableConfig {
            partition_count: config.num_partitions,
            max_flows_per_partition: config.max_flows_per_partition,
        };
        let reassembly = (0..config.num_partitions.max(1))
            .map(|_| ReassemblyContexts {
                v4: config
                    .ipv4_fragmentation
                    .clone()
                    .map(net::reassembly::Ipv4Reassembly::new),
                v6: config
                    .ipv6_fragmentation
                    .clone()
                    .map(net::reassembly::Ipv6Reassembly::new),
            })
            .collect();

        Engine {
            flow_table: FlowTable::new(&table_config),
            reassembly,
            tcp_port_hints,
            udp_port_hints,
            config,
            registry,
        }
    }

    /// `shutdown(Engine)`: drain every partition, returning the flows that
    /// were still live so a caller-supplied flow-cleaner callback can run
    /// over them (spec §6 `set_flow_cleaner_callback`; invoking the
    /// callback itself is left to the caller, since the callback is an
    /// opaque closure type this crate has no reason to own).
    pub fn shutdown(mut self) -> Vec<FlowRecord> {
        self.flow_table.shutdown()
    }

    /// `parse_L3_L4`: header parsing and fragment reassembly only, no
    /// classification.
    ///
    /// Reassembly contexts are partitioned by source address so fragments
    /// from one host always land in the same bucket (spec §5 "Fragment
    /// reassembly contexts ... mirroring flow-table partitioning"), but a
    /// datagram's source address is only known after the IP header is
    /// parsed. Since a single partition can't be selected up front, every
    /// call here uses partition 0; running with `num_partitions > 1`
    /// splits flow-table work across partitions without splitting
    /// reassembly, which remains correct (one context simply serves more
    /// hosts) at the cost of sharing its lock more widely.
    pub fn parse_l3_l4<'buf>(
        &mut self,
        packet_bytes: &'buf [u8],
        capture_length: usize,
        now: u64,
    ) -> (Option<PacketInfo<'buf>>, Status) {
        let ctx = &mut self.reassembly[0];
        header_parser::parse(
            packet_bytes,
            capture_length,
            now,
            self.config.max_tunnel_depth,
            ctx,
        )
    }

    /// `get_protocol(engine, packet_bytes, length, now)`: the primary
    /// entry point.
    pub fn get_protocol(
        &mut self,
        packet_bytes: &[u8],
        capture_length: usize,
        now: u64,
    ) -> ProtocolResult {
        let (info, status) = self.parse_l3_l4(packet_bytes, capture_length, now);
        if status.is_error() || !matches!(status, Status::Ok | Status::IpLastFragment) {
            return ProtocolResult::status_only(status);
        }
        let Some(info) = info else {
            return ProtocolResult::status_only(status);
        };
        self.stateful_get_app_protocol(&info)
    }

    /// `stateful_get_app_protocol(engine, PacketInfo)`: classify a packet
    /// whose headers the caller (or `parse_l3_l4`) already parsed, finding
    /// or creating the owning flow, running TCP tracking if applicable,
    /// and running the classification engine (spec §4.5).
    pub fn stateful_get_app_protocol(&mut self, info: &PacketInfo<'_>) -> ProtocolResult {
        let observed = ObservedTuple {
            src: Endpoint {
                addr: info.src_addr,
                port: info.src_port.unwrap_or(0),
            },
            dst: Endpoint {
                addr: info.dst_addr,
                port: info.dst_port.unwrap_or(0),
            },
            ip_version: info.ip_version,
            l4_proto: l4_proto_number(info.l4_protocol),
        };
        let key = FlowKey::normalize(&observed);
        let partition = self.flow_table.partition_index(&key);

        let initial_candidates = ProtocolBitset::all_set(self.registry.protocol_count());
        let Some(flow) = self.flow_table.find_or_create(
            partition,
            &observed,
            initial_candidates,
            self.config.tcp_reordering_enabled,
        ) else {
            return ProtocolResult::status_only(Status::MaxFlows);
        };

        let direction = flow.direction_index(&observed);
        let payload = info.payload();
        flow.record_packet(direction, payload.len() as u64);

        let mut terminated = false;
        let mut classify_payload: Option<Vec<u8>> = None;
        if let (L4Protocol::Tcp, Some(tcp_state)) =
            (info.l4_protocol, flow.tcp_state.as_mut())
        {
            let tcp_header_fields = TcpSegmentFlags::from_payload(info);
            let dir_idx = match observed.direction_relative_to(&flow.first_seen) {
                Direction::Forward => 0,
                Direction::Reverse => 1,
            };
            let result = tcp_state.on_segment(
                dir_idx,
                tcp_header_fields.seq,
                tcp_header_fields.syn,
                tcp_header_fields.fin,
                tcp_header_fields.rst,
                payload,
                flow.tcp_reordering_enabled,
            );
            terminated = tcp_state.connection_terminated();
            match result {
                SegmentResult::InOrder => classify_payload = Some(payload.to_vec()),
                SegmentResult::Rebuilt { bytes } => {
                    flow.set_rebuilt_tcp_data(bytes.clone());
                    classify_payload = Some(bytes);
                }
                SegmentResult::OutOfOrder => {
                    return ProtocolResult::status_only(Status::TcpOutOfOrder);
                }
                SegmentResult::BufferFull => {
                    return ProtocolResult::status_only(Status::TcpOutOfOrder);
                }
            }
        } else if !payload.is_empty() {
            classify_payload = Some(payload.to_vec());
        }

        let mut result = ProtocolResult {
            status: Status::Ok,
            l4_protocol: Some(info.l4_protocol),
            l7_protocol: None,
            fields: Vec::new(),
        };

        if let Some(bytes) = classify_payload {
            if !bytes.is_empty() {
                self.classify(flow, info, &bytes, &mut result);
            } else {
                result.l7_protocol = Some(flow.l7_protocol);
            }
        } else {
            result.l7_protocol = Some(flow.l7_protocol);
        }

        if terminated {
            result.status = Status::TcpConnectionTerminated;
            self.flow_table.delete(partition, &key);
        }

        result
    }

    /// `stateless_get_app_protocol(engine, flow, PacketInfo)`: classify
    /// against a caller-owned flow record rather than one looked up from
    /// the internal table.
    pub fn stateless_get_app_protocol(
        &self,
        flow: &mut FlowRecord,
        info: &PacketInfo<'_>,
        payload: &[u8],
    ) -> ProtocolResult {
        let mut result = ProtocolResult {
            status: Status::Ok,
            l4_protocol: Some(info.l4_protocol),
            l7_protocol: None,
            fields: Vec::new(),
        };
        if !payload.is_empty() {
            self.classify(flow, info, payload, &mut result);
        } else {
            result.l7_protocol = Some(flow.l7_protocol);
        }
        result
    }

    /// `guess_protocol(PacketInfo)`: port-table lookup only, no dissector
    /// invocation and no flow-table interaction.
    #[must_use]
    pub fn guess_protocol(&self, info: &PacketInfo<'_>) -> Option<ProtocolId> {
        let hints = match info.l4_protocol {
            L4Protocol::Tcp => &self.tcp_port_hints,
            L4Protocol::Udp => &self.udp_port_hints,
            L4Protocol::Other(_) => return None,
        };
        info.src_port
            .and_then(|p| hints.get(&p))
            .or_else(|| info.dst_port.and_then(|p| hints.get(&p)))
            .copied()
    }

    fn dissect_ctx(&self, id: ProtocolId, flow: &FlowRecord) -> DissectCtx {
        DissectCtx {
            accuracy: self
                .config
                .protocol_accuracy
                .get(&id)
                .copied()
                .unwrap_or(ProtocolAccuracy::Medium),
            packets_seen: flow.packets_seen,
            bytes_seen: flow.bytes_seen,
        }
    }

    /// Classification engine core (spec §4.5 Case A / Case B). Applies the
    /// L7-skip override first (spec §6 `skip_L7_parsing_by_port`).
    fn classify(
        &self,
        flow: &mut FlowRecord,
        info: &PacketInfo<'_>,
        payload: &[u8],
        result: &mut ProtocolResult,
    ) {
        if matches!(flow.l7_protocol, L7Protocol::NotDetermined) {
            let l4 = l4_proto_number(info.l4_protocol);
            let skip_id = info
                .dst_port
                .and_then(|port| {
                    self.config
                        .l7_skip_table
                        .get(&L7SkipKey { l4_protocol: l4, port })
                })
                .or_else(|| {
                    info.src_port.and_then(|port| {
                        self.config
                            .l7_skip_table
                            .get(&L7SkipKey { l4_protocol: l4, port })
                    })
                })
                .copied();
            if let Some(id) = skip_id {
                flow.commit_protocol(id);
                result.l7_protocol = Some(flow.l7_protocol);
                return;
            }
        }

        match flow.l7_protocol {
            L7Protocol::NotDetermined => self.classify_unclassified(flow, info, payload, result),
            L7Protocol::Known(_) | L7Protocol::Unknown => {
                self.classify_known(flow, info, payload, result);
            }
        }
    }

    fn classify_known(
        &self,
        flow: &mut FlowRecord,
        info: &PacketInfo<'_>,
        payload: &[u8],
        result: &mut ProtocolResult,
    ) {
        result.l7_protocol = Some(flow.l7_protocol);
        let L7Protocol::Known(id) = flow.l7_protocol else {
            return;
        };
        let Some(dissector) = self.registry.get(id) else {
            return;
        };
        let ctx = self.dissect_ctx(id, flow);
        let _ = dissector.dissect(info, payload, &mut flow.tracking, &ctx);
        if self
            .config
            .field_extraction_enabled
            .get(usize::from(id))
            .copied()
            .unwrap_or(false)
        {
            result.fields = dissector.get_extracted_fields(&flow.tracking);
        }
    }

    fn classify_unclassified(
        &self,
        flow: &mut FlowRecord,
        info: &PacketInfo<'_>,
        payload: &[u8],
        result: &mut ProtocolResult,
    ) {
        if !matches!(info.l4_protocol, L4Protocol::Tcp | L4Protocol::Udp) {
            result.l7_protocol = Some(flow.l7_protocol);
            return;
        }

        let hints = match info.l4_protocol {
            L4Protocol::Tcp => &self.tcp_port_hints,
            L4Protocol::Udp => &self.udp_port_hints,
            L4Protocol::Other(_) => unreachable!("checked above"),
        };
        let first_hint = info
            .src_port
            .and_then(|p| hints.get(&p))
            .or_else(|| info.dst_port.and_then(|p| hints.get(&p)))
            .copied()
            .unwrap_or(0);

        let mut matched = None;
        for id in flow.candidate_set.iterate_from(usize::from(first_hint)) {
            #[allow(clippy::cast_possible_truncation)]
            let id = id as ProtocolId;
            if !flow.candidate_set.test(usize::from(id)) {
                continue;
            }
            if !self
                .config
                .enabled_protocols
                .get(usize::from(id))
                .copied()
                .unwrap_or(false)
            {
                continue;
            }
            let Some(dissector) = self.registry.get(id) else {
                continue;
            };
            let ctx = self.dissect_ctx(id, flow);
            match dissector.dissect(info, payload, &mut flow.tracking, &ctx) {
                DissectOutcome::Matches => {
                    matched = Some(id);
                    break;
                }
                DissectOutcome::NoMatches => flow.reject_candidate(id),
                DissectOutcome::NeedMoreData => {}
            }
        }

        if let Some(id) = matched {
            flow.commit_protocol(id);
            debug!(protocol = self.registry.get_protocol_string(id), "flow classified");
            if self
                .config
                .field_extraction_enabled
                .get(usize::from(id))
                .copied()
                .unwrap_or(false)
            {
                if let Some(dissector) = self.registry.get(id) {
                    result.fields = dissector.get_extracted_fields(&flow.tracking);
                }
            }
        } else {
            flow.trials += 1;
            if flow.candidate_count == 0
                || (self.config.max_trials != 0 && flow.trials == self.config.max_trials)
            {
                flow.mark_unknown();
                trace!(trials = flow.trials, "flow marked unknown");
            }
        }
        result.l7_protocol = Some(flow.l7_protocol);
    }
}

fn l4_proto_number(proto: L4Protocol) -> u8 {
    match proto {
        L4Protocol::Tcp => TCP_PROTO_NUMBER,
        L4Protocol::Udp => UDP_PROTO_NUMBER,
        L4Protocol::Other(n) => n,
    }
}

/// TCP flag/sequence extraction out of the raw packet bytes backing a
/// [`PacketInfo`]. `PacketInfo` itself only carries the parsed L3/L4
/// summary fields (spec §3); the flags live in the original header, which
/// callers retain via `PacketInfo.data`.
struct TcpSegmentFlags {
    seq: u32,
    syn: bool,
    fin: bool,
    rst: bool,
}

impl TcpSegmentFlags {
    fn from_payload(info: &PacketInfo<'_>) -> Self {
        let bytes = info.data.bytes();
        let tcp_start = info.l4_offset;
        if bytes.len() < tcp_start + 14 {
            return TcpSegmentFlags {
                seq: 0,
                syn: false,
                fin: false,
                rst: false,
            };
        }
        let seq = u32::from_be_bytes([
            bytes[tcp_start + 4],
            bytes[tcp_start + 5],
            bytes[tcp_start + 6],
            bytes[tcp_start + 7],
        ]);
        let flags = bytes[tcp_start + 13];
        TcpSegmentFlags {
            seq,
            fin: flags & 0x01 != 0,
            syn: flags & 0x02 != 0,
            rst: flags & 0x04 != 0,
        }
    }
}
