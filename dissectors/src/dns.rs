// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! DNS dissector, built on `hickory-proto`'s wire-format message parser.

use hickory_proto::op::Message;

use flow_info::{ExtractMut, ExtractRef, FlowInfoItem};
use net::PacketInfo;
use pipeline::{DissectCtx, DissectOutcome, Dissector, ExtractedField};

/// The well-known DNS port (spec §4.5 step 2).
pub const PORT_HINTS: &[u16] = &[53];

#[derive(Debug, Default)]
struct DnsTracking {
    queried_name: Option<String>,
}

/// Matches DNS query/response datagrams by parsing the wire format.
#[derive(Debug, Default)]
pub struct DnsDissector;

impl Dissector for DnsDissector {
    fn name(&self) -> &'static str {
        "DNS"
    }

    fn dissect(
        &self,
        _info: &PacketInfo<'_>,
        payload: &[u8],
        tracking: &mut Option<Box<dyn FlowInfoItem>>,
        _ctx: &DissectCtx,
    ) -> DissectOutcome {
        let Ok(message) = Message::from_vec(payload) else {
            return DissectOutcome::NoMatches;
        };

        let queried_name = message.queries().first().map(|q| q.name().to_string());
        if tracking.is_none() {
            *tracking = Some(Box::new(DnsTracking::default()));
        }
        if let Some(state) = tracking.extract_mut::<DnsTracking>() {
            state.queried_name = queried_name;
        }
        DissectOutcome::Matches
    }

    fn get_extracted_fields(
        &self,
        tracking: &Option<Box<dyn FlowInfoItem>>,
    ) -> Vec<ExtractedField> {
        let Some(state) = tracking.extract_ref::<DnsTracking>() else {
            return Vec::new();
        };
        state
            .queried_name
            .as_ref()
            .map(|name| {
                vec![ExtractedField {
                    name: "dns.queried_name",
                    value: name.clone(),
                }]
            })
            .unwrap_or_default()
    }

    fn field_count(&self) -> usize {
        1
    }

    fn port_hints(&self) -> &[u16] {
        PORT_HINTS
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::config::ProtocolAccuracy;
    use std::net::{IpAddr, Ipv4Addr};

    fn ctx() -> DissectCtx {
        DissectCtx {
            accuracy: ProtocolAccuracy::Medium,
            packets_seen: [0, 0],
            bytes_seen: [0, 0],
        }
    }

    fn info() -> PacketInfo<'static> {
        PacketInfo {
            ip_version: 4,
            src_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            l4_protocol: net::L4Protocol::Udp,
            src_port: Some(51234),
            dst_port: Some(53),
            l4_offset: 0,
            l7_offset: 0,
            payload_len: 0,
            data: net::PacketData::Borrowed(&[]),
            timestamp: 0,
        }
    }

    fn build_query(name: &str) -> Vec<u8> {
        use hickory_proto::op::{Message, MessageType, OpCode, Query};
        use hickory_proto::rr::{Name, RecordType};

        let mut message = Message::new();
        message.set_id(0x1234);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        let mut query = Query::new();
        query.set_name(Name::from_ascii(name).expect("valid name"));
        query.set_query_type(RecordType::A);
        message.add_query(query);
        message.to_vec().expect("message encodes")
    }

    #[test]
    fn matches_dns_query_and_extracts_name() {
        let dissector = DnsDissector;
        let payload = build_query("example.com.");
        let mut tracking = None;
        let outcome = dissector.dissect(&info(), &payload, &mut tracking, &ctx());
        assert_eq!(outcome, DissectOutcome::Matches);
        let fields = dissector.get_extracted_fields(&tracking);
        assert!(fields
            .iter()
            .any(|f| f.name == "dns.queried_name" && f.value.starts_with("example.com")));
    }

    #[test]
    fn rejects_too_short_payload() {
        let dissector = DnsDissector;
        let payload = [0u8; 4];
        let mut tracking = None;
        let outcome = dissector.dissect(&info(), &payload, &mut tracking, &ctx());
        assert_eq!(outcome, DissectOutcome::NoMatches);
    }
}
