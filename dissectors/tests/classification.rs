// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end classification scenarios, wiring the engine up with the
//! built-in dissectors the way a real caller would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dissectors::{DnsDissector, HttpDissector};
use flow_info::FlowInfoItem;
use net::PacketInfo;
use pipeline::{DissectCtx, DissectOutcome, Dissector, Engine, EngineBuilder};

fn build_tcp_ipv4(
    src_port: u16,
    dst_port: u16,
    seq: u32,
    syn: bool,
    fin: bool,
    payload: &[u8],
) -> Vec<u8> {
    let mut tcp = etherparse::TcpHeader::new(src_port, dst_port, seq, 4096);
    tcp.syn = syn;
    tcp.fin = fin;
    tcp.ack = !syn;
    let mut tcp_bytes = Vec::new();
    tcp.write(&mut tcp_bytes).unwrap();
    tcp_bytes.extend_from_slice(payload);

    let ip = etherparse::Ipv4Header::new(
        tcp_bytes.len().try_into().unwrap(),
        64,
        etherparse::IpNumber::TCP,
        [10, 0, 0, 1],
        [10, 0, 0, 2],
    )
    .unwrap();
    let mut buf = Vec::new();
    ip.write(&mut buf).unwrap();
    buf.extend_from_slice(&tcp_bytes);
    buf
}

fn build_udp_ipv4(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let udp = etherparse::UdpHeader::with_ipv4_checksum(
        src_port,
        dst_port,
        &[10, 0, 0, 1, 10, 0, 0, 2],
        payload,
    )
    .unwrap();
    let mut udp_bytes = Vec::new();
    udp.write(&mut udp_bytes).unwrap();
    udp_bytes.extend_from_slice(payload);

    let ip = etherparse::Ipv4Header::new(
        udp_bytes.len().try_into().unwrap(),
        64,
        etherparse::IpNumber::UDP,
        [10, 0, 0, 1],
        [10, 0, 0, 2],
    )
    .unwrap();
    let mut buf = Vec::new();
    ip.write(&mut buf).unwrap();
    buf.extend_from_slice(&udp_bytes);
    buf
}

fn dns_query(name: &str) -> Vec<u8> {
    use hickory_proto::op::{Message, MessageType, OpCode, Query};
    use hickory_proto::rr::{Name, RecordType};

    let mut message = Message::new();
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(RecordType::A);
    message.add_query(query);
    message.to_vec().unwrap()
}

/// Scenario 1: HTTP on port 80 — SYN, SYN-ACK, then the request itself.
#[test]
fn scenario_http_on_port_80() {
    let mut registry = pipeline::DissectorRegistry::new();
    let http_id = registry.register(Box::new(HttpDissector)).unwrap();
    let mut builder = EngineBuilder::new(registry.protocol_count());
    builder.set_field_extraction_enabled(http_id, true).unwrap();
    let mut engine = Engine::new(builder.build(), registry);

    let syn = build_tcp_ipv4(51234, 80, 1000, true, false, b"");
    let r1 = engine.get_protocol(&syn, syn.len(), 0);
    assert_eq!(r1.l7_protocol, Some(flow_table::L7Protocol::NotDetermined));

    let syn_ack = build_tcp_ipv4(80, 51234, 2000, true, false, b"");
    let r2 = engine.get_protocol(&syn_ack, syn_ack.len(), 0);
    assert_eq!(r2.l7_protocol, Some(flow_table::L7Protocol::NotDetermined));

    let request = build_tcp_ipv4(51234, 80, 1000, false, false, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    let r3 = engine.get_protocol(&request, request.len(), 0);
    assert_eq!(r3.l7_protocol, Some(flow_table::L7Protocol::Known(http_id)));
    assert!(r3.fields.iter().any(|f| f.name == "http.host" && f.value == "x"));
}

/// Scenario 4: a standalone DNS query over UDP port 53.
#[test]
fn scenario_dns_over_udp_53() {
    let mut registry = pipeline::DissectorRegistry::new();
    let dns_id = registry.register(Box::new(DnsDissector)).unwrap();
    let mut builder = EngineBuilder::new(registry.protocol_count());
    builder.set_field_extraction_enabled(dns_id, true).unwrap();
    let mut engine = Engine::new(builder.build(), registry);

    let payload = dns_query("example.com.");
    let packet = build_udp_ipv4(51234, 53, &payload);
    let result = engine.get_protocol(&packet, packet.len(), 0);
    assert_eq!(result.l7_protocol, Some(flow_table::L7Protocol::Known(dns_id)));
    assert!(result
        .fields
        .iter()
        .any(|f| f.name == "dns.queried_name" && f.value.starts_with("example.com")));
}

#[derive(Debug, Default)]
struct SpyDissector {
    invoked: Arc<AtomicBool>,
}

impl Dissector for SpyDissector {
    fn name(&self) -> &'static str {
        "Spotify"
    }

    fn dissect(
        &self,
        _info: &PacketInfo<'_>,
        _payload: &[u8],
        _tracking: &mut Option<Box<dyn FlowInfoItem>>,
        _ctx: &DissectCtx,
    ) -> DissectOutcome {
        self.invoked.store(true, Ordering::SeqCst);
        DissectOutcome::Matches
    }
}

/// Scenario 5: an L7-skip override classifies by port alone, without ever
/// calling into the dissector.
#[test]
fn scenario_l7_skip_override_by_port() {
    let invoked = Arc::new(AtomicBool::new(false));
    let mut registry = pipeline::DissectorRegistry::new();
    let spotify_id = registry
        .register(Box::new(SpyDissector {
            invoked: invoked.clone(),
        }))
        .unwrap();
    let mut builder = EngineBuilder::new(registry.protocol_count());
    builder
        .skip_l7_parsing_by_port(flow_table::UDP_PROTO_NUMBER, 12345, spotify_id)
        .unwrap();
    let mut engine = Engine::new(builder.build(), registry);

    let packet = build_udp_ipv4(40000, 12345, b"opaque audio bytes");
    let result = engine.get_protocol(&packet, packet.len(), 0);
    assert_eq!(result.l7_protocol, Some(flow_table::L7Protocol::Known(spotify_id)));
    assert!(!invoked.load(Ordering::SeqCst));
}

/// Scenario 6: after HTTP classification, a FIN-ACK teardown in each
/// direction evicts the flow; the same 5-tuple afterwards starts fresh.
#[test]
fn scenario_tcp_teardown_after_classification() {
    let mut registry = pipeline::DissectorRegistry::new();
    let http_id = registry.register(Box::new(HttpDissector)).unwrap();
    let mut engine = Engine::new(EngineBuilder::new(registry.protocol_count()).build(), registry);

    let syn = build_tcp_ipv4(51234, 80, 1000, true, false, b"");
    engine.get_protocol(&syn, syn.len(), 0);
    let syn_ack = build_tcp_ipv4(80, 51234, 2000, true, false, b"");
    engine.get_protocol(&syn_ack, syn_ack.len(), 0);
    let request_payload: &[u8] = b"GET / HTTP/1.1\r\n\r\n";
    let request = build_tcp_ipv4(51234, 80, 1000, false, false, request_payload);
    let classified = engine.get_protocol(&request, request.len(), 0);
    assert_eq!(classified.l7_protocol, Some(flow_table::L7Protocol::Known(http_id)));

    // expected_seq on the client side is now 1000 + request_payload.len();
    // reach ESTABLISHED in both directions before tearing down.
    let client_seq = 1000 + request_payload.len() as u32;
    let client_ack = build_tcp_ipv4(51234, 80, client_seq, false, false, b"");
    engine.get_protocol(&client_ack, client_ack.len(), 0);
    let server_ack = build_tcp_ipv4(80, 51234, 2000, false, false, b"");
    engine.get_protocol(&server_ack, server_ack.len(), 0);

    let fin_client = build_tcp_ipv4(51234, 80, client_seq, false, true, b"");
    engine.get_protocol(&fin_client, fin_client.len(), 0);
    let fin_server = build_tcp_ipv4(80, 51234, 2000, false, true, b"");
    engine.get_protocol(&fin_server, fin_server.len(), 0);

    let final_client_ack = build_tcp_ipv4(51234, 80, client_seq, false, false, b"");
    engine.get_protocol(&final_client_ack, final_client_ack.len(), 0);
    let final_server_ack = build_tcp_ipv4(80, 51234, 2000, false, false, b"");
    let result = engine.get_protocol(&final_server_ack, final_server_ack.len(), 0);
    assert_eq!(result.status, net::Status::TcpConnectionTerminated);

    // The same 5-tuple now starts a brand-new, unclassified flow.
    let new_syn = build_tcp_ipv4(51234, 80, 9000, true, false, b"");
    let fresh = engine.get_protocol(&new_syn, new_syn.len(), 0);
    assert_eq!(fresh.l7_protocol, Some(flow_table::L7Protocol::NotDetermined));
}
