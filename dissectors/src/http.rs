// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! HTTP/1.x request-line dissector, built on `httparse`.

use flow_info::{ExtractMut, ExtractRef, FlowInfoItem};
use net::PacketInfo;
use pipeline::{DissectCtx, DissectOutcome, Dissector, ExtractedField};

const MAX_HEADERS: usize = 32;

/// Well-known HTTP ports used only to prioritize dissector attempts (spec
/// §4.5 step 2).
pub const PORT_HINTS: &[u16] = &[80, 8080, 8000];

/// Per-flow HTTP state: the most recently seen request's host header,
/// surfaced as an extracted field.
#[derive(Debug, Default)]
struct HttpTracking {
    host: Option<String>,
    method: Option<String>,
    path: Option<String>,
}

/// Matches HTTP/1.x requests by parsing the request line and headers.
#[derive(Debug, Default)]
pub struct HttpDissector;

impl Dissector for HttpDissector {
    fn name(&self) -> &'static str {
        "HTTP"
    }

    fn dissect(
        &self,
        _info: &PacketInfo<'_>,
        payload: &[u8],
        tracking: &mut Option<Box<dyn FlowInfoItem>>,
        _ctx: &DissectCtx,
    ) -> DissectOutcome {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        match request.parse(payload) {
            Ok(httparse::Status::Complete(_) | httparse::Status::Partial) => {
                let Some(method) = request.method else {
                    return DissectOutcome::NeedMoreData;
                };
                let host = request
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("host"))
                    .map(|h| String::from_utf8_lossy(h.value).into_owned());

                if tracking.is_none() {
                    *tracking = Some(Box::new(HttpTracking::default()));
                }
                if let Some(state) = tracking.extract_mut::<HttpTracking>() {
                    state.method = Some(method.to_string());
                    state.path = request.path.map(ToString::to_string);
                    state.host = host;
                }
                DissectOutcome::Matches
            }
            Err(_) => DissectOutcome::NoMatches,
        }
    }

    fn get_extracted_fields(
        &self,
        tracking: &Option<Box<dyn FlowInfoItem>>,
    ) -> Vec<ExtractedField> {
        let Some(state) = tracking.extract_ref::<HttpTracking>() else {
            return Vec::new();
        };
        let mut fields = Vec::new();
        if let Some(method) = &state.method {
            fields.push(ExtractedField {
                name: "http.method",
                value: method.clone(),
            });
        }
        if let Some(path) = &state.path {
            fields.push(ExtractedField {
                name: "http.path",
                value: path.clone(),
            });
        }
        if let Some(host) = &state.host {
            fields.push(ExtractedField {
                name: "http.host",
                value: host.clone(),
            });
        }
        fields
    }

    fn field_count(&self) -> usize {
        3
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
            l4_protocol: net::L4Protocol::Tcp,
            src_port: Some(51234),
            dst_port: Some(80),
            l4_offset: 0,
            l7_offset: 0,
            payload_len: 0,
            data: net::PacketData::Borrowed(&[]),
            timestamp: 0,
        }
    }

    #[test]
    fn matches_get_request_and_extracts_host() {
        let dissector = HttpDissector;
        let payload = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut tracking = None;
        let outcome = dissector.dissect(&info(), payload, &mut tracking, &ctx());
        assert_eq!(outcome, DissectOutcome::Matches);
        let fields = dissector.get_extracted_fields(&tracking);
        assert!(fields.iter().any(|f| f.name == "http.host" && f.value == "x"));
    }

    #[test]
    fn rejects_non_http_payload() {
        let dissector = HttpDissector;
        let payload = b"\x00\x01\x02\x03not http at all, definitely";
        let mut tracking = None;
        let outcome = dissector.dissect(&info(), payload, &mut tracking, &ctx());
        assert_eq!(outcome, DissectOutcome::NoMatches);
    }
}
