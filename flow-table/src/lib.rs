// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Partitioned flow table: flow keying, per-flow state, TCP tracking, and
//! the partitioned table itself (spec §3, §4.3, §4.4).

#![deny(missing_docs, clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod bitset;
pub mod flow_key;
pub mod flow_record;
pub mod table;
pub mod tcp_track;

/// IANA protocol number for TCP.
pub const TCP_PROTO_NUMBER: u8 = 6;
/// IANA protocol number for UDP.
pub const UDP_PROTO_NUMBER: u8 = 17;

pub use bitset::ProtocolBitset;
pub use flow_key::{Direction, Endpoint, FlowKey, ObservedTuple};
pub use flow_record::{FlowRecord, L7Protocol, ProtocolId};
pub use table::{FlowTable, FlowTableConfig};
pub use tcp_track::{SegmentResult, TcpConnState, TcpTrackingState};

use tracectl::trace_target;
trace_target!("flow-table", LevelFilter::INFO, &["pipeline"]);
