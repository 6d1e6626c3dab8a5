// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(
    unsafe_code,
    missing_docs,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

//! Built-in L7 protocol [`Dissector`](pipeline::Dissector) implementations.
//!
//! Each module here is independent of the engine's internals: it only
//! sees a payload slice, its own tracking slot, and a [`DissectCtx`]. New
//! protocols plug in the same way from outside this crate.

pub mod dns;
pub mod http;

pub use dns::DnsDissector;
pub use http::HttpDissector;
