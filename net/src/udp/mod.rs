// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! UDP header parsing.

pub mod port;

use etherparse::UdpHeaderSlice;
pub use port::{UdpPort, UdpPortError};

/// A zero-copy view of a UDP header.
#[derive(Debug, Clone)]
pub struct Udp<'buf> {
    inner: UdpHeaderSlice<'buf>,
}

/// Errors parsing a UDP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UdpParseError {
    /// The fixed 8-byte header did not fit in the capture.
    #[error("udp header truncated")]
    Truncated,
}

/// Fixed UDP header length.
pub const HEADER_LEN: usize = 8;

impl<'buf> Udp<'buf> {
    /// Parse a UDP header from `buf`.
    pub fn parse(buf: &'buf [u8]) -> Result<Self, UdpParseError> {
        let inner = UdpHeaderSlice::from_slice(buf).map_err(|_| UdpParseError::Truncated)?;
        Ok(Udp { inner })
    }

    /// Source port.
    #[must_use]
    pub fn source_port(&self) -> u16 {
        self.inner.source_port()
    }

    /// Destination port.
    #[must_use]
    pub fn destination_port(&self) -> u16 {
        self.inner.destination_port()
    }

    /// `length` field: header + payload, in bytes.
    #[must_use]
    pub fn length(&self) -> u16 {
        self.inner.length()
    }
}
