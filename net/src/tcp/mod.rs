// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! TCP header parsing.

pub mod port;

use etherparse::TcpHeaderSlice;
pub use port::{TcpPort, TcpPortError};

/// A zero-copy view of a TCP header.
#[derive(Debug, Clone)]
pub struct Tcp<'buf> {
    inner: TcpHeaderSlice<'buf>,
}

/// Errors parsing a TCP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TcpParseError {
    /// The fixed header, or the claimed data offset, did not fit.
    #[error("tcp header truncated")]
    Truncated,
}

impl<'buf> Tcp<'buf> {
    /// Parse a TCP header from `buf`.
    pub fn parse(buf: &'buf [u8]) -> Result<Self, TcpParseError> {
        let inner = TcpHeaderSlice::from_slice(buf).map_err(|_| TcpParseError::Truncated)?;
        Ok(Tcp { inner })
    }

    /// Header length in bytes, `data_offset * 4`.
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.inner.slice().len()
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

    /// Sequence number.
    #[must_use]
    pub fn sequence_number(&self) -> u32 {
        self.inner.sequence_number()
    }

    /// Acknowledgment number (valid only if [`Tcp::ack`]).
    #[must_use]
    pub fn acknowledgment_number(&self) -> u32 {
        self.inner.acknowledgment_number()
    }

    /// SYN flag.
    #[must_use]
    pub fn syn(&self) -> bool {
        self.inner.syn()
    }

    /// ACK flag.
    #[must_use]
    pub fn ack(&self) -> bool {
        self.inner.ack()
    }

    /// FIN flag.
    #[must_use]
    pub fn fin(&self) -> bool {
        self.inner.fin()
    }

    /// RST flag.
    #[must_use]
    pub fn rst(&self) -> bool {
        self.inner.rst()
    }
}
