// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IPv4 header parsing.

pub mod frag_offset;

use crate::ip::NextHeader;
use etherparse::Ipv4HeaderSlice;
use frag_offset::FragOffset;
use std::net::Ipv4Addr;

/// A zero-copy view of an IPv4 header, the fields the header walk needs.
#[derive(Debug, Clone)]
pub struct Ipv4<'buf> {
    inner: Ipv4HeaderSlice<'buf>,
}

/// Errors parsing an IPv4 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Ipv4ParseError {
    /// The fixed header (or declared IHL) did not fit in the capture.
    #[error("ipv4 header truncated")]
    Truncated,
    /// `total_length` exceeded the capture length.
    #[error("ipv4 total_length {total_length} exceeds capture length {capture_length}")]
    TotalLengthExceedsCapture {
        /// The header-declared total length.
        total_length: u16,
        /// The bytes actually captured.
        capture_length: usize,
    },
    /// `total_length` did not exceed the header length (zero or negative payload).
    #[error("ipv4 total_length {total_length} not greater than header_length {header_length}")]
    TotalLengthNotGreaterThanHeaderLength {
        /// The header-declared total length.
        total_length: u16,
        /// The header length, `ihl * 4`.
        header_length: u8,
    },
}

impl<'buf> Ipv4<'buf> {
    /// Parse an IPv4 header from `buf`, validating against `capture_length`
    /// per spec §4.1 step 2.
    pub fn parse(buf: &'buf [u8], capture_length: usize) -> Result<Self, Ipv4ParseError> {
        let inner =
            Ipv4HeaderSlice::from_slice(buf).map_err(|_| Ipv4ParseError::Truncated)?;
        let total_length = inner.total_len();
        let header_length = inner.ihl() * 4;
        if usize::from(total_length) > capture_length {
            return Err(Ipv4ParseError::TotalLengthExceedsCapture {
                total_length,
                capture_length,
            });
        }
        if total_length <= u16::from(header_length) {
            return Err(Ipv4ParseError::TotalLengthNotGreaterThanHeaderLength {
                total_length,
                header_length,
            });
        }
        Ok(Ipv4 { inner })
    }

    /// Length of the fixed + options header, in bytes.
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.inner.slice().len()
    }

    /// `total_length`: the working length to truncate the datagram to.
    #[must_use]
    pub fn total_len(&self) -> usize {
        usize::from(self.inner.total_len())
    }

    /// Source address.
    #[must_use]
    pub fn source(&self) -> Ipv4Addr {
        self.inner.source_addr()
    }

    /// Destination address.
    #[must_use]
    pub fn destination(&self) -> Ipv4Addr {
        self.inner.destination_addr()
    }

    /// Next-header / protocol field.
    #[must_use]
    pub fn next_header(&self) -> NextHeader {
        NextHeader::new(self.inner.protocol().0)
    }

    /// Fragment offset field.
    #[must_use]
    pub fn fragment_offset(&self) -> FragOffset {
        FragOffset::new(self.inner.fragments_offset().value()).unwrap_or(FragOffset::MIN)
    }

    /// `more_fragments` (MF) flag.
    #[must_use]
    pub fn more_fragments(&self) -> bool {
        self.inner.more_fragments()
    }

    /// Identification field, used to key reassembly partials.
    #[must_use]
    pub fn identification(&self) -> u16 {
        self.inner.identification()
    }

    /// True if this is a fragment (non-zero offset, or MF set).
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.fragment_offset().units() != 0 || self.more_fragments()
    }

    /// Time to live.
    #[must_use]
    pub fn ttl(&self) -> u8 {
        self.inner.ttl()
    }
}
