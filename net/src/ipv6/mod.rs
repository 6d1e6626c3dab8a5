// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IPv6 header parsing, including the extension-header chain walk.

use crate::ip::NextHeader;
use etherparse::Ipv6HeaderSlice;
use std::net::Ipv6Addr;

/// Fixed 40-byte IPv6 header.
#[derive(Debug, Clone)]
pub struct Ipv6<'buf> {
    inner: Ipv6HeaderSlice<'buf>,
}

/// Errors parsing an IPv6 header or an extension header in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Ipv6ParseError {
    /// The fixed 40-byte header did not fit in the capture.
    #[error("ipv6 header truncated")]
    Truncated,
    /// `payload_length + 40` exceeded the capture length.
    #[error("ipv6 payload_length {payload_length} + 40 exceeds capture length {capture_length}")]
    PayloadLengthExceedsCapture {
        /// The header-declared payload length.
        payload_length: u16,
        /// The bytes actually captured.
        capture_length: usize,
    },
    /// An extension header in the chain claimed a length past the working
    /// length of the datagram.
    #[error("ipv6 extension header truncated")]
    ExtensionTruncated,
}

impl<'buf> Ipv6<'buf> {
    /// Parse the fixed IPv6 header, validating against `capture_length` per
    /// spec §4.1 step 3.
    pub fn parse(buf: &'buf [u8], capture_length: usize) -> Result<Self, Ipv6ParseError> {
        let inner =
            Ipv6HeaderSlice::from_slice(buf).map_err(|_| Ipv6ParseError::Truncated)?;
        let total = usize::from(inner.payload_length()) + 40;
        if total > capture_length {
            return Err(Ipv6ParseError::PayloadLengthExceedsCapture {
                payload_length: inner.payload_length(),
                capture_length,
            });
        }
        Ok(Ipv6 { inner })
    }

    /// Fixed header length: always 40 bytes.
    #[must_use]
    pub fn header_len(&self) -> usize {
        40
    }

    /// `payload_length + 40`: the working length to truncate the datagram to.
    #[must_use]
    pub fn total_len(&self) -> usize {
        usize::from(self.inner.payload_length()) + 40
    }

    /// Source address.
    #[must_use]
    pub fn source(&self) -> Ipv6Addr {
        self.inner.source_addr()
    }

    /// Destination address.
    #[must_use]
    pub fn destination(&self) -> Ipv6Addr {
        self.inner.destination_addr()
    }

    /// Initial `next_header` value, the first link in the extension-header
    /// chain (spec §4.1 step 4).
    #[must_use]
    pub fn next_header(&self) -> NextHeader {
        NextHeader::new(self.inner.next_header().0)
    }

    /// Hop limit.
    #[must_use]
    pub fn hop_limit(&self) -> u8 {
        self.inner.hop_limit()
    }
}

/// One step of walking an IPv6 extension-header chain (HOPOPTS, DSTOPTS,
/// ROUTING). The generic extension-header format is: byte 0 = next header,
/// byte 1 = header extension length in 8-byte units, excluding the first
/// 8 bytes. Total header length is therefore `(len + 1) * 8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionHeader {
    /// The next-header value carried in this extension header.
    pub next_header: NextHeader,
    /// Total byte length of this extension header, `(ext_len + 1) * 8`.
    pub header_len: usize,
}

impl ExtensionHeader {
    /// Parse one extension header at the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, Ipv6ParseError> {
        if buf.len() < 2 {
            return Err(Ipv6ParseError::ExtensionTruncated);
        }
        let next_header = NextHeader::new(buf[0]);
        let header_len = (usize::from(buf[1]) + 1) * 8;
        if buf.len() < header_len {
            return Err(Ipv6ParseError::ExtensionTruncated);
        }
        Ok(ExtensionHeader {
            next_header,
            header_len,
        })
    }
}
