// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Helper methods and types which are common between IPv4 and IPv6

use etherparse::IpNumber;

/// Thin wrapper around [`IpNumber`]
///
/// This exists to allow us to implement `TypeGenerator` without violating rust's orphan rules.
#[repr(transparent)]
#[derive(PartialEq, Eq, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct NextHeader(pub(crate) IpNumber);

impl From<NextHeader> for IpNumber {
    fn from(value: NextHeader) -> Self {
        value.0
    }
}

impl NextHeader {
    /// TCP next header
    pub const TCP: NextHeader = NextHeader(IpNumber::TCP);

    /// UDP next header
    pub const UDP: NextHeader = NextHeader(IpNumber::UDP);

    /// ICMP next header
    pub const ICMP: NextHeader = NextHeader(IpNumber::ICMP);

    /// ICMP6 next header
    pub const ICMP6: NextHeader = NextHeader(IpNumber::IPV6_ICMP);

    /// IPv4-in-IP encapsulation
    pub const IPV4: NextHeader = NextHeader(IpNumber::IPV4);

    /// IPv6-in-IP encapsulation
    pub const IPV6: NextHeader = NextHeader(IpNumber::IPV6);

    /// IPv6 hop-by-hop options extension header
    pub const HOPOPT: NextHeader = NextHeader(IpNumber::IPV6_HOP_BY_HOP);

    /// IPv6 destination options extension header
    pub const DSTOPTS: NextHeader = NextHeader(IpNumber::IPV6_DESTINATION_OPTIONS);

    /// IPv6 routing extension header
    pub const ROUTING: NextHeader = NextHeader(IpNumber::IPV6_ROUTE_HEADER);

    /// IPv6 fragment extension header
    pub const FRAGMENT: NextHeader = NextHeader(IpNumber::IPV6_FRAGMENTATION_HEADER);

    /// IP Authentication Header / Encapsulating Security Payload (IPSec)
    pub const AUTH: NextHeader = NextHeader(IpNumber::AUTHENTICATION_HEADER);
    /// Encapsulating Security Payload (IPSec ESP)
    pub const ESP: NextHeader = NextHeader(IpNumber::IPV6_ENCAP_SEC_PAYLOAD);

    /// Get the inner (wrapped) `etherparse` [`IpNumber`] type
    #[must_use]
    pub fn inner(self) -> IpNumber {
        self.0
    }

    /// True if this is one of the IPv6 extension headers the parser walks
    /// transparently (hop-by-hop, destination options, routing).
    #[must_use]
    pub fn is_ipv6_extension(&self) -> bool {
        matches!(*self, Self::HOPOPT | Self::DSTOPTS | Self::ROUTING)
    }

    /// Generate a new [`NextHeader`]
    #[must_use]
    pub fn new(inner: u8) -> Self {
        Self(IpNumber::from(inner))
    }

    /// Return the [`NextHeader`] represented as a `u8`
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0.0
    }

    /// Set the value of this [`NextHeader`] to an arbitrary `u8`
    pub fn set_u8(&mut self, inner: u8) {
        self.0 = IpNumber::from(inner);
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use crate::ip::NextHeader;
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for NextHeader {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(NextHeader::new(driver.produce()?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_header_round_trips_u8() {
        for raw in 0..=255u8 {
            let mut nh = NextHeader::new(0);
            nh.set_u8(raw);
            assert_eq!(nh.as_u8(), raw);
        }
    }

    #[test]
    fn extension_headers_are_recognized() {
        assert!(NextHeader::HOPOPT.is_ipv6_extension());
        assert!(NextHeader::DSTOPTS.is_ipv6_extension());
        assert!(NextHeader::ROUTING.is_ipv6_extension());
        assert!(!NextHeader::TCP.is_ipv6_extension());
        assert!(!NextHeader::FRAGMENT.is_ipv6_extension());
    }
}
