// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The ordered dissector registry (spec §9 "stored in an ordered
//! registry"; spec §8 `get_protocol_id(get_protocol_string(id)) == id`).

use ordermap::OrderMap;

use crate::dissector::Dissector;

/// Numeric identifier for a known L7 protocol, stable for the lifetime of
/// an [`Engine`](crate::engine::Engine) (assigned in registration order).
pub type ProtocolId = u16;

/// Errors registering a dissector.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two dissectors were registered under the same name.
    #[error("duplicate protocol name: {0}")]
    DuplicateName(String),
}

/// Ordered collection of known dissectors, indexed both by
/// registration-assigned [`ProtocolId`] and by name.
#[derive(Default)]
pub struct DissectorRegistry {
    by_id: OrderMap<ProtocolId, Box<dyn Dissector>>,
    name_to_id: OrderMap<&'static str, ProtocolId>,
}

impl DissectorRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        DissectorRegistry {
            by_id: OrderMap::new(),
            name_to_id: OrderMap::new(),
        }
    }

    /// Register a dissector, assigning it the next [`ProtocolId`] in
    /// registration order.
    pub fn register(&mut self, dissector: Box<dyn Dissector>) -> Result<ProtocolId, RegistryError> {
        let name = dissector.name();
        if self.name_to_id.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        #[allow(clippy::cast_possible_truncation)]
        let id = self.by_id.len() as ProtocolId;
        self.name_to_id.insert(name, id);
        self.by_id.insert(id, dissector);
        Ok(id)
    }

    /// Total number of registered protocols; also the width of the
    /// per-flow candidate bitset.
    #[must_use]
    pub fn protocol_count(&self) -> usize {
        self.by_id.len()
    }

    /// Look up a dissector by id.
    #[must_use]
    pub fn get(&self, id: ProtocolId) -> Option<&dyn Dissector> {
        self.by_id.get(&id).map(|d| &**d)
    }

    /// `get_protocol_id`: name -> id.
    #[must_use]
    pub fn get_protocol_id(&self, name: &str) -> Option<ProtocolId> {
        self.name_to_id.get(name).copied()
    }

    /// `get_protocol_string`: id -> name.
    #[must_use]
    pub fn get_protocol_string(&self, id: ProtocolId) -> Option<&'static str> {
        self.by_id.get(&id).map(|d| d.name())
    }

    /// Iterate ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = ProtocolId> + '_ {
        self.by_id.keys().copied()
    }
}

impl std::fmt::Debug for DissectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DissectorRegistry")
            .field("protocol_count", &self.protocol_count())
            .finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissector::{DissectCtx, DissectOutcome};
    use flow_info::FlowInfoItem;
    use net::PacketInfo;

    #[derive(Debug)]
    struct StubDissector(&'static str);

    impl Dissector for StubDissector {
        fn name(&self) -> &'static str {
            self.0
        }

        fn dissect(
            &self,
            _info: &PacketInfo<'_>,
            _payload: &[u8],
            _tracking: &mut Option<Box<dyn FlowInfoItem>>,
            _ctx: &DissectCtx,
        ) -> DissectOutcome {
            DissectOutcome::NoMatches
        }
    }

    #[test]
    fn id_and_name_round_trip() {
        let mut registry = DissectorRegistry::new();
        let http_id = registry.register(Box::new(StubDissector("HTTP"))).unwrap();
        let dns_id = registry.register(Box::new(StubDissector("DNS"))).unwrap();

        assert_eq!(registry.get_protocol_id("HTTP"), Some(http_id));
        assert_eq!(
            registry.get_protocol_id(registry.get_protocol_string(dns_id).unwrap()),
            Some(dns_id)
        );
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut registry = DissectorRegistry::new();
        registry.register(Box::new(StubDissector("HTTP"))).unwrap();
        assert!(matches!(
            registry.register(Box::new(StubDissector("HTTP"))),
            Err(RegistryError::DuplicateName(_))
        ));
    }
}
