// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Engine configuration surface (spec §6 "Configuration surface").
//!
//! Spec §5: configuration must be fully set before packet processing
//! begins; mutating it afterwards is undefined. We enforce that statically
//! by having [`EngineBuilder`] consume itself into an immutable
//! [`EngineConfig`] before an [`crate::engine::Engine`] can be built,
//! rather than exposing setters on the running engine.

use std::collections::HashMap;
use std::time::Duration;

use flow_table::{TCP_PROTO_NUMBER, UDP_PROTO_NUMBER};

use crate::registry::ProtocolId;

/// Accuracy hint passed to a dissector (spec §6 `set_protocol_accuracy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolAccuracy {
    /// Minimize false negatives; cheap heuristics.
    Low,
    /// Default.
    Medium,
    /// Spend more effort before committing a match.
    High,
}

/// `(l4_protocol, port)` key for the L7-skip override table (spec §9
/// "Hashing": replace the source's intrusive hash map with a standard one
/// keyed by `(l4, port)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct L7SkipKey {
    /// IANA L4 protocol number (`TCP_PROTO_NUMBER`/`UDP_PROTO_NUMBER`).
    pub l4_protocol: u8,
    /// Destination port the override applies to.
    pub port: u16,
}

/// Configuration errors (spec §7 "Configuration: calling an option with
/// invalid arguments").
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A size/limit/timeout argument was out of the accepted range.
    #[error("invalid configuration argument for `{option}`: {reason}")]
    InvalidArgument {
        /// The option that was called.
        option: &'static str,
        /// Why the argument was rejected.
        reason: &'static str,
    },
}

/// Fully-resolved, immutable engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub(crate) max_trials: u32,
    pub(crate) enabled_protocols: Vec<bool>,
    pub(crate) ipv4_fragmentation: Option<net::reassembly::ReassemblyLimits>,
    pub(crate) ipv6_fragmentation: Option<net::reassembly::ReassemblyLimits>,
    pub(crate) tcp_reordering_enabled: bool,
    pub(crate) l7_skip_table: HashMap<L7SkipKey, ProtocolId>,
    pub(crate) protocol_accuracy: HashMap<ProtocolId, ProtocolAccuracy>,
    pub(crate) field_extraction_enabled: Vec<bool>,
    pub(crate) max_tunnel_depth: usize,
    pub(crate) num_partitions: usize,
    pub(crate) max_flows_per_partition: usize,
}

/// Builder for [`EngineConfig`], mirroring the source's per-option setter
/// surface (spec §6).
#[derive(Debug)]
pub struct EngineBuilder {
    max_trials: u32,
    protocol_count: usize,
    enabled_protocols: Vec<bool>,
    ipv4_fragmentation: Option<net::reassembly::ReassemblyLimits>,
    ipv6_fragmentation: Option<net::reassembly::ReassemblyLimits>,
    tcp_reordering_enabled: bool,
    l7_skip_table: HashMap<L7SkipKey, ProtocolId>,
    protocol_accuracy: HashMap<ProtocolId, ProtocolAccuracy>,
    field_extraction_enabled: Vec<bool>,
    max_tunnel_depth: usize,
    num_partitions: usize,
    max_flows_per_partition: usize,
}

impl EngineBuilder {
    /// Start a builder for a registry with `protocol_count` known
    /// protocols, `inspect_all()` by default (spec §6 `inspect_all`).
    #[must_use]
    pub fn new(protocol_count: usize) -> Self {
        EngineBuilder {
            max_trials: 3,
            protocol_count,
            enabled_protocols: vec![true; protocol_count],
            ipv4_fragmentation: None,
            ipv6_fragmentation: None,
            tcp_reordering_enabled: true,
            l7_skip_table: HashMap::new(),
            protocol_accuracy: HashMap::new(),
            field_extraction_enabled: vec![false; protocol_count],
            max_tunnel_depth: net::DEFAULT_MAX_TUNNEL_DEPTH,
            num_partitions: 1,
            max_flows_per_partition: 1 << 20,
        }
    }

    /// `set_max_trials(n)`; `0` means unlimited.
    #[must_use]
    pub fn set_max_trials(mut self, n: u32) -> Self {
        self.max_trials = n;
        self
    }

    /// `enable_protocol(id)`.
    pub fn enable_protocol(&mut self, id: ProtocolId) -> Result<(), ConfigError> {
        self.toggle_protocol(id, true)
    }

    /// `disable_protocol(id)`.
    pub fn disable_protocol(&mut self, id: ProtocolId) -> Result<(), ConfigError> {
        self.toggle_protocol(id, false)
    }

    fn toggle_protocol(&mut self, id: ProtocolId, enabled: bool) -> Result<(), ConfigError> {
        let idx = usize::from(id);
        let slot = self
            .enabled_protocols
            .get_mut(idx)
            .ok_or(ConfigError::InvalidArgument {
                option: "enable_protocol/disable_protocol",
                reason: "unknown protocol id",
            })?;
        *slot = enabled;
        Ok(())
    }

    /// `inspect_all()`.
    #[must_use]
    pub fn inspect_all(mut self) -> Self {
        self.enabled_protocols.fill(true);
        self
    }

    /// `inspect_nothing()`.
    #[must_use]
    pub fn inspect_nothing(mut self) -> Self {
        self.enabled_protocols.fill(false);
        self
    }

    /// `ipv4_fragmentation_enable(table_size)`. `table_size` is accepted
    /// for interface parity with the source but this implementation's
    /// reassembly map grows on demand; it is otherwise unused.
    #[must_use]
    pub fn ipv4_fragmentation_enable(mut self, _table_size: usize) -> Self {
        self.ipv4_fragmentation
            .get_or_insert_with(net::reassembly::ReassemblyLimits::default);
        self
    }

    /// `ipv4_fragmentation_disable()`.
    #[must_use]
    pub fn ipv4_fragmentation_disable(mut self) -> Self {
        self.ipv4_fragmentation = None;
        self
    }

    /// `ipv6_fragmentation_enable(table_size)`.
    #[must_use]
    pub fn ipv6_fragmentation_enable(mut self, _table_size: usize) -> Self {
        self.ipv6_fragmentation
            .get_or_insert_with(net::reassembly::ReassemblyLimits::default);
        self
    }

    /// `ipv6_fragmentation_disable()`.
    #[must_use]
    pub fn ipv6_fragmentation_disable(mut self) -> Self {
        self.ipv6_fragmentation = None;
        self
    }

    /// `ipv4_fragmentation_set_per_host_memory_limit(n)`.
    pub fn ipv4_fragmentation_set_per_host_memory_limit(
        &mut self,
        n: usize,
    ) -> Result<(), ConfigError> {
        Self::set_limit(&mut self.ipv4_fragmentation, |l| {
            l.per_host_memory_limit = n;
        })
    }

    /// `ipv4_fragmentation_set_total_memory_limit(n)`.
    pub fn ipv4_fragmentation_set_total_memory_limit(
        &mut self,
        n: usize,
    ) -> Result<(), ConfigError> {
        Self::set_limit(&mut self.ipv4_fragmentation, |l| {
            l.total_memory_limit = n;
        })
    }

    /// `ipv4_fragmentation_set_reassembly_timeout(sec)`.
    pub fn ipv4_fragmentation_set_reassembly_timeout(
        &mut self,
        sec: u64,
    ) -> Result<(), ConfigError> {
        Self::set_limit(&mut self.ipv4_fragmentation, |l| {
            l.reassembly_timeout = Duration::from_secs(sec);
        })
    }

    /// `ipv6_fragmentation_set_per_host_memory_limit(n)`.
    pub fn ipv6_fragmentation_set_per_host_memory_limit(
        &mut self,
        n: usize,
    ) -> Result<(), ConfigError> {
        Self::set_limit(&mut self.ipv6_fragmentation, |l| {
            l.per_host_memory_limit = n;
        })
    }

    /// `ipv6_fragmentation_set_total_memory_limit(n)`.
    pub fn ipv6_fragmentation_set_total_memory_limit(
        &mut self,
        n: usize,
    ) -> Result<(), ConfigError> {
        Self::set_limit(&mut self.ipv6_fragmentation, |l| {
            l.total_memory_limit = n;
        })
    }

    /// `ipv6_fragmentation_set_reassembly_timeout(sec)`.
    pub fn ipv6_fragmentation_set_reassembly_timeout(
        &mut self,
        sec: u64,
    ) -> Result<(), ConfigError> {
        Self::set_limit(&mut self.ipv6_fragmentation, |l| {
            l.reassembly_timeout = Duration::from_secs(sec);
        })
    }

    fn set_limit(
        slot: &mut Option<net::reassembly::ReassemblyLimits>,
        apply: impl FnOnce(&mut net::reassembly::ReassemblyLimits),
    ) -> Result<(), ConfigError> {
        let limits = slot.as_mut().ok_or(ConfigError::InvalidArgument {
            option: "*_fragmentation_set_*",
            reason: "fragmentation is not enabled",
        })?;
        apply(limits);
        Ok(())
    }

    /// `tcp_reordering_enable()`.
    #[must_use]
    pub fn tcp_reordering_enable(mut self) -> Self {
        self.tcp_reordering_enabled = true;
        self
    }

    /// `tcp_reordering_disable()`.
    #[must_use]
    pub fn tcp_reordering_disable(mut self) -> Self {
        self.tcp_reordering_enabled = false;
        self
    }

    /// `skip_L7_parsing_by_port(l4, port, id)`.
    pub fn skip_l7_parsing_by_port(
        &mut self,
        l4_protocol: u8,
        port: u16,
        id: ProtocolId,
    ) -> Result<(), ConfigError> {
        if l4_protocol != TCP_PROTO_NUMBER && l4_protocol != UDP_PROTO_NUMBER {
            return Err(ConfigError::InvalidArgument {
                option: "skip_L7_parsing_by_port",
                reason: "l4 must be TCP or UDP",
            });
        }
        self.l7_skip_table
            .insert(L7SkipKey { l4_protocol, port }, id);
        Ok(())
    }

    /// `set_protocol_accuracy(id, level)`.
    pub fn set_protocol_accuracy(
        &mut self,
        id: ProtocolId,
        level: ProtocolAccuracy,
    ) -> Result<(), ConfigError> {
        if usize::from(id) >= self.protocol_count {
            return Err(ConfigError::InvalidArgument {
                option: "set_protocol_accuracy",
                reason: "unknown protocol id",
            });
        }
        self.protocol_accuracy.insert(id, level);
        Ok(())
    }

    /// `protocol_field_add(id, ..)` / the field-extraction toggle family
    /// collapse here to a single per-protocol enable flag: this
    /// implementation always extracts every field a dissector offers once
    /// extraction is enabled for that protocol, rather than tracking a
    /// separate add/remove/required set per field.
    pub fn set_field_extraction_enabled(
        &mut self,
        id: ProtocolId,
        enabled: bool,
    ) -> Result<(), ConfigError> {
        let idx = usize::from(id);
        let slot =
            self.field_extraction_enabled
                .get_mut(idx)
                .ok_or(ConfigError::InvalidArgument {
                    option: "protocol_field_add/_remove",
                    reason: "unknown protocol id",
                })?;
        *slot = enabled;
        Ok(())
    }

    /// Cap on IP-in-IP/IPv6-in-IPv4 tunnel nesting (spec §4.1).
    #[must_use]
    pub fn max_tunnel_depth(mut self, depth: usize) -> Self {
        self.max_tunnel_depth = depth;
        self
    }

    /// `init(.., num_partitions)`.
    #[must_use]
    pub fn num_partitions(mut self, n: usize) -> Self {
        self.num_partitions = n.max(1);
        self
    }

    /// `init(.., max_flows_v4, max_flows_v6, ..)` collapse to a single
    /// per-partition cap shared across address families, since flows are
    /// partitioned by hash rather than by IP version.
    #[must_use]
    pub fn max_flows_per_partition(mut self, n: usize) -> Self {
        self.max_flows_per_partition = n;
        self
    }

    /// Freeze the configuration.
    #[must_use]
    pub fn build(self) -> EngineConfig {
        EngineConfig {
            max_trials: self.max_trials,
            enabled_protocols: self.enabled_protocols,
            ipv4_fragmentation: self.ipv4_fragmentation,
            ipv6_fragmentation: self.ipv6_fragmentation,
            tcp_reordering_enabled: self.tcp_reordering_enabled,
            l7_skip_table: self.l7_skip_table,
            protocol_accuracy: self.protocol_accuracy,
            field_extraction_enabled: self.field_extraction_enabled,
            max_tunnel_depth: self.max_tunnel_depth,
            num_partitions: self.num_partitions,
            max_flows_per_partition: self.max_flows_per_partition,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_protocol_id_is_rejected() {
        let mut builder = EngineBuilder::new(2);
        assert!(matches!(
            builder.enable_protocol(5),
            Err(ConfigError::InvalidArgument { .. })
        ));
        assert!(matches!(
            builder.set_protocol_accuracy(5, ProtocolAccuracy::High),
            Err(ConfigError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn skip_l7_parsing_requires_tcp_or_udp() {
        let mut builder = EngineBuilder::new(1);
        assert!(builder.skip_l7_parsing_by_port(1, 443, 0).is_err());
        assert!(builder.skip_l7_parsing_by_port(TCP_PROTO_NUMBER, 443, 0).is_ok());
    }

    #[test]
    fn fragmentation_limit_requires_enabling_first() {
        let mut builder = EngineBuilder::new(1);
        assert!(builder.ipv4_fragmentation_set_total_memory_limit(1024).is_err());
        let mut builder = builder.ipv4_fragmentation_enable(1024);
        assert!(builder.ipv4_fragmentation_set_total_memory_limit(2048).is_ok());
    }

    #[test]
    fn inspect_nothing_then_inspect_all_round_trips() {
        let config = EngineBuilder::new(3).inspect_nothing().inspect_all().build();
        assert!(config.enabled_protocols.iter().all(|&e| e));
    }

    #[test]
    fn inspect_nothing_disables_every_registered_protocol() {
        use pretty_assertions::assert_eq;

        let config = EngineBuilder::new(4).inspect_nothing().build();
        assert_eq!(config.enabled_protocols, vec![false; 4]);
    }
}
