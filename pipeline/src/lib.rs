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

//! # Classification Engine
//!
//! This crate wires the pieces built elsewhere in the workspace
//! ([`net`] header parsing and reassembly, [`flow_table`] flow lifecycle
//! and TCP tracking) into the engine described by the specification: a
//! [`DissectorRegistry`](registry::DissectorRegistry) of pluggable
//! protocol [`Dissector`](dissector::Dissector)s, an
//! [`EngineConfig`](config::EngineConfig) describing which protocols and
//! resource limits are active, and the [`Engine`](engine::Engine) facade
//! that ties them together on every packet.
//!
//! ```rust
//! use dpi_pipeline::config::EngineBuilder;
//! use dpi_pipeline::engine::Engine;
//! use dpi_pipeline::registry::DissectorRegistry;
//!
//! let registry = DissectorRegistry::new();
//! let config = EngineBuilder::new(registry.protocol_count())
//!     .set_max_trials(3)
//!     .build();
//! let mut engine = Engine::new(config, registry);
//! let result = engine.get_protocol(&[], 0, 0);
//! ```

pub mod config;
pub mod dissector;
pub mod engine;
pub mod registry;

pub use config::{ConfigError, EngineBuilder, EngineConfig, ProtocolAccuracy};
pub use dissector::{DissectCtx, DissectOutcome, Dissector, ExtractedField};
pub use engine::{Engine, ProtocolResult};
pub use registry::{DissectorRegistry, ProtocolId, RegistryError};
