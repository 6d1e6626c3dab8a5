// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Generic, downcast-able extension storage for per-flow state.
//!
//! The flow table stores per-flow `tracking` and `user_data` as opaque
//! [`FlowInfoItem`] trait objects so it never needs to know the concrete
//! type a dissector or caller stashes there.

pub mod flow_info_item;

pub use flow_info_item::*;
