// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IPv4 and IPv6 fragment reassembly (spec §4.2).
//!
//! Grounded on the segment-tracking structure of a BSD-style IP reassembly
//! implementation: each partial datagram is a set of covered byte ranges
//! plus a growing byte buffer, keyed by `(src, dst, identifier, protocol)`.
//! Both IP versions share the bookkeeping (ranges/bytes/timeout); only the
//! key shape differs, so it is expressed here as one generic reassembler
//! parameterized over the key type.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::{Ipv4Addr, Ipv6Addr};

use ahash::RandomState;

/// Outcome of inserting one fragment.
#[derive(Debug)]
pub enum InsertOutcome {
    /// More fragments are needed; nothing further to do with this packet.
    Held,
    /// The datagram is now complete; bytes are the reassembled payload
    /// (everything after the original, first-fragment's IP header).
    Complete(Box<[u8]>),
    /// The fragment was rejected (cap pressure) and must be dropped.
    Drop,
}

/// Tunable limits for one reassembly context (spec §6 configuration surface).
#[derive(Debug, Clone, Copy)]
pub struct ReassemblyLimits {
    /// Maximum bytes buffered for partials from a single host.
    pub per_host_memory_limit: usize,
    /// Maximum bytes buffered across all partials in this context.
    pub total_memory_limit: usize,
    /// Max allowed gap between a partial's first and most recent fragment,
    /// in the same time unit as the caller's `now` parameter.
    pub reassembly_timeout: u64,
}

impl Default for ReassemblyLimits {
    fn default() -> Self {
        ReassemblyLimits {
            per_host_memory_limit: 4 * 1024 * 1024,
            total_memory_limit: 64 * 1024 * 1024,
            reassembly_timeout: 30,
        }
    }
}

struct Partial {
    /// Sorted, non-overlapping-after-insert covered byte ranges `[start, end)`.
    ranges: Vec<(usize, usize)>,
    buf: Vec<u8>,
    highest_end_seen: usize,
    final_fragment_seen: bool,
    first_seen: u64,
    last_seen: u64,
}

impl Partial {
    fn new(now: u64) -> Self {
        Partial {
            ranges: Vec::new(),
            buf: Vec::new(),
            highest_end_seen: 0,
            final_fragment_seen: false,
            first_seen: now,
            last_seen: now,
        }
    }

    fn bytes_buffered(&self) -> usize {
        self.buf.len()
    }

    /// Insert fragment `data` at `offset`. Overlapping bytes: last writer
    /// wins (spec §4.2: source does not specify, documented choice).
    fn insert_fragment(&mut self, offset: usize, data: &[u8], more_fragments: bool, now: u64) {
        let end = offset + data.len();
        if self.buf.len() < end {
            self.buf.resize(end, 0);
        }
        self.buf[offset..end].copy_from_slice(data);
        self.highest_end_seen = self.highest_end_seen.max(end);
        if !more_fragments {
            self.final_fragment_seen = true;
        }
        self.last_seen = now;

        // Merge the new range into the sorted range list.
        self.ranges.push((offset, end));
        self.ranges.sort_unstable_by_key(|r| r.0);
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(self.ranges.len());
        for &(s, e) in &self.ranges {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        self.ranges = merged;
    }

    fn is_complete(&self) -> bool {
        self.final_fragment_seen
            && self.ranges.len() == 1
            && self.ranges[0] == (0, self.highest_end_seen)
    }

    fn is_expired(&self, now: u64, timeout: u64) -> bool {
        now.saturating_sub(self.first_seen) > timeout || now.saturating_sub(self.last_seen) > timeout
    }
}

/// Generic fragment reassembler, instantiated once for IPv4 and once for
/// IPv6 (see [`Ipv4Reassembly`] / [`Ipv6Reassembly`]).
struct Reassembler<K, H> {
    partials: HashMap<K, Partial, RandomState>,
    per_host_bytes: HashMap<H, usize, RandomState>,
    total_bytes: usize,
    limits: ReassemblyLimits,
}

impl<K: Eq + Hash + Clone, H: Eq + Hash + Clone> Reassembler<K, H> {
    fn new(limits: ReassemblyLimits) -> Self {
        Reassembler {
            partials: HashMap::default(),
            per_host_bytes: HashMap::default(),
            total_bytes: 0,
            limits,
        }
    }

    /// Lazily evict partials past the reassembly timeout (spec §4.2 `tick`).
    fn tick(&mut self, now: u64, host_of: impl Fn(&K) -> H) {
        let expired: Vec<K> = self
            .partials
            .iter()
            .filter(|(_, p)| p.is_expired(now, self.limits.reassembly_timeout))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.evict(&key, &host_of);
        }
    }

    fn evict(&mut self, key: &K, host_of: &impl Fn(&K) -> H) {
        if let Some(partial) = self.partials.remove(key) {
            let bytes = partial.bytes_buffered();
            self.total_bytes = self.total_bytes.saturating_sub(bytes);
            let host = host_of(key);
            if let Some(host_bytes) = self.per_host_bytes.get_mut(&host) {
                *host_bytes = host_bytes.saturating_sub(bytes);
            }
        }
    }

    fn insert(
        &mut self,
        key: K,
        host: H,
        offset: usize,
        data: &[u8],
        more_fragments: bool,
        now: u64,
    ) -> InsertOutcome {
        self.tick(now, |_| host.clone());

        let projected_host_bytes =
            self.per_host_bytes.get(&host).copied().unwrap_or(0) + data.len();
        let projected_total_bytes = self.total_bytes + data.len();
        if projected_host_bytes > self.limits.per_host_memory_limit
            || projected_total_bytes > self.limits.total_memory_limit
        {
            return InsertOutcome::Drop;
        }

        let before = self
            .partials
            .get(&key)
            .map(Partial::bytes_buffered)
            .unwrap_or(0);
        let partial = self.partials.entry(key.clone()).or_insert_with(|| Partial::new(now));
        partial.insert_fragment(offset, data, more_fragments, now);
        let after = partial.bytes_buffered();
        let delta = after.saturating_sub(before);
        self.total_bytes += delta;
        *self.per_host_bytes.entry(host).or_insert(0) += delta;

        if partial.is_complete() {
            let partial = self.partials.remove(&key).expect("just inserted");
            self.total_bytes = self.total_bytes.saturating_sub(partial.bytes_buffered());
            InsertOutcome::Complete(partial.buf.into_boxed_slice())
        } else {
            InsertOutcome::Held
        }
    }
}

/// `(src, dst, identification, protocol)` key for IPv4 reassembly partials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4FragmentId {
    /// Source address of the first-seen fragment.
    pub src: Ipv4Addr,
    /// Destination address.
    pub dst: Ipv4Addr,
    /// IPv4 `identification` field.
    pub identification: u16,
    /// The protocol being carried (post-reassembly L4 protocol number).
    pub protocol: u8,
}

/// IPv4 fragment reassembly context.
pub struct Ipv4Reassembly {
    inner: Reassembler<Ipv4FragmentId, Ipv4Addr>,
}

impl Ipv4Reassembly {
    /// Build a new context with the given limits.
    #[must_use]
    pub fn new(limits: ReassemblyLimits) -> Self {
        Ipv4Reassembly {
            inner: Reassembler::new(limits),
        }
    }

    /// Insert one IPv4 fragment.
    pub fn insert(
        &mut self,
        id: Ipv4FragmentId,
        offset: usize,
        data: &[u8],
        more_fragments: bool,
        now: u64,
    ) -> InsertOutcome {
        let host = id.src;
        self.inner.insert(id, host, offset, data, more_fragments, now)
    }

    /// Lazily evict expired partials.
    pub fn tick(&mut self, now: u64) {
        self.inner.tick(now, |id| id.src);
    }

    /// Total bytes currently buffered across all partials.
    #[must_use]
    pub fn total_bytes_buffered(&self) -> usize {
        self.inner.total_bytes
    }
}

/// `(src, dst, identification, protocol)` key for IPv6 reassembly partials.
/// The IPv6 fragment header's identification field is 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv6FragmentId {
    /// Source address of the first-seen fragment.
    pub src: Ipv6Addr,
    /// Destination address.
    pub dst: Ipv6Addr,
    /// IPv6 fragment header `identification` field.
    pub identification: u32,
    /// The protocol being carried (post-reassembly next-header value).
    pub protocol: u8,
}

/// IPv6 fragment reassembly context.
pub struct Ipv6Reassembly {
    inner: Reassembler<Ipv6FragmentId, Ipv6Addr>,
}

impl Ipv6Reassembly {
    /// Build a new context with the given limits.
    #[must_use]
    pub fn new(limits: ReassemblyLimits) -> Self {
        Ipv6Reassembly {
            inner: Reassembler::new(limits),
        }
    }

    /// Insert one IPv6 fragment.
    pub fn insert(
        &mut self,
        id: Ipv6FragmentId,
        offset: usize,
        data: &[u8],
        more_fragments: bool,
        now: u64,
    ) -> InsertOutcome {
        let host = id.src;
        self.inner.insert(id, host, offset, data, more_fragments, now)
    }

    /// Lazily evict expired partials.
    pub fn tick(&mut self, now: u64) {
        self.inner.tick(now, |id| id.src);
    }

    /// Total bytes currently buffered across all partials.
    #[must_use]
    pub fn total_bytes_buffered(&self) -> usize {
        self.inner.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(ident: u16) -> Ipv4FragmentId {
        Ipv4FragmentId {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            identification: ident,
            protocol: 17,
        }
    }

    #[test]
    fn two_fragments_reassemble_in_order() {
        let mut ctx = Ipv4Reassembly::new(ReassemblyLimits::default());
        let first = vec![0xAAu8; 1400];
        let second = vec![0xBBu8; 648];

        let held = ctx.insert(id(1), 0, &first, true, 0);
        assert!(matches!(held, InsertOutcome::Held));

        let complete = ctx.insert(id(1), 1400, &second, false, 1);
        match complete {
            InsertOutcome::Complete(buf) => {
                assert_eq!(buf.len(), 2048);
                assert_eq!(&buf[..1400], &first[..]);
                assert_eq!(&buf[1400..], &second[..]);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn out_of_order_fragments_still_reassemble() {
        let mut ctx = Ipv4Reassembly::new(ReassemblyLimits::default());
        let first = vec![0xAAu8; 1400];
        let second = vec![0xBBu8; 100];

        let held = ctx.insert(id(2), 1400, &second, false, 0);
        assert!(matches!(held, InsertOutcome::Held));
        let complete = ctx.insert(id(2), 0, &first, true, 1);
        assert!(matches!(complete, InsertOutcome::Complete(_)));
    }

    #[test]
    fn per_host_cap_drops_fragment() {
        let limits = ReassemblyLimits {
            per_host_memory_limit: 100,
            total_memory_limit: 1_000_000,
            reassembly_timeout: 30,
        };
        let mut ctx = Ipv4Reassembly::new(limits);
        let data = vec![0u8; 200];
        let outcome = ctx.insert(id(3), 0, &data, true, 0);
        assert!(matches!(outcome, InsertOutcome::Drop));
    }

    #[test]
    fn expired_partial_is_evicted_on_tick() {
        let limits = ReassemblyLimits {
            reassembly_timeout: 5,
            ..ReassemblyLimits::default()
        };
        let mut ctx = Ipv4Reassembly::new(limits);
        let _ = ctx.insert(id(4), 0, &[0u8; 10], true, 0);
        assert_eq!(ctx.total_bytes_buffered(), 10);
        ctx.tick(100);
        assert_eq!(ctx.total_bytes_buffered(), 0);
    }
}
