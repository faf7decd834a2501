use std::collections::{HashMap, HashSet};

use alloy_primitives::Address;

/// Per-address bookkeeping kept while the address is cached
#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    /// Sightings across scan windows since the entry was created
    touch_count: u64,
    /// Insertion order, breaks ties between equal touch counts
    seq: u64,
}

/// Bounded address cache with least-frequently-used eviction
///
/// Deduplicates addresses seen across scan windows so each one is resolved
/// once per cache lifetime, and tracks which newly seen addresses still need
/// resolving ("pending"). Owned by a single driver; no internal locking.
#[derive(Debug, Default)]
pub struct AddressCache {
    entries: HashMap<Address, CacheEntry>,
    /// Pending addresses in first-sighting order
    pending: Vec<Address>,
    pending_set: HashSet<Address>,
    next_seq: u64,
    evicted_total: u64,
}

impl AddressCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sighting of `address`
    pub fn observe(&mut self, address: Address) {
        if let Some(entry) = self.entries.get_mut(&address) {
            entry.touch_count += 1;
            return;
        }

        self.entries.insert(
            address,
            CacheEntry {
                touch_count: 1,
                seq: self.next_seq,
            },
        );
        self.next_seq += 1;
        self.mark_pending(address);
    }

    pub fn observe_all(&mut self, addresses: impl IntoIterator<Item = Address>) {
        for address in addresses {
            self.observe(address);
        }
    }

    /// Number of addresses waiting to be resolved
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Take every pending address, leaving the pending set empty
    pub fn drain_pending(&mut self) -> Vec<Address> {
        self.pending_set.clear();
        std::mem::take(&mut self.pending)
    }

    /// Mark addresses pending again, e.g. after their lookup failed
    pub fn requeue(&mut self, addresses: impl IntoIterator<Item = Address>) {
        for address in addresses {
            self.mark_pending(address);
        }
    }

    fn mark_pending(&mut self, address: Address) {
        if self.pending_set.insert(address) {
            self.pending.push(address);
        }
    }

    /// Shrink the cache once it holds more than `max_size` entries
    ///
    /// Keeps the `floor(max_size * reduce_factor)` entries with the highest
    /// touch counts (earlier insertion wins ties) and drops the rest. Pending
    /// membership is unaffected. Returns the number of evicted entries.
    pub fn evict_if_over_capacity(&mut self, max_size: usize, reduce_factor: f64) -> usize {
        if self.entries.len() <= max_size {
            return 0;
        }

        // Fixed-point so that e.g. 90 * 0.7 keeps 63, not 62
        let per_million = (reduce_factor.clamp(0.0, 1.0) * 1_000_000.0).round() as u128;
        let keep = (max_size as u128 * per_million / 1_000_000) as usize;

        let mut ranked: Vec<(Address, CacheEntry)> = self.entries.drain().collect();
        ranked.sort_by(|(_, a), (_, b)| {
            b.touch_count
                .cmp(&a.touch_count)
                .then(a.seq.cmp(&b.seq))
        });

        let evicted = ranked.len().saturating_sub(keep);
        ranked.truncate(keep);
        self.entries = ranked.into_iter().collect();
        self.evicted_total += evicted as u64;

        evicted
    }

    pub fn touch_count(&self, address: &Address) -> Option<u64> {
        self.entries.get(address).map(|e| e.touch_count)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.entries.contains_key(address)
    }

    pub fn is_pending(&self, address: &Address) -> bool {
        self.pending_set.contains(address)
    }

    /// Get number of entries in cache
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            pending: self.pending.len(),
            evicted_total: self.evicted_total,
        }
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub pending: usize,
    pub evicted_total: u64,
}
