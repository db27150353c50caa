use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use dns_wire::types::*;

/// Default cap on the approximate memory held by cached records.
pub const MAX_CACHE_BYTES: usize = 128 * 1024;

/// Default cap on the number of cached records.
pub const MAX_CACHE_RECORDS: usize = 2048;

/// A stable reference to a record inside an [`RrCache`].
///
/// Handles survive eviction checks: a handle to a slot that has been
/// evicted and reused simply stops resolving, it never aliases a
/// different record.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct RecordHandle {
    slot: usize,
    generation: u64,
}

/// Caching for resource records, keyed by (owner, type, class).
///
/// Records carry an expiry time and a lock count.  Lookups only return
/// records that are unexpired or locked; locked records are never
/// evicted, no matter how stale.  The size caps are soft: when nothing
/// unlocked can be evicted, inserts still succeed.
///
/// Negative answers (name/type/class tuples known not to exist) are
/// memoised separately, also with an expiry.
#[derive(Debug)]
pub struct RrCache {
    slots: Vec<Slot>,
    free: Vec<usize>,

    /// Owner name, then (type, class), to slot indices in arrival
    /// order.
    ///
    /// INVARIANT: every index in here refers to an occupied slot, and
    /// every occupied slot appears exactly once.
    index: HashMap<DomainName, HashMap<(RecordType, RecordClass), Vec<usize>>>,

    /// Occupied slots ordered by expiry, soonest first.  Eviction
    /// takes from the front of this queue.
    ///
    /// INVARIANT: the keys in here are exactly the occupied slots.
    expiry_order: PriorityQueue<usize, Reverse<Instant>>,

    negatives: HashMap<(DomainName, RecordType, RecordClass), Instant>,

    record_count: usize,
    byte_count: usize,
    max_records: usize,
    max_bytes: usize,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    entry: Option<Entry>,
}

#[derive(Debug)]
struct Entry {
    record: ResourceRecord,
    expires: Instant,
    authoritative: bool,
    locks: u32,
    weight: usize,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.locks > 0 || self.expires > now
    }
}

impl Default for RrCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RrCache {
    /// A cache with the default size caps.
    pub fn new() -> Self {
        Self::with_limits(MAX_CACHE_BYTES, MAX_CACHE_RECORDS)
    }

    /// A cache with the given size caps.  A cap of zero disables that
    /// limit.
    pub fn with_limits(max_bytes: usize, max_records: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            expiry_order: PriorityQueue::new(),
            negatives: HashMap::new(),
            record_count: 0,
            byte_count: 0,
            max_records: if max_records == 0 {
                usize::MAX
            } else {
                max_records
            },
            max_bytes: if max_bytes == 0 { usize::MAX } else { max_bytes },
        }
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    /// Copy a record into the cache, returning a handle to the
    /// canonical in-cache instance.
    ///
    /// If an equivalent record (same owner, type, class, and rdata) is
    /// already present its expiry is refreshed: forward only for
    /// non-authoritative insertions, unconditionally for authoritative
    /// ones.  An authoritative insertion also upgrades the cached
    /// record's authoritative mark.
    ///
    /// Returns `None` for records the cache does not interpret
    /// (unknown type or class).
    pub fn insert(
        &mut self,
        record: &ResourceRecord,
        authoritative: bool,
        now: Instant,
    ) -> Option<RecordHandle> {
        if record.is_unknown() {
            return None;
        }

        let expires = now + Duration::from_secs(u64::from(record.ttl));
        let type_key = (record.rtype(), record.rclass);

        if let Some(types) = self.index.get(&record.name) {
            if let Some(indices) = types.get(&type_key) {
                for &slot_idx in indices {
                    let slot = &mut self.slots[slot_idx];
                    let entry = slot.entry.as_mut().unwrap();
                    if entry.record.rdata != record.rdata {
                        continue;
                    }

                    if authoritative {
                        entry.authoritative = true;
                        entry.expires = expires;
                    } else if !entry.authoritative && expires > entry.expires {
                        entry.expires = expires;
                    }

                    let priority = Reverse(entry.expires);
                    self.expiry_order.change_priority(&slot_idx, priority);
                    return Some(RecordHandle {
                        slot: slot_idx,
                        generation: slot.generation,
                    });
                }
            }
        }

        let weight = record_weight(record);
        self.make_room(weight, now);

        let slot_idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                self.slots.len() - 1
            }
        };

        let slot = &mut self.slots[slot_idx];
        slot.entry = Some(Entry {
            record: record.clone(),
            expires,
            authoritative,
            locks: 0,
            weight,
        });

        self.record_count += 1;
        self.byte_count += weight;
        self.index
            .entry(record.name.clone())
            .or_default()
            .entry(type_key)
            .or_default()
            .push(slot_idx);
        self.expiry_order.push(slot_idx, Reverse(expires));

        Some(RecordHandle {
            slot: slot_idx,
            generation: self.slots[slot_idx].generation,
        })
    }

    /// One record for (name, type, class), or `None`.  Ties are broken
    /// by arrival order.  Expired records are skipped unless locked.
    pub fn lookup_one(
        &self,
        name: &DomainName,
        rtype: RecordType,
        rclass: RecordClass,
        now: Instant,
    ) -> Option<RecordHandle> {
        let indices = self.index.get(name)?.get(&(rtype, rclass))?;
        for &slot_idx in indices {
            let slot = &self.slots[slot_idx];
            if slot.entry.as_ref().unwrap().is_live(now) {
                return Some(RecordHandle {
                    slot: slot_idx,
                    generation: slot.generation,
                });
            }
        }
        None
    }

    /// Every record for (name, type, class), expired or not; the
    /// caller filters with [`RrCache::is_live`] if it cares.
    pub fn lookup_list(
        &self,
        name: &DomainName,
        rtype: RecordType,
        rclass: RecordClass,
    ) -> Vec<RecordHandle> {
        let mut handles = Vec::new();
        if let Some(indices) = self.index.get(name).and_then(|t| t.get(&(rtype, rclass))) {
            for &slot_idx in indices {
                handles.push(RecordHandle {
                    slot: slot_idx,
                    generation: self.slots[slot_idx].generation,
                });
            }
        }
        handles
    }

    /// Every live record owned by `name` in the given class,
    /// regardless of type.  This is what a wildcard question gets.
    pub fn lookup_wildcard(
        &self,
        name: &DomainName,
        rclass: RecordClass,
        now: Instant,
    ) -> Vec<RecordHandle> {
        let mut handles = Vec::new();
        if let Some(types) = self.index.get(name) {
            for ((_, class), indices) in types {
                if *class != rclass {
                    continue;
                }
                for &slot_idx in indices {
                    let slot = &self.slots[slot_idx];
                    if slot.entry.as_ref().unwrap().is_live(now) {
                        handles.push(RecordHandle {
                            slot: slot_idx,
                            generation: slot.generation,
                        });
                    }
                }
            }
        }
        handles
    }

    /// Whether a fresh negative answer is memoised for the tuple.
    pub fn is_negative(
        &self,
        name: &DomainName,
        rtype: RecordType,
        rclass: RecordClass,
        now: Instant,
    ) -> bool {
        match self.negatives.get(&(name.clone(), rtype, rclass)) {
            Some(expires) => *expires > now,
            None => false,
        }
    }

    /// Memoise that the tuple does not exist, until `expires`.
    pub fn insert_negative(
        &mut self,
        name: &DomainName,
        rtype: RecordType,
        rclass: RecordClass,
        expires: Instant,
    ) {
        self.negatives.insert((name.clone(), rtype, rclass), expires);
    }

    /// The record behind a handle, if the slot has not been reused.
    pub fn get(&self, handle: RecordHandle) -> Option<&ResourceRecord> {
        let slot = self.slots.get(handle.slot)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref().map(|entry| &entry.record)
    }

    /// Whether the handle still resolves and the record is usable:
    /// unexpired or locked.
    pub fn is_live(&self, handle: RecordHandle, now: Instant) -> bool {
        match self.slots.get(handle.slot) {
            Some(slot) if slot.generation == handle.generation => {
                slot.entry.as_ref().is_some_and(|entry| entry.is_live(now))
            }
            _ => false,
        }
    }

    /// Pin a record: locked records are never evicted, even past
    /// expiry, until every lock is released.
    pub fn lock(&mut self, handle: RecordHandle) {
        if let Some(slot) = self.slots.get_mut(handle.slot) {
            if slot.generation == handle.generation {
                if let Some(entry) = slot.entry.as_mut() {
                    entry.locks += 1;
                }
            }
        }
    }

    /// Release one lock on a record.
    pub fn unlock(&mut self, handle: RecordHandle) {
        if let Some(slot) = self.slots.get_mut(handle.slot) {
            if slot.generation == handle.generation {
                if let Some(entry) = slot.entry.as_mut() {
                    entry.locks = entry.locks.saturating_sub(1);
                }
            }
        }
    }

    /// Find a nameserver for `zone` with a known address: an NS record
    /// for the zone whose host also has a cached A record.
    pub fn get_ns_addr(&self, zone: &DomainName, now: Instant) -> Option<(DomainName, Ipv4Addr)> {
        for ns_handle in self.lookup_list(zone, RecordType::NS, RecordClass::IN) {
            if !self.is_live(ns_handle, now) {
                continue;
            }
            let Some(ResourceRecord {
                rdata: Rdata::NS { nsdname },
                ..
            }) = self.get(ns_handle)
            else {
                continue;
            };

            if let Some(a_handle) = self.lookup_one(nsdname, RecordType::A, RecordClass::IN, now) {
                if let Some(ResourceRecord {
                    rdata: Rdata::A { address },
                    ..
                }) = self.get(a_handle)
                {
                    return Some((nsdname.clone(), *address));
                }
            }
        }
        None
    }

    /// Drop every expired, unlocked record.  Returns how many were
    /// dropped.
    pub fn remove_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        let mut locked = Vec::new();

        while let Some((&slot_idx, &Reverse(expires))) = self.expiry_order.peek() {
            if expires > now {
                break;
            }
            self.expiry_order.pop();
            if self.slots[slot_idx].entry.as_ref().unwrap().locks > 0 {
                locked.push((slot_idx, expires));
            } else {
                self.evict_slot(slot_idx);
                removed += 1;
            }
        }

        for (slot_idx, expires) in locked {
            self.expiry_order.push(slot_idx, Reverse(expires));
        }

        removed
    }

    /// Make room for an insertion of the given weight: clear expired
    /// records, then evict unlocked records in oldest-expiry-first
    /// order until under the caps.  Gives up (leaving the cache over
    /// its caps) once only locked records remain.
    fn make_room(&mut self, incoming_weight: usize, now: Instant) {
        self.remove_expired(now);

        let mut locked = Vec::new();
        while self.record_count + 1 > self.max_records
            || self.byte_count + incoming_weight > self.max_bytes
        {
            let Some((slot_idx, Reverse(expires))) = self.expiry_order.pop() else {
                break;
            };
            if self.slots[slot_idx].entry.as_ref().unwrap().locks > 0 {
                locked.push((slot_idx, expires));
            } else {
                self.evict_slot(slot_idx);
            }
        }

        for (slot_idx, expires) in locked {
            self.expiry_order.push(slot_idx, Reverse(expires));
        }
    }

    /// Remove an occupied slot entirely: entry, index, counters.  The
    /// generation bump invalidates outstanding handles.
    fn evict_slot(&mut self, slot_idx: usize) {
        let slot = &mut self.slots[slot_idx];
        let entry = slot.entry.take().unwrap();
        slot.generation += 1;

        self.record_count -= 1;
        self.byte_count -= entry.weight;

        let type_key = (entry.record.rtype(), entry.record.rclass);
        if let Some(types) = self.index.get_mut(&entry.record.name) {
            if let Some(indices) = types.get_mut(&type_key) {
                indices.retain(|&idx| idx != slot_idx);
                if indices.is_empty() {
                    types.remove(&type_key);
                }
            }
            if types.is_empty() {
                self.index.remove(&entry.record.name);
            }
        }

        self.free.push(slot_idx);
    }
}

/// Approximate memory held by one record, for the byte cap.
fn record_weight(record: &ResourceRecord) -> usize {
    let rdata = match &record.rdata {
        Rdata::A { .. } => 4,
        Rdata::AAAA { .. } => 16,
        Rdata::NS { nsdname } => nsdname.len,
        Rdata::CNAME { canonical } => canonical.len,
        Rdata::SOA { mname, rname, .. } => mname.len + rname.len + 20,
        Rdata::PTR { ptrdname } => ptrdname.len,
        Rdata::MX { exchange, .. } => exchange.len + 2,
        Rdata::TXT { octets } | Rdata::Unknown { octets, .. } => octets.len(),
    };
    record.name.len + rdata + 16
}
