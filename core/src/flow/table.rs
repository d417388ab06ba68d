/*
* Copyright 2019 Comcast Cable Communications Management, LLC
*
* Licensed under the Apache License, Version 2.0 (the "License");
* you may not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
* http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific language governing permissions and
* limitations under the License.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::key::{hash_crc, FlowKey, HashFn};
use crate::eal::memory::{Memory, MemoryError, Memzone};
use crate::eal::SocketId;
use crate::{ensure, info};
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use thiserror::Error;

/// Flow table errors.
#[derive(Debug, Error)]
pub enum FlowTableError {
    /// The table parameters are out of range.
    #[error("invalid flow table parameters: {0}")]
    InvalidParams(String),

    /// The table memory cannot be reserved on the socket.
    #[error("cannot create flow table '{name}' on {socket:?}.")]
    Creation {
        /// The table name.
        name: String,
        /// The socket the table targeted.
        socket: SocketId,
        /// The underlying reservation failure, if any.
        #[source]
        source: Option<MemoryError>,
    },

    /// The key's bucket holds `bucket_entries` other keys.
    #[error("flow table bucket {0} is full.")]
    Full(usize),
}

/// The accounting record of a flow.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FlowSlot {
    /// Packets seen.
    pub packets: u64,
    /// Bytes seen.
    pub bytes: u64,
    /// Timestamp of the first packet, in ticks.
    pub first_seen: u64,
    /// Timestamp of the latest packet, in ticks.
    pub last_seen: u64,
}

impl FlowSlot {
    /// Accounts one packet of `len` bytes seen at `ts`.
    pub fn record(&mut self, len: usize, ts: u64) {
        if self.packets == 0 {
            self.first_seen = ts;
        }
        self.packets += 1;
        self.bytes += len as u64;
        self.last_seen = ts;
    }
}

/// Flow table creation parameters.
#[derive(Clone, Copy)]
pub struct FlowTableParams {
    /// Total number of entries, a power of two.
    pub entries: usize,
    /// Entries per bucket, a power of two no larger than `entries`.
    pub bucket_entries: usize,
    /// The key hash function.
    pub hash_fn: HashFn,
    /// The initial value of the hash.
    pub hash_init_val: u32,
}

impl Default for FlowTableParams {
    fn default() -> Self {
        FlowTableParams {
            entries: 4_194_304,
            bucket_entries: 4,
            hash_fn: hash_crc,
            hash_init_val: 0,
        }
    }
}

impl fmt::Debug for FlowTableParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("params")
            .field("entries", &self.entries)
            .field("bucket_entries", &self.bucket_entries)
            .field("hash_init_val", &format_args!("{:#x}", self.hash_init_val))
            .finish()
    }
}

#[derive(Clone)]
struct Entry {
    key: FlowKey,
    sig: u32,
    slot: FlowSlot,
}

/// A reference to the slot of a flow, returned by `lookup_or_insert`.
pub struct SlotRef<'a> {
    position: usize,
    inserted: bool,
    slot: &'a mut FlowSlot,
}

impl SlotRef<'_> {
    /// Returns the position of the entry in the table.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns whether the slot was just inserted.
    #[inline]
    pub fn is_new(&self) -> bool {
        self.inserted
    }
}

impl Deref for SlotRef<'_> {
    type Target = FlowSlot;

    fn deref(&self) -> &FlowSlot {
        self.slot
    }
}

impl DerefMut for SlotRef<'_> {
    fn deref_mut(&mut self) -> &mut FlowSlot {
        self.slot
    }
}

/// A fixed-capacity flow index scoped to one socket.
///
/// The table is split into buckets of `bucket_entries` entries. A key
/// lives in the bucket selected by the low bits of its hash, and an insert
/// into a bucket already holding `bucket_entries` other keys fails. The
/// table never grows and never evicts.
///
/// All methods take `&mut self` for writes; workers sharing a table must
/// synchronize among themselves.
pub struct FlowTable {
    name: String,
    params: FlowTableParams,
    bucket_mask: usize,
    entries: Vec<Option<Entry>>,
    len: usize,
    zone: Memzone,
}

impl FlowTable {
    /// Creates a flow table on `socket`.
    ///
    /// # Errors
    ///
    /// Returns `FlowTableError::InvalidParams` if the sizes are not powers
    /// of two or the bucket is larger than the table, or
    /// `FlowTableError::Creation` if the memory cannot be reserved on
    /// `socket` or allocated.
    pub fn new<S: Into<String>>(
        name: S,
        socket: SocketId,
        params: FlowTableParams,
        memory: &Arc<Memory>,
    ) -> Result<Self, FlowTableError> {
        let name: String = name.into();

        ensure!(
            params.entries.is_power_of_two(),
            FlowTableError::InvalidParams(format!(
                "entries {} is not a power of two.",
                params.entries
            ))
        );
        ensure!(
            params.bucket_entries.is_power_of_two() && params.bucket_entries <= params.entries,
            FlowTableError::InvalidParams(format!(
                "bucket entries {} is not a power of two no larger than {}.",
                params.bucket_entries, params.entries
            ))
        );

        let creation = |source| FlowTableError::Creation {
            name: name.clone(),
            socket,
            source,
        };

        let len = params
            .entries
            .checked_mul(mem::size_of::<Option<Entry>>())
            .ok_or_else(|| creation(None))?;
        let zone = memory
            .reserve(&name, "flow_table", len, socket)
            .map_err(|err| creation(Some(err)))?;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(params.entries)
            .map_err(|_| creation(None))?;
        entries.resize(params.entries, None);

        info!(
            table = ?name,
            socket = ?zone.socket(),
            entries = params.entries,
            bucket_entries = params.bucket_entries,
            "flow table created."
        );

        Ok(FlowTable {
            name,
            bucket_mask: params.entries / params.bucket_entries - 1,
            params,
            entries,
            len: 0,
            zone,
        })
    }

    /// Returns the table name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the socket the table lives on.
    #[inline]
    pub fn socket(&self) -> SocketId {
        self.zone.socket()
    }

    /// Returns the total number of entries.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.params.entries
    }

    /// Returns the number of entries per bucket.
    #[inline]
    pub fn bucket_entries(&self) -> usize {
        self.params.bucket_entries
    }

    /// Returns the number of buckets.
    #[inline]
    pub fn buckets(&self) -> usize {
        self.bucket_mask + 1
    }

    /// Returns the number of flows in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the table holds no flow.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the fraction of entries in use.
    pub fn load_factor(&self) -> f64 {
        self.len as f64 / self.params.entries as f64
    }

    /// Returns the hash of a key as computed by the table.
    #[inline]
    pub fn hash(&self, key: &FlowKey) -> u32 {
        (self.params.hash_fn)(key, self.params.hash_init_val)
    }

    /// Returns the bucket a key maps to.
    #[inline]
    pub fn bucket_of(&self, key: &FlowKey) -> usize {
        self.hash(key) as usize & self.bucket_mask
    }

    fn find(&self, key: &FlowKey, sig: u32) -> Option<usize> {
        let start = (sig as usize & self.bucket_mask) * self.params.bucket_entries;
        (start..start + self.params.bucket_entries).find(|&pos| {
            matches!(&self.entries[pos], Some(entry) if entry.sig == sig && entry.key == *key)
        })
    }

    /// Returns the slot of a flow, inserting a zeroed slot if the flow is
    /// not in the table. An existing entry is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns `FlowTableError::Full` if the flow is new and its bucket has
    /// no free entry.
    pub fn lookup_or_insert(&mut self, key: &FlowKey) -> Result<SlotRef<'_>, FlowTableError> {
        let sig = self.hash(key);
        let bucket = sig as usize & self.bucket_mask;

        let (position, inserted) = match self.find(key, sig) {
            Some(pos) => (pos, false),
            None => {
                let start = bucket * self.params.bucket_entries;
                let pos = (start..start + self.params.bucket_entries)
                    .find(|&pos| self.entries[pos].is_none())
                    .ok_or(FlowTableError::Full(bucket))?;
                self.len += 1;
                (pos, true)
            }
        };

        let entry = self.entries[position].get_or_insert_with(|| Entry {
            key: *key,
            sig,
            slot: FlowSlot::default(),
        });

        Ok(SlotRef {
            position,
            inserted,
            slot: &mut entry.slot,
        })
    }

    /// Returns the slot of a flow if it is in the table.
    pub fn lookup(&self, key: &FlowKey) -> Option<&FlowSlot> {
        let pos = self.find(key, self.hash(key))?;
        self.entries[pos].as_ref().map(|entry| &entry.slot)
    }

    /// Returns the mutable slot of a flow if it is in the table.
    pub fn lookup_mut(&mut self, key: &FlowKey) -> Option<&mut FlowSlot> {
        let pos = self.find(key, self.hash(key))?;
        self.entries[pos].as_mut().map(|entry| &mut entry.slot)
    }

    /// Removes a flow, returning its slot.
    pub fn remove(&mut self, key: &FlowKey) -> Option<FlowSlot> {
        let pos = self.find(key, self.hash(key))?;
        let entry = self.entries[pos].take()?;
        self.len -= 1;
        Some(entry.slot)
    }

    /// Returns an iterator over the flows in the table.
    pub fn iter(&self) -> impl Iterator<Item = (&FlowKey, &FlowSlot)> + '_ {
        self.entries
            .iter()
            .filter_map(|entry| entry.as_ref().map(|e| (&e.key, &e.slot)))
    }
}

impl fmt::Debug for FlowTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowTable")
            .field("name", &self.name)
            .field("socket", &self.socket())
            .field("params", &self.params)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for FlowTable {
    fn drop(&mut self) {
        info!(table = ?self.name, "flow table freed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ProtocolNumbers;
    use crate::testils::proptest::flow_key;
    use crate::testils::Rvg;
    use std::collections::HashSet;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    fn table(entries: usize, bucket_entries: usize) -> FlowTable {
        let memory = Arc::new(Memory::unlimited());
        let params = FlowTableParams {
            entries,
            bucket_entries,
            ..FlowTableParams::default()
        };
        FlowTable::new("flows", SocketId::new(0), params, &memory).unwrap()
    }

    fn udp4(src_port: u16) -> FlowKey {
        FlowKey::v4(
            ProtocolNumbers::Udp,
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), src_port),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 53),
        )
    }

    fn distinct_keys(gen: &mut Rvg, n: usize) -> Vec<FlowKey> {
        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(n);
        while keys.len() < n {
            let key = gen.generate(flow_key());
            if seen.insert(key) {
                keys.push(key);
            }
        }
        keys
    }

    #[test]
    fn reject_invalid_params() {
        let memory = Arc::new(Memory::unlimited());

        for &(entries, bucket_entries) in &[(1000, 4), (1024, 3), (4, 8), (0, 4)] {
            let params = FlowTableParams {
                entries,
                bucket_entries,
                ..FlowTableParams::default()
            };
            assert!(matches!(
                FlowTable::new("bad", SocketId::new(0), params, &memory),
                Err(FlowTableError::InvalidParams(_))
            ));
        }
        assert_eq!(0, memory.zone_count());
    }

    #[test]
    fn creation_fails_without_socket_memory() {
        let memory = Arc::new(Memory::with_limits(vec![(SocketId::new(0), 1024)]));
        let params = FlowTableParams {
            entries: 1024,
            ..FlowTableParams::default()
        };

        let res = FlowTable::new("flows", SocketId::new(0), params, &memory);
        assert!(matches!(res, Err(FlowTableError::Creation { .. })));

        let res = FlowTable::new("flows", SocketId::new(1), params, &memory);
        assert!(matches!(res, Err(FlowTableError::Creation { .. })));
        assert_eq!(0, memory.zone_count());
    }

    #[test]
    fn table_zone_released_on_drop() {
        let memory = Arc::new(Memory::unlimited());
        let params = FlowTableParams {
            entries: 64,
            ..FlowTableParams::default()
        };

        let table = FlowTable::new("flows", SocketId::new(0), params, &memory).unwrap();
        assert_eq!(vec!["flows".to_owned()], memory.zones("flow_table"));
        drop(table);
        assert!(memory.zones("flow_table").is_empty());
    }

    #[test]
    fn lookup_or_insert_returns_same_slot() {
        let mut table = table(64, 4);
        let key = udp4(1000);

        {
            let mut slot = table.lookup_or_insert(&key).unwrap();
            assert!(slot.is_new());
            assert_eq!(FlowSlot::default(), *slot);
            slot.record(100, 7);
        }

        let slot = table.lookup_or_insert(&key).unwrap();
        assert!(!slot.is_new());
        assert_eq!(1, slot.packets);
        assert_eq!(100, slot.bytes);
        assert_eq!(7, slot.first_seen);
        assert_eq!(1, table.len());
    }

    #[test]
    fn record_tracks_first_and_last_seen() {
        let mut slot = FlowSlot::default();
        slot.record(60, 10);
        slot.record(1500, 25);

        assert_eq!(2, slot.packets);
        assert_eq!(1560, slot.bytes);
        assert_eq!(10, slot.first_seen);
        assert_eq!(25, slot.last_seen);
    }

    #[test]
    fn full_bucket_keeps_existing_entries() {
        let mut table = table(256, 4);

        // collects 5 keys landing in the bucket of the first one.
        let bucket = table.bucket_of(&udp4(0));
        let keys = (0..=u16::MAX)
            .map(udp4)
            .filter(|key| table.bucket_of(key) == bucket)
            .take(5)
            .collect::<Vec<_>>();
        assert_eq!(5, keys.len());

        for (idx, key) in keys[..4].iter().enumerate() {
            let mut slot = table.lookup_or_insert(key).unwrap();
            slot.packets = idx as u64 + 1;
        }

        assert!(matches!(
            table.lookup_or_insert(&keys[4]),
            Err(FlowTableError::Full(b)) if b == bucket
        ));
        assert_eq!(4, table.len());
        for (idx, key) in keys[..4].iter().enumerate() {
            assert_eq!(idx as u64 + 1, table.lookup(key).unwrap().packets);
        }

        // an existing key is still found in a full bucket.
        assert!(!table.lookup_or_insert(&keys[2]).unwrap().is_new());

        // removing one frees an entry for the new key.
        assert_eq!(1, table.remove(&keys[0]).unwrap().packets);
        assert!(table.lookup_or_insert(&keys[4]).unwrap().is_new());
        assert_eq!(None, table.lookup(&keys[0]));
    }

    #[test]
    fn remove_leaves_later_entries_reachable() {
        let mut table = table(256, 4);
        let bucket = table.bucket_of(&udp4(0));
        let keys = (0..=u16::MAX)
            .map(udp4)
            .filter(|key| table.bucket_of(key) == bucket)
            .take(3)
            .collect::<Vec<_>>();

        for key in keys.iter() {
            table.lookup_or_insert(key).unwrap();
        }
        table.remove(&keys[0]);

        // the key in position 2 must be found, not inserted in the hole.
        assert!(!table.lookup_or_insert(&keys[2]).unwrap().is_new());
        assert_eq!(2, table.len());
        assert_eq!(2, table.iter().count());
    }

    #[test]
    fn one_field_changes_spread_across_buckets() {
        let table = table(4096, 4);
        let mut gen = Rvg::deterministic();
        let keys = distinct_keys(&mut gen, 2000);
        let others = distinct_keys(&mut gen, 2000);

        // keys differing in one field by a random value land in the same
        // bucket at about the rate of two random keys, 1 in 1024.
        let variants: Vec<fn(&FlowKey, &FlowKey) -> FlowKey> = vec![
            |k, o| {
                let src = SocketAddr::new(o.src().ip(), k.src().port());
                FlowKey::new(k.protocol(), src, k.dst()).unwrap_or(*k)
            },
            |k, o| {
                let dst = SocketAddr::new(o.dst().ip(), k.dst().port());
                FlowKey::new(k.protocol(), k.src(), dst).unwrap_or(*k)
            },
            |k, o| {
                let src = SocketAddr::new(k.src().ip(), o.src().port());
                FlowKey::new(k.protocol(), src, k.dst()).unwrap_or(*k)
            },
            |k, o| {
                let dst = SocketAddr::new(k.dst().ip(), o.dst().port());
                FlowKey::new(k.protocol(), k.src(), dst).unwrap_or(*k)
            },
        ];

        for variant in variants.iter() {
            let mut pairs = 0;
            let mut collisions = 0;
            for (key, other) in keys.iter().zip(others.iter()) {
                let changed = variant(key, other);
                if changed != *key {
                    pairs += 1;
                    if table.bucket_of(&changed) == table.bucket_of(key) {
                        collisions += 1;
                    }
                }
            }
            assert!(pairs > 500);
            assert!(collisions <= pairs * 3 / table.buckets() + 5);
        }
    }

    /// Expected overflow of `buckets` buckets of `depth` entries holding
    /// `n` uniformly hashed keys, from the Poisson approximation.
    fn expected_overflow(n: usize, buckets: usize, depth: usize) -> f64 {
        let lambda = n as f64 / buckets as f64;
        let mut p = (-lambda).exp();
        let mut under = 0.0;
        for k in 0..depth {
            under += (depth - k) as f64 * p;
            p *= lambda / (k + 1) as f64;
        }
        (lambda - depth as f64 + under) * buckets as f64
    }

    #[test]
    fn occupancy_matches_uniform_hash() {
        let mut gen = Rvg::deterministic();

        for &fill in &[0.10, 0.50, 0.90, 0.99] {
            let mut table = table(4096, 4);
            let n = (table.capacity() as f64 * fill) as usize;
            let keys = distinct_keys(&mut gen, n);

            let full = keys
                .iter()
                .filter(|key| table.lookup_or_insert(key).is_err())
                .count();
            let expected = expected_overflow(n, table.buckets(), table.bucket_entries());

            assert_eq!(n - full, table.len());
            if fill < 0.5 {
                assert!(full <= 8, "{} full at {} fill", full, fill);
            } else {
                assert!(
                    full as f64 >= expected * 0.5 && full as f64 <= expected * 1.5,
                    "{} full at {} fill, expected about {}",
                    full,
                    fill,
                    expected
                );
            }
        }
    }
}
