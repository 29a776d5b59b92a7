//! Open-addressed hash table over pre-hashed 64-bit keys, used to build
//! the build side of a hash join and the group table of a grouped
//! aggregation.
//!
//! Shape is grounded on `other_examples`' `hash_join_simd.rs` `SwissTable`
//! (partition-and-build, read-only after construction), simplified from
//! its per-partition open-addressed table over raw byte keys to a single
//! logical table over already-hashed `u64` keys with run-length row-id
//! lists, since the caller (join/aggregate) is always the one computing
//! the key hash up front.

use crate::morsel::RowId;

const MAX_LOAD_FACTOR: f64 = 0.75;

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Occupied { hash: u64, row_ids: Vec<RowId> },
}

/// An open-addressed table mapping a pre-hashed 64-bit key to the list of
/// row ids that produced it, in insertion order.
#[derive(Debug, Clone)]
pub struct HashTable {
    slots: Vec<Slot>,
    occupied: usize,
}

impl HashTable {
    /// Build an empty table sized for at least `expected_entries` distinct
    /// keys without triggering an immediate resize.
    #[must_use]
    pub fn with_capacity(expected_entries: usize) -> Self {
        let capacity = next_power_of_two(
            ((expected_entries as f64 / MAX_LOAD_FACTOR) as usize).max(16),
        );
        Self {
            slots: (0..capacity).map(|_| Slot::Empty).collect(),
            occupied: 0,
        }
    }

    /// Number of distinct hash keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.occupied
    }

    /// True if the table holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Total number of row ids across all keys.
    #[must_use]
    pub fn total_row_ids(&self) -> usize {
        self.slots
            .iter()
            .map(|s| match s {
                Slot::Occupied { row_ids, .. } => row_ids.len(),
                Slot::Empty => 0,
            })
            .sum()
    }

    /// Append `row_id` to the row-id list for `hash`, creating the entry
    /// if it doesn't already exist.
    pub fn insert(&mut self, hash: u64, row_id: RowId) {
        if (self.occupied + 1) as f64 > self.slots.len() as f64 * MAX_LOAD_FACTOR {
            self.grow();
        }

        let mut idx = self.slot_index(hash);
        loop {
            match &mut self.slots[idx] {
                Slot::Empty => {
                    self.slots[idx] = Slot::Occupied {
                        hash,
                        row_ids: vec![row_id],
                    };
                    self.occupied += 1;
                    return;
                }
                Slot::Occupied { hash: h, row_ids } if *h == hash => {
                    row_ids.push(row_id);
                    return;
                }
                Slot::Occupied { .. } => {
                    idx = (idx + 1) % self.slots.len();
                }
            }
        }
    }

    /// Look up the row-id list for `hash`, in insertion order.
    #[must_use]
    pub fn get(&self, hash: u64) -> Option<&[RowId]> {
        let mut idx = self.slot_index(hash);
        let mut probes = 0;
        while probes < self.slots.len() {
            match &self.slots[idx] {
                Slot::Empty => return None,
                Slot::Occupied { hash: h, row_ids } if *h == hash => return Some(row_ids),
                Slot::Occupied { .. } => {
                    idx = (idx + 1) % self.slots.len();
                    probes += 1;
                }
            }
        }
        None
    }

    /// Iterate all `(hash, row_ids)` entries. Order is unspecified but
    /// stable within one iteration (no mutation occurs during iteration).
    pub fn iter_entries(&self) -> impl Iterator<Item = (u64, &[RowId])> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Occupied { hash, row_ids } => Some((*hash, row_ids.as_slice())),
            Slot::Empty => None,
        })
    }

    /// Merge partitioned tables built independently (e.g. one per
    /// low-bits-of-hash partition during a parallel build) into a single
    /// table. No rehashing is needed since the hash is already the
    /// identity key; entries for the same hash from different partitions
    /// are concatenated, with the partition order preserved.
    #[must_use]
    pub fn merge(partitions: Vec<Self>) -> Self {
        let total_entries: usize = partitions.iter().map(Self::len).sum();
        let mut merged = Self::with_capacity(total_entries.max(1));
        for partition in partitions {
            for (hash, row_ids) in partition.iter_entries() {
                for row_id in row_ids {
                    merged.insert(hash, *row_id);
                }
            }
        }
        merged
    }

    fn slot_index(&self, hash: u64) -> usize {
        (hash as usize) & (self.slots.len() - 1)
    }

    fn grow(&mut self) {
        let new_capacity = (self.slots.len() * 2).max(16);
        let old_slots = std::mem::replace(
            &mut self.slots,
            (0..new_capacity).map(|_| Slot::Empty).collect(),
        );
        self.occupied = 0;
        for slot in old_slots {
            if let Slot::Occupied { hash, row_ids } = slot {
                for row_id in row_ids {
                    self.insert(hash, row_id);
                }
            }
        }
    }
}

fn next_power_of_two(n: usize) -> usize {
    n.next_power_of_two().max(1)
}
