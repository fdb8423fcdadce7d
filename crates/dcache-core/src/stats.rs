//! Per-group dentry counters.
//!
//! Open-addressing table with linear probing, sized once at construction.
//! A slot is claimed by CAS on its key, so two callers racing to create the
//! same group always converge on one row. Rows are never removed.
//!
//! Key `0` is the empty-slot sentinel; group id `0` lives in a dedicated
//! side row so the whole 64-bit id space stays usable.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::Dropped;

/// Opaque isolation-group identifier (cgroup id)
pub type GroupId = u64;

pub const DEFAULT_STATS_CAPACITY: usize = 4096;

const EMPTY_KEY: u64 = 0;

// Row status. A keyed row stays PENDING until its creator has reserved
// capacity; only LIVE rows are reported.
const PENDING: u8 = 0;
const CLAIMED: u8 = 1;
const LIVE: u8 = 2;
const REJECTED: u8 = 3;

const ADMIT_SPINS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKind {
    Alloc,
    Positive,
    Negative,
}

/// Point-in-time counters for one group. Fields are read independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    pub alloc: u64,
    pub positive: u64,
    pub negative: u64,
}

#[repr(align(64))]
struct Row {
    key: AtomicU64,
    status: AtomicU8,
    alloc: AtomicU64,
    positive: AtomicU64,
    negative: AtomicU64,
}

impl Row {
    const fn new() -> Self {
        Self {
            key: AtomicU64::new(EMPTY_KEY),
            status: AtomicU8::new(PENDING),
            alloc: AtomicU64::new(0),
            positive: AtomicU64::new(0),
            negative: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    fn bump(&self, kind: StatKind) {
        let counter = match kind {
            StatKind::Alloc => &self.alloc,
            StatKind::Positive => &self.positive,
            StatKind::Negative => &self.negative,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn load(&self) -> GroupStats {
        GroupStats {
            alloc: self.alloc.load(Ordering::Relaxed),
            positive: self.positive.load(Ordering::Relaxed),
            negative: self.negative.load(Ordering::Relaxed),
        }
    }

    fn is_live(&self) -> bool {
        self.status.load(Ordering::Acquire) == LIVE
    }
}

/// Bounded, lock-free map from [`GroupId`] to [`GroupStats`].
pub struct GroupStatsTable {
    rows: Box<[Row]>,
    mask: usize,
    zero: Row,
    live: AtomicUsize,
    capacity: usize,
}

impl Default for GroupStatsTable {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_CAPACITY)
    }
}

impl GroupStatsTable {
    /// Table admitting at most `capacity` distinct groups. The slot array
    /// keeps the load factor at or below one half.
    pub fn new(capacity: usize) -> Self {
        let slots = capacity.saturating_mul(2).max(2).next_power_of_two();
        let rows: Box<[Row]> = (0..slots).map(|_| Row::new()).collect();
        Self {
            rows,
            mask: slots - 1,
            zero: Row::new(),
            live: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of groups currently tracked
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.live.load(Ordering::Relaxed) >= self.capacity
    }

    /// Increment `kind` for `group`, creating the row on first sight.
    #[inline]
    pub fn record(&self, group: GroupId, kind: StatKind) -> Result<(), Dropped> {
        let row = self.row_for(group)?;
        row.bump(kind);
        Ok(())
    }

    /// Current counters for `group`, or `None` if it was never admitted.
    pub fn snapshot(&self, group: GroupId) -> Option<GroupStats> {
        let row = self.find(group)?;
        row.is_live().then(|| row.load())
    }

    /// All admitted groups, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (GroupId, GroupStats)> + '_ {
        std::iter::once(&self.zero)
            .chain(self.rows.iter())
            .filter(|row| row.is_live())
            .map(|row| (row.key.load(Ordering::Relaxed), row.load()))
    }

    #[inline(always)]
    fn home(&self, group: GroupId) -> usize {
        (mix64(group) as usize) & self.mask
    }

    fn row_for(&self, group: GroupId) -> Result<&Row, Dropped> {
        if group == EMPTY_KEY {
            return self.zero_row();
        }

        let mut idx = self.home(group);
        for _ in 0..self.rows.len() {
            let row = &self.rows[idx];
            let key = row.key.load(Ordering::Acquire);
            if key == group {
                return accept(row);
            }
            if key == EMPTY_KEY {
                // Absent: every earlier slot in the chain holds another key.
                if self.is_full() {
                    return Err(Dropped::TableExhausted);
                }
                match row.key.compare_exchange(
                    EMPTY_KEY,
                    group,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return self.admit(row),
                    Err(actual) if actual == group => return accept(row),
                    Err(_) => {}
                }
            }
            idx = (idx + 1) & self.mask;
        }
        Err(Dropped::TableExhausted)
    }

    fn zero_row(&self) -> Result<&Row, Dropped> {
        let row = &self.zero;
        if row.status.load(Ordering::Acquire) != PENDING {
            return accept(row);
        }
        if self.is_full() {
            return Err(Dropped::TableExhausted);
        }
        match row
            .status
            .compare_exchange(PENDING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => self.admit(row),
            Err(_) => accept(row),
        }
    }

    /// Called exactly once per row by the caller that claimed it.
    fn admit<'a>(&self, row: &'a Row) -> Result<&'a Row, Dropped> {
        let reserved = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok();
        if reserved {
            row.status.store(LIVE, Ordering::Release);
            Ok(row)
        } else {
            row.status.store(REJECTED, Ordering::Release);
            Err(Dropped::TableExhausted)
        }
    }

    fn find(&self, group: GroupId) -> Option<&Row> {
        if group == EMPTY_KEY {
            return Some(&self.zero);
        }
        let mut idx = self.home(group);
        for _ in 0..self.rows.len() {
            let row = &self.rows[idx];
            match row.key.load(Ordering::Acquire) {
                k if k == group => return Some(row),
                EMPTY_KEY => return None,
                _ => idx = (idx + 1) & self.mask,
            }
        }
        None
    }
}

/// A keyed row only takes increments once its creator has admitted it.
/// Waits a bounded number of spins for that decision, then drops.
#[inline(always)]
fn accept(row: &Row) -> Result<&Row, Dropped> {
    for _ in 0..ADMIT_SPINS {
        match row.status.load(Ordering::Acquire) {
            LIVE => return Ok(row),
            REJECTED => return Err(Dropped::TableExhausted),
            _ => std::hint::spin_loop(),
        }
    }
    Err(Dropped::TableExhausted)
}

/// splitmix64 finalizer. Cgroup ids are sequential inode numbers, so the
/// raw value clusters badly under a mask.
#[inline(always)]
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counts_match_calls() {
        let table = GroupStatsTable::new(16);
        for _ in 0..5 {
            table.record(7, StatKind::Alloc).unwrap();
        }
        table.record(7, StatKind::Positive).unwrap();
        table.record(7, StatKind::Negative).unwrap();
        table.record(7, StatKind::Negative).unwrap();

        assert_eq!(
            table.snapshot(7),
            Some(GroupStats {
                alloc: 5,
                positive: 1,
                negative: 2
            })
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unknown_group_is_absent() {
        let table = GroupStatsTable::new(16);
        table.record(1, StatKind::Alloc).unwrap();
        assert!(table.snapshot(2).is_none());
        assert!(table.snapshot(0).is_none());
    }

    #[test]
    fn test_group_zero_is_a_real_group() {
        let table = GroupStatsTable::new(4);
        table.record(0, StatKind::Alloc).unwrap();
        table.record(0, StatKind::Alloc).unwrap();
        table.record(3, StatKind::Negative).unwrap();

        assert_eq!(table.snapshot(0).unwrap().alloc, 2);
        assert_eq!(table.len(), 2);

        let mut groups: Vec<_> = table.iter().map(|(g, _)| g).collect();
        groups.sort_unstable();
        assert_eq!(groups, vec![0, 3]);
    }

    #[test]
    fn test_capacity_exhaustion_is_silent_and_permanent() {
        let table = GroupStatsTable::new(3);
        for g in 1..=3 {
            table.record(g, StatKind::Alloc).unwrap();
        }
        assert_eq!(table.record(4, StatKind::Alloc), Err(Dropped::TableExhausted));
        assert_eq!(table.record(0, StatKind::Alloc), Err(Dropped::TableExhausted));
        assert!(table.snapshot(4).is_none());

        // Existing groups keep counting after the table fills up
        table.record(2, StatKind::Positive).unwrap();
        assert_eq!(table.snapshot(2).unwrap().positive, 1);
        assert_eq!(table.len(), 3);
        assert_eq!(table.iter().count(), 3);
    }

    #[test]
    fn test_zero_capacity_admits_nothing() {
        let table = GroupStatsTable::new(0);
        assert_eq!(table.record(9, StatKind::Alloc), Err(Dropped::TableExhausted));
        assert!(table.is_empty());
    }

    #[test]
    fn test_full_capacity_is_reachable() {
        let table = GroupStatsTable::new(DEFAULT_STATS_CAPACITY);
        for g in 1..=DEFAULT_STATS_CAPACITY as u64 {
            table.record(g * 4096, StatKind::Alloc).unwrap();
        }
        assert_eq!(table.len(), DEFAULT_STATS_CAPACITY);
        assert!(table.record(u64::MAX, StatKind::Alloc).is_err());
        for g in 1..=DEFAULT_STATS_CAPACITY as u64 {
            assert_eq!(table.snapshot(g * 4096).unwrap().alloc, 1);
        }
    }

    #[test]
    fn test_racing_creators_share_one_row() {
        let table = Arc::new(GroupStatsTable::new(64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    (1..=32u64)
                        .filter(|&g| table.record(g, StatKind::Alloc).is_ok())
                        .count() as u64
                })
            })
            .collect();
        let counted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(table.len(), 32);
        let total: u64 = table.iter().map(|(_, s)| s.alloc).sum();
        assert_eq!(total, counted);
        for (_, stats) in table.iter() {
            assert!(stats.alloc <= 8);
        }
    }

    #[test]
    fn test_ok_always_means_counted() {
        // Two groups fight over one slot: whichever loses must report
        // every attempt as dropped, including attempts that saw its row
        // before the creator was turned away.
        for _ in 0..200 {
            let table = Arc::new(GroupStatsTable::new(1));
            let handles: Vec<_> = (0..4u64)
                .map(|t| {
                    let table = Arc::clone(&table);
                    thread::spawn(move || {
                        let mut ok = [0u64; 2];
                        for i in 0..50u64 {
                            let g = 1 + (i + t) % 2;
                            if table.record(g, StatKind::Negative).is_ok() {
                                ok[(g - 1) as usize] += 1;
                            }
                        }
                        ok
                    })
                })
                .collect();
            let mut ok = [0u64; 2];
            for h in handles {
                let got = h.join().unwrap();
                ok[0] += got[0];
                ok[1] += got[1];
            }

            assert_eq!(table.len(), 1);
            for g in 1..=2u64 {
                let recorded = table.snapshot(g).map_or(0, |s| s.negative);
                assert_eq!(recorded, ok[(g - 1) as usize]);
            }
        }
    }
}
