use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::event::{TraceEvent, RECORD_SIZE};

// Force 128-byte alignment to prevent false sharing between producer and
// consumer cursors (adjacent-line prefetch pulls pairs of 64-byte lines).
#[repr(align(128))]
struct CachePadded<T>(T);

/// Counters for monitoring channel pressure
struct ChannelCounters {
    pushes: AtomicU64,
    pops: AtomicU64,
    drops: AtomicU64,
    max_depth: AtomicU64,
}

impl ChannelCounters {
    const fn new() -> Self {
        Self {
            pushes: AtomicU64::new(0),
            pops: AtomicU64::new(0),
            drops: AtomicU64::new(0),
            max_depth: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub pushes: u64,
    pub pops: u64,
    pub drops: u64,
    pub max_depth: u64,
}

struct Slot {
    // Equals the slot position when free, position + 1 once published.
    seq: AtomicUsize,
    hole: AtomicBool,
    event: UnsafeCell<TraceEvent>,
}

/// Bounded, lossy multi-producer single-consumer ring of [`TraceEvent`]s.
///
/// Producers claim a position with a CAS on `head`, fill the slot in place
/// and publish it with a release store of the slot sequence. The consumer
/// only copies out slots whose sequence marks them published, so a record
/// is never observed half-written. When the ring is full `reserve` fails
/// immediately.
#[repr(align(64))]
pub struct EventChannel {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    mask: usize,
    slots: Box<[Slot]>,
    stats: CachePadded<ChannelCounters>,
    receiver_taken: AtomicBool,
}

// Safety: slot contents are only touched by the producer holding the
// reservation for that position, or by the single receiver after the
// producer's release store.
unsafe impl Send for EventChannel {}
unsafe impl Sync for EventChannel {}

impl EventChannel {
    /// Ring with room for `records` events, rounded up to a power of two.
    pub fn with_capacity(records: usize) -> Self {
        let cap = records.max(2).next_power_of_two();
        let slots: Box<[Slot]> = (0..cap)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                hole: AtomicBool::new(false),
                event: UnsafeCell::new(TraceEvent::ZEROED),
            })
            .collect();
        Self {
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
            mask: cap - 1,
            slots,
            stats: CachePadded(ChannelCounters::new()),
            receiver_taken: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Records reserved but not yet consumed
    pub fn depth(&self) -> usize {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    /// Claim a slot. Returns `None` without waiting when the ring is full.
    #[inline]
    pub fn reserve(&self) -> Option<Reservation<'_>> {
        let mut pos = self.head.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = (seq as isize).wrapping_sub(pos as isize);

            if diff == 0 {
                match self.head.0.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let tail = self.tail.0.load(Ordering::Relaxed);
                        let depth = pos.wrapping_sub(tail).wrapping_add(1);
                        self.stats
                            .0
                            .max_depth
                            .fetch_max(depth as u64, Ordering::Relaxed);
                        return Some(Reservation {
                            channel: self,
                            slot,
                            pos,
                            published: false,
                        });
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // Slot still holds an unconsumed record from the previous lap.
                self.stats.0.drops.fetch_add(1, Ordering::Relaxed);
                return None;
            } else {
                pos = self.head.0.load(Ordering::Relaxed);
            }
        }
    }

    /// Copy `event` into the ring. Returns false if it was dropped.
    #[inline]
    pub fn emit(&self, event: &TraceEvent) -> bool {
        match self.reserve() {
            Some(mut r) => {
                *r.event_mut() = *event;
                r.commit();
                true
            }
            None => false,
        }
    }

    /// Hand out the single consumer handle. Later calls return `None`.
    pub fn receiver(self: &Arc<Self>) -> Option<EventReceiver> {
        if self.receiver_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(EventReceiver {
            channel: Arc::clone(self),
        })
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            pushes: self.stats.0.pushes.load(Ordering::Relaxed),
            pops: self.stats.0.pops.load(Ordering::Relaxed),
            drops: self.stats.0.drops.load(Ordering::Relaxed),
            max_depth: self.stats.0.max_depth.load(Ordering::Relaxed),
        }
    }
}

/// Largest power-of-two record count that fits in `bytes` (minimum two).
pub fn records_for_bytes(bytes: usize) -> usize {
    let records = (bytes / RECORD_SIZE).max(2);
    1usize << (usize::BITS - 1 - records.leading_zeros())
}

/// A claimed slot. Publish with [`Reservation::commit`]; dropping it
/// unpublished turns the slot into a hole the receiver skips.
pub struct Reservation<'a> {
    channel: &'a EventChannel,
    slot: &'a Slot,
    pos: usize,
    published: bool,
}

impl Reservation<'_> {
    #[inline(always)]
    pub fn event_mut(&mut self) -> &mut TraceEvent {
        // Safety: the slot belongs to this reservation until published.
        unsafe { &mut *self.slot.event.get() }
    }

    #[inline]
    pub fn commit(mut self) {
        self.publish(false);
        self.channel.stats.0.pushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn discard(mut self) {
        self.publish(true);
    }

    #[inline(always)]
    fn publish(&mut self, hole: bool) {
        self.slot.hole.store(hole, Ordering::Relaxed);
        self.slot
            .seq
            .store(self.pos.wrapping_add(1), Ordering::Release);
        self.published = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.publish(true);
        }
    }
}

/// The consumer end of an [`EventChannel`].
pub struct EventReceiver {
    channel: Arc<EventChannel>,
}

impl EventReceiver {
    /// Next published record, or `None` if the ring is empty or the oldest
    /// reservation is still being filled.
    pub fn pop(&mut self) -> Option<TraceEvent> {
        let ch = &*self.channel;
        loop {
            let pos = ch.tail.0.load(Ordering::Relaxed);
            let slot = &ch.slots[pos & ch.mask];
            if slot.seq.load(Ordering::Acquire) != pos.wrapping_add(1) {
                return None;
            }

            let hole = slot.hole.load(Ordering::Relaxed);
            // Safety: published slot; no producer writes it until seq moves
            // on a full lap below.
            let event = unsafe { *slot.event.get() };
            slot.seq
                .store(pos.wrapping_add(ch.slots.len()), Ordering::Release);
            ch.tail.0.store(pos.wrapping_add(1), Ordering::Release);

            if !hole {
                ch.stats.0.pops.fetch_add(1, Ordering::Relaxed);
                return Some(event);
            }
        }
    }

    /// Pop up to `max` records into `batch`. Returns how many were added.
    pub fn pop_batch(&mut self, batch: &mut Vec<TraceEvent>, max: usize) -> usize {
        let mut count = 0;
        while count < max {
            match self.pop() {
                Some(evt) => {
                    batch.push(evt);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }
}
