use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dcache_config::{log_probe_debug, log_probe_info, ProbeConfig};
use serde::Serialize;

use crate::channel::{records_for_bytes, ChannelStats, EventChannel, EventReceiver};
use crate::clock::now_ns;
use crate::control::{TraceControl, TraceState};
use crate::error::Dropped;
use crate::event::{pack_depth, Operation};
use crate::reclaim::ReclaimCounter;
use crate::stats::{GroupId, GroupStats, GroupStatsTable, StatKind, DEFAULT_STATS_CAPACITY};
use crate::walker::{walk_into, AncestorNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorOptions {
    pub stats_capacity: usize,
    pub channel_records: usize,
    pub trace_enabled: bool,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            stats_capacity: DEFAULT_STATS_CAPACITY,
            channel_records: records_for_bytes(1 << 20),
            trace_enabled: false,
        }
    }
}

impl From<&ProbeConfig> for CollectorOptions {
    fn from(cfg: &ProbeConfig) -> Self {
        Self {
            stats_capacity: cfg.stats_capacity,
            channel_records: records_for_bytes(cfg.ring_buffer_bytes),
            trace_enabled: cfg.trace_enabled,
        }
    }
}

#[derive(Default)]
struct DropCounters {
    table_exhausted: AtomicU64,
    channel_full: AtomicU64,
}

impl DropCounters {
    #[inline(always)]
    fn note(&self, reason: Dropped) {
        let counter = match reason {
            Dropped::TableExhausted => &self.table_exhausted,
            Dropped::ChannelFull => &self.channel_full,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Events lost to exhaustion since the collector was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DropSnapshot {
    pub table_exhausted: u64,
    pub channel_full: u64,
}

/// Owns all probe state for one attachment.
///
/// The `on_*` methods are the hook entry points. They may be called from
/// any number of threads at once, never block, never allocate and never
/// fail; lost events only show up in [`DentryCollector::drops`].
pub struct DentryCollector {
    stats: GroupStatsTable,
    control: TraceControl,
    channel: Arc<EventChannel>,
    reclaim: ReclaimCounter,
    drops: DropCounters,
}

impl Default for DentryCollector {
    fn default() -> Self {
        Self::new(CollectorOptions::default())
    }
}

impl DentryCollector {
    pub fn new(opts: CollectorOptions) -> Self {
        let channel = Arc::new(EventChannel::with_capacity(opts.channel_records));
        log_probe_info!(
            "Collector ready",
            stats_capacity = opts.stats_capacity,
            channel_records = channel.capacity(),
            trace_enabled = opts.trace_enabled,
        );
        Self {
            stats: GroupStatsTable::new(opts.stats_capacity),
            control: TraceControl::new(opts.trace_enabled),
            channel,
            reclaim: ReclaimCounter::new(),
            drops: DropCounters::default(),
        }
    }

    // ── Hook entry points ──

    /// A dentry named `name` is being allocated under `parent`.
    #[inline]
    pub fn on_alloc<N: AncestorNode>(&self, group: GroupId, name: &[u8], parent: Option<&N>) {
        self.count(group, StatKind::Alloc);
        if !self.control.is_enabled() {
            return;
        }
        self.trace_alloc(group, name, parent);
    }

    /// A dentry was bound to an inode (`positive`) or left negative.
    #[inline]
    pub fn on_instantiate(&self, group: GroupId, positive: bool) {
        let kind = if positive {
            StatKind::Positive
        } else {
            StatKind::Negative
        };
        self.count(group, kind);
    }

    #[inline]
    pub fn on_positive(&self, group: GroupId) {
        self.on_instantiate(group, true);
    }

    #[inline]
    pub fn on_negative(&self, group: GroupId) {
        self.on_instantiate(group, false);
    }

    #[inline]
    pub fn on_reclaim(&self) {
        self.reclaim.on_reclaim();
    }

    #[inline(always)]
    fn count(&self, group: GroupId, kind: StatKind) {
        if let Err(reason) = self.stats.record(group, kind) {
            self.drops.note(reason);
        }
    }

    fn trace_alloc<N: AncestorNode>(&self, group: GroupId, name: &[u8], parent: Option<&N>) {
        let Some(mut slot) = self.channel.reserve() else {
            self.drops.note(Dropped::ChannelFull);
            return;
        };
        let evt = slot.event_mut();
        evt.timestamp = now_ns();
        evt.group_id = group;
        evt.operation = Operation::Alloc;
        let (count, root_reached) = walk_into(&mut evt.names, name, parent);
        evt.depth = pack_depth(count, root_reached);
        slot.commit();
    }

    // ── Control ──

    /// Turn ancestor tracing on or off. Returns the previous setting.
    pub fn set_tracing(&self, enabled: bool) -> bool {
        let previous = self.control.set_enabled(enabled);
        if previous != enabled {
            log_probe_info!("Trace state changed", enabled = enabled);
        } else {
            log_probe_debug!("Trace state unchanged", enabled = enabled);
        }
        previous
    }

    pub fn tracing_enabled(&self) -> bool {
        self.control.is_enabled()
    }

    pub fn trace_state(&self) -> TraceState {
        self.control.state()
    }

    // ── Queries ──

    pub fn stats(&self, group: GroupId) -> Option<GroupStats> {
        self.stats.snapshot(group)
    }

    pub fn groups(&self) -> impl Iterator<Item = (GroupId, GroupStats)> + '_ {
        self.stats.iter()
    }

    pub fn stats_table(&self) -> &GroupStatsTable {
        &self.stats
    }

    pub fn reclaim_count(&self) -> u64 {
        self.reclaim.get()
    }

    pub fn drops(&self) -> DropSnapshot {
        DropSnapshot {
            table_exhausted: self.drops.table_exhausted.load(Ordering::Relaxed),
            channel_full: self.drops.channel_full.load(Ordering::Relaxed),
        }
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    pub fn channel(&self) -> &Arc<EventChannel> {
        &self.channel
    }

    /// The trace stream consumer handle; only the first call gets one.
    pub fn take_receiver(&self) -> Option<EventReceiver> {
        self.channel.receiver()
    }
}
