use std::path::Path;

use chrono::{DateTime, Utc};
use dcache_core::{ChannelStats, DentryCollector, DropSnapshot, GroupId, GroupStats, TraceState};
use serde::Serialize;

use crate::cgroup::Resolver;
use crate::dentry_state::{read_dentry_state, DentryState};
use crate::error::Result;
use crate::metrics::ReportMetrics;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub group_id: GroupId,
    #[serde(flatten)]
    pub stats: GroupStats,
    pub pod: String,
    pub container: String,
}

/// Point-in-time view of a collector plus node-wide dentry counts.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub captured_at: DateTime<Utc>,
    pub trace: TraceState,
    pub groups: Vec<GroupReport>,
    pub reclaim_total: u64,
    pub drops: DropSnapshot,
    pub channel: ChannelStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<DentryState>,
}

impl StatsReport {
    /// Snapshot `collector`. Groups are sorted by id and labelled
    /// `cgroup-<id>` until [`StatsReport::label_with`] is applied. A missing
    /// or unreadable dentry-state file leaves `node` empty.
    pub fn capture(collector: &DentryCollector, proc_root: &Path) -> Self {
        let mut groups: Vec<GroupReport> = collector
            .groups()
            .map(|(group_id, stats)| GroupReport {
                group_id,
                stats,
                pod: format!("cgroup-{group_id}"),
                container: String::new(),
            })
            .collect();
        groups.sort_by_key(|g| g.group_id);

        Self {
            captured_at: Utc::now(),
            trace: collector.trace_state(),
            groups,
            reclaim_total: collector.reclaim_count(),
            drops: collector.drops(),
            channel: collector.channel_stats(),
            node: read_dentry_state(proc_root).ok(),
        }
    }

    pub fn label_with(&mut self, resolver: &Resolver) {
        for g in &mut self.groups {
            let (pod, container) = resolver.labels(g.group_id);
            g.pod = pod;
            g.container = container;
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Prometheus text exposition format.
    pub fn to_prometheus(&self) -> Result<String> {
        let metrics = ReportMetrics::new()?;
        metrics.observe(self);
        metrics.encode()
    }
}
