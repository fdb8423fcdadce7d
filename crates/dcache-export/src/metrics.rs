//! Prometheus exposition of a [`StatsReport`].
//!
//! # Metrics
//!
//! ## Counters
//! - `dentry_alloc_total{pod,container}` - dentry allocations per group
//! - `dentry_positive_total{pod,container}` - positive instantiations per group
//! - `dentry_negative_total{pod,container}` - negative instantiations per group
//! - `dentry_reclaim_total` - cache shrink events
//!
//! ## Gauges
//! - `dentry_count{type}` - node-wide counts from `/proc/sys/fs/dentry-state`

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::{ExportError, Result};
use crate::report::StatsReport;

/// Content type for the text exposition format.
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

const GROUP_LABELS: &[&str] = &["pod", "container"];

/// Registry holding one report's worth of samples.
///
/// The collector owns the running totals, so a registry is filled from a
/// snapshot and thrown away rather than incremented in place.
pub struct ReportMetrics {
    registry: Registry,
    alloc: IntCounterVec,
    positive: IntCounterVec,
    negative: IntCounterVec,
    reclaim: IntCounter,
    dentry_count: IntGaugeVec,
}

impl ReportMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let alloc = IntCounterVec::new(
            Opts::new("dentry_alloc_total", "Total dentry allocations per container"),
            GROUP_LABELS,
        )?;
        let positive = IntCounterVec::new(
            Opts::new(
                "dentry_positive_total",
                "Total positive dentry instantiations per container",
            ),
            GROUP_LABELS,
        )?;
        let negative = IntCounterVec::new(
            Opts::new(
                "dentry_negative_total",
                "Total negative dentry instantiations per container",
            ),
            GROUP_LABELS,
        )?;
        let reclaim = IntCounter::with_opts(Opts::new(
            "dentry_reclaim_total",
            "Total dentry reclaim events",
        ))?;
        let dentry_count = IntGaugeVec::new(
            Opts::new(
                "dentry_count",
                "Node-level dentry counts from /proc/sys/fs/dentry-state",
            ),
            &["type"],
        )?;

        registry.register(Box::new(alloc.clone()))?;
        registry.register(Box::new(positive.clone()))?;
        registry.register(Box::new(negative.clone()))?;
        registry.register(Box::new(reclaim.clone()))?;
        registry.register(Box::new(dentry_count.clone()))?;

        Ok(Self {
            registry,
            alloc,
            positive,
            negative,
            reclaim,
            dentry_count,
        })
    }

    /// Load `report` into the registry. Groups that resolve to the same
    /// labels are summed.
    pub fn observe(&self, report: &StatsReport) {
        for g in &report.groups {
            let labels = [g.pod.as_str(), g.container.as_str()];
            self.alloc.with_label_values(&labels).inc_by(g.stats.alloc);
            self.positive
                .with_label_values(&labels)
                .inc_by(g.stats.positive);
            self.negative
                .with_label_values(&labels)
                .inc_by(g.stats.negative);
        }
        self.reclaim.inc_by(report.reclaim_total);

        if let Some(node) = report.node {
            for (kind, value) in [
                ("total", node.total),
                ("unused", node.unused),
                ("negative", node.negative),
            ] {
                self.dentry_count.with_label_values(&[kind]).set(value);
            }
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ExportError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}
