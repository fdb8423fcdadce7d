//! # dcache-export
//!
//! Userspace side of the dentry cache monitor: drains the trace stream of a
//! [`dcache_core::DentryCollector`], rebuilds paths from walked components,
//! writes rotating TSV trace files and renders stats reports.
//!
//! ```text
//! EventReceiver ──► TraceConsumer ──► PathFilter ──► TsvWriter (traces.tsv, .1 ..)
//!                                          └──────► RawWriter (536-byte records)
//!
//! DentryCollector ──► StatsReport ──► JSON | ReportMetrics (Prometheus text)
//!                          ▲
//!         dentry-state ────┘└──── cgroup Resolver (pod labels)
//! ```

pub mod cgroup;
pub mod consumer;
pub mod dentry_state;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod path;
pub mod raw;
pub mod report;
pub mod tsv;

pub use cgroup::{PodInfo, Resolver};
pub use consumer::{ConsumerOptions, ConsumerSummary, TraceConsumer};
pub use dentry_state::{read_dentry_state, DentryState};
pub use error::{ExportError, Result};
pub use filter::PathFilter;
pub use metrics::ReportMetrics;
pub use path::build_path;
pub use raw::{RawReader, RawWriter};
pub use report::{GroupReport, StatsReport};
pub use tsv::{TsvWriter, TSV_HEADER};
