//! # dcache-core
//!
//! In-process instrumentation engine for directory-entry cache churn.
//!
//! A platform adapter drives a [`DentryCollector`] from three hook points:
//! dentry allocation, instantiation (positive or negative) and cache
//! reclaim. The collector keeps per-group counters in a fixed-capacity
//! lock-free table and, while tracing is on, walks the ancestors of each
//! allocated entry into a fixed-size record pushed through a lossy
//! multi-producer ring.
//!
//! Every hook entry point is wait-free or lock-free, never allocates and
//! never reports failure to its caller. Exhaustion is counted in
//! [`DropSnapshot`] instead.

pub mod channel;
pub mod clock;
pub mod collector;
pub mod control;
pub mod error;
pub mod event;
pub mod name;
pub mod reclaim;
pub mod source;
pub mod stats;
pub mod walker;

pub use channel::{ChannelStats, EventChannel, EventReceiver, Reservation};
pub use collector::{CollectorOptions, DentryCollector, DropSnapshot};
pub use control::{TraceControl, TraceState};
pub use error::{AttachError, DecodeError, Dropped};
pub use event::{Operation, TraceEvent, RECORD_SIZE};
pub use name::{NameSlot, MAX_NAME_BYTES, NAME_LEN};
pub use reclaim::ReclaimCounter;
pub use source::{EventSource, Session};
pub use stats::{GroupId, GroupStats, GroupStatsTable, StatKind};
pub use walker::{walk, AncestorNode, WalkedPath, MAX_DEPTH};
