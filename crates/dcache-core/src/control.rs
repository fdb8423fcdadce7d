use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceState {
    Disabled,
    Enabled,
}

/// Process-wide tracing gate, read once per allocation event.
///
/// A toggle may race with in-flight hooks: a caller that already passed the
/// check finishes its walk after tracing was turned off, and vice versa.
pub struct TraceControl {
    enabled: AtomicBool,
}

impl Default for TraceControl {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TraceControl {
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Returns the previous setting.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel)
    }

    pub fn state(&self) -> TraceState {
        if self.is_enabled() {
            TraceState::Enabled
        } else {
            TraceState::Disabled
        }
    }
}
