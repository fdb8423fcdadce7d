//! Attachment seam between the collector and whatever produces hook calls.
//!
//! A platform adapter (kernel probe loader, FUSE shim, replay driver)
//! implements [`EventSource`]; it receives the collector on attach and calls
//! its `on_*` entry points until detached.

use std::sync::Arc;

use dcache_config::{log_probe_info, log_probe_warn};

use crate::collector::{CollectorOptions, DentryCollector};
use crate::error::AttachError;

pub trait EventSource {
    fn name(&self) -> &str;

    /// Start delivering hook calls to `collector`.
    fn attach(&mut self, collector: Arc<DentryCollector>) -> Result<(), AttachError>;

    /// Stop delivering hook calls. Must be idempotent.
    fn detach(&mut self);
}

/// A collector bound to one source for the lifetime of the session.
/// Dropping the session detaches the source.
pub struct Session<S: EventSource> {
    source: S,
    collector: Arc<DentryCollector>,
    attached: bool,
}

impl<S: EventSource> Session<S> {
    pub fn start(mut source: S, opts: CollectorOptions) -> Result<Self, AttachError> {
        let collector = Arc::new(DentryCollector::new(opts));
        source.attach(Arc::clone(&collector))?;
        log_probe_info!("Event source attached", source = source.name());
        Ok(Self {
            source,
            collector,
            attached: true,
        })
    }

    pub fn collector(&self) -> &Arc<DentryCollector> {
        &self.collector
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Detach now and keep the collector for final reads.
    pub fn stop(mut self) -> Arc<DentryCollector> {
        self.detach();
        Arc::clone(&self.collector)
    }

    fn detach(&mut self) {
        if self.attached {
            self.source.detach();
            self.attached = false;
            log_probe_info!("Event source detached", source = self.source.name());
        }
    }
}

impl<S: EventSource> Drop for Session<S> {
    fn drop(&mut self) {
        if self.attached {
            log_probe_warn!("Session dropped while attached", source = self.source.name());
        }
        self.detach();
    }
}
