//! Background drain of the trace stream.
//!
//! One thread owns the [`EventReceiver`]. It pops records with the usual
//! spin, yield, sleep backoff, drops those whose rebuilt path does not
//! match the filter and appends the rest to the TSV writer (and the raw
//! sink when one is configured). Buffered output is flushed on an interval
//! and once more at shutdown.

use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use dcache_config::{log_export_debug, log_export_info, log_export_warn, TraceConfig};
use dcache_core::{EventReceiver, TraceEvent};
use serde::Serialize;

use crate::error::{ExportError, Result};
use crate::filter::PathFilter;
use crate::path::build_path;
use crate::raw::RawWriter;
use crate::tsv::TsvWriter;

const BATCH: usize = 256;

pub struct ConsumerOptions {
    pub filter: PathFilter,
    pub flush_interval: Duration,
    pub raw: Option<RawWriter<BufWriter<File>>>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            filter: PathFilter::default(),
            flush_interval: Duration::from_secs(1),
            raw: None,
        }
    }
}

impl From<&TraceConfig> for ConsumerOptions {
    fn from(cfg: &TraceConfig) -> Self {
        Self {
            filter: PathFilter::from_patterns(&cfg.patterns),
            flush_interval: Duration::from_millis(cfg.flush_interval_ms),
            raw: None,
        }
    }
}

/// Totals reported when the consumer stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerSummary {
    pub received: u64,
    pub written: u64,
    pub filtered: u64,
    pub write_errors: u64,
}

pub struct TraceConsumer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<ConsumerSummary>>>,
}

impl TraceConsumer {
    pub fn spawn(rx: EventReceiver, writer: TsvWriter, opts: ConsumerOptions) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            rx,
            writer,
            filter: opts.filter,
            raw: opts.raw,
            flush_interval: opts.flush_interval,
            summary: ConsumerSummary::default(),
        };
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("dcache-consumer".into())
            .spawn(move || worker.run(&stop_flag))?;
        log_export_info!("Trace consumer started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the worker, wait for it to drain what is left and close its
    /// output.
    pub fn stop(mut self) -> Result<ConsumerSummary> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<ConsumerSummary> {
        self.stop.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return Ok(ConsumerSummary::default());
        };
        let summary = handle.join().map_err(|_| ExportError::WorkerPanicked)??;
        log_export_info!(
            "Trace consumer stopped",
            received = summary.received,
            written = summary.written,
            filtered = summary.filtered,
        );
        Ok(summary)
    }
}

impl Drop for TraceConsumer {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.shutdown() {
                log_export_warn!(
                    "Trace consumer ended with error",
                    error = tracing::field::display(&e),
                );
            }
        }
    }
}

struct Worker {
    rx: EventReceiver,
    writer: TsvWriter,
    filter: PathFilter,
    raw: Option<RawWriter<BufWriter<File>>>,
    flush_interval: Duration,
    summary: ConsumerSummary,
}

impl Worker {
    fn run(mut self, stop: &AtomicBool) -> Result<ConsumerSummary> {
        let mut batch = Vec::with_capacity(BATCH);
        let mut last_flush = Instant::now();
        let mut backoff_count = 0u32;

        loop {
            // Read the flag before draining so nothing published before
            // the stop request is left behind.
            let stopping = stop.load(Ordering::Acquire);

            batch.clear();
            if self.rx.pop_batch(&mut batch, BATCH) > 0 {
                backoff_count = 0;
                for evt in &batch {
                    self.handle(evt);
                }
            } else if stopping {
                break;
            } else {
                backoff_count = backoff_count.saturating_add(1).min(1000);
                if backoff_count < 10 {
                    std::hint::spin_loop();
                } else if backoff_count < 100 {
                    thread::yield_now();
                } else {
                    thread::sleep(Duration::from_millis(1));
                }
            }

            if last_flush.elapsed() >= self.flush_interval {
                self.flush();
                last_flush = Instant::now();
            }
        }

        if let Some(raw) = self.raw.as_mut() {
            raw.flush()?;
        }
        self.writer.close()?;
        Ok(self.summary)
    }

    fn handle(&mut self, evt: &TraceEvent) {
        self.summary.received += 1;
        let path = build_path(evt);
        if !self.filter.matches(&path) {
            self.summary.filtered += 1;
            return;
        }

        let mut ok = self.writer.write_event(Utc::now(), evt, &path).is_ok();
        if let Some(raw) = self.raw.as_mut() {
            ok &= raw.write(evt).is_ok();
        }
        if ok {
            self.summary.written += 1;
        } else {
            self.summary.write_errors += 1;
            if self.summary.write_errors == 1 {
                log_export_warn!("Trace write failed", path = path.as_str());
            }
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            log_export_warn!("Trace flush failed", error = tracing::field::display(&e));
        }
        if let Some(raw) = self.raw.as_mut() {
            if let Err(e) = raw.flush() {
                log_export_warn!("Raw flush failed", error = tracing::field::display(&e));
            }
        }
        log_export_debug!(
            "Flushed trace output",
            written = self.summary.written,
            depth = self.rx.channel().depth(),
        );
    }
}
