//! Long-running monitor.
//!
//! Keeps a replay session attached to a directory tree and serves the
//! collector over HTTP until SIGINT or SIGTERM:
//!
//! - `GET /metrics` - Prometheus text from the latest stats snapshot
//! - `GET /healthz` - liveness
//! - `GET /traces/config` - current trace setting as JSON
//! - `PUT /traces/config` - `{"enabled": bool}` turns ancestor tracing on or off
//!
//! The snapshot, the cgroup to pod map and the tree rescan each run on
//! their own interval.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::Args;
use dcache_config::{log_cli_debug, log_cli_info, log_cli_warn, Config, MonitorConfig};
use dcache_core::{CollectorOptions, DentryCollector, Session};
use dcache_export::{
    metrics, ConsumerOptions, PathFilter, Resolver, StatsReport, TraceConsumer, TsvWriter,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::replay::{group_or_current, ReplaySource};

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Directory tree watched as the event source
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    /// HTTP listen address (default: [monitor].listen)
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Group id to charge (default: this process's cgroup)
    #[arg(long)]
    group: Option<u64>,

    /// Start with ancestor tracing on
    #[arg(long)]
    trace: bool,

    /// Also look up one missing name per directory on every scan
    #[arg(long)]
    negative_probes: bool,

    /// Trace output directory (default: [trace].dir)
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Comma-separated path substrings to keep (default: [trace].patterns)
    #[arg(long)]
    filter: Option<String>,

    /// Seconds between stats snapshots
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Seconds between cgroup to pod map refreshes
    #[arg(long, value_name = "SECS")]
    resolve_interval: Option<u64>,

    /// Seconds between rescans of DIR (0 = scan once)
    #[arg(long, value_name = "SECS")]
    rescan_interval: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Intervals {
    poll: Duration,
    resolve: Duration,
    rescan: Option<Duration>,
}

impl Intervals {
    fn resolve(args: &MonitorArgs, cfg: &MonitorConfig) -> Result<Self> {
        let poll = args.poll_interval.unwrap_or(cfg.poll_interval_secs);
        let resolve = args.resolve_interval.unwrap_or(cfg.resolve_interval_secs);
        let rescan = args.rescan_interval.unwrap_or(cfg.rescan_interval_secs);
        if poll == 0 || resolve == 0 {
            bail!("poll and resolve intervals must be positive");
        }
        Ok(Self {
            poll: Duration::from_secs(poll),
            resolve: Duration::from_secs(resolve),
            rescan: (rescan > 0).then(|| Duration::from_secs(rescan)),
        })
    }
}

/// Shared by the HTTP handlers and the background jobs.
pub struct MonitorState {
    collector: Arc<DentryCollector>,
    resolver: Arc<Resolver>,
    proc_root: PathBuf,
    snapshot: RwLock<StatsReport>,
}

impl MonitorState {
    pub fn new(
        collector: Arc<DentryCollector>,
        resolver: Arc<Resolver>,
        proc_root: PathBuf,
    ) -> Self {
        let snapshot = RwLock::new(capture(&collector, &resolver, &proc_root));
        Self {
            collector,
            resolver,
            proc_root,
            snapshot,
        }
    }

    /// Replace the snapshot served at `/metrics`.
    pub fn poll(&self) {
        let report = capture(&self.collector, &self.resolver, &self.proc_root);
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = report;
    }

    fn render_metrics(&self) -> dcache_export::Result<String> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .to_prometheus()
    }
}

fn capture(collector: &DentryCollector, resolver: &Resolver, proc_root: &Path) -> StatsReport {
    let mut report = StatsReport::capture(collector, proc_root);
    report.label_with(resolver);
    report
}

/// Body of `/traces/config`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSetting {
    pub enabled: bool,
}

pub fn router(state: Arc<MonitorState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler))
        .route("/traces/config", get(trace_get_handler).put(trace_put_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<Arc<MonitorState>>) -> Response {
    match state.render_metrics() {
        Ok(text) => ([(header::CONTENT_TYPE, metrics::CONTENT_TYPE)], text).into_response(),
        Err(e) => {
            log_cli_warn!("Metrics render failed", error = tracing::field::display(&e));
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health_handler() -> &'static str {
    "ok\n"
}

async fn trace_get_handler(State(state): State<Arc<MonitorState>>) -> Json<TraceSetting> {
    Json(TraceSetting {
        enabled: state.collector.tracing_enabled(),
    })
}

async fn trace_put_handler(
    State(state): State<Arc<MonitorState>>,
    Json(setting): Json<TraceSetting>,
) -> Json<TraceSetting> {
    state.collector.set_tracing(setting.enabled);
    Json(setting)
}

/// Run `job` on the blocking pool every `period` until `shutdown` fires.
fn spawn_periodic<F>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let job = Arc::new(job);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let job = Arc::clone(&job);
                    if let Err(e) = tokio::task::spawn_blocking(move || job()).await {
                        log_cli_warn!(
                            "Background job failed",
                            job = name,
                            error = tracing::field::display(&e),
                        );
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        log_cli_debug!("Background job stopped", job = name);
    })
}

pub fn run(args: MonitorArgs) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(serve(args))
}

async fn serve(args: MonitorArgs) -> Result<()> {
    let cfg: Config = dcache_config::config().clone();
    let intervals = Intervals::resolve(&args, &cfg.monitor)?;
    let listen = args.listen.clone().unwrap_or_else(|| cfg.monitor.listen.clone());
    let group = group_or_current(args.group, &cfg);

    let mut opts = CollectorOptions::from(&cfg.probe);
    opts.trace_enabled |= args.trace;
    let session = Session::start(
        ReplaySource::new(args.dir.clone(), group, args.negative_probes),
        opts,
    )
    .context("failed to attach replay source")?;
    let collector = Arc::clone(session.collector());

    // Tracing can be switched on at any time, so the consumer always runs.
    let out_dir = args.out.clone().unwrap_or_else(|| cfg.trace.dir.clone());
    let writer = TsvWriter::new(&out_dir, cfg.trace.max_size_bytes(), cfg.trace.max_files)
        .with_context(|| format!("cannot open trace output in {}", out_dir.display()))?;
    let mut consumer_opts = ConsumerOptions::from(&cfg.trace);
    if let Some(spec) = &args.filter {
        consumer_opts.filter = PathFilter::parse(spec);
    }
    let rx = collector
        .take_receiver()
        .context("trace receiver already taken")?;
    let consumer = TraceConsumer::spawn(rx, writer, consumer_opts)?;

    let resolver = Arc::new(Resolver::new(&cfg.report.proc_root, &cfg.report.cgroup_root));
    if let Err(e) = resolver.refresh() {
        log_cli_debug!("No cgroup map yet", error = tracing::field::display(&e));
    }

    let session = Arc::new(session);
    let first = {
        let session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || session.source().replay()).await??
    };
    log_cli_info!("Initial scan done", entries = first.entries, dirs = first.dirs);

    let state = Arc::new(MonitorState::new(
        Arc::clone(&collector),
        Arc::clone(&resolver),
        cfg.report.proc_root.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut jobs = vec![
        spawn_periodic("poll", intervals.poll, shutdown_rx.clone(), {
            let state = Arc::clone(&state);
            move || state.poll()
        }),
        spawn_periodic("resolve", intervals.resolve, shutdown_rx.clone(), {
            let resolver = Arc::clone(&resolver);
            move || {
                if let Err(e) = resolver.refresh() {
                    log_cli_debug!(
                        "Resolver refresh failed",
                        error = tracing::field::display(&e),
                    );
                }
            }
        }),
    ];
    if let Some(period) = intervals.rescan {
        let session = Arc::clone(&session);
        jobs.push(spawn_periodic("rescan", period, shutdown_rx.clone(), move || {
            match session.source().replay() {
                Ok(counts) => log_cli_debug!("Rescanned", entries = counts.entries),
                Err(e) => log_cli_warn!("Rescan failed", error = tracing::field::display(&e)),
            }
        }));
    }

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let listener = TcpListener::bind(listen.as_str())
        .await
        .with_context(|| format!("cannot listen on {listen}"))?;
    let local = listener.local_addr()?;
    println!("Listening on http://{local}");
    log_cli_info!(
        "HTTP server listening",
        addr = tracing::field::display(local),
        poll_secs = intervals.poll.as_secs(),
        resolve_secs = intervals.resolve.as_secs(),
    );

    axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = sigint.recv() => log_cli_info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => log_cli_info!("Received SIGTERM, shutting down"),
            }
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("HTTP server failed")?;

    for job in jobs {
        let _ = job.await;
    }
    drop(state);

    let collector = match Arc::try_unwrap(session) {
        Ok(session) => session.stop(),
        Err(shared) => Arc::clone(shared.collector()),
    };
    let summary = consumer.stop()?;
    println!(
        "Stopped: groups={} reclaim={} traces written={} filtered={}",
        collector.groups().count(),
        collector.reclaim_count(),
        summary.written,
        summary.filtered
    );
    Ok(())
}
