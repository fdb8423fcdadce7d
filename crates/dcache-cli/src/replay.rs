//! Userspace event source: replays a real directory tree through the
//! collector as if every entry had just been looked up.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use dcache_config::{log_cli_debug, log_cli_info, Config};
use dcache_core::{
    AncestorNode, AttachError, CollectorOptions, DentryCollector, EventSource, Session,
};
use dcache_export::cgroup::current_group_id;
use dcache_export::{
    ConsumerOptions, ConsumerSummary, PathFilter, RawWriter, Resolver, StatsReport,
    TraceConsumer, TsvWriter,
};
use walkdir::WalkDir;

/// Name used for the synthetic lookup that misses in each directory
pub const MISSING_PROBE_NAME: &str = ".dcache-missing";

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Directory tree to replay
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    /// Group id to charge (default: this process's cgroup)
    #[arg(long)]
    group: Option<u64>,

    /// Record ancestor paths for every allocation
    #[arg(long)]
    trace: bool,

    /// Also look up one missing name per directory
    #[arg(long)]
    negative_probes: bool,

    /// Trace output directory (default: [trace].dir)
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Also write raw 536-byte trace records to FILE
    #[arg(long, value_name = "FILE")]
    raw: Option<PathBuf>,

    /// Comma-separated path substrings to keep (default: [trace].patterns)
    #[arg(long)]
    filter: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

/// Directory node. `parent` is `None` only for `/`, which reports itself
/// as its own parent.
#[derive(Debug)]
pub struct DirNode {
    name: Vec<u8>,
    parent: Option<Arc<DirNode>>,
}

impl DirNode {
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            name: b"/".to_vec(),
            parent: None,
        })
    }

    pub fn child(parent: &Arc<DirNode>, name: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_vec(),
            parent: Some(Arc::clone(parent)),
        })
    }
}

impl AncestorNode for DirNode {
    fn name(&self) -> &[u8] {
        &self.name
    }

    fn parent(&self) -> Option<&Self> {
        Some(self.parent.as_deref().unwrap_or(self))
    }
}

/// Node chain for an absolute path, `/` first.
fn anchor(path: &Path) -> Arc<DirNode> {
    let mut node = DirNode::root();
    for comp in path.components() {
        if let Component::Normal(name) = comp {
            node = DirNode::child(&node, name.as_bytes());
        }
    }
    node
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayCounts {
    pub entries: u64,
    pub dirs: u64,
    pub missing: u64,
    pub skipped: u64,
}

pub struct ReplaySource {
    root: PathBuf,
    group: u64,
    negative_probes: bool,
    collector: Option<Arc<DentryCollector>>,
}

impl ReplaySource {
    pub fn new(root: PathBuf, group: u64, negative_probes: bool) -> Self {
        Self {
            root,
            group,
            negative_probes,
            collector: None,
        }
    }

    /// Walk the tree once, firing hooks for every entry.
    pub fn replay(&self) -> Result<ReplayCounts> {
        let collector = self
            .collector
            .as_ref()
            .context("replay source is not attached")?;
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("cannot resolve {}", self.root.display()))?;

        let mut counts = ReplayCounts::default();
        let mut dirs: HashMap<PathBuf, Arc<DirNode>> = HashMap::new();
        dirs.insert(root.clone(), anchor(&root));

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log_cli_debug!(
                        "Skipping unreadable entry",
                        error = tracing::field::display(&e),
                    );
                    counts.skipped += 1;
                    continue;
                }
            };
            let is_dir = entry.file_type().is_dir();

            if entry.depth() > 0 {
                let parent = entry.path().parent().and_then(|p| dirs.get(p)).cloned();
                let Some(parent) = parent else {
                    counts.skipped += 1;
                    continue;
                };
                let name = entry.file_name().as_bytes();
                collector.on_alloc(self.group, name, Some(&*parent));
                collector.on_positive(self.group);
                counts.entries += 1;

                if is_dir {
                    dirs.insert(entry.path().to_path_buf(), DirNode::child(&parent, name));
                }
            }

            if is_dir {
                counts.dirs += 1;
                if self.negative_probes {
                    if let Some(node) = dirs.get(entry.path()) {
                        let name = MISSING_PROBE_NAME.as_bytes();
                        collector.on_alloc(self.group, name, Some(&**node));
                        collector.on_negative(self.group);
                        counts.missing += 1;
                    }
                }
            }
        }

        // the replayed tree is dropped from the cache in one go
        collector.on_reclaim();
        Ok(counts)
    }
}

impl EventSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    fn attach(&mut self, collector: Arc<DentryCollector>) -> Result<(), AttachError> {
        if self.collector.is_some() {
            return Err(AttachError::AlreadyAttached(self.name().to_string()));
        }
        if !self.root.is_dir() {
            return Err(AttachError::Source {
                name: self.name().to_string(),
                reason: format!("{} is not a directory", self.root.display()),
            });
        }
        self.collector = Some(collector);
        Ok(())
    }

    fn detach(&mut self) {
        self.collector = None;
    }
}

/// `group`, or the cgroup this process runs in (0 if unknown).
pub fn group_or_current(group: Option<u64>, cfg: &Config) -> u64 {
    if let Some(g) = group {
        return g;
    }
    match current_group_id(&cfg.report.proc_root, &cfg.report.cgroup_root) {
        Ok(g) => g,
        Err(e) => {
            log_cli_debug!(
                "No cgroup id, charging group 0",
                error = tracing::field::display(&e),
            );
            0
        }
    }
}

pub fn run(args: ReplayArgs) -> Result<()> {
    let cfg: Config = dcache_config::config().clone();

    let group = group_or_current(args.group, &cfg);

    let mut opts = CollectorOptions::from(&cfg.probe);
    opts.trace_enabled |= args.trace;

    let session = Session::start(
        ReplaySource::new(args.dir.clone(), group, args.negative_probes),
        opts,
    )
    .context("failed to attach replay source")?;

    let consumer = if session.collector().tracing_enabled() {
        let out_dir = args.out.clone().unwrap_or_else(|| cfg.trace.dir.clone());
        let writer = TsvWriter::new(&out_dir, cfg.trace.max_size_bytes(), cfg.trace.max_files)
            .with_context(|| format!("cannot open trace output in {}", out_dir.display()))?;

        let mut consumer_opts = ConsumerOptions::from(&cfg.trace);
        if let Some(spec) = &args.filter {
            consumer_opts.filter = PathFilter::parse(spec);
        }
        if let Some(raw) = &args.raw {
            let file = File::create(raw)
                .with_context(|| format!("cannot create {}", raw.display()))?;
            consumer_opts.raw = Some(RawWriter::new(BufWriter::new(file)));
        }

        let rx = session
            .collector()
            .take_receiver()
            .context("trace receiver already taken")?;
        log_cli_info!("Writing traces", dir = tracing::field::display(out_dir.display()));
        Some(TraceConsumer::spawn(rx, writer, consumer_opts)?)
    } else {
        None
    };

    let counts = session.source().replay()?;
    let collector = session.stop();
    let summary = match consumer {
        Some(c) => Some(c.stop()?),
        None => None,
    };

    let mut report = StatsReport::capture(&collector, &cfg.report.proc_root);
    let resolver = Resolver::new(&cfg.report.proc_root, &cfg.report.cgroup_root);
    if resolver.refresh().is_ok() {
        report.label_with(&resolver);
    }

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print_summary(&args.dir, &counts, summary.as_ref(), &report);
    }
    Ok(())
}

fn print_summary(
    dir: &Path,
    counts: &ReplayCounts,
    summary: Option<&ConsumerSummary>,
    report: &StatsReport,
) {
    println!();
    println!("  Replayed {}", dir.display());
    println!(
        "  entries={} dirs={} missing={} skipped={}",
        counts.entries, counts.dirs, counts.missing, counts.skipped
    );
    println!();
    println!(
        "  {:>20}  {:>10}  {:>10}  {:>10}  pod",
        "group", "alloc", "positive", "negative"
    );
    for g in &report.groups {
        println!(
            "  {:>20}  {:>10}  {:>10}  {:>10}  {}",
            g.group_id, g.stats.alloc, g.stats.positive, g.stats.negative, g.pod
        );
    }
    println!();
    println!("  reclaim events: {}", report.reclaim_total);
    if report.drops.table_exhausted + report.drops.channel_full > 0 {
        println!(
            "  dropped: table_exhausted={} channel_full={}",
            report.drops.table_exhausted, report.drops.channel_full
        );
    }
    if let Some(s) = summary {
        println!(
            "  traces: received={} written={} filtered={}",
            s.received, s.written, s.filtered
        );
    }
}
