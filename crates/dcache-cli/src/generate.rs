//! Steady dentry churn for exercising the monitor.
//!
//! Positive mode hard-links a shared source file, so every entry stays
//! cached and instantiated. Negative mode creates and immediately unlinks
//! each file, leaving an unreferenced entry behind. Entries are spread over
//! `d<N>` subdirectories of the base path, `per_dir` to a directory.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use dcache_config::{log_cli_debug, log_cli_info, log_cli_warn};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

const WINDOWS_PER_SEC: u64 = 10;
const REPORT_EVERY: Duration = Duration::from_secs(5);

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn on_stop_signal(_: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Positive,
    Negative,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Positive => "positive",
            Mode::Negative => "negative",
        }
    }
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Base directory for generated entries
    #[arg(value_name = "BASE")]
    base: PathBuf,

    /// Kind of entry to leave behind (default: [generator].mode)
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Target entries per second (default: [generator].rate)
    #[arg(long)]
    rate: Option<u64>,

    /// Entries per subdirectory (default: [generator].per_dir)
    #[arg(long)]
    per_dir: Option<u64>,

    /// Stop after this many entries, 0 for no limit (default: [generator].max)
    #[arg(long)]
    max: Option<u64>,
}

pub struct Generator {
    base: PathBuf,
    mode: Mode,
    per_dir: u64,
    src: PathBuf,
    dir: PathBuf,
    dir_idx: u64,
    file_idx: u64,
    total: u64,
}

impl Generator {
    /// Create the base directory, the first subdirectory and, for positive
    /// mode, the link source `BASE/.src`.
    pub fn prepare(base: &Path, mode: Mode, per_dir: u64) -> io::Result<Self> {
        fs::create_dir_all(base)?;
        let src = base.join(".src");
        if mode == Mode::Positive {
            OpenOptions::new()
                .create(true)
                .write(true)
                .mode(0o644)
                .open(&src)?;
        }
        let dir = base.join("d0");
        fs::create_dir_all(&dir)?;
        Ok(Self {
            base: base.to_path_buf(),
            mode,
            per_dir: per_dir.max(1),
            src,
            dir,
            dir_idx: 0,
            file_idx: 0,
            total: 0,
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Create one entry. `Ok(false)` means this name was skipped; errors are
    /// fatal to the run.
    pub fn step(&mut self) -> io::Result<bool> {
        if self.file_idx >= self.per_dir {
            self.dir_idx += 1;
            self.file_idx = 0;
            self.dir = self.base.join(format!("d{}", self.dir_idx));
            if let Err(e) = fs::create_dir(&self.dir) {
                if e.kind() != io::ErrorKind::AlreadyExists || !self.dir.is_dir() {
                    return Err(e);
                }
            }
        }

        let path = self.dir.join(format!("f{}", self.file_idx));
        self.file_idx += 1;

        let created = match self.mode {
            Mode::Positive => fs::hard_link(&self.src, &path),
            Mode::Negative => OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o644)
                .open(&path)
                .and_then(|_| fs::remove_file(&path)),
        };
        match created {
            Ok(()) => {
                self.total += 1;
                Ok(true)
            }
            Err(e) if is_exhaustion(&e) => Err(e),
            Err(_) => Ok(false),
        }
    }
}

fn is_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENOSPC) | Some(libc::ENOMEM))
}

/// Drive `gen` at `rate` entries per second in 100 ms windows until
/// `running` clears, `max` entries exist (0 = no limit) or the filesystem
/// runs out of room. Any other I/O failure is returned.
pub fn drive(gen: &mut Generator, rate: u64, max: u64, running: &AtomicBool) -> Result<()> {
    let batch = (rate / WINDOWS_PER_SEC).max(1);
    let window = Duration::from_secs_f64(batch as f64 / rate as f64);
    let start = Instant::now();
    let mut last_report = start;

    'outer: while running.load(Ordering::SeqCst) {
        let window_start = Instant::now();
        let mut done = 0;
        while done < batch {
            if !running.load(Ordering::SeqCst) {
                break 'outer;
            }
            match gen.step() {
                Ok(true) => done += 1,
                Ok(false) => {}
                Err(e) if is_exhaustion(&e) => {
                    log_cli_warn!(
                        "Out of space or memory",
                        total = gen.total(),
                        error = tracing::field::display(&e),
                    );
                    eprintln!("Out of space/memory at {} total", gen.total());
                    break 'outer;
                }
                Err(e) => {
                    log_cli_warn!(
                        "Generator failed",
                        total = gen.total(),
                        error = tracing::field::display(&e),
                    );
                    return Err(anyhow::Error::new(e)
                        .context(format!("generator stopped at {} total", gen.total())));
                }
            }
            if max > 0 && gen.total() >= max {
                break 'outer;
            }
        }

        if last_report.elapsed() >= REPORT_EVERY {
            let elapsed = start.elapsed().as_secs_f64();
            println!(
                "[{:6.0}s] total={}  rate={:.0}/s (target={}/s)",
                elapsed,
                gen.total(),
                gen.total() as f64 / elapsed,
                rate
            );
            last_report = Instant::now();
        }

        if let Some(rest) = window.checked_sub(window_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    Ok(())
}

fn install_signal_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_stop_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // Safety: the handler only stores to an atomic.
        unsafe { sigaction(sig, &action) }
            .with_context(|| format!("failed to install {sig} handler"))?;
    }
    Ok(())
}

pub fn run(args: GenerateArgs) -> Result<()> {
    let defaults = dcache_config::config().generator.clone();
    let mode = match args.mode {
        Some(m) => m,
        None => Mode::from_str(&defaults.mode, true).map_err(anyhow::Error::msg)?,
    };
    let rate = args.rate.unwrap_or(defaults.rate);
    let per_dir = args.per_dir.unwrap_or(defaults.per_dir);
    let max = args.max.unwrap_or(defaults.max);
    if rate == 0 || per_dir == 0 {
        bail!("rate and per-dir must be positive");
    }

    install_signal_handlers()?;
    let mut gen = Generator::prepare(&args.base, mode, per_dir)
        .with_context(|| format!("cannot prepare {}", args.base.display()))?;

    print!(
        "dentry generator: rate={rate}/s, mode={}, base={}",
        mode.as_str(),
        args.base.display()
    );
    if max > 0 {
        print!(", max={max}");
    }
    println!();
    log_cli_info!("Generator started", rate = rate, per_dir = per_dir, max = max);

    let start = Instant::now();
    drive(&mut gen, rate, max, &RUNNING)?;
    let elapsed = start.elapsed().as_secs_f64();

    println!();
    println!(
        "Stopped: {} dentries in {:.1}s (avg {:.0}/s)",
        gen.total(),
        elapsed,
        gen.total() as f64 / elapsed.max(f64::EPSILON)
    );
    log_cli_debug!("Generator stopped", total = gen.total());
    Ok(())
}
