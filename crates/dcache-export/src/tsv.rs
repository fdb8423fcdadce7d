use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use dcache_config::log_export_warn;
use dcache_core::TraceEvent;

use crate::error::Result;

pub const TSV_HEADER: &str = "timestamp\tgroup_id\toperation\tdepth\troot_reached\tpath\n";

const ACTIVE_NAME: &str = "traces.tsv";
const BUF_SIZE: usize = 64 * 1024;

/// Append-only TSV trace file with size-based rotation.
///
/// Lines go to `dir/traces.tsv`. Once the active file reaches `max_size`
/// bytes it is shifted to `traces.tsv.1`, older files move up by one and
/// anything past `traces.tsv.<max_files>` is deleted.
pub struct TsvWriter {
    dir: PathBuf,
    max_size: u64,
    max_files: usize,
    out: BufWriter<File>,
    cur_size: u64,
    rows: u64,
}

impl TsvWriter {
    pub fn new<P: AsRef<Path>>(dir: P, max_size: u64, max_files: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let (out, cur_size) = Self::open(&dir)?;
        Ok(Self {
            dir,
            max_size,
            max_files,
            out,
            cur_size,
            rows: 0,
        })
    }

    pub fn active_path(&self) -> PathBuf {
        self.dir.join(ACTIVE_NAME)
    }

    pub fn rotated_path(&self, n: usize) -> PathBuf {
        self.dir.join(format!("{ACTIVE_NAME}.{n}"))
    }

    /// Rows written since the writer was created
    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn open(dir: &Path) -> Result<(BufWriter<File>, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(ACTIVE_NAME))?;
        let mut size = file.metadata()?.len();
        let mut out = BufWriter::with_capacity(BUF_SIZE, file);
        if size == 0 {
            out.write_all(TSV_HEADER.as_bytes())?;
            size = TSV_HEADER.len() as u64;
        }
        Ok((out, size))
    }

    /// Write one record observed at `seen` with its rebuilt `path`.
    pub fn write_event(&mut self, seen: DateTime<Utc>, evt: &TraceEvent, path: &str) -> Result<()> {
        let line = format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            seen.to_rfc3339_opts(SecondsFormat::Nanos, true),
            evt.group_id,
            evt.operation.as_str(),
            evt.count(),
            evt.root_reached(),
            sanitize(path),
        );
        self.out.write_all(line.as_bytes())?;
        self.cur_size += line.len() as u64;
        self.rows += 1;

        if self.cur_size >= self.max_size {
            if let Err(e) = self.rotate() {
                log_export_warn!(
                    "Trace file rotation failed",
                    error = tracing::field::display(&e),
                );
            }
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.out.flush()?;

        if self.max_files == 0 {
            fs::remove_file(self.active_path())?;
        } else {
            let _ = fs::remove_file(self.rotated_path(self.max_files));
            for i in (1..self.max_files).rev() {
                let _ = fs::rename(self.rotated_path(i), self.rotated_path(i + 1));
            }
            fs::rename(self.active_path(), self.rotated_path(1))?;
        }

        let (out, size) = Self::open(&self.dir)?;
        self.out = out;
        self.cur_size = size;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }
}

// Tabs and newlines inside a name would break the row.
fn sanitize(path: &str) -> std::borrow::Cow<'_, str> {
    if path.contains(['\t', '\n', '\r']) {
        path.replace(['\t', '\n', '\r'], " ").into()
    } else {
        path.into()
    }
}
