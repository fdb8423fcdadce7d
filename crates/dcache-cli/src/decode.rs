use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use dcache_export::{build_path, RawReader};

/// Print one line per raw trace record:
/// `timestamp group_id operation depth root_reached path`.
pub fn run(file: &Path) -> Result<()> {
    let input = File::open(file).with_context(|| format!("cannot open {}", file.display()))?;
    for (idx, record) in RawReader::new(BufReader::new(input)).enumerate() {
        let evt = record.with_context(|| format!("record {idx} of {}", file.display()))?;
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            evt.timestamp,
            evt.group_id,
            evt.operation.as_str(),
            evt.count(),
            evt.root_reached(),
            build_path(&evt)
        );
    }
    Ok(())
}
