use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{ExportError, Result};

/// Node-wide dentry counts from `/proc/sys/fs/dentry-state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DentryState {
    pub total: i64,
    pub unused: i64,
    pub negative: i64,
}

/// Read `<proc_root>/sys/fs/dentry-state`.
pub fn read_dentry_state(proc_root: &Path) -> Result<DentryState> {
    let path = proc_root.join("sys/fs/dentry-state");
    let text = fs::read_to_string(&path)?;
    parse_dentry_state(&text).ok_or_else(|| ExportError::Malformed {
        path,
        detail: "expected at least five integer fields".into(),
    })
}

/// Parse `nr_dentry nr_unused age_limit want_pages nr_negative dummy`.
pub fn parse_dentry_state(text: &str) -> Option<DentryState> {
    let fields: Vec<i64> = text
        .lines()
        .next()?
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    if fields.len() < 5 {
        return None;
    }
    Some(DentryState {
        total: fields[0],
        unused: fields[1],
        negative: fields[4],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_line() {
        let s = parse_dentry_state("183211\t160524\t45\t0\t95387\t0\n").unwrap();
        assert_eq!(
            s,
            DentryState {
                total: 183211,
                unused: 160524,
                negative: 95387
            }
        );
    }

    #[test]
    fn test_short_or_garbage_lines() {
        assert!(parse_dentry_state("1 2 3").is_none());
        assert!(parse_dentry_state("a b c d e f").is_none());
        assert!(parse_dentry_state("").is_none());
    }

    #[test]
    fn test_read_from_proc_root() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("sys/fs")).unwrap();
        fs::write(root.path().join("sys/fs/dentry-state"), "10 4 45 0 3 0\n").unwrap();
        assert_eq!(read_dentry_state(root.path()).unwrap().negative, 3);

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_dentry_state(empty.path()),
            Err(ExportError::Io(_))
        ));
    }
}
