//! Group id resolution for cgroup v2 hosts.
//!
//! A group id is the inode number of the cgroup v2 directory a task belongs
//! to. Kubernetes pod and container identities are recovered from the
//! cgroup path by name only; no API server is consulted.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use dcache_config::{log_export_debug, log_export_info};
use serde::Serialize;

use crate::error::{ExportError, Result};

const QOS_CLASSES: [&str; 3] = ["/burstable/", "/besteffort/", "/guaranteed/"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodInfo {
    pub pod: String,
    pub container: String,
    pub group_id: u64,
}

/// Extract the unified-hierarchy path from the contents of a
/// `/proc/<pid>/cgroup` file (the `0::<path>` line).
///
/// Paths seen through another namespace may be relative
/// (`/../../burstable/pod.../cid`). They are cleaned and, when the
/// `kubepods` prefix was lost, it is restored in front of the QoS class.
pub fn parse_cgroup_v2_path(contents: &str) -> Option<String> {
    let raw = contents.lines().find_map(|l| l.strip_prefix("0::"))?;
    let mut path = clean(raw);
    if !path.contains("kubepods") {
        if let Some(idx) = QOS_CLASSES.iter().find_map(|q| path.find(q)) {
            path = format!("/kubepods{}", &path[idx..]);
        }
    }
    Some(path)
}

// Lexical cleanup of an absolute path: drops empty and `.` components and
// resolves `..` without ever climbing above `/`.
fn clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Pod and container identity from a kubepods cgroup path.
///
/// Handles both driver layouts:
///
/// ```text
/// /kubepods.slice/kubepods-burstable.slice/kubepods-burstable-pod<uid>.slice/cri-containerd-<id>.scope
/// /kubepods/burstable/pod<uid>/<64-hex container id>
/// ```
pub fn parse_pod_from_cgroup_path(path: &str) -> Option<PodInfo> {
    if !path.contains("kubepods") {
        return None;
    }

    let mut pod_uid = None;
    let mut container = String::new();
    for part in path.split('/') {
        let stem = part.strip_suffix(".slice").unwrap_or(part);
        let uid = stem
            .strip_prefix("pod")
            .or_else(|| stem.rfind("-pod").map(|i| &stem[i + 4..]));
        if let Some(uid) = uid.filter(|u| !u.is_empty()) {
            pod_uid = Some(uid);
        }

        if let Some(id) = part.strip_prefix("cri-containerd-") {
            container = id.strip_suffix(".scope").unwrap_or(id).to_string();
        } else if part.len() == 64 && part.bytes().all(|b| b.is_ascii_hexdigit()) {
            container = part.to_string();
        }
    }

    Some(PodInfo {
        pod: format!("pod-{}", shorten_uid(pod_uid?)),
        container,
        group_id: 0,
    })
}

/// Systemd escapes dashes in pod UIDs as underscores; undo that and keep
/// the first twelve characters.
pub fn shorten_uid(uid: &str) -> String {
    uid.replace('_', "-").chars().take(12).collect()
}

/// Inode of `<cgroup_root>/<cg_path>`, which is the group id the kernel
/// reports for tasks in that cgroup.
pub fn cgroup_inode(cgroup_root: &Path, cg_path: &str) -> Result<u64> {
    let dir = cgroup_root.join(cg_path.trim_start_matches('/'));
    Ok(fs::metadata(dir)?.ino())
}

/// Group id of the calling process.
pub fn current_group_id(proc_root: &Path, cgroup_root: &Path) -> Result<u64> {
    let path = proc_root.join("self/cgroup");
    let contents = fs::read_to_string(&path)?;
    let cg_path = parse_cgroup_v2_path(&contents).ok_or_else(|| ExportError::Malformed {
        path,
        detail: "no cgroup v2 entry".into(),
    })?;
    cgroup_inode(cgroup_root, &cg_path)
}

/// Maps group ids to pod identities by scanning every process under
/// `proc_root`. Call [`Resolver::refresh`] to rebuild the table.
pub struct Resolver {
    proc_root: PathBuf,
    cgroup_root: PathBuf,
    cache: RwLock<HashMap<u64, PodInfo>>,
}

impl Resolver {
    pub fn new<P: Into<PathBuf>, C: Into<PathBuf>>(proc_root: P, cgroup_root: C) -> Self {
        Self {
            proc_root: proc_root.into(),
            cgroup_root: cgroup_root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Rescan `proc_root`. Returns the number of mapped groups.
    pub fn refresh(&self) -> Result<usize> {
        let mut fresh = HashMap::new();

        for entry in fs::read_dir(&self.proc_root)? {
            let Ok(entry) = entry else { continue };
            let name = entry.file_name();
            let Some(pid) = name.to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            if pid == 0 {
                continue;
            }

            let Ok(contents) = fs::read_to_string(entry.path().join("cgroup")) else {
                continue;
            };
            let Some(cg_path) = parse_cgroup_v2_path(&contents) else {
                continue;
            };
            let Some(mut info) = parse_pod_from_cgroup_path(&cg_path) else {
                continue;
            };
            match cgroup_inode(&self.cgroup_root, &cg_path) {
                Ok(ino) => {
                    info.group_id = ino;
                    fresh.insert(ino, info);
                }
                Err(e) => {
                    log_export_debug!(
                        "Cgroup directory not found",
                        pid = pid,
                        error = tracing::field::display(&e),
                    );
                }
            }
        }

        let count = fresh.len();
        match self.cache.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        log_export_info!("Resolver refreshed", mappings = count);
        Ok(count)
    }

    pub fn resolve(&self, group_id: u64) -> Option<PodInfo> {
        let cache = self.cache.read().unwrap_or_else(|p| p.into_inner());
        cache.get(&group_id).cloned()
    }

    /// `(pod, container)` labels, falling back to `cgroup-<id>` for groups
    /// outside any pod.
    pub fn labels(&self, group_id: u64) -> (String, String) {
        match self.resolve(group_id) {
            Some(info) => (info.pod, info.container),
            None => (format!("cgroup-{group_id}"), String::new()),
        }
    }

    pub fn snapshot(&self) -> HashMap<u64, PodInfo> {
        self.cache.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}
