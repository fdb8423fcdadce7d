use dcache_core::TraceEvent;

/// Rebuild a path from a record's leaf-first components.
///
/// Components are joined root-first. Names equal to `/` (filesystem and
/// mount roots) are dropped, the result starts with `/` only when the walk
/// reached the root, and an empty result renders as `/`.
pub fn build_path(evt: &TraceEvent) -> String {
    let mut parts: Vec<&[u8]> = evt
        .components()
        .filter(|name| !name.is_empty() && *name != b"/")
        .collect();
    parts.reverse();

    if parts.is_empty() {
        return "/".to_string();
    }

    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 || evt.root_reached() {
            out.push('/');
        }
        out.push_str(&String::from_utf8_lossy(part));
    }
    out
}
