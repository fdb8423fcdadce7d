//! Integration tests for dcache-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use std::path::PathBuf;
use tempfile::tempdir;

use dcache_config::Config;

/// Test config loading from real global config file
#[test]
fn test_load_global_config_from_file() {
    let temp = tempdir().unwrap();
    let dcache_dir = temp.path().join(".dcache");
    std::fs::create_dir_all(&dcache_dir).unwrap();

    let config_content = r##"
[probe]
stats_capacity = 1024
ring_buffer_bytes = 4194304
trace_enabled = true

[trace]
dir = "/var/lib/dcache"
max_files = 5
patterns = ["#sql", "/tmp/"]

[monitor]
listen = "127.0.0.1:9300"
resolve_interval_secs = 60
"##;
    std::fs::write(dcache_dir.join("config.toml"), config_content).unwrap();

    let config = Config::load_from(
        Some(&dcache_dir.join("config.toml")),
        &temp.path().join("missing/config.toml"),
    )
    .unwrap();

    assert_eq!(config.probe.stats_capacity, 1024);
    assert_eq!(config.probe.ring_buffer_bytes, 4 * 1024 * 1024);
    assert!(config.probe.trace_enabled);
    assert_eq!(config.trace.dir, PathBuf::from("/var/lib/dcache"));
    assert_eq!(config.trace.max_files, 5);
    assert_eq!(config.trace.patterns, vec!["#sql", "/tmp/"]);
    // Untouched sections keep defaults
    assert_eq!(config.trace.max_size_mb, 100);
    assert_eq!(config.generator.mode, "negative");
    assert_eq!(config.monitor.listen, "127.0.0.1:9300");
    assert_eq!(config.monitor.resolve_interval_secs, 60);
    assert_eq!(config.monitor.poll_interval_secs, 5);
}

/// Test config hierarchy: project config overrides global
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let temp = tempdir().unwrap();

    let global_dir = temp.path().join("global/.dcache");
    std::fs::create_dir_all(&global_dir).unwrap();
    std::fs::write(
        global_dir.join("config.toml"),
        r##"
[probe]
stats_capacity = 512

[trace]
patterns = ["node_modules"]
max_files = 9
"##,
    )
    .unwrap();

    let project_dir = temp.path().join("project/.dcache");
    std::fs::create_dir_all(&project_dir).unwrap();
    std::fs::write(
        project_dir.join("config.toml"),
        r##"
[trace]
patterns = ["#sql"]

[generator]
mode = "positive"
rate = 250
"##,
    )
    .unwrap();

    let config = Config::load_from(
        Some(&global_dir.join("config.toml")),
        &project_dir.join("config.toml"),
    )
    .unwrap();

    assert_eq!(config.trace.patterns, vec!["#sql"]);
    assert_eq!(config.trace.max_files, 9);
    assert_eq!(config.probe.stats_capacity, 512);
    assert_eq!(config.generator.mode, "positive");
    assert_eq!(config.generator.rate, 250);
}

/// Malformed files surface as parse errors
#[test]
fn test_invalid_toml_is_reported() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[probe\nstats_capacity = ").unwrap();

    let err = Config::load_from(Some(&path), &temp.path().join("none.toml")).unwrap_err();
    assert!(matches!(err, dcache_config::ConfigError::Toml(_)));
}

/// No files at all yields the defaults
#[test]
fn test_missing_files_yield_defaults() {
    let temp = tempdir().unwrap();
    let config = Config::load_from(
        Some(&temp.path().join("a.toml")),
        &temp.path().join("b.toml"),
    )
    .unwrap();
    assert_eq!(config, Config::default());
}
