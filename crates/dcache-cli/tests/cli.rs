//! End-to-end runs of the `dcachemon` binary.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

fn command(home: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_dcachemon"));
    cmd.args(args)
        .env("HOME", home)
        .env_remove("DCACHE_TRACE")
        .env_remove("DCACHE_TRACE_DIR")
        .env_remove("DCACHE_RINGBUF_BYTES")
        .env_remove("DCACHE_STATS_CAPACITY")
        .env_remove("DCACHE_LISTEN")
        .current_dir(home);
    cmd
}

fn dcachemon(home: &Path, args: &[&str]) -> Output {
    command(home, args)
        .output()
        .expect("Failed to execute dcachemon")
}

/// Kills the child if the test bails out early.
struct Running(Child);

impl Drop for Running {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
fn e2e_config_prints_defaults() {
    let home = tempfile::tempdir().unwrap();
    let output = dcachemon(home.path(), &["config"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: dcache_config::Config = toml::from_str(&stdout).unwrap();
    assert_eq!(parsed, dcache_config::Config::default());
    assert!(stdout.contains("[probe]"));
    assert!(stdout.contains("[trace]"));
}

#[test]
fn e2e_replay_then_decode() {
    let home = tempfile::tempdir().unwrap();
    let tree = home.path().join("tree");
    fs::create_dir_all(tree.join("etc/conf.d")).unwrap();
    fs::write(tree.join("etc/conf.d/app.conf"), b"x").unwrap();
    fs::write(tree.join("etc/hosts"), b"x").unwrap();

    let out = home.path().join("traces");
    let raw = home.path().join("events.raw");
    let output = dcachemon(
        home.path(),
        &[
            "replay",
            tree.to_str().unwrap(),
            "--group",
            "5",
            "--trace",
            "--negative-probes",
            "--out",
            out.to_str().unwrap(),
            "--raw",
            raw.to_str().unwrap(),
            "--json",
        ],
    );
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let group = &report["groups"][0];
    assert_eq!(group["group_id"], 5);
    // etc, etc/conf.d, etc/conf.d/app.conf, etc/hosts + one miss per directory
    assert_eq!(group["alloc"], 7);
    assert_eq!(group["positive"], 4);
    assert_eq!(group["negative"], 3);
    assert_eq!(report["reclaim_total"], 1);

    let tsv = fs::read_to_string(out.join("traces.tsv")).unwrap();
    assert_eq!(tsv.lines().count(), 1 + 7);
    assert!(tsv.contains("conf.d/app.conf"));

    let decoded = dcachemon(home.path(), &["decode", raw.to_str().unwrap()]);
    assert!(decoded.status.success());
    let lines = String::from_utf8_lossy(&decoded.stdout);
    assert_eq!(lines.lines().count(), 7);
    assert!(lines.lines().all(|l| l.split('\t').nth(1) == Some("5")));
    assert!(lines.contains(".dcache-missing"));
}

#[test]
fn e2e_replay_rejects_missing_dir() {
    let home = tempfile::tempdir().unwrap();
    let output = dcachemon(home.path(), &["replay", "/definitely/not/here", "--group", "1"]);
    assert!(!output.status.success());
}

#[test]
fn e2e_generate_until_max() {
    let home = tempfile::tempdir().unwrap();
    let base = home.path().join("gen");
    let output = dcachemon(
        home.path(),
        &[
            "generate",
            base.to_str().unwrap(),
            "--mode",
            "positive",
            "--rate",
            "100000",
            "--per-dir",
            "4",
            "--max",
            "10",
        ],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Stopped: 10 dentries"));
    assert!(base.join("d2/f1").exists());
    assert!(!base.join("d2/f2").exists());
}

#[test]
fn e2e_monitor_serves_metrics_and_toggles_tracing() {
    let home = tempfile::tempdir().unwrap();
    let tree = home.path().join("tree");
    fs::create_dir_all(tree.join("srv")).unwrap();
    fs::write(tree.join("srv/index.html"), b"x").unwrap();
    let out = home.path().join("traces");

    let child = command(
        home.path(),
        &[
            "monitor",
            tree.to_str().unwrap(),
            "--listen",
            "127.0.0.1:0",
            "--group",
            "9",
            "--out",
            out.to_str().unwrap(),
            "--poll-interval",
            "1",
            "--rescan-interval",
            "1",
        ],
    )
    .stdout(Stdio::piped())
    .stderr(Stdio::null())
    .spawn()
    .expect("Failed to start dcachemon monitor");
    let mut running = Running(child);

    let stdout = running.0.stdout.take().unwrap();
    let mut lines = BufReader::new(stdout).lines();
    let banner = lines.next().unwrap().unwrap();
    let base = banner.strip_prefix("Listening on ").unwrap().to_string();

    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(5))
        .build();
    let get = |path: &str| {
        agent
            .get(&format!("{base}{path}"))
            .call()
            .unwrap()
            .into_string()
            .unwrap()
    };

    assert_eq!(get("/healthz").trim(), "ok");

    // srv, srv/index.html from the initial scan
    let metrics = get("/metrics");
    let alloc: u64 = metrics
        .lines()
        .find(|l| l.starts_with("dentry_alloc_total{") && l.contains("pod=\"cgroup-9\""))
        .and_then(|l| l.rsplit(' ').next())
        .and_then(|v| v.parse().ok())
        .unwrap();
    assert!(alloc >= 2);

    assert_eq!(get("/traces/config"), r#"{"enabled":false}"#);
    let reply = agent
        .put(&format!("{base}/traces/config"))
        .set("Content-Type", "application/json")
        .send_string(r#"{"enabled":true}"#)
        .unwrap()
        .into_string()
        .unwrap();
    assert_eq!(reply, r#"{"enabled":true}"#);

    // rescans now emit traces; wait for the consumer to flush some
    let tsv = out.join("traces.tsv");
    let deadline = Instant::now() + Duration::from_secs(15);
    let traced = loop {
        let text = fs::read_to_string(&tsv).unwrap_or_default();
        if text.contains("srv/index.html") {
            break true;
        }
        if Instant::now() > deadline {
            break false;
        }
        std::thread::sleep(Duration::from_millis(200));
    };
    assert!(traced, "no traces written after enabling tracing");

    drop(agent);
    kill(Pid::from_raw(running.0.id() as i32), Signal::SIGTERM).unwrap();
    let status = running.0.wait().unwrap();
    assert!(status.success());
    let rest: Vec<String> = lines.map_while(|l| l.ok()).collect();
    assert!(rest.iter().any(|l| l.starts_with("Stopped:")));
}
