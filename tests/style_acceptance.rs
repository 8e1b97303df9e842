/// Acceptance tests for `ngpack style` and `ngpack cache`
///
/// Each test runs the binary inside its own temp workspace with its own
/// cache directory, so tests can run in parallel.
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct TestWorkspace {
    temp_dir: TempDir,
    cache_dir: PathBuf,
}

impl TestWorkspace {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let cache_dir = temp_dir.path().join("cache");
        Self {
            temp_dir,
            cache_dir,
        }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn ngpack(&self) -> Command {
        let mut cmd = Command::new(std::env!("CARGO_BIN_EXE_ngpack"));
        cmd.current_dir(self.path())
            .env("NGPACK_CACHE_DIR", &self.cache_dir)
            .env("NGPACK_LOG_FORMAT", "compact")
            .env_remove("NGPACK_CACHE")
            .env_remove("NGPACK_CONFIG")
            .env_remove("RUST_LOG");
        cmd
    }

    fn stats(&self) -> String {
        let output = self.ngpack().args(["cache", "stats"]).output().unwrap();
        assert!(output.status.success());
        String::from_utf8(output.stdout).unwrap()
    }
}

#[test]
fn test_style_prints_compacted_css() {
    let ws = TestWorkspace::new();
    ws.write("a.css", ".a { color: red; }\n");

    ws.ngpack()
        .args(["style", "a.css"])
        .assert()
        .success()
        .stdout(predicate::eq(".a{color:red}\n"));
}

#[test]
fn test_second_run_uses_cache() {
    let ws = TestWorkspace::new();
    ws.write("a.css", ".a { color: red; }\n");

    let first = ws.ngpack().args(["style", "a.css"]).output().unwrap();
    let second = ws.ngpack().args(["style", "a.css"]).output().unwrap();

    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
    assert!(ws.stats().contains("Total entries: 1"));
}

#[test]
fn test_browsers_change_fingerprint() {
    let ws = TestWorkspace::new();
    ws.write("a.css", ".a { color: red; }\n");

    ws.ngpack()
        .args(["style", "a.css", "--browser", "chrome 120"])
        .assert()
        .success();
    ws.ngpack()
        .args(["style", "a.css", "--browser", "chrome 121"])
        .assert()
        .success();

    assert!(ws.stats().contains("Total entries: 2"));
}

#[test]
fn test_no_cache_writes_nothing() {
    let ws = TestWorkspace::new();
    ws.write("a.css", ".a { color: red; }\n");

    ws.ngpack()
        .args(["style", "a.css", "--no-cache"])
        .assert()
        .success();

    assert!(ws.stats().contains("Total entries: 0"));
}

#[test]
fn test_unusable_cache_dir_does_not_fail_build() {
    let ws = TestWorkspace::new();
    ws.write("a.css", ".a { color: red; }\n");
    let blocker = ws.write("not-a-dir", "");

    ws.ngpack()
        .env("NGPACK_CACHE_DIR", &blocker)
        .args(["style", "a.css"])
        .assert()
        .success()
        .stdout(predicate::eq(".a{color:red}\n"));
}

#[test]
fn test_out_writes_file() {
    let ws = TestWorkspace::new();
    ws.write("a.css", ".a { margin: 0 auto; }\n.b { }\n");

    ws.ngpack()
        .args(["style", "a.css", "--out", "a.min.css"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Wrote"));

    assert_eq!(
        fs::read_to_string(ws.path().join("a.min.css")).unwrap(),
        ".a{margin:0 auto}.b{}"
    );
}

#[test]
fn test_unconfigured_dialect_fails() {
    let ws = TestWorkspace::new();
    ws.write("a.scss", "$c: red;\n.a { color: $c; }\n");

    ws.ngpack()
        .args(["style", "a.scss"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no scss preprocessor configured"));
}

#[test]
fn test_malformed_browsers_fail() {
    let ws = TestWorkspace::new();
    ws.write("a.css", ".a { color: red; }\n");
    ws.write("ngpack.toml", "[styles]\nbrowsers = [\"chrome\"]\n");

    ws.ngpack()
        .args(["style", "a.css"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed browser entry"));
}

#[test]
fn test_cache_clear() {
    let ws = TestWorkspace::new();
    ws.write("a.css", ".a { color: red; }\n");
    ws.write("b.css", ".b { color: blue; }\n");

    ws.ngpack().args(["style", "a.css"]).assert().success();
    ws.ngpack().args(["style", "b.css"]).assert().success();

    ws.ngpack()
        .args(["cache", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 2 entries"));
    assert!(ws.stats().contains("Total entries: 0"));
}

fn total_entries(stats: &str) -> usize {
    stats
        .lines()
        .find_map(|line| line.trim().strip_prefix("Total entries: "))
        .and_then(|n| n.trim().parse().ok())
        .unwrap()
}

fn style_many(ws: &TestWorkspace, count: usize) {
    for i in 0..count {
        let name = format!("s{}.css", i);
        ws.write(
            &name,
            &format!(".s{} {{ content: \"{}\"; }}\n", i, "x".repeat(200)),
        );
        ws.ngpack().args(["style", &name]).assert().success();
    }
}

#[test]
fn test_cache_gc_respects_max_size() {
    let ws = TestWorkspace::new();
    style_many(&ws, 8);
    assert_eq!(total_entries(&ws.stats()), 8);

    ws.write("ngpack.toml", "[cache]\nmax_size = \"1KB\"\n");
    ws.ngpack()
        .args(["cache", "gc"])
        .assert()
        .success()
        .stdout(predicate::str::contains("using lru policy"))
        .stdout(predicate::str::contains("Evicted 0 entries").not());
    assert!(total_entries(&ws.stats()) < 8);
}

#[test]
fn test_style_trims_cache_over_limit() {
    let ws = TestWorkspace::new();
    ws.write("ngpack.toml", "[cache]\nmax_size = \"1KB\"\n");
    style_many(&ws, 8);

    assert!(total_entries(&ws.stats()) < 8);
    ws.ngpack()
        .args(["cache", "gc"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Evicted 0 entries"));
}

#[test]
fn test_disabled_cache() {
    let ws = TestWorkspace::new();

    ws.ngpack()
        .env("NGPACK_CACHE", "0")
        .args(["cache", "stats"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("disabled"));
}
