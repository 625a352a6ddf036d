// tests/protocol.rs
//! Drives the compiled engine over its standard streams.

use autoload_engine::{
    host::EngineHandle,
    protocol::Request,
    vendor_check::CheckPackage
};
use serde_json::{
    json,
    Value
};
use std::{
    fs,
    io::Write,
    path::{
        Path,
        PathBuf
    },
    process::{
        Command,
        Output,
        Stdio
    },
    thread,
    time::Duration
};
use tempfile::TempDir;

fn engine() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_autoload-engine"))
}

fn run_raw(input: &str) -> Output {
    let mut child = Command::new(engine())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(input.as_bytes()).unwrap();
    child.wait_with_output().unwrap()
}

/// Drops the timing field so responses compare exactly.
fn without_timing(mut v: Value) -> Value {
    let timing = v.as_object_mut().and_then(|o| o.remove("elapsed_ms"));
    assert!(timing.is_some_and(|t| t.is_u64()), "missing elapsed_ms in {v}");
    v
}

fn run(input: &Value) -> Value {
    let out = run_raw(&input.to_string());
    assert!(out.status.success(), "engine failed: {}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).unwrap()
}

fn two_file_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("src")).unwrap();
    fs::create_dir_all(tmp.path().join("lib")).unwrap();
    fs::write(tmp.path().join("src/Foo.php"), "<?php\nnamespace A;\n\nclass Foo {}\n").unwrap();
    fs::write(tmp.path().join("lib/Bar.php"), "<?php\nnamespace B;\n\ninterface Bar {}\n").unwrap();
    tmp
}

fn classmap_request(root: &Path) -> Value {
    json!({
        "command": "classmap",
        "project_dir": root,
        "autoload": {
            "psr-4": [
                {"namespace": "A\\", "path": "src"},
                {"namespace": "B\\", "path": "lib"}
            ]
        },
        "suffix": "it01"
    })
}

#[test]
fn version_flag() {
    let out = Command::new(engine()).arg("--version").output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("autoload-engine"), "{text}");
    assert!(text.contains(env!("CARGO_PKG_VERSION")), "{text}");
}

#[test]
fn vendor_check_example() {
    let tmp = TempDir::new().unwrap();
    let a = tmp.path().join("a");
    fs::create_dir_all(&a).unwrap();
    fs::write(a.join("composer.json"), "{}").unwrap();
    let c = tmp.path().join("c");
    fs::create_dir_all(&c).unwrap();

    let out = run(&json!({
        "command": "vendor-check",
        "check_packages": [
            {"name": "a", "install_path": a},
            {"name": "b", "install_path": tmp.path().join("b")},
            {"name": "c", "install_path": c}
        ]
    }));
    assert_eq!(without_timing(out), json!({"present": 1, "missing": ["b"], "incomplete": ["c"], "total": 3}));
}

#[test]
fn classmap_cold_then_warm() {
    let tmp = two_file_project();
    let req = classmap_request(tmp.path());

    let first = run(&req);
    assert_eq!(first["classmap_count"], 2);
    assert_eq!(first["files_written"], true);
    assert_eq!(first["stats"]["walk_skipped"], false);
    assert_eq!(first["stats"]["files_scanned"], 2);

    let target = tmp.path().join("vendor/composer");
    let classmap = fs::read_to_string(target.join("autoload_classmap.php")).unwrap();
    assert!(classmap.contains("'A\\\\Foo' => $baseDir . '/src/Foo.php',"));
    assert!(classmap.contains("'B\\\\Bar' => $baseDir . '/lib/Bar.php',"));
    assert!(target.join(".autoload-cache.json").exists());
    assert!(tmp.path().join("vendor/autoload.php").exists());

    let second = run(&req);
    assert_eq!(second["classmap_count"], 2);
    assert_eq!(second["stats"]["walk_skipped"], true);
    assert_eq!(second["stats"]["files_scanned"], 0);
    assert_eq!(fs::read_to_string(target.join("autoload_classmap.php")).unwrap(), classmap);
}

#[test]
fn classmap_inline_mode() {
    let tmp = two_file_project();
    let mut req = classmap_request(tmp.path());
    req["write_files"] = json!(false);

    let out = run(&req);
    assert_eq!(out["files_written"], false);
    assert!(out["classmap_file_content"].as_str().unwrap().contains("A\\\\Foo"));
    assert!(out["static_file_content"].as_str().unwrap().contains("ComposerStaticInitit01"));
    assert!(!tmp.path().join("vendor").exists());
}

#[test]
fn request_from_file() {
    let tmp = TempDir::new().unwrap();
    let req = tmp.path().join("req.json");
    fs::write(&req, r#"{"command":"verify","verify_targets":[]}"#).unwrap();

    let out = Command::new(engine()).arg("--input").arg(&req).output().unwrap();
    assert!(out.status.success());
    let v: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(without_timing(v), json!({"verified": 0, "total": 0, "failed": []}));
}

#[test]
fn protocol_errors_exit_nonzero_without_response() {
    for input in [r#"{"command":"frobnicate"}"#, "{not json", r#"{"command":"classmap"}"#] {
        let out = run_raw(input);
        assert_eq!(out.status.code(), Some(2), "{input}");
        assert!(out.stdout.is_empty(), "{input}");
        assert!(!out.stderr.is_empty(), "{input}");
    }
}

#[test]
fn generation_error_exits_one() {
    let tmp = two_file_project();
    let req = json!({
        "command": "classmap",
        "project_dir": tmp.path(),
        "autoload": {"psr-4": [{"namespace": "A", "path": "src"}]}
    });
    let out = run_raw(&req.to_string());
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
    assert!(!tmp.path().join("vendor/composer/autoload_classmap.php").exists());
}

#[test]
fn batch_runs_everything_in_order() {
    let tmp = two_file_project();
    let doomed = tmp.path().join("old-pkg");
    fs::create_dir_all(&doomed).unwrap();

    let out = run(&json!({
        "command": "batch",
        "requests": [
            {"command": "clean", "targets": [{"path": doomed, "name": "old/pkg"}]},
            {"command": "classmap", "project_dir": tmp.path(), "autoload": {"psr-4": [{"namespace": "A", "path": "src"}]}},
            classmap_request(tmp.path())
        ]
    }));

    let results = out["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["result"]["cleaned"], 1);
    assert!(results[1]["error"].as_str().unwrap().contains("namespace separator"));
    assert_eq!(results[2]["result"]["classmap_count"], 2);
    assert!(!doomed.exists());
}

#[test]
fn handle_collects_later() {
    let tmp = TempDir::new().unwrap();
    let request = Request::VendorCheck {
        check_packages: vec![CheckPackage { name: "gone".into(), install_path: tmp.path().join("gone") }],
    };

    let handle = EngineHandle::start(&engine(), &request).unwrap();
    let out = handle.collect().unwrap();
    assert_eq!(out["missing"], json!(["gone"]));
    assert_eq!(out["total"], 1);
}

#[test]
fn handle_polls_until_done() {
    let mut handle = EngineHandle::start_raw(&engine(), &[], r#"{"command":"clean","targets":[]}"#).unwrap();
    let mut answer = None;
    for _ in 0..500 {
        if let Some(v) = handle.try_collect().unwrap() {
            answer = Some(v);
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(answer.map(without_timing), Some(json!({"cleaned": 0, "failed": []})));
}

#[test]
fn handle_reports_engine_failure() {
    let handle = EngineHandle::start_raw(&engine(), &[], r#"{"command":"nope"}"#).unwrap();
    let err = handle.collect().unwrap_err();
    let text = format!("{err:#}");
    assert!(text.contains("unknown command"), "{text}");
}
