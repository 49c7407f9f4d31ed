use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;

const SCENARIO: &str = r##"{
  "root_requirements": ["pkg-a==1.0"],
  "generated_at": "2024-03-01T12:30:00Z",
  "platform_info": {
    "markers": {
      "implementation_name": "cpython",
      "implementation_version": "3.12.1",
      "os_name": "posix",
      "platform_machine": "x86_64",
      "platform_python_implementation": "CPython",
      "platform_release": "6.1.0",
      "platform_system": "Linux",
      "platform_version": "#1 SMP",
      "python_full_version": "3.12.1",
      "python_version": "3.12",
      "sys_platform": "linux"
    },
    "tags": ["cp312-cp312-manylinux_2_17_x86_64", "py3-none-any"]
  },
  "allowed_sdist_packages": [],
  "packages": {
    "pkg-a": {
      "versions": {
        "1.0": {
          "dependencies": ["pkg-b>=2.0"],
          "source_kind": "wheel",
          "fetch_outcome": "ok"
        }
      }
    },
    "pkg-b": {
      "versions": {
        "2.0": {
          "dependencies": [],
          "requires_python": ">=3.8",
          "source_kind": "wheel",
          "fetch_outcome": "ok"
        },
        "2.1": {
          "dependencies": [],
          "source_kind": "unavailable",
          "fetch_outcome": "skipped-sdist-not-allowed"
        }
      }
    }
  }
}
"##;

fn write_scenario(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("pkg-a-0.json");
    fs::write(&path, contents).expect("write scenario");
    path
}

fn json_envelope(args: &[&str], code: i32) -> Value {
    let assert = cargo_bin_cmd!("resbench")
        .args(args)
        .arg("--json")
        .assert()
        .code(code);
    serde_json::from_slice(&assert.get_output().stdout).expect("json envelope")
}

#[test]
fn check_accepts_a_valid_scenario() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_scenario(temp.path(), SCENARIO);
    let payload = json_envelope(&["check", path.to_str().expect("utf8 path")], 0);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["details"]["packages"], 2);
    assert_eq!(payload["details"]["versions"], 3);
    assert_eq!(payload["details"]["outcomes"]["skipped-sdist-not-allowed"], 1);
}

#[test]
fn check_rejects_unknown_fields_with_exit_one() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tampered = SCENARIO.replacen(
        "\"allowed_sdist_packages\": [],",
        "\"allowed_sdist_packages\": [],\n  \"comment\": \"hand edited\",",
        1,
    );
    let path = write_scenario(temp.path(), &tampered);
    let payload = json_envelope(&["check", path.to_str().expect("utf8 path")], 1);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["code"], "RB402");
}

#[test]
fn check_rejects_mismatched_outcome() {
    let temp = tempfile::tempdir().expect("tempdir");
    let broken = SCENARIO.replacen("\"source_kind\": \"unavailable\"", "\"source_kind\": \"sdist\"", 1);
    let path = write_scenario(temp.path(), &broken);
    let payload = json_envelope(&["check", path.to_str().expect("utf8 path")], 1);
    assert_eq!(payload["details"]["code"], "RB403");
}

#[test]
fn missing_scenario_is_a_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("nope.json");
    cargo_bin_cmd!("resbench")
        .args(["check", missing.to_str().expect("utf8 path")])
        .assert()
        .code(1);
}

#[test]
fn wheels_materializes_available_versions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_scenario(temp.path(), SCENARIO);
    let output = temp.path().join("wheelhouse");
    let payload = json_envelope(
        &[
            "wheels",
            path.to_str().expect("utf8 path"),
            "--output-dir",
            output.to_str().expect("utf8 path"),
        ],
        0,
    );
    assert_eq!(payload["details"]["wheels"], 2);
    assert!(output
        .join("pkg-b")
        .join("pkg_b-2.0-py2.py3-none-any.whl")
        .exists());
    assert!(!output
        .join("pkg-b")
        .join("pkg_b-2.1-py2.py3-none-any.whl")
        .exists());
}

#[test]
fn bench_without_wheelhouse_points_at_wheels() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_scenario(temp.path(), SCENARIO);
    let payload = json_envelope(
        &[
            "bench",
            path.to_str().expect("utf8 path"),
            "--wheelhouse",
            temp.path().join("absent").to_str().expect("utf8 path"),
        ],
        1,
    );
    let hint = payload["details"]["hint"].as_str().unwrap_or_default();
    assert!(hint.contains("resbench wheels"), "{payload}");
}
