//! E2E tests for the ctools binary
//!
//! Each test builds a cache and environments in a temp dir and runs the
//! compiled binary against them with an isolated HOME.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use ctools_cache::testing::{write_history, PackageFixture, TestWorkspace};
use serde_json::Value;

/// Run ctools with `--pkgs-dir`/`--envs-dir` pointing into `ws`.
fn ctools(ws: &TestWorkspace, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ctools"))
        .arg("--pkgs-dir")
        .arg(&ws.pkgs_dir)
        .arg("--envs-dir")
        .arg(&ws.envs_dir)
        .args(args)
        .env("HOME", &ws.root)
        .env_remove("CTOOLS_PKGS_DIRS")
        .env_remove("CTOOLS_ENVS_DIRS")
        .env_remove("CTOOLS_HASH")
        .env_remove("CONDA_PREFIX")
        .current_dir(&ws.root)
        .output()
        .expect("Failed to execute ctools")
}

fn json_stdout(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}",
            e,
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

/// python and numpy linked into `base`; zlib only cached.
fn populate(ws: &TestWorkspace) -> std::path::PathBuf {
    let base = ws.env_root("base").unwrap();
    let pkgs = [
        PackageFixture::new("python", "3.5.1", "0").file("bin/python", b"#!python"),
        PackageFixture::new("numpy", "1.10.4", "py35_0")
            .depends(&["python 3.5*"])
            .file("lib/python3.5/site-packages/numpy/__init__.py", b"# numpy"),
        PackageFixture::new("zlib", "1.2.8", "3").file("lib/libz.so", b"zlib"),
    ];
    for pkg in &pkgs {
        let dir = pkg.write_extracted(&ws.pkgs_dir).unwrap();
        pkg.write_archive(&ws.pkgs_dir).unwrap();
        if pkg.dist_name() != "zlib-1.2.8-3" {
            pkg.link_into(&dir, &base, "hard-link").unwrap();
        }
    }
    write_history(
        &base,
        "==> 2016-03-01 10:00:00 <==\n\
         # cmd: conda create -n base python\n\
         python-3.5.1-0\n\
         # create specs: ['python']\n\
         ==> 2016-03-02 10:00:00 <==\n\
         # cmd: conda install numpy\n\
         +numpy-1.10.4-py35_0\n\
         # install specs: ['numpy']\n",
    )
    .unwrap();
    base
}

#[test]
fn e2e_packages_lists_cache() {
    let ws = TestWorkspace::new().unwrap();
    populate(&ws);
    let output = ctools(&ws, &["--json", "packages"]);
    assert!(output.status.success());

    let rows = json_stdout(&output);
    let names: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["numpy", "python", "zlib"]);
    assert!(rows.as_array().unwrap().iter().all(|row| row["archive"] == true));
}

#[test]
fn e2e_unlinked_reports_only_idle_packages() {
    let ws = TestWorkspace::new().unwrap();
    populate(&ws);
    let output = ctools(&ws, &["--json", "unlinked"]);
    assert!(output.status.success());

    let paths = json_stdout(&output);
    let paths = paths.as_array().unwrap();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].as_str().unwrap().ends_with("zlib-1.2.8-3"));
}

#[test]
fn e2e_verify_exit_code_follows_mismatch() {
    let ws = TestWorkspace::new().unwrap();
    populate(&ws);
    assert!(ctools(&ws, &["verify"]).status.success());
    assert!(ctools(&ws, &["verify", "--fail-fast", "--hash", "sha256"]).status.success());

    fs::write(ws.pkgs_dir.join("zlib-1.2.8-3/lib/libz.so"), b"zlic").unwrap();
    let output = ctools(&ws, &["--json", "verify", "--no-materialize"]);
    assert_eq!(output.status.code(), Some(1));
    let rows = json_stdout(&output);
    let bad: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .filter(|row| row["ok"] == false)
        .map(|row| row["package"].as_str().unwrap())
        .collect();
    assert_eq!(bad, vec!["zlib-1.2.8-3"]);

    assert_eq!(ctools(&ws, &["verify", "--fail-fast"]).status.code(), Some(1));
}

#[test]
fn e2e_verify_rejects_unknown_hash() {
    let ws = TestWorkspace::new().unwrap();
    populate(&ws);
    let output = ctools(&ws, &["verify", "--hash", "crc32"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("crc32"));
}

#[cfg(unix)]
#[test]
fn e2e_check_links() {
    let ws = TestWorkspace::new().unwrap();
    let base = populate(&ws);
    assert!(ctools(&ws, &["check-links"]).status.success());

    fs::remove_file(base.join("bin/python")).unwrap();
    fs::write(base.join("bin/python"), b"#!python").unwrap();
    let output = ctools(&ws, &["--json", "check-links", "--env", "base"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(json_stdout(&output)["base"]["python"][0], "bin/python");
}

#[test]
fn e2e_environment_queries() {
    let ws = TestWorkspace::new().unwrap();
    let base = populate(&ws);

    let output = ctools(&ws, &["--json", "deps", "--env", "base"]);
    assert!(output.status.success());
    assert_eq!(json_stdout(&output)["numpy"][0], "python");

    let output = ctools(&ws, &["--json", "orphans", "--env", "base"]);
    assert_eq!(json_stdout(&output), serde_json::json!(["numpy-1.10.4-py35_0"]));

    let absolute = base.join("bin/python");
    let output = ctools(&ws, &["--json", "owns", absolute.to_str().unwrap(), "--env", "base"]);
    assert!(output.status.success());
    assert_eq!(json_stdout(&output)["owners"], serde_json::json!(["python-3.5.1-0"]));

    let output = ctools(&ws, &["--json", "envs"]);
    assert_eq!(json_stdout(&output)[0]["packages"], 2);
}

#[test]
fn e2e_history() {
    let ws = TestWorkspace::new().unwrap();
    populate(&ws);

    let output = ctools(&ws, &["history", "--env", "base"]);
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("2016-03-02 10:00:00  (rev 1)"));
    assert!(text.contains("+numpy-1.10.4"));

    let output = ctools(&ws, &["--json", "history", "--env", "base", "--explicit"]);
    let explicit = json_stdout(&output);
    assert_eq!(explicit["2016-03-02 10:00:00"], serde_json::json!(["numpy-1.10.4-py35_0"]));
}

#[test]
fn e2e_unknown_environment_fails() {
    let ws = TestWorkspace::new().unwrap();
    populate(&ws);
    let output = ctools(&ws, &["deps", "--env", "nope"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope"));
}

#[test]
fn e2e_repo_check() {
    let ws = TestWorkspace::new().unwrap();
    populate(&ws);
    let index = serde_json::json!({
        "info": { "subdir": "linux-64" },
        "packages": {
            "zlib-1.2.8-3.tar.bz2": { "name": "zlib", "version": "1.2.8", "build": "3", "md5": "0".repeat(32) }
        }
    });
    let index_path = ws.root.join("repodata.json");
    fs::write(&index_path, serde_json::to_vec(&index).unwrap()).unwrap();

    let output = ctools(&ws, &["--json", "repo-check", index_path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let rows = json_stdout(&output);
    let zlib = rows
        .as_array()
        .unwrap()
        .iter()
        .find(|row| row["archive"] == "zlib-1.2.8-3.tar.bz2")
        .unwrap();
    assert_eq!(zlib["md5_ok"], false);
}

#[test]
fn e2e_config_show_returns_valid_toml() {
    let ws = TestWorkspace::new().unwrap();
    let output = ctools(&ws, &["config", "show"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: ctools_config::Config = toml::from_str(&stdout).unwrap();
    assert_eq!(parsed.verify.hash_algorithm, "md5");
    assert!(stdout.contains("[cache]"));
}

#[test]
fn e2e_config_path_shows_locations() {
    let ws = TestWorkspace::new().unwrap();
    let output = ctools(&ws, &["config", "path"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("Global:"));
    assert!(stdout.contains(&Path::new(".ctools").join("config.toml").display().to_string()));
}

#[test]
fn e2e_environment_selected_by_path() {
    let ws = TestWorkspace::new().unwrap();
    let base = populate(&ws);
    let output = ctools(&ws, &["--json", "deps", "--env", base.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(json_stdout(&output)["numpy"][0], "python");
}
