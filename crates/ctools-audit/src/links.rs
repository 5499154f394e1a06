//! Hard link verification.

use std::collections::BTreeMap;
use std::path::Path;

use ctools_cache::{PackagePool, PackageRecord};
use ctools_config::log_audit_warn;
use ctools_env::Environment;

use crate::Result;

/// Whether `a` and `b` are the same inode on the same device.
///
/// Links are not followed. A missing or unreadable file is never hard linked.
#[cfg(unix)]
pub fn is_hardlinked(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (a.symlink_metadata(), b.symlink_metadata()) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
pub fn is_hardlinked(_a: &Path, _b: &Path) -> bool {
    false
}

/// Files of `record` that should be hard links in `env` but are not.
///
/// Prefix files and `no_link` files are rewritten or copied on install, so
/// they are left out. The result is sorted.
pub fn check_hardlinked_pkg(env: &Environment, record: &PackageRecord) -> Vec<String> {
    let prefixed = record.has_prefix();
    let no_link = record.no_link();
    record
        .iter_files()
        .filter(|file| !prefixed.contains_key(*file) && !no_link.contains(*file))
        .filter(|file| !is_hardlinked(&record.path().join(file), &env.root().join(file)))
        .map(str::to_string)
        .collect()
}

/// [`check_hardlinked_pkg`] for every hard-linked package in `env`, keyed by
/// package name.
///
/// A package whose cache source cannot be opened reports every file it
/// installed.
pub fn check_hardlinked_env(env: &Environment, pool: &mut PackagePool) -> Result<BTreeMap<String, Vec<String>>> {
    let mut report = BTreeMap::new();
    for meta in env.hard_linked()? {
        let bad = match meta.to_package(env.root(), pool) {
            Ok(record) => check_hardlinked_pkg(env, &record),
            Err(e) => {
                log_audit_warn!(package = %meta.full_spec(), error = %e, "hard-linked package missing from cache");
                meta.files().iter().cloned().collect()
            }
        };
        report.insert(meta.name().to_string(), bad);
    }
    Ok(report)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use ctools_cache::testing::{PackageFixture, TestWorkspace};
    use ctools_cache::PrefixMode;
    use serde_json::json;
    use std::fs;

    fn python() -> PackageFixture {
        PackageFixture::new("python", "3.5.1", "0")
            .file("bin/python3.5", b"ELF /opt/anaconda1anaconda2anaconda3")
            .file("lib/os.py", b"import sys\n")
            .file("lib/site.py", b"# site\n")
            .file("lib/abc.py", b"# abc\n")
            .prefix("/opt/anaconda1anaconda2anaconda3", PrefixMode::Binary, "bin/python3.5")
            .no_link("lib/site.py")
    }

    #[test]
    fn test_is_hardlinked() {
        let ws = TestWorkspace::new().unwrap();
        let a = ws.root.join("a");
        fs::write(&a, "x").unwrap();
        fs::hard_link(&a, ws.root.join("b")).unwrap();
        fs::write(ws.root.join("c"), "x").unwrap();

        assert!(is_hardlinked(&a, &ws.root.join("b")));
        assert!(!is_hardlinked(&a, &ws.root.join("c")));
        assert!(!is_hardlinked(&a, &ws.root.join("missing")));
    }

    #[test]
    fn test_prefix_and_no_link_files_are_exempt() {
        let ws = TestWorkspace::new().unwrap();
        let env_root = ws.env_root("py35").unwrap();
        let pkg = python();
        let src = pkg.write_extracted(&ws.pkgs_dir).unwrap();
        pkg.link_into(&src, &env_root, "hard-link").unwrap();

        let env = Environment::open(&env_root).unwrap();
        let record = PackageRecord::open(&src).unwrap();
        assert!(check_hardlinked_pkg(&env, &record).is_empty());

        // Break one link by replacing the file with a copy.
        fs::remove_file(env_root.join("lib/os.py")).unwrap();
        fs::write(env_root.join("lib/os.py"), "import sys\n").unwrap();
        fs::remove_file(env_root.join("lib/abc.py")).unwrap();
        assert_eq!(check_hardlinked_pkg(&env, &record), vec!["lib/abc.py", "lib/os.py"]);
    }

    #[test]
    fn test_check_env_reports_per_package() {
        let ws = TestWorkspace::new().unwrap();
        let env_root = ws.env_root("py35").unwrap();
        let pkg = python();
        let src = pkg.write_extracted(&ws.pkgs_dir).unwrap();
        pkg.link_into(&src, &env_root, "hard-link").unwrap();

        let six = PackageFixture::new("six", "1.10.0", "py35_0").file("lib/six.py", b"# six");
        let six_src = six.write_extracted(&ws.pkgs_dir).unwrap();
        six.link_into(&six_src, &env_root, "copy").unwrap();

        let gone = PackageFixture::new("gone", "1", "0").file("lib/gone.py", b"");
        let source = ws.pkgs_dir.join(gone.dist_name());
        gone.write_meta(&env_root, json!({ "source": source, "type": "hard-link" }))
            .unwrap();

        let env = Environment::open(&env_root).unwrap();
        let mut pool = PackagePool::new();
        let report = check_hardlinked_env(&env, &mut pool).unwrap();

        assert_eq!(report.keys().collect::<Vec<_>>(), vec!["gone", "python"]);
        assert!(report["python"].is_empty());
        assert_eq!(report["gone"], vec!["lib/gone.py"]);
    }
}
