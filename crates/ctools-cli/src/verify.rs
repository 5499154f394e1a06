//! `ctools verify` and `ctools repo-check`.

use std::path::Path;

use anyhow::{Context as _, Result};
use clap::Args;
use console::style;
use ctools_audit::{verify_hashes, verify_package};
use ctools_cache::{HashAlgorithm, PackagePool};
use ctools_config::log_cli_info;
use ctools_repo::Repository;
use serde_json::json;

use crate::context::Context;
use crate::output;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Digest to compare with: md5, sha256 or blake3 (default from config)
    #[arg(long)]
    hash: Option<String>,

    /// Stream archives directly instead of decompressing to a temp file first
    #[arg(long)]
    no_materialize: bool,

    /// Stop at the first mismatch instead of checking every package
    #[arg(long)]
    fail_fast: bool,
}

pub fn run(ctx: &Context, args: VerifyArgs) -> Result<bool> {
    let algorithm = match &args.hash {
        Some(name) => name.parse::<HashAlgorithm>()?,
        None => ctx.hash,
    };
    if args.fail_fast {
        return run_fail_fast(ctx, algorithm);
    }
    let materialize = ctx.materialize && !args.no_materialize;

    let mut pool = PackagePool::new();
    let mut results = Vec::new();
    for cache in ctx.caches() {
        let pairs = cache.correlated(&mut pool);
        let pb = output::progress(pairs.len() as u64, ctx.json);
        for (name, (record, mut archive)) in pairs {
            pb.set_message(name.clone());
            if materialize {
                archive
                    .materialize()
                    .with_context(|| format!("Failed to decompress {}", archive.path().display()))?;
            }
            let mismatch = verify_package(&record, &mut archive, algorithm)?;
            archive.close()?;
            pb.inc(1);
            results.push((name, mismatch));
        }
        pb.finish_and_clear();
    }

    let failed = results.iter().filter(|(_, m)| m.is_some()).count();
    log_cli_info!(packages = results.len(), failed, algorithm = algorithm.name(), "verification finished");

    if ctx.json {
        let rows: Vec<_> = results
            .iter()
            .map(|(name, mismatch)| {
                json!({
                    "package": name,
                    "ok": mismatch.is_none(),
                    "mismatch": mismatch.as_ref().map(|m| m.to_string()),
                })
            })
            .collect();
        output::print_json(&json!(rows))?;
        return Ok(failed == 0);
    }

    output::header(&format!("Verifying {} packages ({})", results.len(), algorithm));
    for (name, mismatch) in &results {
        if let Some(mismatch) = mismatch {
            output::fail(&format!("{}: {}", name, mismatch));
        }
    }
    if failed == 0 {
        output::pass("All extracted packages match their archives");
    } else {
        eprintln!();
        eprintln!("  {} of {} packages differ", style(failed).red().bold(), results.len());
    }
    Ok(failed == 0)
}

fn run_fail_fast(ctx: &Context, algorithm: HashAlgorithm) -> Result<bool> {
    let mut pool = PackagePool::new();
    for cache in ctx.caches() {
        let records = cache.packages(&mut pool);
        let mut archives = cache.archives();
        if !verify_hashes(&records, &mut archives, algorithm)? {
            if ctx.json {
                output::print_json(&json!({ "ok": false, "cache": cache.root().display().to_string() }))?;
            } else {
                output::fail(&format!("Mismatch in {}", cache.root().display()));
            }
            return Ok(false);
        }
    }
    if ctx.json {
        output::print_json(&json!({ "ok": true }))?;
    } else {
        output::pass("All extracted packages match their archives");
    }
    Ok(true)
}

pub fn repo_check(ctx: &Context, index: &Path) -> Result<bool> {
    let repo = Repository::open(index).with_context(|| format!("Failed to read index {}", index.display()))?;
    log_cli_info!(url = %repo.url(), packages = repo.len(), "loaded repository index");

    let mut rows = Vec::new();
    for cache in ctx.caches() {
        for mut archive in cache.archives() {
            let verdict = repo.verify_archive(&mut archive)?;
            rows.push((archive.file_name(), verdict));
        }
    }
    let bad = rows.iter().filter(|(_, verdict)| *verdict == Some(false)).count();

    if ctx.json {
        let out: Vec<_> = rows
            .iter()
            .map(|(file, verdict)| json!({ "archive": file, "md5_ok": verdict }))
            .collect();
        output::print_json(&json!(out))?;
        return Ok(bad == 0);
    }

    output::header(&format!("Checking archives against {}", repo));
    for (file, verdict) in &rows {
        match verdict {
            Some(true) => output::pass(file),
            Some(false) => output::fail(&format!("{}: md5 differs from index", file)),
            None => output::warn(&format!("{}: not in index", file)),
        }
    }
    Ok(bad == 0)
}
