//! `ctools packages` and `ctools unlinked`.

use anyhow::Result;
use console::style;
use ctools_audit::unlinked_packages;
use ctools_cache::PackagePool;
use ctools_config::log_cli_info;
use serde_json::json;

use crate::context::Context;
use crate::output::{self, format_number};

pub fn list(ctx: &Context) -> Result<bool> {
    let mut pool = PackagePool::new();
    let mut rows = Vec::new();
    for cache in ctx.caches() {
        let archives = cache.named_archives();
        for record in cache.packages(&mut pool) {
            let dir_name = record.dir_name();
            rows.push(json!({
                "cache": cache.root().display().to_string(),
                "dist": dir_name,
                "name": record.name(),
                "version": record.version(),
                "build": record.build(),
                "files": record.files().len(),
                "archive": archives.contains_key(&dir_name),
            }));
        }
    }

    if ctx.json {
        output::print_json(&json!(rows))?;
        return Ok(true);
    }
    for row in &rows {
        let marker = if row["archive"] == true { " " } else { "*" };
        println!(
            "{}{:<50} {:>8} files",
            marker,
            row["dist"].as_str().unwrap_or_default(),
            row["files"]
        );
    }
    eprintln!(
        "{} packages ({} marked * have no archive)",
        style(format_number(rows.len() as u64)).bold(),
        rows.iter().filter(|row| row["archive"] == false).count()
    );
    Ok(true)
}

pub fn unlinked(ctx: &Context) -> Result<bool> {
    let envs = ctx.environments();
    let mut pool = PackagePool::new();
    let mut unlinked = Vec::new();
    let mut total = 0;
    for cache in ctx.caches() {
        let records = cache.packages(&mut pool);
        total += records.len();
        unlinked.extend(unlinked_packages(&records, &envs, &mut pool)?);
    }
    log_cli_info!(environments = envs.len(), unlinked = unlinked.len(), "correlated caches");

    if ctx.json {
        let paths: Vec<String> = unlinked
            .iter()
            .map(|record| record.path().display().to_string())
            .collect();
        output::print_json(&json!(paths))?;
        return Ok(true);
    }
    for record in &unlinked {
        println!("{}", record.path().display());
    }
    eprintln!(
        "{} of {} cached packages are not linked into any of {} environments",
        style(unlinked.len()).bold(),
        total,
        envs.len()
    );
    Ok(true)
}
