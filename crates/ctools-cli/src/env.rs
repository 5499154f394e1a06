//! Environment commands: `envs`, `check-links`, `owns`, `deps`, `orphans`
//! and `history`.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use console::style;
use ctools_audit::{check_hardlinked_env, dependency_graph, explicitly_installed, orphaned};
use ctools_cache::PackagePool;
use serde_json::json;

use crate::context::{env_relative, Context};
use crate::output;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Environment name or path (default: the active environment)
    #[arg(long, short)]
    env: Option<String>,

    /// Show what each revision installed, removed, upgraded and downgraded
    #[arg(long, conflicts_with_all = ["states", "explicit"])]
    events: bool,

    /// Show the full package set after each revision
    #[arg(long, conflicts_with = "explicit")]
    states: bool,

    /// Show packages the user asked for, per revision
    #[arg(long)]
    explicit: bool,
}

pub fn list(ctx: &Context) -> Result<bool> {
    let envs = ctx.environments();
    let mut rows = Vec::new();
    for env in &envs {
        rows.push(json!({
            "name": env.name(),
            "root": env.root().display().to_string(),
            "packages": env.packages()?.len(),
            "active": env.activated(),
        }));
    }

    if ctx.json {
        output::print_json(&json!(rows))?;
        return Ok(true);
    }
    for row in &rows {
        let marker = if row["active"] == true { "*" } else { " " };
        println!(
            "{} {:<24} {:>5}  {}",
            marker,
            row["name"].as_str().unwrap_or_default(),
            row["packages"],
            row["root"].as_str().unwrap_or_default()
        );
    }
    Ok(true)
}

pub fn check_links(ctx: &Context, selector: Option<&str>) -> Result<bool> {
    let mut pool = PackagePool::new();
    let mut reports = Vec::new();
    for env in ctx.selected_environments(selector)? {
        let report = check_hardlinked_env(&env, &mut pool)?;
        reports.push((env, report));
    }
    let clean = reports
        .iter()
        .all(|(_, report)| report.values().all(Vec::is_empty));

    if ctx.json {
        let out: serde_json::Map<_, _> = reports
            .iter()
            .map(|(env, report)| (env.name().to_string(), json!(report)))
            .collect();
        output::print_json(&serde_json::Value::Object(out))?;
        return Ok(clean);
    }

    for (env, report) in &reports {
        output::header(&format!("{} ({} hard-linked packages)", env.name(), report.len()));
        for (package, files) in report {
            if files.is_empty() {
                continue;
            }
            output::fail(&format!("{}: {} files not hard linked", package, files.len()));
            for file in files {
                eprintln!("      {}", style(file).dim());
            }
        }
        if report.values().all(Vec::is_empty) {
            output::pass("All hard links intact");
        }
    }
    Ok(clean)
}

pub fn owns(ctx: &Context, path: &Path, selector: Option<&str>) -> Result<bool> {
    let env = ctx.environment(selector)?;
    let relative = env_relative(&env, path)?;
    let owners = ctools_audit::owns(&env, &relative)?;

    if ctx.json {
        let specs: Vec<String> = owners.iter().map(|meta| meta.full_spec()).collect();
        output::print_json(&json!({ "path": relative, "owners": specs }))?;
        return Ok(true);
    }
    match owners.as_slice() {
        [] => output::warn(&format!("{} is not owned by any package in {}", relative, env.name())),
        [owner] => println!("{}", owner.full_spec()),
        many => {
            for owner in many {
                println!("{}", owner.full_spec());
            }
            output::warn(&format!("{} packages claim {}", many.len(), relative));
        }
    }
    Ok(true)
}

pub fn deps(ctx: &Context, selector: Option<&str>) -> Result<bool> {
    let env = ctx.environment(selector)?;
    let graph = dependency_graph(&env)?;
    if ctx.json {
        output::print_json(&json!(graph))?;
        return Ok(true);
    }
    for (name, deps) in &graph {
        println!("{}: {}", style(name).bold(), deps.join(", "));
    }
    Ok(true)
}

pub fn orphans(ctx: &Context, selector: Option<&str>) -> Result<bool> {
    let env = ctx.environment(selector)?;
    let specs: Vec<String> = orphaned(&env)?.iter().map(|meta| meta.full_spec()).collect();
    if ctx.json {
        output::print_json(&json!(specs))?;
        return Ok(true);
    }
    for spec in &specs {
        println!("{}", spec);
    }
    Ok(true)
}

pub fn history(ctx: &Context, args: HistoryArgs) -> Result<bool> {
    let env = ctx.environment(args.env.as_deref())?;
    let history = env.history()?;

    if args.explicit {
        let explicit = explicitly_installed(&env)?;
        if ctx.json {
            output::print_json(&json!(explicit))?;
        } else {
            for (date, specs) in &explicit {
                println!("{}", style(date).bold());
                for spec in specs {
                    println!("    {}", spec);
                }
            }
        }
        return Ok(true);
    }

    if args.states {
        let states = history.construct_states()?;
        if ctx.json {
            output::print_json(&serde_json::to_value(states)?)?;
        } else {
            for (rev, state) in states.iter().enumerate() {
                println!("{}  (rev {})", style(&state.date).bold(), rev);
                for dist in &state.packages {
                    println!("    {}", dist);
                }
            }
        }
        return Ok(true);
    }

    if args.events || ctx.json {
        output::print_json(&serde_json::to_value(history.object_log()?)?)?;
        return Ok(true);
    }
    print!("{}", history.pretty_log()?);
    Ok(true)
}
