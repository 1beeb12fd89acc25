//! Read-only commands: `plan` and `status`.

use anyhow::Context;
use bootline_core::config::Recipe;
use bootline_core::state::{Stage, StageStatus};
use bootline_core::{BootError, LaunchError};
use bootline_provision::{Decision, Pipeline, SystemRunner};
use bootline_launch::preflight::check_ready;

pub fn plan(recipe: &Recipe, skip: Vec<Stage>, json: bool) -> Result<i32, BootError> {
    let planned = Pipeline::new(recipe, &SystemRunner).skip(skip).plan();
    if json {
        let out = serde_json::to_string_pretty(&planned).context("Serialize plan")?;
        println!("{out}");
        return Ok(0);
    }
    for p in &planned {
        match &p.decision {
            Decision::Run => println!("  run   {}", p.stage),
            Decision::Skip { reason } => println!("  skip  {:<15} {}", p.stage, reason),
        }
    }
    Ok(0)
}

pub fn status(recipe: &Recipe, json: bool) -> Result<i32, BootError> {
    let marker = match check_ready(&recipe.install_root) {
        Ok(m) => m,
        Err(e @ LaunchError::NotReady(_)) => {
            if json {
                println!("{}", serde_json::json!({ "ready": false }));
            }
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        let out = serde_json::to_string_pretty(&marker).context("Serialize ready marker")?;
        println!("{out}");
        return Ok(0);
    }
    println!("Ready since {}", marker.built_at.to_rfc3339());
    println!("  entry  {}", marker.entry);
    println!("  port   {}", marker.declared_port);
    if let Some(tc) = &marker.toolchain {
        println!("  {}  {}", tc.runtime, tc.major);
    }
    println!("  packages  {}", marker.resolved.packages.len());
    for report in &marker.stages {
        let status = match &report.status {
            StageStatus::Done => "done",
            StageStatus::Skipped(_) => "skip",
        };
        println!("  {status}  {}", report.stage);
    }
    if marker.recipe_fingerprint != recipe.fingerprint() {
        println!("  (recipe changed since this build)");
    }
    Ok(0)
}
