//! Subcommand implementations. Each returns the process exit status on success;
//! failures carry their own status through [`BootError::exit_code`].

mod build;
mod inspect;
mod launch;
mod render;

use std::path::Path;

use anyhow::Context;
use bootline_core::config::{process_env, Recipe};
use bootline_core::BootError;

use crate::cli::{Cli, Commands};

pub fn dispatch(cli: Cli) -> Result<i32, BootError> {
    let recipe = load_recipe(cli.recipe.as_deref())?;
    match cli.command {
        Commands::Build { skip } => build::run(&recipe, skip),
        Commands::Launch {
            port,
            keep_alive,
            entry,
            dry_run,
        } => launch::run(&recipe, port, keep_alive, entry, dry_run),
        Commands::Plan { skip, json } => inspect::plan(&recipe, skip, json),
        Commands::Status { json } => inspect::status(&recipe, json),
        Commands::Render => {
            print!("{}", render::containerfile(&recipe));
            Ok(0)
        }
    }
}

fn load_recipe(explicit: Option<&Path>) -> Result<Recipe, BootError> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(Recipe::resolve(explicit, &cwd, &process_env)?)
}
