use std::path::PathBuf;

use bootline_core::state::Stage;
use clap::{Parser, Subcommand};

/// bootline - provision a Python ASGI service at build time, launch it at start time
#[derive(Parser, Debug)]
#[command(name = "bootline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Recipe file (default: BOOTLINE_RECIPE, then bootline.yaml in the current directory)
    #[arg(long, global = true, value_name = "FILE")]
    pub recipe: Option<PathBuf>,

    /// Debug-level logging for all bootline crates
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install dependencies, provision the toolchain and assemble artifacts
    Build {
        /// Stage to skip (repeatable or comma-separated)
        #[arg(long, value_name = "STAGE", value_delimiter = ',')]
        skip: Vec<Stage>,
    },

    /// Run preflight checks and exec into the ASGI server
    Launch {
        /// Listening port (default: PORT, then 8080)
        #[arg(long)]
        port: Option<u16>,

        /// Idle keep-alive timeout in seconds passed to the server
        #[arg(long, value_name = "SECS")]
        keep_alive: Option<u64>,

        /// Entry point as `module.path:object`
        #[arg(long, value_name = "ENTRY")]
        entry: Option<String>,

        /// Print the server command instead of running it (skips import and port probes)
        #[arg(long)]
        dry_run: bool,
    },

    /// Show which build stages would run, without running them
    Plan {
        /// Stage to skip (repeatable or comma-separated)
        #[arg(long, value_name = "STAGE", value_delimiter = ',')]
        skip: Vec<Stage>,

        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// Report whether the environment has a valid ready marker
    Status {
        /// Print the ready marker as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a container recipe that runs `bootline build` and `bootline launch`
    Render,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_skip_accepts_comma_list() {
        let cli = Cli::try_parse_from(["bootline", "build", "--skip", "toolchain,node-deps"]).unwrap();
        match cli.command {
            Commands::Build { skip } => assert_eq!(skip, vec![Stage::Toolchain, Stage::NodeDeps]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_stage_rejected() {
        assert!(Cli::try_parse_from(["bootline", "build", "--skip", "deploy"]).is_err());
    }

    #[test]
    fn test_launch_flags_and_global_recipe() {
        let cli = Cli::try_parse_from([
            "bootline",
            "launch",
            "--port",
            "5000",
            "--keep-alive",
            "120",
            "--recipe",
            "deploy/bootline.yaml",
        ])
        .unwrap();
        assert_eq!(cli.recipe, Some(PathBuf::from("deploy/bootline.yaml")));
        match cli.command {
            Commands::Launch {
                port, keep_alive, dry_run, ..
            } => {
                assert_eq!(port, Some(5000));
                assert_eq!(keep_alive, Some(120));
                assert!(!dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
