use bootline_core::config::{process_env, Recipe};
use bootline_core::BootError;
use bootline_launch::{LaunchOverrides, Launcher};
use bootline_provision::SystemRunner;

pub fn run(
    recipe: &Recipe,
    port: Option<u16>,
    keep_alive: Option<u64>,
    entry: Option<String>,
    dry_run: bool,
) -> Result<i32, BootError> {
    let overrides = LaunchOverrides {
        port,
        keep_alive,
        entry,
    };
    let launcher = Launcher::new(recipe, &SystemRunner, overrides).dry_run(dry_run);
    if dry_run {
        let cmd = launcher.prepare(&process_env)?;
        println!("cd {} && {}", cmd.cwd.display(), cmd.display());
        return Ok(0);
    }
    launcher.launch(&process_env)
}
