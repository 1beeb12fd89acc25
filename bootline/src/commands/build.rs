use bootline_core::config::Recipe;
use bootline_core::state::{Stage, StageStatus};
use bootline_core::BootError;
use bootline_provision::{Pipeline, SystemRunner};

pub fn run(recipe: &Recipe, skip: Vec<Stage>) -> Result<i32, BootError> {
    let outcome = Pipeline::new(recipe, &SystemRunner).skip(skip).run()?;
    for report in &outcome.marker.stages {
        match &report.status {
            StageStatus::Done => println!("  done  {:<15} {} ms", report.stage, report.duration_ms),
            StageStatus::Skipped(reason) => println!("  skip  {:<15} {}", report.stage, reason),
        }
    }
    println!("Ready: {}", outcome.marker_path.display());
    Ok(0)
}
