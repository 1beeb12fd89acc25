//! Build pipeline: runs the enabled stages in order and writes the ready marker
//! once all of them succeed.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use bootline_core::config::{Recipe, ToolchainDescriptor};
use bootline_core::layout::ApplicationLayout;
use bootline_core::observability::record_event;
use bootline_core::state::{Lifecycle, Phase, ReadyMarker, Stage, StageReport, StageStatus};
use bootline_core::BootError;
use chrono::Utc;
use serde::Serialize;

use crate::assembler;
use crate::installer::{self, PythonInstall};
use crate::process::CommandRunner;
use crate::toolchain;

/// Whether a stage will run, and why not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    Run,
    Skip { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStage {
    pub stage: Stage,
    #[serde(flatten)]
    pub decision: Decision,
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub marker: ReadyMarker,
    pub marker_path: PathBuf,
}

/// Values handed from earlier stages to the marker.
#[derive(Default)]
struct BuildState {
    python: Option<PythonInstall>,
    toolchain: Option<ToolchainDescriptor>,
}

pub struct Pipeline<'a> {
    recipe: &'a Recipe,
    runner: &'a dyn CommandRunner,
    extra_skips: Vec<Stage>,
}

impl<'a> Pipeline<'a> {
    pub fn new(recipe: &'a Recipe, runner: &'a dyn CommandRunner) -> Self {
        Self {
            recipe,
            runner,
            extra_skips: Vec::new(),
        }
    }

    /// Additional stages to skip on top of the recipe's `stages.skip`.
    pub fn skip(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.extra_skips.extend(stages);
        self
    }

    /// Decide every stage without executing anything.
    pub fn plan(&self) -> Vec<PlannedStage> {
        let skipped = self.recipe.skipped_stages();
        Stage::ALL
            .into_iter()
            .map(|stage| {
                let decision = if stage.requires_frontend() && self.recipe.frontend.is_none() {
                    Decision::Skip {
                        reason: "front-end capability disabled".into(),
                    }
                } else if skipped.contains(&stage) || self.extra_skips.contains(&stage) {
                    Decision::Skip {
                        reason: "skipped by request".into(),
                    }
                } else {
                    Decision::Run
                };
                PlannedStage { stage, decision }
            })
            .collect()
    }

    /// Run the build. The ready marker is removed first and only written back
    /// when every planned stage has succeeded.
    pub fn run(&self) -> Result<BuildOutcome, BootError> {
        let install_root = &self.recipe.install_root;
        ReadyMarker::clear(install_root)
            .with_context(|| format!("Failed to clear ready marker under {}", install_root.display()))?;
        let entry = self.recipe.entry()?;

        let mut lifecycle = Lifecycle::default();
        let mut state = BuildState::default();
        let mut reports = Vec::with_capacity(Stage::ALL.len());
        record_event("build", None, "start", None, &self.recipe.fingerprint());

        for planned in self.plan() {
            let stage = planned.stage;
            lifecycle.advance(stage.phase())?;

            if let Decision::Skip { reason } = planned.decision {
                tracing::info!(stage = %stage, reason = %reason, "Skipping stage");
                record_event("stage", Some(stage.as_str()), "skipped", None, &reason);
                reports.push(StageReport {
                    stage,
                    status: StageStatus::Skipped(reason),
                    duration_ms: 0,
                });
                continue;
            }

            tracing::info!(stage = %stage, "Running stage");
            let start = Instant::now();
            let result = self.run_stage(stage, &mut state);
            let duration_ms = start.elapsed().as_millis() as u64;
            if let Err(e) = result {
                tracing::error!(stage = %stage, duration_ms, error = %e, "Stage failed");
                record_event("stage", Some(stage.as_str()), "failed", Some(duration_ms), &e.to_string());
                return Err(e);
            }
            record_event("stage", Some(stage.as_str()), "done", Some(duration_ms), "");
            reports.push(StageReport {
                stage,
                status: StageStatus::Done,
                duration_ms,
            });
        }

        lifecycle.advance(Phase::Assembling)?;
        lifecycle.advance(Phase::Ready)?;
        let (manifest_fingerprint, resolved) = match state.python {
            Some(p) => (Some(p.manifest_fingerprint), p.resolved),
            None => (None, Default::default()),
        };
        let marker = ReadyMarker {
            phase: lifecycle.phase(),
            recipe_fingerprint: self.recipe.fingerprint(),
            manifest_fingerprint,
            resolved,
            toolchain: state.toolchain,
            stages: reports,
            entry: entry.to_string(),
            declared_port: self.recipe.launch.expose,
            built_at: Utc::now(),
        };
        let marker_path = marker.write(install_root)?;
        tracing::info!(marker = %marker_path.display(), "Environment ready");
        record_event("build", None, "ready", None, &marker_path.display().to_string());
        Ok(BuildOutcome { marker, marker_path })
    }

    fn run_stage(&self, stage: Stage, state: &mut BuildState) -> Result<(), BootError> {
        let recipe = self.recipe;
        match stage {
            Stage::PythonDeps => {
                state.python = Some(installer::install_python(self.runner, recipe)?);
            }
            Stage::Toolchain => {
                let status = toolchain::provision(self.runner, &recipe.toolchain)?;
                tracing::debug!(version = status.version(), "Toolchain version");
                state.toolchain = Some(recipe.toolchain.descriptor());
            }
            Stage::Copy => {
                let layout = ApplicationLayout::from_recipe(recipe);
                assembler::copy_sources(&layout)?;
                assembler::verify_entry(&layout, &recipe.entry()?)?;
            }
            Stage::NodeDeps => {
                if let Some(fe) = &recipe.frontend {
                    installer::install_node(self.runner, &recipe.project_root, fe)?;
                }
            }
            Stage::FrontendBuild => {
                if let Some(fe) = &recipe.frontend {
                    let layout = ApplicationLayout::from_recipe(recipe);
                    assembler::build_frontend(self.runner, &layout, fe)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{fail, ok, ScriptedRunner};
    use bootline_core::config::FrontendConfig;
    use bootline_core::{AssemblyError, ProvisioningError};
    use std::fs;
    use std::path::Path;

    fn write(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn project(root: &Path, frontend: bool) -> Recipe {
        write(&root.join("ctx/requirements.txt"), "fastapi==0.111.0\nuvicorn\n");
        write(&root.join("ctx/app/main.py"), "from fastapi import FastAPI\napp = FastAPI()\n");
        let mut recipe = Recipe::default();
        recipe.project_root = root.join("ctx");
        recipe.install_root = root.join("install");
        if frontend {
            write(&root.join("ctx/frontend/package.json"), "{}");
            write(&root.join("ctx/frontend/package-lock.json"), "{}");
            recipe.frontend = Some(FrontendConfig::default());
        }
        recipe
    }

    fn runner(root: &Path) -> ScriptedRunner {
        let r = ScriptedRunner::new(&["python3", "npm", "node"]);
        r.respond("python3 -m pip freeze", ok("fastapi==0.111.0\nuvicorn==0.29.0\n"));
        r.respond("node --version", ok("v20.11.1"));
        let dist = root.join("ctx/frontend/dist");
        r.on("npm run build", move |_| write(&dist.join("index.html"), "<html/>"));
        r
    }

    #[test]
    fn test_plan_python_only() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = project(tmp.path(), false);
        let r = ScriptedRunner::default();
        let plan = Pipeline::new(&recipe, &r).plan();
        let runs: Vec<Stage> = plan
            .iter()
            .filter(|p| p.decision == Decision::Run)
            .map(|p| p.stage)
            .collect();
        assert_eq!(runs, vec![Stage::PythonDeps, Stage::Copy]);
        assert!(r.calls.borrow().is_empty());
    }

    #[test]
    fn test_plan_serializes_decisions() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = project(tmp.path(), true);
        let r = ScriptedRunner::default();
        let plan = Pipeline::new(&recipe, &r).skip([Stage::NodeDeps]).plan();
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json[0], serde_json::json!({"stage": "python-deps", "action": "run"}));
        assert_eq!(
            json[3],
            serde_json::json!({"stage": "node-deps", "action": "skip", "reason": "skipped by request"})
        );
    }

    #[test]
    fn test_full_build_writes_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = project(tmp.path(), true);
        let r = runner(tmp.path());

        let outcome = Pipeline::new(&recipe, &r).run().unwrap();
        assert!(outcome.marker_path.is_file());
        assert_eq!(outcome.marker.phase, Phase::Ready);
        assert_eq!(outcome.marker.stages.len(), 5);
        assert!(outcome.marker.stages.iter().all(|s| s.status == StageStatus::Done));
        assert_eq!(outcome.marker.toolchain.as_ref().map(|t| t.major), Some(20));
        assert!(outcome.marker.resolved.contains("uvicorn"));

        let install = tmp.path().join("install");
        assert!(install.join("app/main.py").is_file());
        assert!(install.join("static/index.html").is_file());

        let lines = r.command_lines();
        assert!(lines.iter().any(|l| l == "npm ci --no-audit --no-fund"));
        assert!(lines.iter().any(|l| l == "npm run build"));
        assert!(ReadyMarker::read(&install).unwrap().is_some());
    }

    #[test]
    fn test_python_only_build_has_no_toolchain() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = project(tmp.path(), false);
        let r = runner(tmp.path());
        let outcome = Pipeline::new(&recipe, &r).run().unwrap();
        assert!(outcome.marker.toolchain.is_none());
        assert!(r.command_lines().iter().all(|l| !l.starts_with("npm") && !l.starts_with("node")));
        assert!(matches!(outcome.marker.stages[1].status, StageStatus::Skipped(_)));
    }

    #[test]
    fn test_failed_frontend_build_leaves_no_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = project(tmp.path(), true);
        let r = runner(tmp.path());
        Pipeline::new(&recipe, &r).run().unwrap();

        r.respond("npm run build", fail(1, "vite: build failed"));
        let err = Pipeline::new(&recipe, &r).run().unwrap_err();
        assert!(matches!(err, BootError::Assembly(AssemblyError::BuildFailed { .. })));
        assert_eq!(err.exit_code(), 4);
        assert!(!ReadyMarker::path(&recipe.install_root).exists());
    }

    #[test]
    fn test_install_failure_stops_before_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = project(tmp.path(), false);
        let r = runner(tmp.path());
        r.respond("python3 -m pip install", fail(1, "No matching distribution"));
        let err = Pipeline::new(&recipe, &r).run().unwrap_err();
        assert!(matches!(err, BootError::Provisioning(ProvisioningError::InstallFailed { .. })));
        assert!(!recipe.install_root.join("app").exists());
    }

    #[test]
    fn test_missing_entry_module_fails_copy_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recipe = project(tmp.path(), false);
        recipe.launch.entry = "app.server:app".into();
        let r = runner(tmp.path());
        let err = Pipeline::new(&recipe, &r).run().unwrap_err();
        assert!(matches!(err, BootError::Assembly(AssemblyError::EntryMissing { .. })));
    }
}
