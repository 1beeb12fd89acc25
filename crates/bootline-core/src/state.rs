//! Lifecycle phases, pipeline stage names and the ready marker.
//!
//! The marker is the only state shared between the build phase and every later
//! process start. It is removed when a build begins and written only after the
//! last stage succeeds.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ToolchainDescriptor;
use crate::error::{ConfigError, LaunchError};
use crate::manifest::ResolvedSet;

/// Marker location relative to the install root.
pub const MARKER_DIR: &str = ".bootline";
pub const MARKER_FILE: &str = "ready.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    PythonDeps,
    Toolchain,
    Copy,
    NodeDeps,
    FrontendBuild,
}

impl Stage {
    /// Execution order.
    pub const ALL: [Stage; 5] = [
        Stage::PythonDeps,
        Stage::Toolchain,
        Stage::Copy,
        Stage::NodeDeps,
        Stage::FrontendBuild,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PythonDeps => "python-deps",
            Self::Toolchain => "toolchain",
            Self::Copy => "copy",
            Self::NodeDeps => "node-deps",
            Self::FrontendBuild => "frontend-build",
        }
    }

    /// Stages that only exist when the front-end capability is on.
    pub fn requires_frontend(&self) -> bool {
        matches!(self, Self::Toolchain | Self::NodeDeps | Self::FrontendBuild)
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::PythonDeps | Self::Toolchain => Phase::Provisioning,
            Self::Copy | Self::NodeDeps | Self::FrontendBuild => Phase::Assembling,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|st| st.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnknownStage(s.to_string()))
    }
}

/// Container lifecycle: `Provisioning → Assembling → Ready → Serving → Crashed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Provisioning,
    Assembling,
    Ready,
    Serving,
    Crashed,
}

impl Phase {
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Provisioning, Provisioning)
                | (Provisioning, Assembling)
                | (Assembling, Assembling)
                | (Assembling, Ready)
                | (Ready, Serving)
                | (Serving, Serving)
                | (Serving, Crashed)
                | (Ready, Crashed)
        )
    }
}

/// Tracks the current phase and rejects illegal moves.
#[derive(Debug)]
pub struct Lifecycle {
    phase: Phase,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            phase: Phase::Provisioning,
        }
    }
}

impl Lifecycle {
    /// Start at `phase`, e.g. `Ready` for a process start on a built image.
    pub fn at(phase: Phase) -> Self {
        Self { phase }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn advance(&mut self, next: Phase) -> anyhow::Result<()> {
        if !self.phase.can_transition_to(next) {
            anyhow::bail!("illegal lifecycle transition {:?} -> {:?}", self.phase, next);
        }
        tracing::debug!(from = ?self.phase, to = ?next, "Lifecycle transition");
        self.phase = next;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Done,
    Skipped(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration_ms: u64,
}

/// Written to `<install_root>/.bootline/ready.json` after a successful build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyMarker {
    pub phase: Phase,
    pub recipe_fingerprint: String,
    pub manifest_fingerprint: Option<String>,
    #[serde(default)]
    pub resolved: ResolvedSet,
    pub toolchain: Option<ToolchainDescriptor>,
    pub stages: Vec<StageReport>,
    pub entry: String,
    pub declared_port: u16,
    pub built_at: DateTime<Utc>,
}

impl ReadyMarker {
    pub fn path(install_root: &Path) -> PathBuf {
        install_root.join(MARKER_DIR).join(MARKER_FILE)
    }

    pub fn write(&self, install_root: &Path) -> anyhow::Result<PathBuf> {
        use anyhow::Context;
        let path = Self::path(install_root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Create {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(self).context("Serialize ready marker")?;
        // Atomic replace.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, body).with_context(|| format!("Write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("Write {}", path.display()))?;
        Ok(path)
    }

    /// `Ok(None)` when no marker exists.
    pub fn read(install_root: &Path) -> Result<Option<Self>, LaunchError> {
        let path = Self::path(install_root);
        if !path.exists() {
            return Ok(None);
        }
        let bad = |message: String| LaunchError::BadMarker {
            path: path.clone(),
            message,
        };
        let content = std::fs::read_to_string(&path).map_err(|e| bad(e.to_string()))?;
        let marker: Self = serde_json::from_str(&content).map_err(|e| bad(e.to_string()))?;
        if marker.phase != Phase::Ready {
            return Err(bad(format!("phase is {:?}, expected ready", marker.phase)));
        }
        Ok(Some(marker))
    }

    /// Remove any marker left by a previous build.
    pub fn clear(install_root: &Path) -> std::io::Result<()> {
        match std::fs::remove_file(Self::path(install_root)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker() -> ReadyMarker {
        ReadyMarker {
            phase: Phase::Ready,
            recipe_fingerprint: "abc".into(),
            manifest_fingerprint: Some("def".into()),
            resolved: ResolvedSet::from_freeze("fastapi==0.111.0\n"),
            toolchain: Some(ToolchainDescriptor {
                runtime: "node".into(),
                major: 20,
            }),
            stages: vec![
                StageReport {
                    stage: Stage::PythonDeps,
                    status: StageStatus::Done,
                    duration_ms: 12,
                },
                StageReport {
                    stage: Stage::FrontendBuild,
                    status: StageStatus::Skipped("no frontend".into()),
                    duration_ms: 0,
                },
            ],
            entry: "app.main:app".into(),
            declared_port: 8080,
            built_at: Utc::now(),
        }
    }

    #[test]
    fn test_stage_names_round_trip() {
        for st in Stage::ALL {
            assert_eq!(st.as_str().parse::<Stage>().unwrap(), st);
        }
        assert!("deploy".parse::<Stage>().is_err());
    }

    #[test]
    fn test_phase_transitions() {
        assert!(Phase::Provisioning.can_transition_to(Phase::Assembling));
        assert!(Phase::Ready.can_transition_to(Phase::Serving));
        assert!(Phase::Serving.can_transition_to(Phase::Crashed));
        assert!(!Phase::Provisioning.can_transition_to(Phase::Serving));
        assert!(!Phase::Assembling.can_transition_to(Phase::Serving));
        assert!(!Phase::Crashed.can_transition_to(Phase::Serving));
    }

    #[test]
    fn test_lifecycle_rejects_skipping_ready() {
        let mut lc = Lifecycle::default();
        lc.advance(Phase::Assembling).unwrap();
        assert!(lc.advance(Phase::Serving).is_err());
        lc.advance(Phase::Ready).unwrap();
        lc.advance(Phase::Serving).unwrap();
        assert_eq!(lc.phase(), Phase::Serving);
    }

    #[test]
    fn test_marker_write_read_clear() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(ReadyMarker::read(tmp.path()).unwrap().is_none());

        let path = marker().write(tmp.path()).unwrap();
        assert!(path.ends_with(".bootline/ready.json"));
        let back = ReadyMarker::read(tmp.path()).unwrap().unwrap();
        assert_eq!(back.stages.len(), 2);
        assert_eq!(back.stages[1].status, StageStatus::Skipped("no frontend".into()));
        assert_eq!(back.declared_port, 8080);

        ReadyMarker::clear(tmp.path()).unwrap();
        assert!(ReadyMarker::read(tmp.path()).unwrap().is_none());
        ReadyMarker::clear(tmp.path()).unwrap();
    }

    #[test]
    fn test_marker_with_wrong_phase_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = marker();
        m.phase = Phase::Assembling;
        m.write(tmp.path()).unwrap();
        assert!(matches!(
            ReadyMarker::read(tmp.path()),
            Err(LaunchError::BadMarker { .. })
        ));
    }
}
