//! Build-time stages: dependency installation, toolchain provisioning and
//! artifact assembly, driven in order by [`pipeline::Pipeline`].

pub mod assembler;
pub mod installer;
pub mod pipeline;
pub mod process;
pub mod toolchain;

pub use pipeline::{BuildOutcome, Decision, Pipeline, PlannedStage};
pub use process::{CommandOutcome, CommandRunner, CommandSpec, SystemRunner};
