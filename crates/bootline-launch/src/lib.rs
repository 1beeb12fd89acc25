//! Service launcher: resolves the listening port, runs preflight checks and
//! hands the process over to the ASGI server.

pub mod command;
pub mod launcher;
pub mod preflight;
pub mod resolve;

pub use command::LaunchCommand;
pub use launcher::{LaunchOverrides, Launcher};
pub use resolve::{resolve_keep_alive, resolve_port};
