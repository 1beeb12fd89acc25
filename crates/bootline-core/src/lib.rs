pub mod config;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod observability;
pub mod state;

pub use error::{AssemblyError, BootError, ConfigError, LaunchError, ProvisioningError};
