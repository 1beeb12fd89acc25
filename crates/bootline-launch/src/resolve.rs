//! Port and keep-alive resolution.
//!
//! Precedence: CLI flag, then environment, then recipe, then built-in default.

use bootline_core::config::env_keys::{self, launch as keys};
use bootline_core::config::loader::env_optional_with;
use bootline_core::config::{default_for, Lookup, DEFAULT_PORT};
use bootline_core::LaunchError;

fn parse_port(raw: &str) -> Option<u16> {
    raw.trim().parse::<u16>().ok().filter(|p| *p != 0)
}

/// Resolve the listening port: `cli`, else `PORT`, else the `DEFAULTS` entry.
pub fn resolve_port(cli: Option<u16>, lookup: Lookup<'_>) -> Result<u16, LaunchError> {
    let fallback = default_for(env_keys::PORT).unwrap_or(DEFAULT_PORT);
    resolve_port_or(cli, lookup, fallback)
}

/// [`resolve_port`] with the recipe's default port as the last resort.
///
/// A `PORT` that is set but not an integer in 1..=65535 is ignored with a
/// warning. An explicit CLI value of 0 is rejected.
pub fn resolve_port_or(cli: Option<u16>, lookup: Lookup<'_>, fallback: u16) -> Result<u16, LaunchError> {
    if let Some(port) = cli {
        if port == 0 {
            return Err(LaunchError::InvalidPort(port.to_string()));
        }
        return Ok(port);
    }
    match env_optional_with(lookup, env_keys::PORT, &[]) {
        Some(raw) => match parse_port(&raw) {
            Some(port) => Ok(port),
            None => {
                tracing::warn!(value = %raw, fallback, "PORT is not a valid port number, using default");
                Ok(fallback)
            }
        },
        None => Ok(fallback),
    }
}

/// Keep-alive seconds: `cli`, else `BOOTLINE_KEEP_ALIVE`/`KEEP_ALIVE_TIMEOUT`,
/// else the recipe value. `None` leaves the server default in place.
pub fn resolve_keep_alive(cli: Option<u64>, lookup: Lookup<'_>, recipe: Option<u64>) -> Option<u64> {
    cli.or_else(|| {
        let raw = env_optional_with(lookup, keys::BOOTLINE_KEEP_ALIVE, keys::KEEP_ALIVE_ALIASES)?;
        match raw.parse::<u64>() {
            Ok(secs) => Some(secs),
            Err(_) => {
                tracing::warn!(value = %raw, "Ignoring non-numeric keep-alive");
                None
            }
        }
    })
    .or(recipe)
}
