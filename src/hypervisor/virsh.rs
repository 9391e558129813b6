// src/hypervisor/virsh.rs

//! Domain inspection through the `virsh` command line tool
//!
//! Mutating operations (define / start / destroy / undefine) run through the
//! job's logged tool runner so their output lands in the job narrative; this
//! module covers the read-only queries that feed program logic instead.

use crate::{Error, Result};
use std::process::Command;
use tracing::debug;

/// Name of the hypervisor control tool
pub const TOOL: &str = "virsh";

/// Coarse domain state as reported by `virsh domstate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainState {
    Running,
    ShutOff,
    Crashed,
    /// The domain is no longer registered at all
    Missing,
    /// Any other transient state (paused, in shutdown, pmsuspended, ...)
    Other(String),
}

impl DomainState {
    /// Terminal states end the wait loop: the guest shut down cleanly,
    /// crashed, or its registration disappeared underneath us.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ShutOff | Self::Crashed | Self::Missing)
    }
}

/// Parse the one-line output of `virsh domstate`
pub fn parse_domstate(output: &str) -> DomainState {
    match output.trim() {
        "running" => DomainState::Running,
        "shut off" => DomainState::ShutOff,
        "crashed" => DomainState::Crashed,
        other => DomainState::Other(other.to_string()),
    }
}

/// Fetch the declarative definition of a registered domain
pub fn dumpxml(domain: &str) -> Result<String> {
    let output = Command::new(TOOL)
        .args(["dumpxml", "--domain", domain])
        .output()
        .map_err(|e| Error::ToolFailure {
            tool: TOOL.to_string(),
            detail: format!("failed to run: {e}"),
        })?;

    if !output.status.success() {
        return Err(Error::ToolFailure {
            tool: TOOL.to_string(),
            detail: format!(
                "dumpxml {domain}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Query the current state of a domain
///
/// A failing query is reported as [`DomainState::Missing`]: once the build
/// domain has been destroyed and undefined, `virsh` no longer knows the
/// name, and the wait loop treats that exactly like a shutdown.
pub fn domstate(domain: &str) -> DomainState {
    let output = match Command::new(TOOL).args(["domstate", domain]).output() {
        Ok(out) => out,
        Err(e) => {
            debug!("virsh domstate {domain} failed to run: {e}");
            return DomainState::Missing;
        }
    };

    if !output.status.success() {
        return DomainState::Missing;
    }

    parse_domstate(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_running() {
        assert_eq!(parse_domstate("running\n"), DomainState::Running);
        assert!(!parse_domstate("running").is_terminal());
    }

    #[test]
    fn test_parse_terminal_states() {
        assert!(parse_domstate("shut off\n").is_terminal());
        assert!(parse_domstate("crashed").is_terminal());
        assert!(DomainState::Missing.is_terminal());
    }

    #[test]
    fn test_parse_transient_states() {
        let state = parse_domstate("in shutdown\n");
        assert_eq!(state, DomainState::Other("in shutdown".to_string()));
        assert!(!state.is_terminal());
        assert!(!parse_domstate("paused").is_terminal());
    }
}
