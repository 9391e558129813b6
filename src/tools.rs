// src/tools.rs

//! Preflight discovery of the external tools we shell out to
//!
//! A missing tool is a configuration error reported before any resource is
//! touched, not a mid-pipeline failure.

use crate::{Error, Result};

/// Fail unless every named tool is resolvable in PATH
pub fn require(tools: &[&str]) -> Result<()> {
    for tool in tools {
        which::which(tool).map_err(|_| {
            Error::Config(format!("required external tool '{tool}' not found in PATH"))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_tool_passes() {
        // `sh` exists on any host this test suite can run on
        assert!(require(&["sh"]).is_ok());
    }

    #[test]
    fn test_missing_tool_is_config_error() {
        let err = require(&["definitely-not-a-real-tool-4af1"]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
