// src/error.rs

//! Crate-wide error type
//!
//! Configuration and precondition failures abort before any shared state is
//! touched. Tool failures abort the current job but still run its teardown.
//! Teardown steps themselves never surface here: they are logged and
//! swallowed individually so later cleanup steps always run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown template or repository target, or a missing external tool
    #[error("configuration error: {0}")]
    Config(String),

    /// A check that must hold before mutating shared state failed
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The guest did not honor the build contract
    #[error("guest protocol error: {0}")]
    GuestProtocol(String),

    /// Template disk in a format we cannot overlay
    #[error("unsupported disk format: {0}")]
    UnsupportedFormat(String),

    /// Guest has neither a service manager nor a legacy init script
    #[error("unsupported guest init mechanism: {0}")]
    UnsupportedInit(String),

    /// A shelled-out tool exited nonzero
    #[error("{tool} failed: {detail}")]
    ToolFailure { tool: String, detail: String },

    /// The guest build ran to completion but reported a nonzero status
    #[error("build exited with status code {0}")]
    BuildFailed(i32),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("domain definition error: {0}")]
    Xml(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Xml(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
