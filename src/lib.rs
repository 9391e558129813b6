// src/lib.rs

//! Crucible Build Server
//!
//! Builds software inside short-lived clones of golden virtual machines and
//! publishes the resulting packages into signed, per-platform repositories.
//!
//! # Architecture
//!
//! - Ephemeral domains: every build clones a template VM definition with a
//!   fresh name, UUID and MAC, backed by copy-on-write overlay disks
//! - Offline guest access: sources go in and artifacts come out through a
//!   guest filesystem session while the VM is stopped
//! - Supervised execution: the guest console is drained into the job log
//!   until the VM shuts itself down
//! - Locked publishes: repository mutations happen under a cooperative
//!   per-repository directory lock, check-then-write never split

pub mod config;
mod error;
pub mod hypervisor;
pub mod job;
pub mod manifest;
pub mod publish;
pub(crate) mod tools;

pub use config::{PartitionRef, TemplateConfig};
pub use error::{Error, Result};
pub use job::BuildJob;
pub use publish::{PackageFamily, RepoKind};
