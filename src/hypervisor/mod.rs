// src/hypervisor/mod.rs

//! Hypervisor interface
//!
//! Crucible never links against a hypervisor library. Domains are defined,
//! started, destroyed and inspected through the `virsh` command line tool,
//! and the declarative domain document is rewritten as an XML event stream.

pub mod domain;
pub mod virsh;

pub use domain::{DiskClone, Rewritten, RewriteSpec, random_mac, rewrite_definition};
pub use virsh::DomainState;
