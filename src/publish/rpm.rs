// src/publish/rpm.rs

//! Helpers shared by the RPM-based repository workflows
//!
//! Mageia and Fedora repositories are split into per-architecture
//! sub-repositories named after the RPM filename's architecture suffix
//! (`.i586`/`.x86_64` on Mageia, `.i686`/`.x86_64` on Fedora).

use crate::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;

/// Group RPM filenames by their architecture suffix.
///
/// `arch_pattern` is an alternation like `i586|x86_64`; a package whose
/// name carries no recognized suffix cannot be routed and fails the
/// publish.
pub(super) fn split_by_arch(
    files: &[String],
    arch_pattern: &str,
) -> Result<BTreeMap<String, Vec<String>>> {
    let pattern = Regex::new(&format!(r"^(.*)\.({arch_pattern})\.rpm$")).unwrap();
    let mut by_arch: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in files {
        let captures = pattern.captures(name).ok_or_else(|| {
            Error::Precondition(format!(
                "{name} has no architecture suffix ({arch_pattern})"
            ))
        })?;
        by_arch
            .entry(captures[2].to_string())
            .or_default()
            .push(name.clone());
    }
    Ok(by_arch)
}
