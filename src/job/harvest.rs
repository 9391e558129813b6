// src/job/harvest.rs

//! Artifact harvesting
//!
//! After a successful build the guest leaves its results as top-level
//! files under the build root. Harvesting copies the host-side job log,
//! downloads the guest log and every result file, and seals the set with
//! SHA-256 and MD5 manifests. Guest subdirectories are never recursed
//! into; whatever a build wants published must be a top-level file.

use super::BuildJob;
use super::protocol::{GUEST_BUILD_ROOT, GUEST_LOG};
use crate::manifest::{self, Algorithm};
use crate::{Error, Result};
use std::fs;
use std::path::Path;

/// Harvested copy of the host-side job narrative
const INTERNAL_LOG: &str = "internal_build.log";
/// Harvested copy of the guest-side build log
const GUEST_LOG_NAME: &str = "build.log";

/// Guest entries that are inputs rather than artifacts
const NOT_ARTIFACTS: &[&str] = &["wrapper.sh", "source", "log"];

impl BuildJob {
    /// Download artifacts and write the digest manifests into `destination`.
    ///
    /// Refuses to run if a prior harvest left its log or manifests behind;
    /// publish metadata is never silently overwritten.
    pub fn harvest(&mut self, destination: &Path) -> Result<()> {
        for reserved in [INTERNAL_LOG, manifest::SHA256SUMS, manifest::MD5SUMS] {
            if destination.join(reserved).exists() {
                return Err(Error::Precondition(format!(
                    "{} already exists in {}",
                    reserved,
                    destination.display()
                )));
            }
        }

        fs::copy(
            self.root().join("build.log"),
            destination.join(INTERNAL_LOG),
        )?;

        let log = self.log.clone();
        let guest = self.guest()?;
        guest.download(GUEST_LOG, &destination.join(GUEST_LOG_NAME))?;

        let mut harvested = vec![INTERNAL_LOG.to_string(), GUEST_LOG_NAME.to_string()];
        for name in guest.ls(GUEST_BUILD_ROOT)? {
            if NOT_ARTIFACTS.contains(&name.as_str()) {
                continue;
            }
            let guest_path = format!("{GUEST_BUILD_ROOT}/{name}");
            if guest.is_file(&guest_path)? {
                guest.download(&guest_path, &destination.join(&name))?;
                harvested.push(name);
            } else {
                log.line(&format!("Skipping download of directory {name}"));
            }
        }

        manifest::write_manifest(destination, Algorithm::Sha256, &harvested)?;
        manifest::write_manifest(destination, Algorithm::Md5, &harvested)?;
        Ok(())
    }
}
