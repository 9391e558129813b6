// src/publish/lock.rs

//! Cooperative repository lock
//!
//! Publishes against one repository serialize through atomic directory
//! creation: the lock is a directory in the system temp dir keyed by a
//! hash of the absolute repository path, polled at short intervals until
//! `mkdir` succeeds. The lock is advisory; it only excludes other
//! cooperating processes on the same host.

use crate::{Error, Result};
use md5::{Digest, Md5};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Held lock on one repository path; released on drop
pub struct RepoLock {
    path: PathBuf,
}

impl RepoLock {
    /// Block until the repository's lock directory can be created
    pub fn acquire(repository: &Path) -> Result<RepoLock> {
        let path = lock_path(repository)?;
        loop {
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!("acquired repository lock {}", path.display());
                    return Ok(RepoLock { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(Error::Io(format!(
                        "failed to create lock directory {}: {e}",
                        path.display()
                    )));
                }
            }
        }
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir(&self.path) {
            warn!("failed to release repository lock {}: {e}", self.path.display());
        } else {
            debug!("released repository lock {}", self.path.display());
        }
    }
}

/// Lock directory for a repository, keyed by its absolute path
fn lock_path(repository: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(repository)?;
    let digest = hex::encode(Md5::digest(absolute.to_string_lossy().as_bytes()));
    Ok(std::env::temp_dir().join(format!("crucible-{digest}.lock")))
}
