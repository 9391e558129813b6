// src/job/log.rs

//! Per-job narrative log
//!
//! Every build job keeps a `build.log` in its working directory holding a
//! timestamped record of every external action attempted, plus the guest
//! console once the VM boots. The log is the primary postmortem artifact
//! and is harvested alongside the build outputs.

use crate::{Error, Result};
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Shared handle to the job log file.
///
/// Clones write to the same file; `close` drops the underlying handle for
/// every clone, after which writes become no-ops (teardown keeps logging to
/// the tracing layer only).
#[derive(Clone)]
pub struct JobLog {
    inner: Arc<Mutex<Option<File>>>,
}

impl JobLog {
    /// Open (append) the job log and make it world-readable
    pub fn create(path: &Path) -> Result<JobLog> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut perms = file.metadata()?.permissions();
        perms.set_mode(0o644);
        file.set_permissions(perms)?;
        Ok(JobLog {
            inner: Arc::new(Mutex::new(Some(file))),
        })
    }

    /// Append one timestamped line to the narrative
    pub fn line(&self, message: &str) {
        info!("{message}");
        let stamped = format!("[{}] {message}\n", Utc::now().format("%H:%M:%S"));
        self.write_raw(stamped.as_bytes());
    }

    /// Append raw bytes (tool output) without a timestamp
    fn write_raw(&self, bytes: &[u8]) {
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.write_all(bytes);
                let _ = file.flush();
            }
        }
    }

    /// Run an external tool, mirroring its output into the log.
    ///
    /// Fails if the tool exits nonzero.
    pub fn check_call(&self, tool: &str, args: &[&str]) -> Result<()> {
        let output = self.spawn(tool, args)?;
        if !output.status.success() {
            return Err(Error::ToolFailure {
                tool: tool.to_string(),
                detail: format!("{} {}", args.join(" "), output.status),
            });
        }
        Ok(())
    }

    /// Run an external tool, tolerating failure.
    ///
    /// Used for teardown steps like destroying an already-gone domain.
    pub fn call(&self, tool: &str, args: &[&str]) -> bool {
        match self.spawn(tool, args) {
            Ok(output) => output.status.success(),
            Err(e) => {
                warn!("{tool} did not run: {e}");
                false
            }
        }
    }

    fn spawn(&self, tool: &str, args: &[&str]) -> Result<std::process::Output> {
        self.line(&format!("Running {tool} {}", args.join(" ")));
        let output = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ToolFailure {
                tool: tool.to_string(),
                detail: format!("failed to run: {e}"),
            })?;
        self.write_raw(&output.stdout);
        self.write_raw(&output.stderr);
        Ok(output)
    }

    /// Drop the file handle; subsequent writes are discarded
    pub fn close(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lines_are_timestamped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("build.log");
        let log = JobLog::create(&path).unwrap();

        log.line("Cloning VM");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("Cloning VM\n"));
        assert!(contents.starts_with('['));
    }

    #[test]
    fn test_clones_share_the_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("build.log");
        let log = JobLog::create(&path).unwrap();
        let clone = log.clone();

        log.line("first");
        clone.line("second");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("first"));
        assert!(contents.contains("second"));
    }

    #[test]
    fn test_writes_after_close_are_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("build.log");
        let log = JobLog::create(&path).unwrap();

        log.line("kept");
        log.close();
        log.line("discarded");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("kept"));
        assert!(!contents.contains("discarded"));
    }

    #[test]
    fn test_check_call_reports_nonzero_exit() {
        let temp_dir = TempDir::new().unwrap();
        let log = JobLog::create(&temp_dir.path().join("build.log")).unwrap();

        let err = log.check_call("false", &[]).unwrap_err();
        assert!(matches!(err, Error::ToolFailure { .. }));
        assert!(log.check_call("true", &[]).is_ok());
    }

    #[test]
    fn test_tool_output_is_mirrored() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("build.log");
        let log = JobLog::create(&path).unwrap();

        log.check_call("echo", &["mirrored output"]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Running echo mirrored output"));
        assert!(contents.contains("mirrored output\n"));
    }
}
