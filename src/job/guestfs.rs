// src/job/guestfs.rs

//! Offline guest filesystem access
//!
//! While the VM is stopped, files move in and out of the first overlay disk
//! through a `guestfish --listen` session; every operation is one
//! `guestfish --remote` invocation against that session. The session must
//! be closed (and given a moment to settle) before the domain starts, or
//! the stale appliance mount corrupts the boot.

use crate::config::PartitionRef;
use crate::job::JobLog;
use crate::{Error, Result};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;
use walkdir::WalkDir;

/// Name of the guest filesystem tool
pub const TOOL: &str = "guestfish";

/// An open guest filesystem session on one disk image
pub struct GuestFs {
    /// Identifier of the listening guestfish process
    session: String,
    log: JobLog,
    closed: bool,
}

impl GuestFs {
    /// Launch a session on `disk` and mount the configured partition at `/`
    pub fn open(disk: &Path, partition: PartitionRef, log: JobLog) -> Result<GuestFs> {
        log.line(&format!(
            "Starting guest filesystem session on {}",
            disk.display()
        ));

        let output = Command::new(TOOL)
            .args(["--listen", "--format=qcow2", "-a"])
            .arg(disk)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| tool_failure(format!("failed to run: {e}")))?;
        if !output.status.success() {
            return Err(tool_failure(format!(
                "--listen failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // stdout is shell syntax: GUESTFISH_PID=1234; export GUESTFISH_PID
        let stdout = String::from_utf8_lossy(&output.stdout);
        let session = stdout
            .split("GUESTFISH_PID=")
            .nth(1)
            .map(|rest| rest.chars().take_while(|c| c.is_ascii_digit()).collect())
            .filter(|pid: &String| !pid.is_empty())
            .ok_or_else(|| tool_failure(format!("no session pid in output: {stdout:?}")))?;

        let mut guest = GuestFs {
            session,
            log,
            closed: false,
        };

        if let Err(e) = guest.mount(partition) {
            let _ = guest.close_session();
            return Err(e);
        }
        Ok(guest)
    }

    fn mount(&mut self, partition: PartitionRef) -> Result<()> {
        self.remote(&["run"])?;
        let device = match partition {
            PartitionRef::Device(path) => path.to_string(),
            PartitionRef::Index(index) => {
                let listing = self.remote(&["list-partitions"])?;
                listing
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .nth(index)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::GuestProtocol(format!(
                            "guest has no partition with index {index}"
                        ))
                    })?
            }
        };
        self.remote(&["mount-options", "", &device, "/"])?;
        Ok(())
    }

    /// Run one command against the listening session, returning its stdout
    fn remote(&self, args: &[&str]) -> Result<String> {
        debug!("guestfish {}", args.join(" "));
        let output = Command::new(TOOL)
            .arg(format!("--remote={}", self.session))
            .arg("--")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| tool_failure(format!("failed to run: {e}")))?;
        if !output.status.success() {
            return Err(tool_failure(format!(
                "{}: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn remote_bool(&self, args: &[&str]) -> Result<bool> {
        Ok(self.remote(args)?.trim() == "true")
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        self.remote_bool(&["exists", path])
    }

    pub fn is_file(&self, path: &str) -> Result<bool> {
        self.remote_bool(&["is-file", path])
    }

    pub fn is_dir(&self, path: &str) -> Result<bool> {
        self.remote_bool(&["is-dir", path])
    }

    pub fn ls(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .remote(&["ls", path])?
            .lines()
            .map(|l| l.trim_end().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    pub fn cp(&self, src: &str, dest: &str) -> Result<()> {
        self.log.line(&format!("Copying {src} -> {dest}"));
        self.remote(&["cp", src, dest]).map(drop)
    }

    pub fn mv(&self, src: &str, dest: &str) -> Result<()> {
        self.log.line(&format!("Moving {src} -> {dest}"));
        self.remote(&["mv", src, dest]).map(drop)
    }

    pub fn ln_s(&self, target: &str, link: &str) -> Result<()> {
        self.log.line(&format!("Symlinking {target} -> {link}"));
        self.remote(&["ln-s", target, link]).map(drop)
    }

    pub fn chmod(&self, mode: u32, path: &str) -> Result<()> {
        let mode = octal_mode(mode);
        self.remote(&["chmod", &mode, path]).map(drop)
    }

    pub fn chown(&self, uid: u32, gid: u32, path: &str) -> Result<()> {
        self.remote(&["chown", &uid.to_string(), &gid.to_string(), path])
            .map(drop)
    }

    pub fn mkdir_p(&self, path: &str) -> Result<()> {
        self.log.line(&format!("Creating directory {path}"));
        self.remote(&["mkdir-p", path]).map(drop)
    }

    /// Upload one host file; an existing guest path is overwritten
    pub fn upload(&self, local: &Path, path: &str) -> Result<()> {
        self.log.line(&format!("Uploading {path} into VM"));
        self.remote(&["upload", &local.to_string_lossy(), path])
            .map(drop)
    }

    /// Upload literal content as a guest file
    pub fn upload_content(&self, content: &[u8], path: &str) -> Result<()> {
        let mut staged = tempfile::NamedTempFile::new()?;
        staged.write_all(content)?;
        staged.flush()?;
        self.upload(staged.path(), path)
    }

    /// Download one guest file, refusing to overwrite an existing host path
    pub fn download(&self, path: &str, local: &Path) -> Result<()> {
        if local.exists() {
            return Err(Error::Precondition(format!(
                "refusing to overwrite {} with {path}",
                local.display()
            )));
        }
        self.log.line(&format!("Downloading {path} from VM"));
        self.remote(&["download", path, &local.to_string_lossy()])
            .map(drop)
    }

    /// Download one guest file into memory
    pub fn download_content(&self, path: &str) -> Result<Vec<u8>> {
        let staged = tempfile::TempDir::new()?;
        let local = staged.path().join("download");
        self.download(path, &local)?;
        Ok(fs::read(&local)?)
    }

    /// Upload a host tree under a guest path.
    ///
    /// Each file keeps its permission bits, and once the whole subtree is
    /// in place the top-level mode is applied again (uploading children
    /// must not be able to strip an execute bit from the root).
    pub fn upload_recursive(&self, local: &Path, path: &str) -> Result<()> {
        let top = fs::metadata(local)?;
        if top.is_file() {
            if self.exists(path)? {
                return Err(Error::Precondition(format!(
                    "guest path {path} already exists"
                )));
            }
            self.upload(local, path)?;
            return self.chmod(top.permissions().mode() & 0o7777, path);
        }
        if !top.is_dir() {
            return Err(Error::Io(format!(
                "{}: neither a file nor a directory",
                local.display()
            )));
        }

        for entry in WalkDir::new(local).follow_links(true) {
            let entry = entry.map_err(|e| Error::Io(e.to_string()))?;
            let guest_path = guest_subpath(path, local, entry.path())?;
            let mode = entry
                .metadata()
                .map_err(|e| Error::Io(e.to_string()))?
                .permissions()
                .mode()
                & 0o7777;
            if entry.file_type().is_dir() {
                self.mkdir_p(&guest_path)?;
                self.chmod(mode, &guest_path)?;
            } else if entry.file_type().is_file() {
                self.upload(entry.path(), &guest_path)?;
                self.chmod(mode, &guest_path)?;
            } else {
                return Err(Error::Io(format!(
                    "{}: neither a file nor a directory",
                    entry.path().display()
                )));
            }
        }

        self.chmod(top.permissions().mode() & 0o7777, path)
    }

    /// Download a guest tree, mirroring directory structure.
    ///
    /// Pre-existing destination paths are a caller error. An explicit
    /// worklist keeps deep guest trees from growing the host stack.
    pub fn download_recursive(&self, path: &str, local: &Path) -> Result<()> {
        let mut worklist = vec![(path.to_string(), local.to_path_buf())];
        while let Some((guest_path, host_path)) = worklist.pop() {
            if self.is_file(&guest_path)? {
                self.download(&guest_path, &host_path)?;
            } else if self.is_dir(&guest_path)? {
                fs::create_dir_all(&host_path)?;
                for name in self.ls(&guest_path)? {
                    worklist.push((format!("{guest_path}/{name}"), host_path.join(&name)));
                }
            } else {
                return Err(Error::Io(format!(
                    "{guest_path}: neither a file nor a directory"
                )));
            }
        }
        Ok(())
    }

    /// Unmount and end the session
    pub fn close(mut self) -> Result<()> {
        self.log.line("Closing guest filesystem session");
        self.close_session()
    }

    fn close_session(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.remote(&["exit"]).map(drop)
    }
}

impl Drop for GuestFs {
    fn drop(&mut self) {
        let _ = self.close_session();
    }
}

fn tool_failure(detail: String) -> Error {
    Error::ToolFailure {
        tool: TOOL.to_string(),
        detail,
    }
}

/// Leading-zero octal form guestfish parses as a mode
fn octal_mode(mode: u32) -> String {
    format!("0{mode:o}")
}

/// Map a host path under `local` to its guest path under `base`
fn guest_subpath(base: &str, local: &Path, entry: &Path) -> Result<String> {
    let rel = entry
        .strip_prefix(local)
        .map_err(|e| Error::Io(e.to_string()))?;
    if rel.as_os_str().is_empty() {
        return Ok(base.to_string());
    }
    Ok(format!("{base}/{}", rel.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_octal_mode() {
        assert_eq!(octal_mode(0o755), "0755");
        assert_eq!(octal_mode(0o644), "0644");
        assert_eq!(octal_mode(0o4755), "04755");
    }

    #[test]
    fn test_guest_subpath() {
        let local = Path::new("/srv/source");
        assert_eq!(
            guest_subpath("/build/source", local, Path::new("/srv/source")).unwrap(),
            "/build/source"
        );
        assert_eq!(
            guest_subpath("/build/source", local, Path::new("/srv/source/sub/boot.sh")).unwrap(),
            "/build/source/sub/boot.sh"
        );
        assert!(guest_subpath("/build/source", local, Path::new("/elsewhere/x")).is_err());
    }
}
