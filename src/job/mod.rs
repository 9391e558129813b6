// src/job/mod.rs

//! Build job lifecycle
//!
//! A [`BuildJob`] owns every per-job resource: the working directory, the
//! narrative log, the cloned domain registration, the overlay disks, the
//! console pipe and an optional guest filesystem session. Whatever path a
//! job takes (success, build failure, provisioning error), [`BuildJob::teardown`]
//! runs and releases all of it; `Drop` backstops the explicit call.
//!
//! Lifecycle: provision (clone the template) -> prepare (upload sources) ->
//! build (boot and supervise) -> harvest (download artifacts) -> teardown.

mod guestfs;
mod harvest;
mod log;
mod protocol;
mod runtime;

pub use guestfs::GuestFs;
pub use log::JobLog;

use crate::config::{self, TemplateConfig};
use crate::hypervisor::{RewriteSpec, random_mac, rewrite_definition, virsh};
use crate::{Error, Result, tools};
use chrono::Utc;
use nix::unistd::{Gid, Group, chown};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Prefix carried by every cloned domain name and job directory, so an
/// ephemeral build domain can never be mistaken for a real VM
pub const JOB_PREFIX: &str = "build-";

/// Default location for per-job working directories
pub const DEFAULT_JOBS_DIR: &str = "/var/lib/crucible/jobs";

/// One build job and all the resources it owns
pub struct BuildJob {
    root: Option<PathBuf>,
    log: JobLog,
    template: &'static TemplateConfig,
    hypervisor_gid: Gid,
    domain: Option<String>,
    disks: Vec<PathBuf>,
    console_pipe: PathBuf,
    guest: Option<GuestFs>,
}

impl BuildJob {
    /// Clone the named template into a fresh build job.
    ///
    /// The template must be whitelisted and the hypervisor tooling present;
    /// both are checked before any resource is created. A failure anywhere
    /// in provisioning tears the partial job down before returning.
    pub fn create(template_name: &str, jobs_dir: &Path) -> Result<BuildJob> {
        let template = config::require_template(template_name)?;
        tools::require(&[virsh::TOOL, "qemu-img", guestfs::TOOL])?;
        let hypervisor_gid = hypervisor_group()?;

        fs::create_dir_all(jobs_dir)?;
        let root = tempfile::Builder::new()
            .prefix(JOB_PREFIX)
            .tempdir_in(jobs_dir)?
            .into_path();
        let log = match JobLog::create(&root.join("build.log")) {
            Ok(log) => log,
            Err(e) => {
                let _ = fs::remove_dir_all(&root);
                return Err(e);
            }
        };
        let console_pipe = root.join("console");

        let mut job = BuildJob {
            root: Some(root),
            log,
            template,
            hypervisor_gid,
            domain: None,
            disks: Vec::new(),
            console_pipe,
            guest: None,
        };

        if let Err(e) = job.provision() {
            job.teardown();
            return Err(e);
        }
        Ok(job)
    }

    /// Clone definition and disks from the template and register the domain
    fn provision(&mut self) -> Result<()> {
        let root = self.root().to_path_buf();
        // The hypervisor group needs to traverse the directory to reach the
        // overlay disks and the console pipe; the log stays ours alone
        chown(&root, None, Some(self.hypervisor_gid))
            .map_err(|e| Error::Io(format!("failed to chown {}: {e}", root.display())))?;
        fs::set_permissions(&root, fs::Permissions::from_mode(0o775))?;

        self.log.line(&format!(
            "Build started at {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        ));
        self.log.line(&format!(
            "Cloning VM {} for build job {}",
            self.template.name,
            root.display()
        ));

        let template_xml = virsh::dumpxml(self.template.name)?;

        let job_id = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Io(format!("job directory {} has no name", root.display())))?;
        let domain = format!("{job_id}-{}", self.template.name);
        if !domain.starts_with(JOB_PREFIX) {
            return Err(Error::Config(format!(
                "clone name {domain} lost the {JOB_PREFIX} prefix"
            )));
        }

        let uuid = Uuid::new_v4().to_string();
        let rewritten = rewrite_definition(
            &template_xml,
            &RewriteSpec {
                domain_name: &domain,
                uuid: &uuid,
                mac: &random_mac(),
                overlay_dir: &root,
                console_pipe: &self.console_pipe,
                disable_audio: self.template.gui,
            },
        )?;
        if rewritten.disks.is_empty() {
            return Err(Error::Config(format!(
                "template {} has no cloneable disks",
                self.template.name
            )));
        }

        // One overlay per template disk; the template image is only ever a
        // read-only backing file
        for clone in &rewritten.disks {
            let base = clone.base.to_string_lossy().into_owned();
            let overlay = clone.overlay.to_string_lossy().into_owned();
            self.log.check_call(
                "qemu-img",
                &["create", "-f", "qcow2", "-b", &base, "-F", "qcow2", &overlay],
            )?;
            self.give_to_hypervisor(&clone.overlay, 0o660)?;
            self.disks.push(clone.overlay.clone());
        }

        self.make_console_pipe()?;

        let definition = root.join("definition.xml");
        fs::write(&definition, &rewritten.xml)?;
        self.give_to_hypervisor(&definition, 0o664)?;
        self.log
            .check_call(virsh::TOOL, &["define", &definition.to_string_lossy()])?;
        self.domain = Some(domain);

        self.log
            .line(&format!("Initialized build job {}", root.display()));
        Ok(())
    }

    /// Create the host side of the console: a fifo for guest output and a
    /// discard device for guest input
    fn make_console_pipe(&self) -> Result<()> {
        let out = self.console_path("out");
        nix::unistd::mkfifo(&out, nix::sys::stat::Mode::from_bits_truncate(0o660))
            .map_err(|e| Error::Io(format!("failed to create pipe {}: {e}", out.display())))?;
        self.give_to_hypervisor(&out, 0o660)?;

        let discard = self.console_path("in");
        std::os::unix::fs::symlink("/dev/null", &discard)?;
        Ok(())
    }

    fn give_to_hypervisor(&self, path: &Path, mode: u32) -> Result<()> {
        chown(path, None, Some(self.hypervisor_gid))
            .map_err(|e| Error::Io(format!("failed to chown {}: {e}", path.display())))?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    /// `<root>/console.out` (guest output fifo) or `<root>/console.in`
    fn console_path(&self, end: &str) -> PathBuf {
        PathBuf::from(format!("{}.{end}", self.console_pipe.display()))
    }

    fn root(&self) -> &Path {
        self.root
            .as_deref()
            .expect("build job used after teardown")
    }

    fn domain(&self) -> &str {
        self.domain
            .as_deref()
            .expect("build job has no registered domain")
    }

    /// Lazily open the guest filesystem session on the first overlay disk
    fn guest(&mut self) -> Result<&mut GuestFs> {
        if self.guest.is_none() {
            let disk = self.disks.first().ok_or_else(|| {
                Error::GuestProtocol("no overlay disk to open".to_string())
            })?;
            self.guest = Some(GuestFs::open(
                disk,
                self.template.partition,
                self.log.clone(),
            )?);
        }
        Ok(self.guest.as_mut().expect("session opened above"))
    }

    /// Release everything the job owns.
    ///
    /// Fixed order, each step best-effort: destroy the domain (tolerating
    /// "already gone"), undefine its registration, close the guest session,
    /// close the log, remove the working directory. A failing step is
    /// logged and the remaining steps still run. Safe to call twice.
    pub fn teardown(&mut self) {
        if self.root.is_none() && self.domain.is_none() && self.guest.is_none() {
            return;
        }
        if let Some(root) = &self.root {
            self.log
                .line(&format!("Deleting build job {}", root.display()));
        }

        if let Some(domain) = self.domain.take() {
            // The domain is usually already shut off; destroy only matters
            // when tearing down a still-running build
            self.log.call(virsh::TOOL, &["destroy", &domain]);
            if !self.log.call(virsh::TOOL, &["undefine", &domain]) {
                warn!("failed to undefine domain {domain}");
            }
        }

        if let Some(guest) = self.guest.take() {
            if let Err(e) = guest.close() {
                warn!("failed to close guest filesystem session: {e}");
            }
        }

        self.log.close();

        if let Some(root) = self.root.take() {
            if let Err(e) = fs::remove_dir_all(&root) {
                warn!("failed to remove job directory {}: {e}", root.display());
            }
        }
    }
}

impl Drop for BuildJob {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Resolve the group the hypervisor runs disk I/O as
fn hypervisor_group() -> Result<Gid> {
    for name in ["libvirt-qemu", "libvirt"] {
        if let Ok(Some(group)) = Group::from_name(name) {
            return Ok(group.gid);
        }
    }
    Err(Error::Config(
        "neither 'libvirt-qemu' nor 'libvirt' group exists; is libvirt installed?".to_string(),
    ))
}
