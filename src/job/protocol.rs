// src/job/protocol.rs

//! Guest build contract
//!
//! The guest side of a build is a fixed layout under `/build`:
//!
//! - `/build/source`      uploaded source tree, must contain `boot.sh`
//! - `/build/source/deps` optional dependency tree
//! - `/build/wrapper.sh`  rendered supervisor script, started by guest init
//! - `/build/log`         guest-side build log
//! - `/build/status`      exit status marker, written when the build ends
//! - any other top-level file: a build artifact to harvest
//!
//! The wrapper is hooked into whichever init facility the guest image has:
//! a systemd unit, or a replaced `/etc/rc.local` on pre-systemd templates.

use super::BuildJob;
use crate::config::TemplateConfig;
use crate::{Error, Result};
use regex::Regex;
use std::path::Path;

pub(super) const GUEST_BUILD_ROOT: &str = "/build";
pub(super) const GUEST_SOURCE: &str = "/build/source";
pub(super) const GUEST_WRAPPER: &str = "/build/wrapper.sh";
pub(super) const GUEST_STATUS: &str = "/build/status";
pub(super) const GUEST_LOG: &str = "/build/log";

const BOOT_SCRIPT: &str = "boot.sh";

const WRAPPER_TEMPLATE: &str = include_str!("../../guest/wrapper.sh");
const SYSTEMD_UNIT: &str = include_str!("../../guest/buildjob.service");
const RC_LOCAL: &str = include_str!("../../guest/rc.local");

const SYSTEMD_UNIT_PATH: &str = "/usr/lib/systemd/user/buildjob.service";
const SYSTEMD_WANTS_DIR: &str = "/etc/systemd/system/multi-user.target.wants";
const SYSTEMD_WANTS_LINK: &str = "/etc/systemd/system/multi-user.target.wants/buildjob.service";

impl BuildJob {
    /// Upload the source tree (and optional dependency tree) into the guest
    pub fn prepare(&mut self, source: &Path, dependencies: Option<&Path>) -> Result<()> {
        if !source.join(BOOT_SCRIPT).is_file() {
            return Err(Error::Precondition(format!(
                "{} has no {BOOT_SCRIPT}",
                source.display()
            )));
        }

        let guest = self.guest()?;
        guest.upload_recursive(source, GUEST_SOURCE)?;
        if !guest.is_file(&format!("{GUEST_SOURCE}/{BOOT_SCRIPT}"))? {
            return Err(Error::GuestProtocol(format!(
                "{GUEST_SOURCE}/{BOOT_SCRIPT} missing after upload"
            )));
        }

        if let Some(deps) = dependencies {
            if !deps.is_dir() {
                return Err(Error::Precondition(format!(
                    "{} is not a directory",
                    deps.display()
                )));
            }
            guest.upload_recursive(deps, &format!("{GUEST_SOURCE}/deps"))?;
        }
        Ok(())
    }

    /// Install the wrapper, boot the guest, and check the status marker.
    ///
    /// A missing marker after shutdown means the guest never ran the build
    /// to completion; a nonzero marker is the build's own exit status.
    pub fn build(&mut self) -> Result<()> {
        let template = self.template;
        let guest = self.guest()?;

        if !guest.is_file(&format!("{GUEST_SOURCE}/{BOOT_SCRIPT}"))? {
            return Err(Error::GuestProtocol(format!(
                "unable to find {GUEST_SOURCE}/{BOOT_SCRIPT} in VM"
            )));
        }
        for leftover in [GUEST_WRAPPER, GUEST_STATUS, GUEST_LOG] {
            if guest.exists(leftover)? {
                return Err(Error::Precondition(format!(
                    "{leftover} already exists in the template image"
                )));
            }
        }

        self.install_init_hook()?;

        let wrapper = render_wrapper(WRAPPER_TEMPLATE, template);
        let guest = self.guest()?;
        guest.upload_content(wrapper.as_bytes(), GUEST_WRAPPER)?;
        guest.chmod(0o755, GUEST_WRAPPER)?;
        guest.chmod(0o755, &format!("{GUEST_SOURCE}/{BOOT_SCRIPT}"))?;

        self.run()?;

        let guest = self.guest()?;
        if !guest.is_file(GUEST_STATUS)? {
            return Err(Error::GuestProtocol(
                "unable to determine status, build was aborted?".to_string(),
            ));
        }
        let raw = guest.download_content(GUEST_STATUS)?;
        let text = String::from_utf8_lossy(&raw);
        let status: i32 = text.trim().parse().map_err(|_| {
            Error::GuestProtocol(format!("status marker holds {:?}, not a number", text.trim()))
        })?;
        if status != 0 {
            return Err(Error::BuildFailed(status));
        }
        Ok(())
    }

    /// Hook the wrapper into the guest's init system.
    ///
    /// Probes for a service manager first, then for a legacy startup
    /// script; a guest with neither cannot run builds.
    fn install_init_hook(&mut self) -> Result<()> {
        let log = self.log.clone();
        let guest = self.guest()?;

        if guest.exists("/usr/bin/systemctl")? || guest.exists("/bin/systemctl")? {
            for leftover in [SYSTEMD_UNIT_PATH, SYSTEMD_WANTS_LINK] {
                if guest.exists(leftover)? {
                    return Err(Error::Precondition(format!(
                        "{leftover} already exists in the template image"
                    )));
                }
            }
            if !guest.is_dir(SYSTEMD_WANTS_DIR)? {
                return Err(Error::GuestProtocol(format!(
                    "guest has systemctl but no {SYSTEMD_WANTS_DIR}"
                )));
            }

            log.line("Using systemd based startup sequence");
            guest.mkdir_p("/usr/lib/systemd/user")?;
            guest.upload_content(SYSTEMD_UNIT.as_bytes(), SYSTEMD_UNIT_PATH)?;
            guest.ln_s(SYSTEMD_UNIT_PATH, SYSTEMD_WANTS_LINK)?;
            return Ok(());
        }

        if guest.exists("/etc/rc.local")? {
            log.line("Using rc.local based startup sequence");
            guest.upload_content(RC_LOCAL.as_bytes(), "/etc/rc.local")?;
            guest.chmod(0o755, "/etc/rc.local")?;
            return Ok(());
        }

        Err(Error::UnsupportedInit(
            "guest has neither systemctl nor /etc/rc.local".to_string(),
        ))
    }
}

/// Substitute the per-template fields into the wrapper script.
///
/// The template carries shell assignments (`LOG_TTY="..."` etc.) that are
/// replaced line-wise, so the script stays runnable as checked in.
fn render_wrapper(template_text: &str, config: &TemplateConfig) -> String {
    let mut rendered = template_text.to_string();
    for (key, value) in [
        ("LOG_TTY", config.console_tty),
        ("BUILD_USER", config.build_user),
        ("BUILD_GROUP", config.build_group),
    ] {
        let pattern = Regex::new(&format!(r#"(?m)^{key}=".*"$"#)).unwrap();
        let replacement = format!(r#"{key}="{value}""#);
        rendered = pattern
            .replace(&rendered, regex::NoExpand(&replacement))
            .into_owned();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    #[test]
    fn test_render_wrapper_substitutes_all_fields() {
        let template = config::find_template("mageia5-x64").unwrap();
        let rendered = render_wrapper(WRAPPER_TEMPLATE, template);

        assert!(rendered.contains(r#"LOG_TTY="/dev/ttyS1""#));
        assert!(rendered.contains(r#"BUILD_USER="build""#));
        assert!(rendered.contains(r#"BUILD_GROUP="build""#));
    }

    #[test]
    fn test_render_wrapper_keeps_the_rest_intact() {
        let template = config::find_template("debian-sid-x64").unwrap();
        let rendered = render_wrapper(WRAPPER_TEMPLATE, template);

        // Only the three assignment lines change
        let before: Vec<&str> = WRAPPER_TEMPLATE.lines().collect();
        let after: Vec<&str> = rendered.lines().collect();
        assert_eq!(before.len(), after.len());
        let changed = before
            .iter()
            .zip(&after)
            .filter(|(b, a)| *b != *a)
            .count();
        assert!(changed <= 3);
    }

    #[test]
    fn test_render_wrapper_console_tty_varies_by_template() {
        let fedora22 = config::find_template("fedora-22-x64").unwrap();
        let rendered = render_wrapper(WRAPPER_TEMPLATE, fedora22);
        assert!(rendered.contains(r#"LOG_TTY="/dev/ttyS0""#));
    }
}
