// src/config.rs

//! Static template whitelist
//!
//! Every build clones one of the golden template VMs listed here. The table
//! is immutable and consulted once at the CLI boundary; an unknown name is a
//! configuration error before any resource is touched.

use crate::{Error, Result};

/// How to find the guest root partition on the first overlay disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionRef {
    /// Ordinal index into the guest partition table
    Index(usize),
    /// Explicit device path, e.g. an LVM volume
    Device(&'static str),
}

/// Per-template build settings
#[derive(Debug, Clone, Copy)]
pub struct TemplateConfig {
    /// Template domain name as registered with the hypervisor
    pub name: &'static str,
    /// Guest partition holding the root filesystem
    pub partition: PartitionRef,
    /// Guest tty the wrapper script logs to (second serial port on most
    /// templates, first on Fedora 22)
    pub console_tty: &'static str,
    /// Unprivileged account the guest build runs as
    pub build_user: &'static str,
    pub build_group: &'static str,
    /// Template boots a graphical environment; audio emulation is disabled
    /// on the clone so the build host needs no sound device
    pub gui: bool,
}

const fn headless(name: &'static str, user: &'static str) -> TemplateConfig {
    TemplateConfig {
        name,
        partition: PartitionRef::Index(0),
        console_tty: "/dev/ttyS1",
        build_user: user,
        build_group: user,
        gui: false,
    }
}

static TEMPLATES: &[TemplateConfig] = &[
    // Debian
    headless("debian-wheezy-x86", "builder"),
    headless("debian-wheezy-x64", "builder"),
    headless("debian-jessie-x86", "builder"),
    headless("debian-jessie-x64", "builder"),
    headless("debian-stretch-x86", "builder"),
    headless("debian-stretch-x64", "builder"),
    headless("debian-sid-x86", "builder"),
    headless("debian-sid-x64", "builder"),
    // Archlinux
    headless("arch-x86", "builder"),
    headless("arch-x64", "builder"),
    // Mageia
    headless("mageia4-x86", "build"),
    headless("mageia4-x64", "build"),
    headless("mageia5-x86", "build"),
    headless("mageia5-x64", "build"),
    // Fedora roots live on LVM; Fedora 22 logs to the first serial port
    TemplateConfig {
        name: "fedora-22-x86",
        partition: PartitionRef::Device("/dev/fedora/root"),
        console_tty: "/dev/ttyS0",
        build_user: "builder",
        build_group: "builder",
        gui: false,
    },
    TemplateConfig {
        name: "fedora-22-x64",
        partition: PartitionRef::Device("/dev/fedora/root"),
        console_tty: "/dev/ttyS0",
        build_user: "builder",
        build_group: "builder",
        gui: false,
    },
    TemplateConfig {
        name: "fedora-23-x86",
        partition: PartitionRef::Device("/dev/fedora/root"),
        console_tty: "/dev/ttyS1",
        build_user: "builder",
        build_group: "builder",
        gui: false,
    },
    TemplateConfig {
        name: "fedora-23-x64",
        partition: PartitionRef::Device("/dev/fedora/root"),
        console_tty: "/dev/ttyS1",
        build_user: "builder",
        build_group: "builder",
        gui: false,
    },
    // XUbuntu with a graphical environment
    TemplateConfig {
        name: "xubuntu-14.04-x86-gui",
        partition: PartitionRef::Index(0),
        console_tty: "/dev/ttyS1",
        build_user: "builder",
        build_group: "builder",
        gui: true,
    },
];

/// Look up a template by name
pub fn find_template(name: &str) -> Option<&'static TemplateConfig> {
    TEMPLATES.iter().find(|t| t.name == name)
}

/// Look up a template by name, failing with a configuration error
pub fn require_template(name: &str) -> Result<&'static TemplateConfig> {
    find_template(name)
        .ok_or_else(|| Error::Config(format!("'{name}' is not a whitelisted template VM")))
}

/// All whitelisted template names, for error messages and shell completion
pub fn template_names() -> impl Iterator<Item = &'static str> {
    TEMPLATES.iter().map(|t| t.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_template() {
        let t = find_template("debian-jessie-x64").unwrap();
        assert_eq!(t.partition, PartitionRef::Index(0));
        assert_eq!(t.console_tty, "/dev/ttyS1");
        assert_eq!(t.build_user, "builder");
        assert!(!t.gui);
    }

    #[test]
    fn test_unknown_template_is_config_error() {
        assert!(find_template("debian-jessie-arm64").is_none());
        let err = require_template("debian-jessie-arm64").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_mageia_uses_build_account() {
        let t = find_template("mageia5-x64").unwrap();
        assert_eq!(t.build_user, "build");
        assert_eq!(t.build_group, "build");
    }

    #[test]
    fn test_fedora_partition_is_lvm_device() {
        let t = find_template("fedora-23-x64").unwrap();
        assert_eq!(t.partition, PartitionRef::Device("/dev/fedora/root"));
    }

    #[test]
    fn test_gui_template_flagged() {
        assert!(find_template("xubuntu-14.04-x86-gui").unwrap().gui);
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = template_names().collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }
}
