// src/publish/target.rs

//! Destination repository kinds
//!
//! The destination path names the platform: `.../debian`, `.../arch/x86_64`,
//! `.../mageia/5`, `.../fedora/23`, `.../macosx/i686`. The kind is decided
//! once here and carried as a value; workflows never re-match the path.

use crate::{Error, Result};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

static DEBIAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*/)?debian$").unwrap());
static ARCHLINUX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*/)?arch/(x86_64|i686)$").unwrap());
static MAGEIA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*/)?mageia/[0-9]+$").unwrap());
static FEDORA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*/)?fedora/[0-9]+$").unwrap());
static MACOSX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*/)?macosx/i686").unwrap());

/// Platform of a destination repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoKind {
    Debian,
    ArchLinux,
    Mageia,
    Fedora,
    MacOsx,
}

impl RepoKind {
    /// The one package family this platform's repository accepts
    pub fn family(&self) -> crate::publish::PackageFamily {
        use crate::publish::PackageFamily;
        match self {
            Self::Debian => PackageFamily::Deb,
            Self::ArchLinux => PackageFamily::ArchLinux,
            Self::Mageia | Self::Fedora => PackageFamily::Rpm,
            Self::MacOsx => PackageFamily::MacOsx,
        }
    }

    /// External tools the platform's workflow shells out to
    pub fn required_tools(&self) -> &'static [&'static str] {
        match self {
            Self::Debian => &["gpg", "dpkg-sig", "reprepro"],
            Self::ArchLinux => &["gpg", "repo-add"],
            Self::Mageia => &["gpg", "rpm", "genhdlist2"],
            Self::Fedora => &["gpg", "rpm", "createrepo"],
            Self::MacOsx => &["gpg"],
        }
    }
}

/// A destination decided from a raw repository path
#[derive(Debug, Clone)]
pub struct RepoTarget {
    pub kind: RepoKind,
    pub path: PathBuf,
}

impl RepoTarget {
    /// Match a raw destination path to exactly one platform workflow
    pub fn parse(raw: &str) -> Result<RepoTarget> {
        let trimmed = raw.trim_end_matches('/');
        let kind = if DEBIAN.is_match(trimmed) {
            RepoKind::Debian
        } else if ARCHLINUX.is_match(trimmed) {
            RepoKind::ArchLinux
        } else if MAGEIA.is_match(trimmed) {
            RepoKind::Mageia
        } else if FEDORA.is_match(trimmed) {
            RepoKind::Fedora
        } else if MACOSX.is_match(trimmed) {
            RepoKind::MacOsx
        } else {
            return Err(Error::Config(format!(
                "publishing for repository {raw} not defined"
            )));
        };
        Ok(RepoTarget {
            kind,
            path: PathBuf::from(trimmed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debian_paths() {
        assert_eq!(RepoTarget::parse("/srv/repos/debian").unwrap().kind, RepoKind::Debian);
        assert_eq!(RepoTarget::parse("debian").unwrap().kind, RepoKind::Debian);
        // Trailing slash is normalized away
        let target = RepoTarget::parse("/srv/repos/debian/").unwrap();
        assert_eq!(target.path, PathBuf::from("/srv/repos/debian"));
    }

    #[test]
    fn test_arch_requires_architecture_leaf() {
        assert_eq!(
            RepoTarget::parse("/srv/repos/arch/x86_64").unwrap().kind,
            RepoKind::ArchLinux
        );
        assert_eq!(
            RepoTarget::parse("/srv/repos/arch/i686").unwrap().kind,
            RepoKind::ArchLinux
        );
        assert!(RepoTarget::parse("/srv/repos/arch").is_err());
        assert!(RepoTarget::parse("/srv/repos/arch/armv7").is_err());
    }

    #[test]
    fn test_versioned_rpm_repos() {
        assert_eq!(RepoTarget::parse("/srv/repos/mageia/5").unwrap().kind, RepoKind::Mageia);
        assert_eq!(RepoTarget::parse("/srv/repos/fedora/23").unwrap().kind, RepoKind::Fedora);
        assert!(RepoTarget::parse("/srv/repos/mageia").is_err());
        assert!(RepoTarget::parse("/srv/repos/fedora/stable").is_err());
    }

    #[test]
    fn test_macosx_prefix_match() {
        assert_eq!(
            RepoTarget::parse("/srv/repos/macosx/i686").unwrap().kind,
            RepoKind::MacOsx
        );
        assert!(RepoTarget::parse("/srv/repos/macosx/x86_64").is_err());
    }

    #[test]
    fn test_unknown_path_is_config_error() {
        let err = RepoTarget::parse("/srv/repos/gentoo").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_debian_substring_does_not_match() {
        // "mydebian" is not a debian repository
        assert!(RepoTarget::parse("/srv/repos/mydebian").is_err());
    }
}
