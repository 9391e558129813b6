// src/publish/classify.rs

//! Package family classification
//!
//! Loose files in a build output are sorted into at most one package
//! family by filename convention. Files matching no family (logs,
//! manifests, the status marker) are simply not published.

use crate::{Error, Result};
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

/// macOS portable builds ship as tarballs with a conventional name
static PORTABLE_OSX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^portable-.*-osx\.tar\.gz$").unwrap());

/// One platform's packaging convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFamily {
    Deb,
    Rpm,
    ArchLinux,
    MacOsx,
}

impl PackageFamily {
    const ALL: [PackageFamily; 4] = [Self::Deb, Self::Rpm, Self::ArchLinux, Self::MacOsx];

    /// Classify one filename, or `None` for files that are not packages
    pub fn of(name: &str) -> Option<PackageFamily> {
        if name.ends_with(".deb") {
            Some(Self::Deb)
        } else if name.ends_with(".rpm") {
            Some(Self::Rpm)
        } else if name.ends_with(".pkg.tar.xz") {
            Some(Self::ArchLinux)
        } else if name.ends_with(".pkg") || PORTABLE_OSX.is_match(name) {
            Some(Self::MacOsx)
        } else {
            None
        }
    }
}

impl fmt::Display for PackageFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deb => "deb",
            Self::Rpm => "rpm",
            Self::ArchLinux => "archlinux",
            Self::MacOsx => "macosx",
        };
        write!(f, "{name}")
    }
}

/// Classified package files from one build output directory
#[derive(Debug, Default)]
pub struct PackageSet {
    deb: Vec<String>,
    rpm: Vec<String>,
    archlinux: Vec<String>,
    macosx: Vec<String>,
}

impl PackageSet {
    /// Classify the top-level regular files of a directory
    pub fn classify_dir(dir: &Path) -> Result<PackageSet> {
        let mut set = PackageSet::default();
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort_unstable();

        for name in names {
            if let Some(family) = PackageFamily::of(&name) {
                set.bucket_mut(family).push(name);
            }
        }
        Ok(set)
    }

    fn bucket(&self, family: PackageFamily) -> &[String] {
        match family {
            PackageFamily::Deb => &self.deb,
            PackageFamily::Rpm => &self.rpm,
            PackageFamily::ArchLinux => &self.archlinux,
            PackageFamily::MacOsx => &self.macosx,
        }
    }

    fn bucket_mut(&mut self, family: PackageFamily) -> &mut Vec<String> {
        match family {
            PackageFamily::Deb => &mut self.deb,
            PackageFamily::Rpm => &mut self.rpm,
            PackageFamily::ArchLinux => &mut self.archlinux,
            PackageFamily::MacOsx => &mut self.macosx,
        }
    }

    /// The files of `family`, asserting it is the only family present and
    /// holds at least one package. A build that produced packages for a
    /// different platform than the destination repository is a publish to
    /// the wrong place, not something to silently skip.
    pub fn only(&self, family: PackageFamily) -> Result<&[String]> {
        for other in PackageFamily::ALL {
            if other == family {
                continue;
            }
            if let Some(stray) = self.bucket(other).first() {
                return Err(Error::Precondition(format!(
                    "{stray} is a {other} package and does not belong in a {family} repository"
                )));
            }
        }
        let files = self.bucket(family);
        if files.is_empty() {
            return Err(Error::Precondition(format!(
                "no {family} packages to publish"
            )));
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_classify_by_suffix() {
        assert_eq!(PackageFamily::of("app_1.0~sid_amd64.deb"), Some(PackageFamily::Deb));
        assert_eq!(PackageFamily::of("app-1.0.x86_64.rpm"), Some(PackageFamily::Rpm));
        assert_eq!(
            PackageFamily::of("app-1.0-1-x86_64.pkg.tar.xz"),
            Some(PackageFamily::ArchLinux)
        );
        assert_eq!(PackageFamily::of("app-1.0.pkg"), Some(PackageFamily::MacOsx));
    }

    #[test]
    fn test_portable_osx_tarball_is_macosx() {
        assert_eq!(
            PackageFamily::of("portable-app-1.0-osx.tar.gz"),
            Some(PackageFamily::MacOsx)
        );
        // The portable pattern is anchored
        assert_eq!(PackageFamily::of("app-1.0-osx.tar.gz"), None);
        assert_eq!(PackageFamily::of("portable-app-1.0-osx.tar.gz.bak"), None);
    }

    #[test]
    fn test_arch_package_is_not_macosx() {
        // ".pkg.tar.xz" must win over the bare ".pkg" suffix
        assert_ne!(
            PackageFamily::of("app-1.0-1-x86_64.pkg.tar.xz"),
            Some(PackageFamily::MacOsx)
        );
    }

    #[test]
    fn test_non_packages_are_ignored() {
        assert_eq!(PackageFamily::of("build.log"), None);
        assert_eq!(PackageFamily::of("SHA256SUMS"), None);
        assert_eq!(PackageFamily::of("status"), None);
    }

    #[test]
    fn test_classify_dir_skips_directories() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app_1.0~sid_amd64.deb"), b"x").unwrap();
        fs::write(dir.path().join("build.log"), b"x").unwrap();
        fs::create_dir(dir.path().join("leftovers.deb")).unwrap();

        let set = PackageSet::classify_dir(dir.path()).unwrap();
        assert_eq!(set.only(PackageFamily::Deb).unwrap(), ["app_1.0~sid_amd64.deb"]);
    }

    #[test]
    fn test_only_rejects_foreign_family() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app_1.0~sid_amd64.deb"), b"x").unwrap();
        fs::write(dir.path().join("app-1.0.x86_64.rpm"), b"x").unwrap();

        let set = PackageSet::classify_dir(dir.path()).unwrap();
        assert!(matches!(
            set.only(PackageFamily::Deb).unwrap_err(),
            Error::Precondition(_)
        ));
    }

    #[test]
    fn test_only_requires_at_least_one_package() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("build.log"), b"x").unwrap();

        let set = PackageSet::classify_dir(dir.path()).unwrap();
        assert!(matches!(
            set.only(PackageFamily::ArchLinux).unwrap_err(),
            Error::Precondition(_)
        ));
    }
}
