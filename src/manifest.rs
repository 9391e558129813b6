// src/manifest.rs

//! Checksum manifests
//!
//! Harvested artifacts are published with two independent digest manifests,
//! `SHA256SUMS` and `MD5SUMS`, in the classic coreutils format
//! (`<hex digest><two spaces><file name>`). The macOS repository keeps a
//! rolling `SHA256SUMS` that is merged on publish instead of recomputed, so
//! entries for packages that were not re-touched survive verbatim.

use crate::{Error, Result};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub const SHA256SUMS: &str = "SHA256SUMS";
pub const MD5SUMS: &str = "MD5SUMS";

/// Digest algorithm of a manifest file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha256,
    Md5,
}

impl Algorithm {
    /// Conventional manifest file name for this algorithm
    pub fn manifest_name(&self) -> &'static str {
        match self {
            Self::Sha256 => SHA256SUMS,
            Self::Md5 => MD5SUMS,
        }
    }
}

/// Hex digest of one file's contents
pub fn file_digest(algorithm: Algorithm, path: &Path) -> Result<String> {
    match algorithm {
        Algorithm::Sha256 => digest_reader::<Sha256>(path),
        Algorithm::Md5 => digest_reader::<Md5>(path),
    }
}

fn digest_reader<D: Digest>(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| Error::Io(format!("cannot open {}: {e}", path.display())))?;
    let mut hasher = D::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Write a manifest over the named files in `dir`, in the given order
pub fn write_manifest(dir: &Path, algorithm: Algorithm, files: &[String]) -> Result<()> {
    let mut out = File::create(dir.join(algorithm.manifest_name()))?;
    for name in files {
        let digest = file_digest(algorithm, &dir.join(name))?;
        writeln!(out, "{digest}  {name}")?;
    }
    Ok(())
}

/// Parse a manifest into name -> digest entries
pub fn parse_manifest(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("cannot read {}: {e}", path.display())))?;
    let mut entries = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let (digest, name) = line.split_once("  ").ok_or_else(|| {
            Error::Io(format!("malformed manifest line in {}: {line:?}", path.display()))
        })?;
        entries.insert(name.to_string(), digest.to_string());
    }
    Ok(entries)
}

/// Merge new entries into a manifest, preserving prior entries that were
/// not re-touched. The result is rewritten sorted by file name.
pub fn merge_manifest(path: &Path, new_entries: &BTreeMap<String, String>) -> Result<()> {
    let mut merged = if path.exists() {
        parse_manifest(path)?
    } else {
        BTreeMap::new()
    };
    for (name, digest) in new_entries {
        merged.insert(name.clone(), digest.clone());
    }

    let mut out = File::create(path)?;
    for (name, digest) in &merged {
        writeln!(out, "{digest}  {name}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_digest_known_values() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data");
        fs::write(&path, b"abc").unwrap();

        assert_eq!(
            file_digest(Algorithm::Sha256, &path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            file_digest(Algorithm::Md5, &path).unwrap(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn test_write_and_parse_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"aaa").unwrap();
        fs::write(temp_dir.path().join("b.txt"), b"bbb").unwrap();

        let files = vec!["a.txt".to_string(), "b.txt".to_string()];
        write_manifest(temp_dir.path(), Algorithm::Sha256, &files).unwrap();

        let entries = parse_manifest(&temp_dir.path().join(SHA256SUMS)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries["a.txt"],
            file_digest(Algorithm::Sha256, &temp_dir.path().join("a.txt")).unwrap()
        );
    }

    #[test]
    fn test_merge_preserves_untouched_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(SHA256SUMS);
        fs::write(&path, "1111  old.pkg\n2222  shared.pkg\n").unwrap();

        let mut new_entries = BTreeMap::new();
        new_entries.insert("new.pkg".to_string(), "3333".to_string());
        new_entries.insert("shared.pkg".to_string(), "4444".to_string());
        merge_manifest(&path, &new_entries).unwrap();

        let merged = parse_manifest(&path).unwrap();
        assert_eq!(merged["old.pkg"], "1111");
        assert_eq!(merged["shared.pkg"], "4444");
        assert_eq!(merged["new.pkg"], "3333");
    }

    #[test]
    fn test_merge_without_existing_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(SHA256SUMS);

        let mut new_entries = BTreeMap::new();
        new_entries.insert("only.pkg".to_string(), "abcd".to_string());
        merge_manifest(&path, &new_entries).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "abcd  only.pkg\n");
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(SHA256SUMS);
        fs::write(&path, "not-a-manifest-line\n").unwrap();
        assert!(parse_manifest(&path).is_err());
    }

    #[test]
    fn test_output_is_sorted_by_name() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(SHA256SUMS);

        let mut new_entries = BTreeMap::new();
        new_entries.insert("zzz.pkg".to_string(), "1".to_string());
        new_entries.insert("aaa.pkg".to_string(), "2".to_string());
        merge_manifest(&path, &new_entries).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let names: Vec<&str> = text.lines().map(|l| l.split("  ").nth(1).unwrap()).collect();
        assert_eq!(names, vec!["aaa.pkg", "zzz.pkg"]);
    }
}
