// tests/publish_workflow.rs

//! Integration tests for the publish protocol
//!
//! These exercise every refusal path that must leave the destination
//! repository untouched. Paths that reach the signing tools are covered
//! by unit tests on their pure parts instead; the tools themselves are
//! not assumed to exist on the test host.

use crucible::publish;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Snapshot of a directory tree's file names
fn tree_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = walkdir_listing(dir);
    names.sort();
    names
}

fn walkdir_listing(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let mut worklist = vec![dir.to_path_buf()];
    while let Some(current) = worklist.pop() {
        for entry in fs::read_dir(&current).unwrap() {
            let entry = entry.unwrap();
            names.push(entry.path().to_string_lossy().into_owned());
            if entry.path().is_dir() {
                worklist.push(entry.path());
            }
        }
    }
    names
}

fn build_output(status: Option<&str>, files: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    if let Some(status) = status {
        fs::write(dir.path().join("status"), status).unwrap();
    }
    for name in files {
        fs::write(dir.path().join(name), b"package contents").unwrap();
    }
    dir
}

fn repo_with_package(name: &str) -> TempDir {
    let repo = TempDir::new().unwrap();
    fs::write(repo.path().join(name), b"already published").unwrap();
    repo
}

#[test]
fn test_failed_build_refuses_and_leaves_repository_unchanged() {
    let source = build_output(Some("2"), &["app-1.0-1-x86_64.pkg.tar.xz"]);
    let repo = repo_with_package("other-1.0-1-x86_64.pkg.tar.xz");
    let repo_path = format!("{}/arch/x86_64", repo.path().display());
    fs::create_dir_all(&repo_path).unwrap();
    let before = tree_listing(repo.path());

    let result = publish::publish(source.path(), &repo_path, "5FCBF54A");
    assert!(result.is_err(), "nonzero status must refuse the publish");
    assert_eq!(tree_listing(repo.path()), before, "repository must be untouched");
}

#[test]
fn test_missing_status_marker_refuses() {
    let source = build_output(None, &["app-1.0-1-x86_64.pkg.tar.xz"]);
    let repo = TempDir::new().unwrap();
    let repo_path = format!("{}/arch/x86_64", repo.path().display());

    let result = publish::publish(source.path(), &repo_path, "5FCBF54A");
    assert!(result.is_err(), "an aborted build has unknown status and must refuse");
    assert!(
        !Path::new(&repo_path).exists(),
        "the repository directory must not even be created"
    );
}

#[test]
fn test_unknown_repository_path_is_an_error() {
    let source = build_output(Some("0"), &["app_1.0-1~sid_amd64.deb"]);
    let result = publish::publish(source.path(), "/srv/repos/gentoo", "5FCBF54A");
    assert!(result.is_err());
}

#[test]
fn test_wrong_family_for_destination_refuses() {
    // A deb has no business in an Arch repository
    let source = build_output(Some("0"), &["app_1.0-1~sid_amd64.deb"]);
    let repo = TempDir::new().unwrap();
    let repo_path = format!("{}/arch/x86_64", repo.path().display());
    let before = tree_listing(repo.path());

    let result = publish::publish(source.path(), &repo_path, "5FCBF54A");
    assert!(result.is_err());
    assert_eq!(tree_listing(repo.path()), before);
}

#[test]
fn test_mixed_families_refuse_even_with_matching_packages() {
    let source = build_output(
        Some("0"),
        &["app-1.0-1-x86_64.pkg.tar.xz", "app-1.0-1.x86_64.rpm"],
    );
    let repo = TempDir::new().unwrap();
    let repo_path = format!("{}/arch/x86_64", repo.path().display());

    let result = publish::publish(source.path(), &repo_path, "5FCBF54A");
    assert!(result.is_err(), "a stray rpm must fail the whole publish");
}

#[test]
fn test_empty_build_output_refuses() {
    let source = build_output(Some("0"), &["build.log", "internal_build.log"]);
    let repo = TempDir::new().unwrap();
    let repo_path = format!("{}/arch/x86_64", repo.path().display());

    let result = publish::publish(source.path(), &repo_path, "5FCBF54A");
    assert!(result.is_err(), "publishing zero packages is a caller error");
}

#[test]
fn test_debian_repository_must_be_reprepro_managed() {
    let source = build_output(Some("0"), &["app_1.0-1~sid_amd64.deb"]);
    let repo = TempDir::new().unwrap();
    let repo_path = repo.path().join("debian");
    fs::create_dir_all(&repo_path).unwrap();
    let before = tree_listing(repo.path());

    // No conf/distributions: refused before anything is staged or signed
    let result = publish::publish(source.path(), &repo_path.to_string_lossy(), "5FCBF54A");
    assert!(result.is_err());
    assert_eq!(tree_listing(repo.path()), before);
}
