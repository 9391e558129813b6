// src/commands.rs
//! Command handlers for the Crucible CLI

use anyhow::{Result, bail};
use crucible::{BuildJob, config, publish};
use std::fs;
use std::path::Path;
use tracing::info;

/// Run one build job: clone the template, upload the sources, supervise
/// the guest build, and harvest the artifacts.
///
/// The job is torn down on every exit path, including errors raised while
/// it was still provisioning.
pub fn run_build(
    machine: &str,
    dependencies: Option<&Path>,
    source: &Path,
    destination: &Path,
    jobs_dir: &Path,
) -> Result<()> {
    // All preconditions fail before a single resource is created
    config::require_template(machine)?;
    if !source.is_dir() {
        bail!("{} is not a directory", source.display());
    }
    if let Some(deps) = dependencies {
        if !deps.is_dir() {
            bail!("{} is not a directory", deps.display());
        }
    }
    if !destination.is_dir() {
        bail!("{} is not a directory", destination.display());
    }
    if fs::read_dir(destination)?.next().is_some() {
        bail!("{} is not empty, refusing to build", destination.display());
    }

    let mut job = BuildJob::create(machine, jobs_dir)?;
    let outcome = (|| -> crucible::Result<()> {
        job.prepare(source, dependencies)?;
        job.build()?;
        job.harvest(destination)
    })();
    job.teardown();
    outcome?;

    info!("artifacts harvested into {}", destination.display());
    Ok(())
}

/// Sign a build's packages and merge them into a platform repository
pub fn run_publish(signkey: &str, source: &Path, destination: &str) -> Result<()> {
    if !source.is_dir() {
        bail!("{} is not a directory", source.display());
    }
    publish::publish(source, destination, signkey)?;
    info!("published {} to {destination}", source.display());
    Ok(())
}
