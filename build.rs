// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("crucible")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Crucible Contributors")
        .about("Build server with VM-isolated builds and signed repository publishing")
        .subcommand_required(true)
        .subcommand(
            Command::new("build")
                .about("Build a source tree inside a clone of a template VM")
                .arg(
                    Arg::new("machine")
                        .short('m')
                        .long("machine")
                        .required(true)
                        .help("Template VM to clone (must be whitelisted)"),
                )
                .arg(
                    Arg::new("dependencies")
                        .short('d')
                        .long("dependencies")
                        .help("Directory of additional build dependencies"),
                )
                .arg(
                    Arg::new("jobs_dir")
                        .long("jobs-dir")
                        .default_value("/var/lib/crucible/jobs")
                        .help("Directory holding per-job working directories"),
                )
                .arg(Arg::new("source").required(true).help("Source directory to build"))
                .arg(
                    Arg::new("destination")
                        .required(true)
                        .help("Existing empty directory the artifacts are harvested into"),
                ),
        )
        .subcommand(
            Command::new("publish")
                .about("Sign built packages and merge them into a platform repository")
                .arg(
                    Arg::new("signkey")
                        .short('s')
                        .long("signkey")
                        .help("Signing key id"),
                )
                .arg(Arg::new("source").required(true).help("Build output directory to publish"))
                .arg(
                    Arg::new("destination")
                        .required(true)
                        .help("Destination repository path"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=guest/wrapper.sh");
    println!("cargo:rerun-if-changed=guest/buildjob.service");
    println!("cargo:rerun-if-changed=guest/rc.local");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("crucible.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
        return;
    }

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
