// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn repo_arg() -> Arg {
    Arg::new("repo").required(true).help("Repository name")
}

fn build_cli() -> Command {
    Command::new("depot")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Depot Contributors")
        .about("Binary package repository manager with a shared pool and delta packages")
        .subcommand_required(false)
        .arg(
            Arg::new("base_dir")
                .short('b')
                .long("base-dir")
                .value_name("PATH")
                .global(true)
                .default_value("/var/lib/depot")
                .help("Base directory holding the database, pool and deltas"),
        )
        .subcommand(Command::new("init").about("Initialize the Depot state directory"))
        .subcommand(Command::new("create-repo").about("Create a repository").arg(repo_arg()))
        .subcommand(
            Command::new("remove-repo")
                .about("Remove a repository (pool entries stay until sweep-pool)")
                .arg(repo_arg()),
        )
        .subcommand(Command::new("list-repos").about("List repositories"))
        .subcommand(
            Command::new("index-repo")
                .about("Rebuild the index of a repository")
                .arg(repo_arg()),
        )
        .subcommand(
            Command::new("add-packages")
                .about("Add package files to a repository (all or nothing)")
                .arg(repo_arg())
                .arg(
                    Arg::new("packages")
                        .required(true)
                        .num_args(1..)
                        .help("Package files"),
                ),
        )
        .subcommand(
            Command::new("list-packages")
                .about("List the package names of a repository")
                .arg(repo_arg()),
        )
        .subcommand(
            Command::new("show-packages")
                .about("Show every build of a package, newest first")
                .arg(repo_arg())
                .arg(Arg::new("name").required(true).help("Package name")),
        )
        .subcommand(
            Command::new("create-delta")
                .about("Compute the delta between two packages of a repository")
                .arg(repo_arg())
                .arg(Arg::new("old").required(true).help("Package id of the old build"))
                .arg(Arg::new("new").required(true).help("Package id of the new build")),
        )
        .subcommand(
            Command::new("add-delta")
                .about("Add a computed delta package to a repository")
                .arg(repo_arg())
                .arg(Arg::new("old").required(true).help("Package id of the old build"))
                .arg(Arg::new("new").required(true).help("Package id of the new build"))
                .arg(Arg::new("delta_path").required(true).help("Delta package file")),
        )
        .subcommand(
            Command::new("clear-delta-failure")
                .about("Forget that a delta failed so it may be attempted again")
                .arg(Arg::new("delta_id").required(true).help("Delta id")),
        )
        .subcommand(Command::new("sweep-pool").about("Remove pool entries no repository references"))
        .subcommand(
            Command::new("request")
                .about("Run a control API request and print the JSON reply")
                .arg(Arg::new("path").required(true).help("Request path, e.g. /api/v1/list_repos")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("depot.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
