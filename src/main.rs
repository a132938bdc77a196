// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use depot::config::{DEFAULT_BASE_DIR, Layout};
use depot::db::models::DeltaInformation;
use depot::{Manager, api, delta, pool};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "depot")]
#[command(author, version, about = "Binary package repository manager with a shared pool and delta packages", long_about = None)]
struct Cli {
    /// Base directory holding the database, pool and deltas
    #[arg(short, long, global = true, default_value = DEFAULT_BASE_DIR)]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the Depot state directory
    Init,
    /// Create a repository
    CreateRepo {
        /// Repository name
        name: String,
    },
    /// Remove a repository (pool entries stay until sweep-pool)
    RemoveRepo {
        /// Repository name
        name: String,
    },
    /// List repositories
    ListRepos,
    /// Rebuild the index of a repository
    IndexRepo {
        /// Repository name
        name: String,
    },
    /// Add package files to a repository (all or nothing)
    AddPackages {
        /// Repository name
        repo: String,
        /// Package files
        #[arg(required = true)]
        packages: Vec<PathBuf>,
    },
    /// List the package names of a repository
    ListPackages {
        /// Repository name
        repo: String,
    },
    /// Show every build of a package, newest first
    ShowPackages {
        /// Repository name
        repo: String,
        /// Package name
        name: String,
    },
    /// Compute the delta between two packages of a repository
    CreateDelta {
        /// Repository name
        repo: String,
        /// Package id of the old build
        old: String,
        /// Package id of the new build
        new: String,
    },
    /// Add a computed delta package to a repository
    AddDelta {
        /// Repository name
        repo: String,
        /// Package id of the old build
        old: String,
        /// Package id of the new build
        new: String,
        /// Delta package file
        delta_path: PathBuf,
    },
    /// Forget that a delta failed so it may be attempted again
    ClearDeltaFailure {
        /// Delta id
        delta_id: String,
    },
    /// Remove pool entries no repository references
    SweepPool,
    /// Run a control API request and print the JSON reply
    Request {
        /// Request path, e.g. /api/v1/list_repos
        path: String,
    },
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let layout = Layout::new(&cli.base_dir);

    let Some(command) = cli.command else {
        // No command provided, show help
        println!("Depot v{}", env!("CARGO_PKG_VERSION"));
        println!("Run 'depot --help' for usage information");
        return Ok(());
    };

    let manager = Manager::open_default(layout)?;

    match command {
        Commands::Init => {
            info!("Initialized depot at {}", cli.base_dir.display());
            println!("Depot initialized at: {}", cli.base_dir.display());
        }
        Commands::CreateRepo { name } => {
            manager.create_repo(&name)?;
            println!("Created repository: {}", name);
        }
        Commands::RemoveRepo { name } => {
            manager.remove_repo(&name)?;
            println!("Removed repository: {}", name);
        }
        Commands::ListRepos => {
            let repos = manager.list_repos()?;
            if repos.is_empty() {
                println!("No repositories.");
            } else {
                for repo in &repos {
                    println!("  {}", repo);
                }
                println!("\nTotal: {} repository(s)", repos.len());
            }
        }
        Commands::IndexRepo { name } => {
            manager.index(&name)?;
            println!("Indexed repository: {}", name);
        }
        Commands::AddPackages { repo, packages } => {
            let ids = manager.add_packages(&repo, &packages)?;
            for id in &ids {
                println!("  {}", id);
            }
            println!("Added {} package(s) to {}", ids.len(), repo);
        }
        Commands::ListPackages { repo } => {
            let names = manager.get_package_names(&repo)?;
            if names.is_empty() {
                println!("No packages in {}.", repo);
            } else {
                for name in &names {
                    println!("  {}", name);
                }
                println!("\nTotal: {} package(s)", names.len());
            }
        }
        Commands::ShowPackages { repo, name } => {
            let builds = manager.get_packages(&repo, &name)?;
            if builds.is_empty() {
                println!("No builds of {} in {}.", name, repo);
            }
            for meta in &builds {
                println!(
                    "  {} {}-{} [{}]",
                    meta.name, meta.version, meta.release, meta.architecture
                );
            }
        }
        Commands::CreateDelta { repo, old, new } => {
            let path = manager.create_delta(&repo, &old, &new)?;
            println!("Delta written to {}", path.display());
        }
        Commands::AddDelta {
            repo,
            old,
            new,
            delta_path,
        } => {
            let info = DeltaInformation::new(delta::delta_id(&old, &new), old, new);
            manager.add_delta(&repo, &delta_path, &info)?;
            println!(
                "Added delta {} to {}",
                pool::package_id(&delta_path)?,
                repo
            );
        }
        Commands::ClearDeltaFailure { delta_id } => {
            manager.clear_delta_failure(&delta_id)?;
            println!("Cleared failure of delta {}", delta_id);
        }
        Commands::SweepPool => {
            let report = manager.sweep_pool()?;
            for id in &report.entries_removed {
                println!("  removed {}", id);
            }
            println!(
                "Swept {} entries, {} delta records, {} blobs ({} bytes freed)",
                report.entries_removed.len(),
                report.deltas_forgotten,
                report.blobs_removed,
                report.bytes_freed
            );
        }
        Commands::Request { path } => {
            let reply = api::handle(&manager, "GET", &path);
            println!("{}", serde_json::to_string_pretty(&reply.body)?);
            if reply.status != 200 {
                return Err(anyhow::anyhow!("request failed with status {}", reply.status));
            }
        }
    }

    Ok(())
}
