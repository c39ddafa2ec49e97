// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use corral::{AdoptOptions, AdoptionEngine, AdoptionStrategy, Error, VerifyOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "corral")]
#[command(author, version, about = "Adopt and migrate self-hosted CI runners with verified moves and rollback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Manage the runner where it sits
    Adopt,
    /// Copy into managed storage, then verify and optionally delete
    Move,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the host for adoptable runner installs
    Scan,
    /// List managed runner profiles
    List,
    /// Adopt a scanned candidate by id
    Adopt {
        candidate_id: String,
        #[arg(long, value_enum, default_value = "adopt")]
        strategy: StrategyArg,
        /// Consent to replacing a detected external service
        #[arg(long)]
        replace_service: bool,
        /// Move destination override
        #[arg(long)]
        destination: Option<PathBuf>,
    },
    /// Verify a runner is functional at its current install path
    Verify {
        runner_id: String,
        /// Seconds to wait for the ready marker
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Move an adopted runner's files into managed storage
    Move {
        runner_id: String,
        #[arg(long)]
        destination: Option<PathBuf>,
    },
    /// Revert an unverified migration to its original path
    Rollback { runner_id: String },
    /// Delete the original install of a verified migration
    DeleteOriginal { runner_id: String },
    /// Replace an external OS service with a managed one
    ReplaceService { runner_id: String },
    /// Toggle run-on-boot for a managed service
    SetRunOnBoot {
        runner_id: String,
        #[arg(value_parser = clap::value_parser!(bool))]
        enabled: bool,
    },
    /// Delete the external service definition itself
    RemoveExternal {
        runner_id: String,
        /// Required confirmation when the service identity has no id
        #[arg(long)]
        confirm_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    corral::logging::init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Corral v{}", env!("CARGO_PKG_VERSION"));
        println!("Run 'corral --help' for usage information");
        return Ok(());
    };

    let engine = AdoptionEngine::open_default()?;
    match command {
        Commands::Scan => {
            let candidates = engine.scan();
            info!("scan found {} candidate(s)", candidates.len());
            println!("{}", serde_json::to_string_pretty(&candidates)?);
        }
        Commands::List => {
            println!("{}", serde_json::to_string_pretty(&engine.list())?);
        }
        Commands::Adopt {
            candidate_id,
            strategy,
            replace_service,
            destination,
        } => {
            // Adoption works off the most recent scan snapshot.
            engine.scan();
            let strategy = match strategy {
                StrategyArg::Adopt => AdoptionStrategy::Adopt,
                StrategyArg::Move => AdoptionStrategy::MoveVerifyDelete,
            };
            let options = AdoptOptions {
                replace_service,
                destination,
            };
            let profile = engine.adopt(&candidate_id, strategy, &options).await?;
            println!("adopted runner {}", profile.runner_id);
        }
        Commands::Verify { runner_id, timeout } => {
            let options = VerifyOptions {
                timeout: Duration::from_secs(timeout),
                ..VerifyOptions::default()
            };
            let outcome = engine.verify(&runner_id, &options).await?;
            if outcome.ok {
                println!("runner {runner_id} verified");
            } else {
                return Err(Error::VerificationTimeout {
                    waited_secs: timeout,
                }
                .into());
            }
        }
        Commands::Move {
            runner_id,
            destination,
        } => {
            let profile = engine.move_install(&runner_id, destination).await?;
            println!(
                "runner {runner_id} moved to {}",
                profile.install.install_path
            );
        }
        Commands::Rollback { runner_id } => {
            let profile = engine.rollback(&runner_id).await?;
            println!(
                "runner {runner_id} rolled back to {}",
                profile.install.install_path
            );
        }
        Commands::DeleteOriginal { runner_id } => {
            engine.delete_original(&runner_id).await?;
            println!("original install for {runner_id} deleted");
        }
        Commands::ReplaceService { runner_id } => {
            engine.replace_service(&runner_id).await?;
            println!("service for {runner_id} is now managed");
        }
        Commands::SetRunOnBoot { runner_id, enabled } => {
            let profile = engine.set_run_on_boot(&runner_id, enabled).await?;
            println!(
                "runner {runner_id} run-on-boot is now {}",
                profile.service.run_on_boot
            );
        }
        Commands::RemoveExternal {
            runner_id,
            confirm_path,
        } => {
            engine
                .remove_external_artifacts(&runner_id, confirm_path.as_deref())
                .await?;
            println!("external service artifacts for {runner_id} removed");
        }
    }
    Ok(())
}
