//! dao-move CLI - move a service's persisted data between storage backends.

mod prompt;

use clap::{Parser, Subcommand};
use dao_move::{
    Config, DaoError, DataSource, DriverCatalog, MigrationResult, Orchestrator, ProgressMode,
};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "dao-move")]
#[command(about = "Move service data between storage backends")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Progress rendering: log, json (lines on stderr) or none [default: from config]
    #[arg(long, value_name = "MODE")]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List migratable services and configured databases
    List,

    /// List registered storage drivers
    Drivers,

    /// Move one service storage from a database to another
    Move {
        /// Service to migrate (prompted if omitted)
        #[arg(long)]
        service: Option<String>,

        /// Storage key of the service (prompted if ambiguous)
        #[arg(long)]
        storage: Option<String>,

        /// Source database name (prompted if omitted)
        #[arg(long)]
        from: Option<String>,

        /// Target database name (prompted if omitted)
        #[arg(long)]
        to: Option<String>,

        /// Dry run: read and count without writing to the target [default: from config, true]
        #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
        dry_run: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), DaoError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let catalog = DriverCatalog::with_builtins();

    // Driver listing doesn't need a configuration file
    if let Commands::Drivers = cli.command {
        let names = catalog.driver_names();
        if cli.output_json {
            println!("{}", serde_json::to_string_pretty(&names)?);
        } else {
            for name in names {
                println!("{}", name);
            }
        }
        return Ok(());
    }

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let progress = cli.progress.unwrap_or(config.migration.progress);
    let mut orchestrator = Orchestrator::from_config(&config, catalog).with_progress(progress);

    match cli.command {
        Commands::Drivers => unreachable!(), // Handled above
        Commands::List => {
            let storages = orchestrator.services().migratable();
            if cli.output_json {
                let out = json!({
                    "storages": storages,
                    "databases": config.databases,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Migratable services:");
                if storages.is_empty() {
                    println!("  (none)");
                }
                for storage in &storages {
                    println!("  {}", storage);
                }
                println!("\nDatabases:");
                for db in &config.databases {
                    println!("  {}: {}", db.name, db);
                }
            }
        }

        Commands::Move {
            service,
            storage,
            from,
            to,
            dry_run,
        } => {
            let candidates = orchestrator.migratable()?;
            let selection =
                prompt::select_storage(&candidates, service.as_deref(), storage.as_deref())
                    .map_err(prompt_error)?;
            orchestrator.select(&selection.service, &selection.storage)?;

            let source = match from {
                Some(name) => config.database(&name)?,
                None => prompt::select_database(
                    "Select source database",
                    "--from",
                    &config.databases,
                    None,
                )
                .map_err(prompt_error)?,
            };
            orchestrator.select_source(DataSource::from(source))?;

            let target = match to {
                Some(name) => config.database(&name)?,
                None => prompt::select_database(
                    "Select target database",
                    "--to",
                    &config.databases,
                    Some(source.name.as_str()),
                )
                .map_err(prompt_error)?,
            };
            orchestrator.select_target(DataSource::from(target))?;

            let dry_run = dry_run.unwrap_or(config.migration.dry_run);
            let result = orchestrator.run(dry_run).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_report(&result);
            }
        }
    }

    Ok(())
}

fn prompt_error(e: prompt::PromptError) -> DaoError {
    DaoError::Config(e.to_string())
}

fn print_report(result: &MigrationResult) {
    println!(
        "Moved {} ({}) from {} to {}",
        result.service, result.storage, result.source, result.target
    );
    if result.counts.is_empty() {
        println!("  Nothing to copy");
    }
    for (entity, count) in &result.counts {
        println!("  Copied {} {}", count, entity);
    }
    println!(
        "Total: {} in {:.1}s",
        result.total_copied, result.duration_seconds
    );
    if result.dry_run {
        println!("Dry run: nothing was written. Re-run with --dry-run false to apply.");
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so stdout stays parseable with --output-json
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
