use std::{path::Path, sync::Arc, time::Duration};

use clap::Parser;
use sweeper::{
    config::SweeperConfig,
    db::DbPool,
    observability,
    retention::{RetentionRunner, RetentionScheduler},
};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "sweeper.toml";

/// How long `serve` waits for an in-flight run after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// CLI arguments for the retention engine
#[derive(Parser, Debug)]
#[command(version, about = "Data retention engine", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./sweeper.toml if it exists,
    /// otherwise configuration comes from the environment)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the retention scheduler until interrupted (default)
    Serve,
    /// Run every policy once and print the report as JSON
    RunOnce {
        /// Count what would be deleted, then roll back
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the validated retention policies as JSON
    Policies,
    /// Run database migrations and exit
    Migrate,
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command {
        None | Some(Command::Serve) => run_server(config_path).await,
        Some(Command::RunOnce { dry_run }) => run_once(config_path, dry_run).await,
        Some(Command::Policies) => run_policies(config_path),
        Some(Command::Migrate) => run_migrate(config_path).await,
        Some(Command::Schema { output }) => {
            #[cfg(feature = "json-schema")]
            run_schema_export(output);
            #[cfg(not(feature = "json-schema"))]
            {
                let _ = output;
                eprintln!("Error: JSON schema export requires the 'json-schema' feature");
                std::process::exit(1);
            }
        }
    }
}

/// Load configuration or exit with a message.
fn load_config(explicit_path: Option<&str>) -> SweeperConfig {
    let path = explicit_path.or_else(|| {
        Path::new(DEFAULT_CONFIG_FILE)
            .exists()
            .then_some(DEFAULT_CONFIG_FILE)
    });

    let result = match path {
        Some(path) => SweeperConfig::from_file(path),
        None => SweeperConfig::from_env(),
    };

    match result {
        Ok(config) => config,
        Err(e) => {
            match path {
                Some(path) => eprintln!("Failed to load config from {path}: {e}"),
                None => eprintln!("Failed to load config from environment: {e}"),
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &SweeperConfig) {
    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Connect to the configured database and verify it answers, running
/// migrations if enabled.
async fn connect(config: &SweeperConfig, migrate: bool) -> DbPool {
    if config.database.is_none() {
        eprintln!(
            "Error: Database is not configured. Set [database] in the config file \
             or SWEEPER_DATABASE_URL."
        );
        std::process::exit(1);
    }

    let db = match DbPool::from_config(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = db.health_check().await {
        tracing::error!(error = %e, "Database health check failed");
        eprintln!("Error: Database health check failed: {e}");
        std::process::exit(1);
    }

    if migrate && let Err(e) = db.run_migrations().await {
        tracing::error!(error = %e, "Database migrations failed");
        eprintln!("Error: Database migrations failed: {e}");
        std::process::exit(1);
    }

    db
}

fn build_runner(config: &SweeperConfig, db: &DbPool, dry_run: bool) -> RetentionRunner {
    let policies = match config.policies() {
        Ok(policies) => policies,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    RetentionRunner::new(db.retention(), policies).with_dry_run(dry_run)
}

async fn run_server(config_path: Option<&str>) {
    let config = load_config(config_path);
    init_tracing(&config);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics: {e}");
    }

    let db = connect(&config, config.database.run_migrations()).await;
    let runner = Arc::new(build_runner(&config, &db, config.retention.dry_run));

    let scheduler = RetentionScheduler::new(runner, config.retention.interval());
    if config.retention.enabled {
        scheduler.start();
    } else {
        tracing::info!("Retention scheduler disabled by configuration");
    }

    shutdown_signal().await;

    tracing::info!("Shutdown signal received, waiting for in-flight retention run...");
    scheduler.stop();
    match tokio::time::timeout(SHUTDOWN_GRACE, scheduler.wait_for_in_flight()).await {
        Ok(()) => tracing::info!("Retention scheduler shut down cleanly"),
        Err(_) => tracing::warn!("Timeout waiting for retention run; its transaction will roll back"),
    }

    db.close().await;
}

async fn run_once(config_path: Option<&str>, dry_run: bool) {
    let config = load_config(config_path);
    init_tracing(&config);

    let db = connect(&config, config.database.run_migrations()).await;
    let runner = build_runner(&config, &db, dry_run || config.retention.dry_run);

    let report = match runner.run_once().await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: Retention run failed: {e}");
            db.close().await;
            std::process::exit(1);
        }
    };
    db.close().await;

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: Failed to serialize report: {e}");
            std::process::exit(1);
        }
    }
}

fn run_policies(config_path: Option<&str>) {
    let config = load_config(config_path);

    let result = config
        .policies()
        .map_err(|e| e.to_string())
        .and_then(|policies| serde_json::to_string_pretty(&policies).map_err(|e| e.to_string()));

    match result {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_migrate(config_path: Option<&str>) {
    let config = load_config(config_path);
    init_tracing(&config);

    tracing::info!("Running database migrations");
    let db = connect(&config, true).await;
    tracing::info!("Database migrations completed successfully");
    db.close().await;
}

/// Export the configuration JSON schema to file or stdout
#[cfg(feature = "json-schema")]
fn run_schema_export(output: Option<String>) {
    let content = match serde_json::to_string_pretty(&SweeperConfig::json_schema()) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error: Failed to serialize schema: {e}");
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &content) {
                eprintln!("Error: Failed to write to {path}: {e}");
                std::process::exit(1);
            }
            eprintln!("Config JSON schema written to {path}");
        }
        None => println!("{content}"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
