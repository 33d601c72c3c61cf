use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

use ledger_gateway::{ConnectorConfig, GatewayRegistry, GatewaySession};

/// Get default config file path
fn get_default_config_path() -> PathBuf {
    PathBuf::from("ledger-gateway.toml")
}

/// Discover config file with priority order
fn discover_config(cli_path: Option<PathBuf>) -> PathBuf {
    // Priority 1: CLI specified path
    if let Some(path) = cli_path {
        warn!("Using custom config path: {}", path.display());
        return path;
    }

    // Priority 2: ./ledger-gateway.toml
    get_default_config_path()
}

#[derive(Parser)]
#[command(name = "ledger-gateway")]
#[command(about = "Role-based client for Hyperledger Fabric gateway peers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample configuration with farmer and lab gateways
    SampleConfig {
        /// Output file
        #[arg(short, long, default_value = "ledger-gateway.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Connect every configured role and report which are available
    Check,

    /// Submit a transaction and wait for it to commit
    Submit {
        /// Role whose gateway submits the transaction
        #[arg(short, long)]
        role: String,

        /// Contract operation name
        operation: String,

        /// Operation arguments
        args: Vec<String>,
    },

    /// Evaluate a read-only query
    Evaluate {
        /// Role whose gateway evaluates the query
        #[arg(short, long)]
        role: String,

        /// Contract operation name
        operation: String,

        /// Operation arguments
        args: Vec<String>,
    },

    /// Show the commit status of a submitted transaction
    CommitStatus {
        /// Role whose gateway is queried
        #[arg(short, long)]
        role: String,

        /// Transaction id
        transaction_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match cli.command {
        Commands::SampleConfig { output, force } => {
            write_sample_config(&output, force)?;
        }

        Commands::Check => {
            let config = load_config(cli.config)?;
            check_gateways(&config).await?;
        }

        Commands::Submit {
            role,
            operation,
            args,
        } => {
            let config = load_config(cli.config)?;
            let session = connect_role(&config, &role).await?;
            let outcome = session.submit(&operation, &as_strs(&args)).await;
            close_session(&session).await;

            match outcome {
                Ok(payload) => print_result(payload),
                Err(e) => {
                    if e.is_outcome_unknown() {
                        warn!(
                            "The transaction may still commit; \
                             check its status before resubmitting"
                        );
                    }
                    return Err(e.into());
                }
            }
        }

        Commands::Evaluate {
            role,
            operation,
            args,
        } => {
            let config = load_config(cli.config)?;
            let session = connect_role(&config, &role).await?;
            let outcome = session.evaluate(&operation, &as_strs(&args)).await;
            close_session(&session).await;
            print_result(outcome?);
        }

        Commands::CommitStatus {
            role,
            transaction_id,
        } => {
            let config = load_config(cli.config)?;
            let session = connect_role(&config, &role).await?;
            let outcome = session.commit_status(&transaction_id).await;
            close_session(&session).await;

            let status = outcome?;
            println!(
                "{}: {} in block {}",
                transaction_id, status.code, status.block_number
            );
        }
    }

    Ok(())
}

fn load_config(cli_path: Option<PathBuf>) -> Result<ConnectorConfig> {
    let config_path = discover_config(cli_path);
    let config = ConnectorConfig::from_file(&config_path).with_context(|| {
        format!(
            "Failed to load config {}. Run 'ledger-gateway sample-config' first",
            config_path.display()
        )
    })?;
    config.validate()?;
    Ok(config)
}

fn write_sample_config(output: &PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite",
            output.display()
        );
    }

    ConnectorConfig::default().to_file(output)?;
    info!("Sample configuration written to {}", output.display());
    Ok(())
}

async fn check_gateways(config: &ConnectorConfig) -> Result<()> {
    let registry = GatewayRegistry::new();
    let failures = registry.connect_all(config).await;

    for role in registry.roles()? {
        println!("{:<16} available", role);
    }
    for (role, e) in &failures {
        println!("{:<16} unavailable: {}", role, e.root_cause());
    }

    if let Err(e) = registry.close_all().await {
        error!("Shutdown incomplete: {}", e);
    }

    if !failures.is_empty() {
        anyhow::bail!("{} of {} gateway(s) unavailable", failures.len(), config.gateways.len());
    }
    Ok(())
}

async fn connect_role(config: &ConnectorConfig, role: &str) -> Result<GatewaySession> {
    let gateway = config
        .gateway(role)
        .with_context(|| format!("No gateway configured for role '{}'", role))?;

    let session = GatewaySession::connect(gateway)
        .await
        .with_context(|| format!("Gateway for role '{}' is unavailable", role))?;
    Ok(session)
}

async fn close_session(session: &GatewaySession) {
    if let Err(e) = session.close().await {
        warn!("Failed to close gateway session: {}", e);
    }
}

fn as_strs(args: &[String]) -> Vec<&str> {
    args.iter().map(String::as_str).collect()
}

fn print_result(payload: Vec<u8>) {
    match String::from_utf8(payload) {
        Ok(text) => println!("{}", text),
        Err(e) => println!("{}", hex::encode(e.into_bytes())),
    }
}
