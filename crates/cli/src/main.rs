//! nBTC redemption CLI.
//!
//! Command-line interface for signing Bitcoin redemptions with a dWallet.
//! Provides commands for:
//! - Full redemption (sign every input, broadcast)
//! - Split signing (request a signature, verify it later)
//! - Fetching the transaction composed by the ledger
//! - dWallet registration and presignature buffer upkeep

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod output;

use config::Config;
use output::OutputFormatter;

/// nBTC Redemption CLI
#[derive(Parser)]
#[command(name = "nbtc-redeem")]
#[command(author, version, about = "Sign and broadcast nBTC redemptions", long_about = None)]
struct Cli {
    /// Gateway endpoint (overrides config)
    #[arg(long, global = true)]
    gateway_url: Option<String>,

    /// dWallet id (overrides config)
    #[arg(long, global = true, value_name = "ID")]
    dwallet_id: Option<String>,

    /// Output format: table, json
    #[arg(long, global = true, value_name = "FORMAT")]
    output: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Enable JSON output (shorthand for --output json)
    #[arg(long, global = true)]
    json: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign every input of a redemption and broadcast it
    Redeem {
        /// Redemption request id
        redeem_id: u64,

        /// Request all presignatures before signing the first input
        #[arg(long)]
        prefetch: bool,
    },

    /// Request the network signature for one input
    RequestSignature {
        redeem_id: u64,
        input_index: usize,
    },

    /// Verify a requested signature and record it on the ledger
    VerifySign {
        redeem_id: u64,
        input_index: usize,
        /// Sign session id returned by request-signature
        sign_id: String,
    },

    /// Print the transaction composed by the ledger
    RawRedeemTx {
        redeem_id: u64,

        /// Print only, do not broadcast
        #[arg(long)]
        no_broadcast: bool,
    },

    /// Wait for a dWallet to activate and register it with the contract
    InitDwallet {
        /// dWallet id; the configured one when omitted
        dwallet_id: Option<String>,
    },

    /// Top up the contract's presignature buffer
    FillPresign,

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set gateway endpoint
    SetGateway {
        /// Gateway endpoint URL
        url: String,
    },

    /// Set the dWallet used for signing
    SetDwallet {
        /// dWallet object id
        dwallet_id: String,
    },

    /// Set output format
    SetFormat {
        /// Output format (table or json)
        format: String,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_json);

    // Load configuration
    let mut config = Config::load()?;

    // Override config with CLI arguments
    if let Some(url) = cli.gateway_url {
        config.gateway_url = url;
    }

    if let Some(id) = cli.dwallet_id {
        config.dwallet_id = id.parse()?;
    }

    if let Some(output) = cli.output {
        config.output_format = output;
    }

    if cli.no_color {
        config.colored = false;
    }

    if cli.json {
        config.output_format = "json".to_string();
    }

    // Create output formatter
    let json_mode = config.output_format == "json";
    let formatter = OutputFormatter::new(config.colored, json_mode);

    let result = match cli.command {
        Commands::Config(cmd) => handle_config_command(cmd, config, &formatter).await,
        command => run_command(command, &config, &formatter).await,
    };

    // Handle errors
    if let Err(e) = result {
        formatter.error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run_command(command: Commands, config: &Config, formatter: &OutputFormatter) -> Result<()> {
    let pipeline = commands::build_pipeline(config.to_redeem_config()?)?;

    match command {
        Commands::Redeem {
            redeem_id,
            prefetch,
        } => commands::redeem::redeem(pipeline, formatter, redeem_id, prefetch).await,
        Commands::RequestSignature {
            redeem_id,
            input_index,
        } => commands::sign::request_signature(&pipeline, formatter, redeem_id, input_index).await,
        Commands::VerifySign {
            redeem_id,
            input_index,
            sign_id,
        } => {
            commands::sign::verify_sign(&pipeline, formatter, redeem_id, input_index, sign_id).await
        }
        Commands::RawRedeemTx {
            redeem_id,
            no_broadcast,
        } => commands::redeem::raw_redeem_tx(&pipeline, formatter, redeem_id, !no_broadcast).await,
        Commands::InitDwallet { dwallet_id } => {
            commands::dwallet::init_dwallet(&pipeline, formatter, dwallet_id).await
        }
        Commands::FillPresign => commands::presign::fill_presign(&pipeline, formatter).await,
        Commands::Config(_) => unreachable!("config commands are handled before the pipeline is built"),
    }
}

async fn handle_config_command(
    cmd: ConfigCommands,
    mut config: Config,
    formatter: &OutputFormatter,
) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            if formatter.json_mode {
                formatter.json(&config)?;
            } else {
                formatter.header("Current Configuration");
                formatter.kv("Gateway", &config.gateway_url);
                formatter.kv(
                    "Esplora",
                    config
                        .esplora_url
                        .as_deref()
                        .unwrap_or_else(|| config.network.default_esplora_url()),
                );
                formatter.kv("Network", &config.network.to_string());
                formatter.kv("nBTC object", &config.nbtc_object_id.to_string());
                formatter.kv("dWallet", &config.dwallet_id.to_string());
                formatter.kv("Coordinator", &config.dwallet_coordinator_id.to_string());
                formatter.kv("Hash scheme", &config.hash_scheme.to_string());
                formatter.kv("Sign timeout", &format!("{}s", config.sign_timeout_secs));
                formatter.kv("Fallback fee", &formatter.format_sats(config.fee_sats));
                formatter.kv(
                    "Check ledger sighash",
                    &formatter.format_bool(config.verify_ledger_sighash),
                );
                formatter.kv(
                    "Check UTXOs unspent",
                    &formatter.format_bool(config.verify_utxos_unspent),
                );
                formatter.kv(
                    "Presign buffer",
                    &config.presign_buffer_target.to_string(),
                );
                formatter.kv("Output Format", &config.output_format);

                println!();
                let config_path = Config::config_path()?;
                formatter.info(&format!("Config file: {}", config_path.display()));
            }
            Ok(())
        }
        ConfigCommands::SetGateway { url } => {
            config.set_gateway_url(url.clone())?;
            formatter.success(&format!("Gateway set to: {}", url));
            Ok(())
        }
        ConfigCommands::SetDwallet { dwallet_id } => {
            config.set_dwallet_id(dwallet_id.parse()?)?;
            formatter.success(&format!("dWallet set to: {}", config.dwallet_id));
            Ok(())
        }
        ConfigCommands::SetFormat { format } => {
            config.set_output_format(format.clone())?;
            formatter.success(&format!("Output format set to: {}", format));
            Ok(())
        }
    }
}
