mod gateway_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "tether", about = "Tether: control plane for simulation companions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Read and write config in this directory only.
    #[arg(long, global = true, env = "TETHER_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        /// Override `web.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Override `web.port`.
        #[arg(long)]
        port: Option<u16>,
        /// JSON file with the companion roster. A demo roster is used
        /// when omitted.
        #[arg(long)]
        companions: Option<PathBuf>,
        /// Start even if `web.enabled` is false.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Print an argon2 hash suitable for `web.password_hash`.
    HashPassword { password: String },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file path in use.
    Path,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = &cli.config_dir {
        tether_config::set_config_dir(dir.clone());
    }

    match cli.command {
        Commands::Gateway {
            bind,
            port,
            companions,
            force,
        } => {
            info!(version = env!("CARGO_PKG_VERSION"), "tether starting");
            gateway_commands::run_gateway(gateway_commands::GatewayOptions {
                bind,
                port,
                companions,
                force,
            })
            .await
        },
        Commands::HashPassword { password } => {
            println!("{}", tether_auth::hash_password(&password)?);
            Ok(())
        },
        Commands::Config {
            action: ConfigAction::Path,
        } => {
            println!("{}", tether_config::find_or_default_config_path().display());
            Ok(())
        },
    }
}
