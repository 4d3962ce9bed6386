//! CraftCloud CLI - Main Entry Point

use clap::{Parser, Subcommand};
use std::sync::Arc;

use craftcloud_cli::client::WebClient;
use craftcloud_cli::commands::{account, console, server};
use craftcloud_cli::output::{self, print_error};
use craftcloud_common::PowerAction;

/// CraftCloud CLI - Minecraft server hosting from the terminal
#[derive(Parser)]
#[command(name = "craftcloud")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// API address
    #[arg(long, env = "CRAFTCLOUD_URL", default_value = "http://127.0.0.1:8080", global = true)]
    url: String,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register {
        #[command(flatten)]
        creds: account::Credentials,

        /// Provision a 24 hour demo server
        #[arg(long)]
        demo: bool,
    },

    /// Sign in
    Login {
        #[command(flatten)]
        creds: account::Credentials,
    },

    /// Sign out
    Logout,

    /// Show the signed-in account
    Whoami,

    /// Show a server's state and resource usage
    Status {
        /// Server identifier
        id: String,
    },

    /// Send a power signal
    Power {
        /// Server identifier
        id: String,

        /// start, stop, restart or kill
        action: PowerAction,
    },

    /// Follow a server's state until Ctrl-C
    Watch {
        /// Server identifier
        id: String,
    },

    /// Attach to a server console
    Console {
        /// Server identifier
        id: String,
    },

    /// Re-accept the Minecraft EULA without starting the server
    Eula {
        /// Server identifier
        id: String,
    },

    /// Print the tail of the server log
    Logs {
        /// Server identifier
        id: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let client = WebClient::new(&cli.url)?;

    let result = match cli.command {
        Commands::Register { creds, demo } => {
            account::register(creds, demo, client, cli.format).await
        }
        Commands::Login { creds } => account::login(creds, client, cli.format).await,
        Commands::Logout => account::logout(client).await,
        Commands::Whoami => account::whoami(client, cli.format).await,
        Commands::Status { id } => server::status(id, Arc::new(client), cli.format).await,
        Commands::Power { id, action } => server::power(id, action, Arc::new(client)).await,
        Commands::Watch { id } => server::watch(id, Arc::new(client)).await,
        Commands::Console { id } => console::execute(id, Arc::new(client)).await,
        Commands::Eula { id } => server::eula(id, Arc::new(client)).await,
        Commands::Logs { id } => server::logs(id, Arc::new(client), cli.format).await,
        Commands::Version => {
            println!("CraftCloud CLI v{}", craftcloud_common::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        print_error(&e.to_string());
        std::process::exit(1);
    }
    Ok(())
}
