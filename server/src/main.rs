use std::path::PathBuf;

use clap::Parser;
use fsd_server::config::ServerConfig;
use fsd_server::context::Collaborators;
use fsd_server::network::FsdServer;
use log::{error, info};

/// Main-method of the application.
/// Loads the configuration, starts the server and runs until Ctrl-C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// TOML configuration file, written with defaults when missing
        #[clap(short, long, default_value = "fsd.toml")]
        config: PathBuf,
        /// Address to bind to, overrides the configuration
        #[clap(short = 'H', long)]
        host: Option<String>,
        /// Port to listen on, overrides the configuration
        #[clap(short, long)]
        port: Option<u16>,
        /// Log at debug level unless RUST_LOG says otherwise
        #[clap(short, long)]
        verbose: bool,
    }

    let args = Args::parse();

    if args.verbose && std::env::var_os("RUST_LOG").is_none() {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let mut config = ServerConfig::from_config_file(&args.config)?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    info!("Loaded configuration from {}", args.config.display());

    let collaborators = Collaborators::in_memory(&config);
    let server = FsdServer::start(config, collaborators).await?;
    info!("Accepting FSD clients on {}", server.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");

    if let Err(e) = server.shutdown().await {
        error!("Shutdown incomplete: {}", e);
        return Err(e.into());
    }
    Ok(())
}
