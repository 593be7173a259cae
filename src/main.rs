//! CLI for stompmux
//!
//! Subcommands:
//! - `listen`: subscribe to destinations and print every message as JSON
//! - `send`: send one message and exit

use clap::Parser;
use stompmux::{Session, load_config};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "stompmux")]
enum Command {
    /// Subscribe and print incoming messages until Ctrl-C
    Listen {
        /// Destination to subscribe to; repeat for several
        #[arg(long = "destination", short = 'd', required = true)]
        destinations: Vec<String>,
        /// Skip the WebSocket and go straight to SockJS
        #[arg(long)]
        fallback: bool,
    },
    /// Send a single message
    Send {
        #[arg(long, short = 'd')]
        destination: String,
        /// Message body, usually JSON
        #[arg(long, short = 'b')]
        body: String,
        #[arg(long)]
        fallback: bool,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            stompmux::utils::logging::init("info");
            error!("Failed to load configuration: {}", e);
            return;
        }
    };
    stompmux::utils::logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Listen {
            destinations,
            fallback,
        } => run_listen(&settings, &destinations, fallback).await,
        Command::Send {
            destination,
            body,
            fallback,
        } => run_send(&settings, &destination, &body, fallback).await,
    };

    if let Err(e) = result {
        error!("stompmux failed: {}", e);
    }
}

async fn run_listen(
    settings: &stompmux::Settings,
    destinations: &[String],
    fallback: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::start(settings);
    session.connect(fallback).await?;

    session.with_client(|client| {
        client.on_connected(|session, resumed| {
            if resumed {
                info!(kind = %session.kind, "reconnected, subscriptions restored");
            }
        });
        for destination in destinations {
            let name = destination.clone();
            client.subscribe(destination, move |payload| {
                println!("{name} {payload}");
            });
        }
    });
    info!(count = destinations.len(), "listening, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");
    session.shutdown().await;
    Ok(())
}

async fn run_send(
    settings: &stompmux::Settings,
    destination: &str,
    body: &str,
    fallback: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::start(settings);
    session.connect(fallback).await?;

    let sent = session.with_client(|client| client.send(destination, body));
    if !sent {
        return Err(format!("could not send to {destination}").into());
    }
    info!(destination, "message sent");

    session.shutdown().await;
    Ok(())
}
