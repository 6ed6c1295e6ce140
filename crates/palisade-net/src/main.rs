//! Palisade node.
//!
//! Runs either end of a Palisade network from the command line:
//!
//! - `serve` accepts clients and logs membership and messages until Ctrl-C
//! - `connect` logs in, answers challenges from stdin, then broadcasts each
//!   stdin line as text

use std::{
    io::{self, BufRead, Write},
    net::SocketAddr,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use palisade_net::{
    ClientConfig, ClientMessenger, ConnectionListener, MessageListener, ServerConfig,
    ServerMessenger,
};
use palisade_proto::{NodeId, Payload, Properties};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "palisade-node")]
#[command(about = "Palisade messaging node", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept clients and route their messages
    Serve {
        /// Server node name
        #[arg(long, default_value = "Server")]
        name: String,

        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:3300")]
        bind: SocketAddr,

        /// Address to advertise instead of the bound one
        #[arg(long)]
        advertise: Option<SocketAddr>,
    },
    /// Log in to a server and chat over stdin
    Connect {
        /// Requested node name
        #[arg(long)]
        name: String,

        /// Hardware identifier sent during login
        #[arg(long, default_value = "00:00:00:00:00:00")]
        mac: String,

        /// Server address
        #[arg(long)]
        server: SocketAddr,
    },
}

/// Logs every event a messenger reports
struct Log;

impl MessageListener for Log {
    fn message_received(&self, payload: &Payload, from: &NodeId) {
        match payload {
            Payload::Text(text) => info!(%from, "{text}"),
            other => info!(%from, kind = ?other.tag(), "message"),
        }
    }
}

impl ConnectionListener for Log {
    fn connection_added(&self, node: &NodeId) {
        info!(%node, "joined");
    }

    fn connection_removed(&self, node: &NodeId) {
        info!(%node, "left");
    }
}

/// Answers each challenge key with a line typed on stdin. EOF abandons the
/// login.
fn prompt(challenge: &Properties) -> Option<Properties> {
    let stdin = io::stdin();
    let mut stderr = io::stderr().lock();
    let mut response = Properties::new();

    for (key, hint) in challenge {
        write!(stderr, "{key} ({hint}): ").ok()?;
        stderr.flush().ok()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).ok()? == 0 {
            return None;
        }
        response.insert(key.clone(), line.trim_end().to_string());
    }
    Some(response)
}

async fn serve(
    name: String,
    bind: SocketAddr,
    advertise: Option<SocketAddr>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ServerConfig::new(name, bind);
    if let Some(address) = advertise {
        config = config.advertise(address);
    }

    let server = ServerMessenger::bind(config).await?;
    let log = Arc::new(Log);
    server.add_message_listener(log.clone());
    server.add_connection_listener(log);

    tokio::signal::ctrl_c().await?;
    info!(nodes = server.nodes().len(), "shutting down");
    server.shutdown();
    Ok(())
}

async fn connect(
    name: String,
    mac: String,
    server: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = ClientMessenger::builder(ClientConfig::new(name, mac, server))
        .credentials(Arc::new(prompt))
        .connect()
        .await?;
    let log = Arc::new(Log);
    client.add_message_listener(log.clone());
    client.add_connection_listener(log);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if !line.is_empty() => client.broadcast(Payload::text(line))?,
                Some(_) => {},
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
        if !client.is_connected() {
            break;
        }
    }

    client.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let result = match args.command {
        Command::Serve { name, bind, advertise } => serve(name, bind, advertise).await,
        Command::Connect { name, mac, server } => connect(name, mac, server).await,
    };

    if let Err(err) = result {
        error!(%err, "palisade-node failed");
        std::process::exit(1);
    }
}
