use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;
use wirestream::{ConnectOptions, Message};

mod echo;

#[derive(Parser)]
#[command(name = "wirestream", author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a WebSocket endpoint, sending stdin lines and printing what comes back
    Connect {
        /// Endpoint URL (e.g., "ws://127.0.0.1:9001")
        url: String,
        /// Sub-protocol to request; repeat for several
        #[arg(long = "protocol")]
        protocols: Vec<String>,
    },
    /// Run a WebSocket echo server
    Echo {
        /// Address to listen on (e.g., ":9001" or "127.0.0.1:9001")
        #[arg(long, default_value = "127.0.0.1:9001")]
        listen: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Connect { url, protocols } => run_connect(&url, protocols).await,
        Commands::Echo { listen } => run_echo(&listen).await,
    }
}

async fn run_connect(url: &str, protocols: Vec<String>) -> Result<()> {
    let options = ConnectOptions::default().with_protocols(protocols);
    let mut connections = wirestream::connect(url, options);

    let capability = tokio::select! {
        item = connections.next() => match item {
            Some(capability) => capability.with_context(|| format!("Failed to connect to {}", url))?,
            None => return Ok(()),
        },
        _ = signal::ctrl_c() => {
            info!("Cancelled before the connection opened");
            return Ok(());
        }
    };
    info!("Connected to {}", url);

    let mut messages = capability.bind(stdin_lines())?;
    loop {
        tokio::select! {
            message = messages.next() => match message {
                Some(Ok(Message::Text(text))) => println!("{}", text),
                Some(Ok(Message::Binary(data))) => println!("<{} bytes>", data.len()),
                Some(Err(e)) => {
                    return Err(e).with_context(|| format!("Connection to {} failed", url));
                }
                None => break,
            },
            _ = signal::ctrl_c() => {
                info!("Closing connection...");
                break;
            }
        }
    }

    drop(connections);
    Ok(())
}

/// Each stdin line becomes one text message.
fn stdin_lines() -> impl Stream<Item = Message> + Send + 'static {
    let lines = BufReader::new(tokio::io::stdin()).lines();
    stream::unfold(lines, |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((Message::Text(line), lines)),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                None
            }
        }
    })
}

async fn run_echo(listen: &str) -> Result<()> {
    let addr = if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    };

    let server = echo::EchoServer::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Echo server listening on {}", server.local_addr()?);

    tokio::select! {
        result = server.run() => result.context("Echo server stopped")?,
        _ = signal::ctrl_c() => info!("Shutting down..."),
    }

    Ok(())
}
