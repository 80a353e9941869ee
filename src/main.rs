mod connection;
mod input;

use callcenter_shared::routing;
use clap::Parser;
use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager};
use input::{LineInput, PROMPT, USAGE};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "callcenter-client", about = "Interactive call center client")]
struct Args {
    /// Server address
    #[arg(long, env = "CALLCENTER_SERVER", default_value_t = format!("127.0.0.1:{}", routing::DEFAULT_PORT))]
    server: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; stdout is reserved for the interactive prompt
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = ConnectionConfig {
        server: args.server,
        ..Default::default()
    };

    info!("Call center client connecting to {}", config.server);
    let mut conn = ConnectionManager::new(config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    show(PROMPT)?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };

                match input::parse_line(&line) {
                    LineInput::Empty => show(PROMPT)?,
                    LineInput::Usage => show(&format!("{}\n{}", USAGE, PROMPT))?,
                    LineInput::Request(request) => conn.send(request).await?,
                }
            }

            event = conn.recv() => {
                match event {
                    Some(ConnectionEvent::Received(response)) => {
                        show(&format!("\r{}\n{}", response.response, PROMPT))?;
                    }
                    Some(ConnectionEvent::Connected { server }) => {
                        info!("Connected to {}", server);
                    }
                    Some(ConnectionEvent::Disconnected { reason }) => {
                        warn!("Disconnected: {}", reason);
                    }
                    Some(ConnectionEvent::ConnectionFailed { reason }) => {
                        error!("Connection failed: {}", reason);
                    }
                    None => {
                        error!("Connection manager closed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Write to the terminal without a trailing newline
fn show(text: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()
}
