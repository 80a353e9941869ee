//! Server configuration from command line and environment

use anyhow::{ensure, Result};
use callcenter_shared::{routing, RouterConfig};
use clap::Parser;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "callcenter-server", about = "Routes calls to a fixed pool of operators")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "CALLCENTER_BIND", default_value_t = format!("0.0.0.0:{}", routing::DEFAULT_PORT))]
    pub bind: String,

    /// Operator ids, in assignment order
    #[arg(
        long,
        env = "CALLCENTER_OPERATORS",
        value_delimiter = ',',
        default_values_t = routing::DEFAULT_OPERATORS.map(String::from)
    )]
    pub operators: Vec<String>,

    /// How long an operator may ring before the call is ignored
    #[arg(long, env = "CALLCENTER_RING_TIMEOUT_MS", default_value_t = routing::RING_TIMEOUT_MS)]
    pub ring_timeout_ms: u64,
}

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub router: RouterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", routing::DEFAULT_PORT),
            router: RouterConfig::default(),
        }
    }
}

impl TryFrom<Args> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        ensure!(args.ring_timeout_ms > 0, "Ring timeout must be greater than zero");

        let operators = args
            .operators
            .iter()
            .map(|id| id.trim().to_string())
            .collect();

        Ok(Self {
            bind: args.bind,
            router: RouterConfig {
                operators,
                ring_timeout: Duration::from_millis(args.ring_timeout_ms),
            },
        })
    }
}
