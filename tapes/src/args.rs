use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Transparent recording proxy for LLM chat APIs.
#[derive(Debug, Parser)]
#[command(name = "tapes", version, about)]
pub struct Args {
    /// Path to the tapes.toml configuration file.
    #[arg(short, long, env = "TAPES_CONFIG", default_value = "tapes.toml")]
    pub config: PathBuf,

    /// Listen address, overriding the configuration file.
    #[arg(short, long, env = "TAPES_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Log filter string (e.g. "info" or "server=debug,dag=debug").
    #[arg(long, env = "TAPES_LOG", default_value = "info")]
    pub log: String,
}
