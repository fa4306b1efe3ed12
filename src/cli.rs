use std::{net::SocketAddr, path::PathBuf, sync::OnceLock};

use clap::Parser;

/// Single-node container orchestration with a REST control plane.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the config file. A missing file means built-in defaults.
    #[arg(short, long, default_value = "podium.toml")]
    pub config: PathBuf,
    /// Address for the API server, overriding `listen` in the config file.
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,
}

static ARGS: OnceLock<Args> = OnceLock::new();

pub fn get_cli_args() -> &'static Args {
    ARGS.get_or_init(Args::parse)
}
