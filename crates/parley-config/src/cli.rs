//! Command-line argument parsing for the parley client.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Parley command-line arguments.
///
/// CLI values override settings loaded from `config.ron`. The username is
/// only ever taken from here and never written back.
#[derive(Parser, Debug, Default)]
#[command(name = "parley", about = "Terminal chat client")]
pub struct CliArgs {
    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Name to chat under.
    #[arg(long, short)]
    pub username: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
