//! # CLI Interface
//!
//! Defines the command-line argument structure for `keyseal-node` using
//! `clap` derive. Two subcommands: `run` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use keyseal_protocol::config::{DEFAULT_API_PORT, DEFAULT_METRICS_PORT};

/// keyseal secret store server.
///
/// Holds envelope-encrypted secrets behind a master key that is split into
/// Shamir shares. Starts sealed; operators unseal it over the HTTP API.
#[derive(Parser, Debug)]
#[command(
    name = "keyseal-node",
    about = "keyseal secret store server",
    version,
    propagate_version = true
)]
pub struct KeysealCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the settings and secrets database.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "KEYSEAL_DATA_DIR", default_value = "./keyseal-data")]
    pub data_dir: PathBuf,

    /// Address both listeners bind to.
    #[arg(long, env = "KEYSEAL_BIND", default_value = "127.0.0.1")]
    pub bind: String,

    /// Port for the HTTP API.
    #[arg(long, env = "KEYSEAL_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "KEYSEAL_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "KEYSEAL_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(
        long,
        env = "KEYSEAL_LOG_LEVEL",
        default_value = "keyseal_node=info,keyseal_protocol=info,tower_http=info"
    )]
    pub log_level: String,
}
