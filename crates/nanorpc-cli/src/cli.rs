use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use nanorpc_client::NanoRpcResponse;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "info";

/// `RUST_LOG` when it is set and parses, otherwise [`DEFAULT_LOG_FILTER`].
pub fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Talk to a NanoRPC device from the shell.
#[derive(Debug, Parser)]
#[command(name = "nanorpc", version, about)]
pub struct Cli {
    /// Server address: host:port, [v6]:port, unix:/path or a socket path.
    #[arg(long, env = "NANORPC_REMOTE", default_value = "127.0.0.1:7000")]
    pub remote: String,

    /// Send paths as FNV-1a hashes instead of strings.
    #[arg(long)]
    pub hash: bool,

    /// Seconds to wait for the connection and for each answer.
    #[arg(long, default_value_t = 5)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send a PING and report the round-trip time.
    Ping,
    /// Send one REQUEST and print the response.
    Request {
        path: String,
        /// Hex-encoded request payload.
        #[arg(long)]
        data: Option<HexData>,
    },
    /// SUBSCRIBE and print every update until Ctrl-C.
    Subscribe {
        path: String,
        /// Hex-encoded subscription payload.
        #[arg(long)]
        data: Option<HexData>,
    },
}

/// Raw payload bytes given on the command line as hex, `0x` prefix optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexData(pub Vec<u8>);

impl FromStr for HexData {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s.trim_start_matches("0x"))
            .map(HexData)
            .map_err(|e| format!("invalid hex: {e}"))
    }
}

// ── Output ───────────────────────────────────────────────────────────

/// One printed response.
#[derive(Debug, Serialize)]
pub struct ResponseLine {
    pub request_id: i32,
    #[serde(rename = "type")]
    pub response_type: &'static str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub data: String,
}

impl From<&NanoRpcResponse> for ResponseLine {
    fn from(resp: &NanoRpcResponse) -> Self {
        Self {
            request_id: resp.request_id,
            response_type: resp.response_type().as_str(),
            status: resp.response_status().as_str(),
            message: resp.response_msg.clone(),
            data: hex::encode(&resp.data),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PongLine {
    pub pong: bool,
    pub rtt_ms: u64,
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
