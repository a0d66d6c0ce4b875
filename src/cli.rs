use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// TCP port-mapping service with a runtime control API.
#[derive(Debug, Parser)]
#[command(name = "portmapd", version)]
pub struct Cli {
    /// Authorization code every API request must send
    #[arg(long)]
    pub code: String,

    /// Port of the control API, bound on 127.0.0.1
    #[arg(short, long, default_value_t = 7655)]
    pub port: u16,

    /// File mappings are restored from and saved to, one
    /// `forward <listen> to <forward> [type tcp]` line per mapping. YAML
    /// mapping files are not read.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seconds to wait for a forward destination to accept a connection
    #[arg(long, default_value_t = 10, value_name = "SECS")]
    pub connect_timeout: u64,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}
