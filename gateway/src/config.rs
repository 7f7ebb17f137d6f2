use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Public-facing relay in front of the internal canary API.
#[derive(Debug, Clone, Parser)]
#[command(name = "canary-gateway", version)]
pub struct Config {
    #[arg(long, env = "GATEWAY_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: String,

    #[arg(long, env = "INTERNAL_SERVICE_URL", default_value = "http://localhost:5000")]
    pub upstream_url: String,

    /// Bundle served at `/getCanaryScript`
    #[arg(long, env = "CANARY_SCRIPT_PATH", default_value = "public/RaspberryCode.zip")]
    pub script_path: PathBuf,

    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 10)]
    pub upstream_timeout_secs: u64,
}

impl Config {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}
