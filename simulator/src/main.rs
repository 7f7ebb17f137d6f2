mod telemetry;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::Rng;
use reqwest::StatusCode;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use telemetry::DeviceConfig;
use tracing::{error, info, warn};

/// Synthetic canary device that talks to the public gateway.
#[derive(Debug, Parser)]
#[command(name = "canary-simulator", version)]
struct Args {
    #[arg(long, env = "GATEWAY_URL", default_value = "http://localhost:3000")]
    gateway_url: String,

    /// Random locally administered address when unset
    #[arg(long, env = "MAC_ADDRESS")]
    mac_address: Option<String>,

    /// Probed when the device has no destinations configured
    #[arg(long, env = "PROBE_URL", default_value = "https://example.com")]
    probe_url: String,

    /// Where a downloaded update bundle is written
    #[arg(long, env = "SCRIPT_OUT", default_value = "RaspberryCode.zip")]
    script_out: PathBuf,

    /// Run a single poll/submit cycle and exit
    #[arg(long, env = "ONCE")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt::init();

    let gateway = args.gateway_url.trim_end_matches('/').to_string();
    let mac = args.mac_address.clone().unwrap_or_else(random_mac);

    info!("Starting canary simulator");
    info!("Gateway: {}, MAC: {}", gateway, mac);

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let mut sent = 0u64;
    loop {
        let interval = match run_cycle(&client, &gateway, &mac, &args, &mut sent).await {
            Ok(minutes) => minutes,
            Err(e) => {
                warn!("Cycle failed (MAC: {}): {:#}", mac, e);
                1
            }
        };

        if args.once {
            break;
        }

        info!("Sleeping {} minute(s), {} submissions so far", interval, sent);
        tokio::time::sleep(Duration::from_secs(interval * 60)).await;
    }

    info!("Simulator finished after {} submissions", sent);
}

/// One poll/submit/update round. Returns the minutes to wait before the next.
async fn run_cycle(
    client: &reqwest::Client,
    gateway: &str,
    mac: &str,
    args: &Args,
    sent: &mut u64,
) -> Result<u64> {
    let response = client
        .get(format!("{}/canaryConfig", gateway))
        .query(&[("mac_address", mac)])
        .send()
        .await
        .context("config request failed")?;

    match response.status() {
        StatusCode::OK => {}
        StatusCode::NOT_FOUND => {
            warn!("Device {} is not registered, waiting for an administrator", mac);
            return Ok(1);
        }
        status => bail!("unexpected config status {}", status),
    }

    let config: DeviceConfig = response.json().await.context("invalid config body")?;
    let interval = config.interval_minutes.max(1) as u64;

    let Some(key) = config.authenticator_key.as_deref() else {
        info!("Device {} awaiting approval", mac);
        return Ok(interval);
    };

    let destinations = if config.destinations.is_empty() {
        vec![args.probe_url.clone()]
    } else {
        config.destinations.clone()
    };

    for url in &destinations {
        let submission = telemetry::generate_submission(&mut rand::thread_rng(), mac, key, url);
        let response = client
            .post(format!("{}/canaryPerformanceFromPi", gateway))
            .json(&submission)
            .send()
            .await
            .context("telemetry submission failed")?;

        match response.status() {
            StatusCode::OK => *sent += 1,
            StatusCode::UNAUTHORIZED => {
                warn!("Telemetry rejected for {}: key no longer valid", mac);
                return Ok(interval);
            }
            status => warn!("Telemetry for {} returned {}", url, status),
        }
    }

    if config.update_script != 0 {
        apply_update(client, gateway, mac, &args.script_out).await?;
    }

    Ok(interval)
}

async fn apply_update(
    client: &reqwest::Client,
    gateway: &str,
    mac: &str,
    script_out: &Path,
) -> Result<()> {
    info!("Update pending for {}, downloading script", mac);

    let response = client
        .get(format!("{}/getCanaryScript", gateway))
        .send()
        .await
        .context("script download failed")?;
    if !response.status().is_success() {
        bail!("script download returned {}", response.status());
    }
    let bundle = response.bytes().await?;
    tokio::fs::write(script_out, &bundle)
        .await
        .with_context(|| format!("writing {}", script_out.display()))?;
    info!("Saved {} bytes to {}", bundle.len(), script_out.display());

    let response = client
        .post(format!("{}/canaryConfig/resetFlag", gateway))
        .json(&json!({ "mac_address": mac, "update_script": 0 }))
        .send()
        .await
        .context("resetFlag request failed")?;
    if !response.status().is_success() {
        bail!("resetFlag returned {}", response.status());
    }
    info!("Acknowledged update for {}", mac);
    Ok(())
}

fn random_mac() -> String {
    let mut bytes: [u8; 6] = rand::thread_rng().gen();
    bytes[0] = (bytes[0] | 0x02) & 0xFE;
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}
