use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub destinations: Vec<String>,
    pub interval_minutes: i32,
    pub authenticator_key: Option<String>,
    #[serde(default)]
    pub update_script: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub timestamp: String,
    pub mac_address: String,
    pub authenticator_key: String,
    pub website_performance: WebsitePerformance,
    pub network_performance: NetworkPerformance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_route: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebsitePerformance {
    pub url: String,
    pub http_status: i32,
    pub load_time: f64,
    pub content_length: i64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkPerformance {
    pub download_speed_mbps: f64,
    pub upload_speed_mbps: f64,
    pub ping_ms: f64,
}

pub fn generate_submission(
    rng: &mut impl Rng,
    mac_address: &str,
    authenticator_key: &str,
    url: &str,
) -> Submission {
    // 3% of probes fail outright
    let website_performance = if rng.gen_bool(0.03) {
        WebsitePerformance {
            url: url.to_string(),
            http_status: 0,
            load_time: 0.0,
            content_length: 0,
            error_message: Some("connection timed out".to_string()),
        }
    } else {
        WebsitePerformance {
            url: url.to_string(),
            http_status: if rng.gen_bool(0.05) { 503 } else { 200 },
            load_time: rng.gen_range(0.05..3.0),
            content_length: rng.gen_range(512..250_000),
            error_message: None,
        }
    };

    let ping_ms = if rng.gen_bool(0.05) {
        rng.gen_range(150.0..900.0)
    } else {
        rng.gen_range(4.0..60.0)
    };

    let hops = rng.gen_range(3..9);
    let trace_route = (1..=hops)
        .map(|hop| {
            format!(
                "{:>2}  10.{}.{}.1  {:.1} ms",
                hop,
                hop,
                rng.gen_range(0..255),
                ping_ms * hop as f64 / hops as f64
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Submission {
        timestamp: Utc::now().to_rfc3339(),
        mac_address: mac_address.to_string(),
        authenticator_key: authenticator_key.to_string(),
        website_performance,
        network_performance: NetworkPerformance {
            download_speed_mbps: rng.gen_range(5.0..900.0),
            upload_speed_mbps: rng.gen_range(1.0..100.0),
            ping_ms,
        },
        trace_route: Some(trace_route),
    }
}
