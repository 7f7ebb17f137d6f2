use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const DEFAULT_INTERVAL_MINUTES: i32 = 5;

/// Approval lifecycle of a registration. `Approved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "approval_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
}

/// Registered device row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeviceRegistration {
    pub id: Uuid,
    pub device_name: String,
    pub mac_address: String,
    pub destination: Option<String>,
    pub interval_minutes: Option<i32>,
    pub approval_status: ApprovalStatus,
    pub authenticator_key: Option<String>,
    pub update_script: i32,
}

/// Fields written on insert
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub device_name: String,
    pub mac_address: String,
    pub destination: Option<String>,
    pub interval_minutes: Option<i32>,
}

/// Mutable fields overwritten by an admin update
#[derive(Debug, Clone)]
pub struct RegistrationFields {
    pub device_name: String,
    pub mac_address: String,
    pub destination: Option<String>,
    pub interval_minutes: Option<i32>,
    pub update_script: i32,
}

/// Stored telemetry row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TelemetryRecord {
    pub id: i64,
    #[serde(rename = "deviceName")]
    pub device_name: Option<String>,
    pub mac_address: String,
    pub url: String,
    pub http_status: i32,
    pub load_time: f64,
    pub content_length: i64,
    pub download_speed_mbps: f64,
    pub upload_speed_mbps: f64,
    pub ping_ms: f64,
    pub error_message: Option<String>,
    pub traceroute_hops: Option<String>,
    #[sqlx(rename = "ts")]
    #[serde(serialize_with = "timestamp::serialize")]
    pub timestamp: DateTime<Utc>,
}

/// Telemetry row ready for insertion; the device name is resolved by the store.
#[derive(Debug, Clone)]
pub struct NewTelemetry {
    pub timestamp: DateTime<Utc>,
    pub mac_address: String,
    pub url: String,
    pub http_status: i32,
    pub load_time: f64,
    pub content_length: i64,
    pub download_speed_mbps: f64,
    pub upload_speed_mbps: f64,
    pub ping_ms: f64,
    pub error_message: Option<String>,
    pub traceroute_hops: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebsitePerformance {
    pub url: String,
    pub http_status: i32,
    pub load_time: f64,
    pub content_length: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkPerformance {
    pub download_speed_mbps: f64,
    pub upload_speed_mbps: f64,
    pub ping_ms: f64,
}

/// Body of `POST /api/canaryPerformanceFromPi`
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySubmission {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    pub mac_address: String,
    #[serde(default)]
    pub authenticator_key: Option<String>,
    pub website_performance: WebsitePerformance,
    pub network_performance: NetworkPerformance,
    #[serde(default)]
    pub trace_route: Option<Value>,
}

impl TelemetrySubmission {
    pub fn into_record(self) -> NewTelemetry {
        NewTelemetry {
            timestamp: self.timestamp,
            mac_address: self.mac_address,
            url: self.website_performance.url,
            http_status: self.website_performance.http_status,
            load_time: self.website_performance.load_time,
            content_length: self.website_performance.content_length,
            download_speed_mbps: self.network_performance.download_speed_mbps,
            upload_speed_mbps: self.network_performance.upload_speed_mbps,
            ping_ms: self.network_performance.ping_ms,
            error_message: self
                .website_performance
                .error_message
                .filter(|m| !m.is_empty()),
            traceroute_hops: self.trace_route.as_ref().and_then(value_as_text),
        }
    }
}

/// Body of `POST /api/registerCanary`
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub destination: Option<Value>,
    #[serde(default)]
    pub interval_minutes: Option<i32>,
}

/// Body of `PUT /api/canaryRegister/:id`
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub destination: Option<Value>,
    #[serde(default)]
    pub interval_minutes: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub update_script: bool,
}

/// Body of `POST /api/canaryRegister/uploadByMac`
#[derive(Debug, Clone, Deserialize)]
pub struct UploadByMacRequest {
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub destination: Option<Value>,
    #[serde(default)]
    pub interval_minutes: Option<i32>,
    /// Base64-encoded update bundle
    #[serde(default, rename = "zipBinary")]
    pub zip_binary: Option<String>,
    #[serde(default, rename = "zipName")]
    pub zip_name: Option<String>,
}

/// Body of `POST /api/canaryConfig/resetFlag`
#[derive(Debug, Clone, Deserialize)]
pub struct ResetFlagRequest {
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag_value")]
    pub update_script: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigQuery {
    pub mac_address: Option<String>,
}

/// Decoded update bundle attached to an upload
#[derive(Debug, Clone)]
pub struct UpdateArtifact {
    pub name: Option<String>,
    pub bytes: Vec<u8>,
}

/// Configuration handed to a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub destinations: Vec<String>,
    pub interval_minutes: i32,
    pub authenticator_key: Option<String>,
    pub update_script: i32,
}

/// Serialized form of the destination column. Strings are assumed to already
/// hold JSON text and are stored verbatim.
pub fn encode_destination(destination: Option<&Value>) -> Option<String> {
    destination.and_then(value_as_text)
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Accepts `true`/`false`, numbers and strings; anything non-zero is set.
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !matches!(s.trim(), "" | "0" | "false"),
        Some(_) => true,
    })
}

/// Like `deserialize_flag`, but numbers and numeric strings keep their value.
fn deserialize_flag_value<'de, D>(deserializer: D) -> std::result::Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(i32::from(b)),
        Some(Value::Number(n)) => Some(
            n.as_i64()
                .map(|n| n.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
                .unwrap_or_else(|| i32::from(n.as_f64().is_some_and(|n| n != 0.0))),
        ),
        Some(Value::String(s)) => match s.trim() {
            "" | "false" => Some(0),
            "true" => Some(1),
            other => Some(other.parse().unwrap_or(1)),
        },
        Some(_) => Some(1),
    })
}

/// Wire format for telemetry timestamps.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    /// RFC 3339, or a naive date-time taken as UTC.
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }
}
