use crate::errors::{Error, Result};
use crate::model::{
    encode_destination, NewRegistration, RegisterRequest, RegistrationFields, ResetFlagRequest,
    TelemetrySubmission, UpdateArtifact, UpdateRequest, UploadByMacRequest,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

const HTTP_STATUS_MIN: i32 = 0;
const HTTP_STATUS_MAX: i32 = 999;
const INTERVAL_MAX_MINUTES: i32 = 7 * 24 * 60;

/// Validates a telemetry submission before authentication
pub fn validate_submission(submission: &TelemetrySubmission) -> Result<()> {
    if submission.mac_address.trim().is_empty() {
        return Err(Error::Validation("mac_address is required".to_string()));
    }

    let website = &submission.website_performance;
    if website.url.trim().is_empty() {
        return Err(Error::Validation(
            "website_performance.url is required".to_string(),
        ));
    }
    if website.http_status < HTTP_STATUS_MIN || website.http_status > HTTP_STATUS_MAX {
        return Err(Error::Validation(format!(
            "http_status {} out of range [{}, {}]",
            website.http_status, HTTP_STATUS_MIN, HTTP_STATUS_MAX
        )));
    }
    non_negative("load_time", website.load_time)?;
    if website.content_length < 0 {
        return Err(Error::Validation(format!(
            "content_length {} cannot be negative",
            website.content_length
        )));
    }

    let network = &submission.network_performance;
    non_negative("download_speed_mbps", network.download_speed_mbps)?;
    non_negative("upload_speed_mbps", network.upload_speed_mbps)?;
    non_negative("ping_ms", network.ping_ms)?;

    Ok(())
}

fn non_negative(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::Validation(format!(
            "{} {} must be a non-negative number",
            field, value
        )));
    }
    Ok(())
}

fn interval(interval_minutes: Option<i32>) -> Result<Option<i32>> {
    match interval_minutes {
        Some(m) if !(0..=INTERVAL_MAX_MINUTES).contains(&m) => Err(Error::Validation(format!(
            "interval_minutes {} out of range [0, {}]",
            m, INTERVAL_MAX_MINUTES
        ))),
        other => Ok(other),
    }
}

/// Non-empty trimmed value of a required field
pub fn required(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn registration(request: &RegisterRequest) -> Result<NewRegistration> {
    let (Some(device_name), Some(mac_address)) = (
        required(request.device_name.as_deref()),
        required(request.mac_address.as_deref()),
    ) else {
        return Err(Error::Validation(
            "Both device_name and mac_address are required.".to_string(),
        ));
    };

    Ok(NewRegistration {
        device_name,
        mac_address,
        destination: encode_destination(request.destination.as_ref()),
        interval_minutes: interval(request.interval_minutes)?,
    })
}

pub fn update(request: &UpdateRequest) -> Result<RegistrationFields> {
    let (Some(device_name), Some(mac_address)) = (
        required(request.device_name.as_deref()),
        required(request.mac_address.as_deref()),
    ) else {
        return Err(Error::Validation(
            "Both device_name and mac_address are required.".to_string(),
        ));
    };

    Ok(RegistrationFields {
        device_name,
        mac_address,
        destination: encode_destination(request.destination.as_ref()),
        interval_minutes: interval(request.interval_minutes)?,
        update_script: i32::from(request.update_script),
    })
}

/// Splits an upload into row fields and the decoded bundle, if any. The
/// `update_script` flag is settled by the registry once the bundle is stored.
pub fn upload(request: &UploadByMacRequest) -> Result<(RegistrationFields, Option<UpdateArtifact>)> {
    let (Some(device_name), Some(mac_address)) = (
        required(request.device_name.as_deref()),
        required(request.mac_address.as_deref()),
    ) else {
        return Err(Error::Validation(
            "Both device_name and mac_address are required.".to_string(),
        ));
    };

    let artifact = match request.zip_binary.as_deref().filter(|b| !b.is_empty()) {
        Some(encoded) => {
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| Error::Validation(format!("zipBinary is not valid base64: {}", e)))?;
            Some(UpdateArtifact {
                name: required(request.zip_name.as_deref()),
                bytes,
            })
        }
        None => None,
    };

    let fields = RegistrationFields {
        device_name,
        mac_address,
        destination: encode_destination(request.destination.as_ref()),
        interval_minutes: interval(request.interval_minutes)?,
        update_script: 0,
    };

    Ok((fields, artifact))
}

pub fn reset_flag(request: &ResetFlagRequest) -> Result<(String, i32)> {
    let mac_address = required(request.mac_address.as_deref())
        .ok_or_else(|| Error::Validation("mac_address is required".to_string()))?;
    Ok((mac_address, request.update_script.unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission() -> TelemetrySubmission {
        serde_json::from_value(json!({
            "timestamp": "2024-03-01T12:30:05Z",
            "mac_address": "AA:BB:CC:DD:EE:FF",
            "authenticator_key": "k",
            "website_performance": {
                "url": "https://example.com",
                "http_status": 200,
                "load_time": 0.42,
                "content_length": 1256
            },
            "network_performance": {
                "download_speed_mbps": 94.1,
                "upload_speed_mbps": 11.3,
                "ping_ms": 18.0
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_submission() {
        assert!(validate_submission(&submission()).is_ok());
    }

    #[test]
    fn test_empty_mac_address() {
        let mut s = submission();
        s.mac_address = "  ".to_string();
        assert!(matches!(validate_submission(&s), Err(Error::Validation(_))));
    }

    #[test]
    fn test_invalid_http_status() {
        let mut s = submission();
        s.website_performance.http_status = 1200;
        assert!(validate_submission(&s).is_err());
    }

    #[test]
    fn test_negative_ping() {
        let mut s = submission();
        s.network_performance.ping_ms = -1.0;
        assert!(validate_submission(&s).is_err());
    }

    #[test]
    fn test_nan_speed() {
        let mut s = submission();
        s.network_performance.download_speed_mbps = f64::NAN;
        assert!(validate_submission(&s).is_err());
    }

    #[test]
    fn test_registration_requires_name_and_mac() {
        let request = RegisterRequest {
            device_name: Some("pi-1".to_string()),
            mac_address: None,
            destination: None,
            interval_minutes: None,
        };
        assert!(matches!(registration(&request), Err(Error::Validation(_))));

        let request = RegisterRequest {
            device_name: Some(" ".to_string()),
            mac_address: Some("AA:BB:CC:DD:EE:FF".to_string()),
            destination: None,
            interval_minutes: None,
        };
        assert!(registration(&request).is_err());
    }

    #[test]
    fn test_registration_trims_and_encodes() {
        let request = RegisterRequest {
            device_name: Some(" pi-1 ".to_string()),
            mac_address: Some("AA:BB:CC:DD:EE:FF".to_string()),
            destination: Some(json!(["https://example.com"])),
            interval_minutes: Some(10),
        };
        let new = registration(&request).unwrap();
        assert_eq!(new.device_name, "pi-1");
        assert_eq!(new.destination.as_deref(), Some(r#"["https://example.com"]"#));
        assert_eq!(new.interval_minutes, Some(10));
    }

    #[test]
    fn test_negative_interval() {
        let request = RegisterRequest {
            device_name: Some("pi-1".to_string()),
            mac_address: Some("AA:BB:CC:DD:EE:FF".to_string()),
            destination: None,
            interval_minutes: Some(-5),
        };
        assert!(registration(&request).is_err());
    }

    #[test]
    fn test_upload_decodes_base64() {
        let request: UploadByMacRequest = serde_json::from_value(json!({
            "device_name": "pi-1",
            "mac_address": "AA:BB:CC:DD:EE:FF",
            "zipBinary": "UEsDBA==",
            "zipName": "update.zip"
        }))
        .unwrap();
        let (fields, artifact) = upload(&request).unwrap();
        let artifact = artifact.unwrap();
        assert_eq!(fields.mac_address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(artifact.bytes, b"PK\x03\x04");
        assert_eq!(artifact.name.as_deref(), Some("update.zip"));
    }

    #[test]
    fn test_upload_rejects_bad_base64() {
        let request: UploadByMacRequest = serde_json::from_value(json!({
            "device_name": "pi-1",
            "mac_address": "AA:BB:CC:DD:EE:FF",
            "zipBinary": "not base64!!"
        }))
        .unwrap();
        assert!(matches!(upload(&request), Err(Error::Validation(_))));
    }

    #[test]
    fn test_upload_without_bundle() {
        let request: UploadByMacRequest = serde_json::from_value(json!({
            "device_name": "pi-1",
            "mac_address": "AA:BB:CC:DD:EE:FF"
        }))
        .unwrap();
        let (_, artifact) = upload(&request).unwrap();
        assert!(artifact.is_none());
    }

    #[test]
    fn test_reset_flag_defaults_to_zero() {
        let request = ResetFlagRequest {
            mac_address: Some("AA:BB:CC:DD:EE:FF".to_string()),
            update_script: None,
        };
        assert_eq!(
            reset_flag(&request).unwrap(),
            ("AA:BB:CC:DD:EE:FF".to_string(), 0)
        );

        let missing = ResetFlagRequest {
            mac_address: None,
            update_script: Some(0),
        };
        assert!(reset_flag(&missing).is_err());
    }
}
