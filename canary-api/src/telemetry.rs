use crate::errors::{Error, Result};
use crate::metrics::{
    AUTH_FAILURES_TOTAL, INGEST_LATENCY_SECONDS, TELEMETRY_INGESTED_TOTAL, TELEMETRY_RECEIVED_TOTAL,
};
use crate::model::{TelemetryRecord, TelemetrySubmission};
use crate::registry::DeviceRegistry;
use crate::store::TelemetryStore;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Authenticated ingestion and history queries over stored telemetry.
#[derive(Clone)]
pub struct TelemetryService {
    store: Arc<dyn TelemetryStore>,
    registry: DeviceRegistry,
}

impl TelemetryService {
    pub fn new(store: Arc<dyn TelemetryStore>, registry: DeviceRegistry) -> Self {
        Self { store, registry }
    }

    /// Stores one submission from an authenticated device.
    pub async fn ingest(&self, submission: TelemetrySubmission) -> Result<i64> {
        TELEMETRY_RECEIVED_TOTAL.inc();
        let start = Instant::now();
        let mac_address = submission.mac_address.clone();

        match self
            .registry
            .authenticate(&mac_address, submission.authenticator_key.as_deref())
            .await
        {
            Ok(_) => {}
            Err(Error::Unauthorized) => {
                AUTH_FAILURES_TOTAL.inc();
                warn!("Rejected telemetry from {}: bad credentials", mac_address);
                return Err(Error::Unauthorized);
            }
            Err(e) => {
                error!("Authentication lookup failed for {}: {}", mac_address, e);
                return Err(e);
            }
        }

        let record = submission.into_record();
        let id = self.store.insert_telemetry(&record).await.map_err(|e| {
            error!("Failed to store telemetry for {}: {}", mac_address, e);
            e
        })?;

        TELEMETRY_INGESTED_TOTAL.inc();
        INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        debug!("Stored telemetry {} for {}", id, mac_address);
        Ok(id)
    }

    pub async fn latest_per_device(&self) -> Result<Vec<TelemetryRecord>> {
        let rows = self.store.latest_per_device().await?;
        debug!("Latest telemetry for {} devices", rows.len());
        Ok(rows)
    }

    pub async fn all_by_mac(&self, mac_address: &str) -> Result<Vec<TelemetryRecord>> {
        let rows = self.store.all_by_mac(mac_address).await?;
        debug!("Found {} telemetry records for {}", rows.len(), mac_address);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::memory::MemoryStore;
    use crate::model::{NetworkPerformance, NewRegistration, RegistrationFields, WebsitePerformance};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::HashMap;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    fn services() -> (DeviceRegistry, TelemetryService) {
        let store = Arc::new(MemoryStore::new());
        let registry = DeviceRegistry::new(store.clone(), ArtifactStore::new(std::env::temp_dir()));
        let telemetry = TelemetryService::new(store, registry.clone());
        (registry, telemetry)
    }

    fn submission(mac: &str, key: &str, timestamp: DateTime<Utc>) -> TelemetrySubmission {
        TelemetrySubmission {
            timestamp,
            mac_address: mac.to_string(),
            authenticator_key: Some(key.to_string()),
            website_performance: WebsitePerformance {
                url: "https://example.com".to_string(),
                http_status: 200,
                load_time: 0.5,
                content_length: 2048,
                error_message: None,
            },
            network_performance: NetworkPerformance {
                download_speed_mbps: 90.0,
                upload_speed_mbps: 10.0,
                ping_ms: 20.0,
            },
            trace_route: None,
        }
    }

    async fn approved(registry: &DeviceRegistry, name: &str, mac: &str) -> String {
        let id = registry
            .register(NewRegistration {
                device_name: name.to_string(),
                mac_address: mac.to_string(),
                destination: None,
                interval_minutes: None,
            })
            .await
            .unwrap();
        registry.approve(id).await.unwrap()
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn test_ingest_requires_credentials() {
        tokio_test::block_on(async {
            let (registry, telemetry) = services();
            let key = approved(&registry, "pi-1", MAC).await;

            assert!(telemetry.ingest(submission(MAC, &key, at(0))).await.is_ok());
            assert!(matches!(
                telemetry.ingest(submission(MAC, "wrong", at(1))).await,
                Err(Error::Unauthorized)
            ));
            assert!(matches!(
                telemetry
                    .ingest(submission("00:00:00:00:00:00", &key, at(2)))
                    .await,
                Err(Error::Unauthorized)
            ));

            assert_eq!(telemetry.all_by_mac(MAC).await.unwrap().len(), 1);
        });
    }

    #[test]
    fn test_device_name_is_snapshotted() {
        tokio_test::block_on(async {
            let (registry, telemetry) = services();
            let key = approved(&registry, "pi-1", MAC).await;
            telemetry.ingest(submission(MAC, &key, at(0))).await.unwrap();

            let id = registry.find_by_mac(MAC).await.unwrap().unwrap().id;
            registry
                .update(
                    id,
                    RegistrationFields {
                        device_name: "pi-renamed".to_string(),
                        mac_address: MAC.to_string(),
                        destination: None,
                        interval_minutes: None,
                        update_script: 0,
                    },
                )
                .await
                .unwrap();
            telemetry.ingest(submission(MAC, &key, at(1))).await.unwrap();

            let rows = telemetry.all_by_mac(MAC).await.unwrap();
            let names: Vec<_> = rows.iter().map(|r| r.device_name.as_deref()).collect();
            assert_eq!(names, vec![Some("pi-renamed"), Some("pi-1")]);
        });
    }

    #[test]
    fn test_latest_per_device() {
        tokio_test::block_on(async {
            let (registry, telemetry) = services();
            let macs = ["AA:00:00:00:00:01", "AA:00:00:00:00:02", "AA:00:00:00:00:03"];
            let mut keys = HashMap::new();
            for (i, mac) in macs.iter().enumerate() {
                keys.insert(*mac, approved(&registry, &format!("pi-{}", i), mac).await);
            }

            // Out-of-order arrivals per device.
            for (mac, minute) in [
                (macs[0], 5),
                (macs[1], 9),
                (macs[0], 30),
                (macs[2], 1),
                (macs[0], 10),
                (macs[1], 2),
            ] {
                telemetry
                    .ingest(submission(mac, &keys[mac], at(minute)))
                    .await
                    .unwrap();
            }

            let latest = telemetry.latest_per_device().await.unwrap();
            assert_eq!(latest.len(), 3);
            let summary: Vec<_> = latest
                .iter()
                .map(|r| (r.mac_address.as_str(), r.timestamp))
                .collect();
            assert_eq!(
                summary,
                vec![(macs[0], at(30)), (macs[1], at(9)), (macs[2], at(1))]
            );

            for row in &latest {
                let history = telemetry.all_by_mac(&row.mac_address).await.unwrap();
                assert!(history.iter().all(|h| h.timestamp <= row.timestamp));
            }
        });
    }

    #[test]
    fn test_latest_tie_breaks_on_highest_id() {
        tokio_test::block_on(async {
            let (registry, telemetry) = services();
            let key = approved(&registry, "pi-1", MAC).await;
            let first = telemetry.ingest(submission(MAC, &key, at(0))).await.unwrap();
            let second = telemetry.ingest(submission(MAC, &key, at(0))).await.unwrap();
            assert!(second > first);

            let latest = telemetry.latest_per_device().await.unwrap();
            assert_eq!(latest.len(), 1);
            assert_eq!(latest[0].id, second);
        });
    }

    #[test]
    fn test_all_by_mac_ordering_and_empty() {
        tokio_test::block_on(async {
            let (registry, telemetry) = services();
            let key = approved(&registry, "pi-1", MAC).await;
            let base = at(0);
            for offset in [3, 1, 2] {
                telemetry
                    .ingest(submission(MAC, &key, base + Duration::minutes(offset)))
                    .await
                    .unwrap();
            }

            let rows = telemetry.all_by_mac(MAC).await.unwrap();
            let times: Vec<_> = rows.iter().map(|r| r.timestamp).collect();
            assert_eq!(
                times,
                vec![
                    base + Duration::minutes(3),
                    base + Duration::minutes(2),
                    base + Duration::minutes(1)
                ]
            );

            assert!(telemetry
                .all_by_mac("00:00:00:00:00:00")
                .await
                .unwrap()
                .is_empty());
        });
    }

    #[test]
    fn test_delete_keeps_history() {
        tokio_test::block_on(async {
            let (registry, telemetry) = services();
            let key = approved(&registry, "pi-1", MAC).await;
            telemetry.ingest(submission(MAC, &key, at(0))).await.unwrap();
            telemetry.ingest(submission(MAC, &key, at(1))).await.unwrap();

            let id = registry.find_by_mac(MAC).await.unwrap().unwrap().id;
            registry.delete(id).await.unwrap();

            assert_eq!(telemetry.all_by_mac(MAC).await.unwrap().len(), 2);
            assert_eq!(telemetry.latest_per_device().await.unwrap().len(), 1);
            assert!(matches!(
                telemetry.ingest(submission(MAC, &key, at(2))).await,
                Err(Error::Unauthorized)
            ));
        });
    }
}
