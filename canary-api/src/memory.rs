//! In-process store with the same semantics as the PostgreSQL tables: unique
//! MAC addresses, device-name snapshots on insert, and id tie-breaks.

use crate::errors::{Error, Result};
use crate::model::{
    ApprovalStatus, DeviceRegistration, NewRegistration, NewTelemetry, RegistrationFields,
    TelemetryRecord,
};
use crate::store::{RegistrationStore, TelemetryStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    registrations: Vec<DeviceRegistration>,
    telemetry: Vec<TelemetryRecord>,
    next_telemetry_id: i64,
}

impl Tables {
    fn mac_taken(&self, mac_address: &str, except: Option<Uuid>) -> bool {
        self.registrations
            .iter()
            .any(|r| r.mac_address == mac_address && Some(r.id) != except)
    }

    fn overwrite(&mut self, index: usize, fields: &RegistrationFields) -> Result<()> {
        let id = self.registrations[index].id;
        if self.mac_taken(&fields.mac_address, Some(id)) {
            return Err(Error::Conflict(format!(
                "MAC address {} already registered.",
                fields.mac_address
            )));
        }
        let row = &mut self.registrations[index];
        row.device_name = fields.device_name.clone();
        row.mac_address = fields.mac_address.clone();
        row.destination = fields.destination.clone();
        row.interval_minutes = fields.interval_minutes;
        row.update_script = fields.update_script;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(a: &TelemetryRecord, b: &TelemetryRecord) -> std::cmp::Ordering {
    b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id))
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    async fn mac_exists(&self, mac_address: &str) -> Result<bool> {
        Ok(self.tables.lock().await.mac_taken(mac_address, None))
    }

    async fn insert_registration(&self, id: Uuid, new: &NewRegistration) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.mac_taken(&new.mac_address, None) {
            return Err(Error::Conflict(format!(
                "MAC address {} already registered.",
                new.mac_address
            )));
        }
        tables.registrations.push(DeviceRegistration {
            id,
            device_name: new.device_name.clone(),
            mac_address: new.mac_address.clone(),
            destination: new.destination.clone(),
            interval_minutes: new.interval_minutes,
            approval_status: ApprovalStatus::Pending,
            authenticator_key: None,
            update_script: 0,
        });
        Ok(())
    }

    async fn set_approved(&self, id: Uuid, authenticator_key: &str) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.registrations.iter_mut().find(|r| r.id == id) {
            Some(row) => {
                row.approval_status = ApprovalStatus::Approved;
                row.authenticator_key = Some(authenticator_key.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_registration(&self, id: Uuid, fields: &RegistrationFields) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.registrations.iter().position(|r| r.id == id) {
            Some(index) => tables.overwrite(index, fields).map(|()| true),
            None => Ok(false),
        }
    }

    async fn update_registration_by_mac(
        &self,
        mac_address: &str,
        fields: &RegistrationFields,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables
            .registrations
            .iter()
            .position(|r| r.mac_address == mac_address)
        {
            Some(index) => tables.overwrite(index, fields).map(|()| true),
            None => Ok(false),
        }
    }

    async fn delete_registration(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let before = tables.registrations.len();
        tables.registrations.retain(|r| r.id != id);
        Ok(tables.registrations.len() != before)
    }

    async fn list_registrations(&self) -> Result<Vec<DeviceRegistration>> {
        let mut rows = self.tables.lock().await.registrations.clone();
        rows.sort_by(|a, b| {
            a.device_name
                .cmp(&b.device_name)
                .then_with(|| a.mac_address.cmp(&b.mac_address))
        });
        Ok(rows)
    }

    async fn find_by_mac(&self, mac_address: &str) -> Result<Option<DeviceRegistration>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .registrations
            .iter()
            .find(|r| r.mac_address == mac_address)
            .cloned())
    }

    async fn find_by_credentials(
        &self,
        mac_address: &str,
        authenticator_key: &str,
    ) -> Result<Option<DeviceRegistration>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .registrations
            .iter()
            .find(|r| {
                r.mac_address == mac_address
                    && r.authenticator_key.as_deref() == Some(authenticator_key)
            })
            .cloned())
    }

    async fn set_update_script(&self, mac_address: &str, value: i32) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let mut updated = false;
        for row in tables
            .registrations
            .iter_mut()
            .filter(|r| r.mac_address == mac_address)
        {
            row.update_script = value;
            updated = true;
        }
        Ok(updated)
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn insert_telemetry(&self, record: &NewTelemetry) -> Result<i64> {
        let mut tables = self.tables.lock().await;
        tables.next_telemetry_id += 1;
        let id = tables.next_telemetry_id;
        let device_name = tables
            .registrations
            .iter()
            .find(|r| r.mac_address == record.mac_address)
            .map(|r| r.device_name.clone());

        tables.telemetry.push(TelemetryRecord {
            id,
            device_name,
            mac_address: record.mac_address.clone(),
            url: record.url.clone(),
            http_status: record.http_status,
            load_time: record.load_time,
            content_length: record.content_length,
            download_speed_mbps: record.download_speed_mbps,
            upload_speed_mbps: record.upload_speed_mbps,
            ping_ms: record.ping_ms,
            error_message: record.error_message.clone(),
            traceroute_hops: record.traceroute_hops.clone(),
            timestamp: record.timestamp,
        });
        Ok(id)
    }

    async fn latest_per_device(&self) -> Result<Vec<TelemetryRecord>> {
        let tables = self.tables.lock().await;
        let mut latest: HashMap<&str, &TelemetryRecord> = HashMap::new();
        for row in &tables.telemetry {
            latest
                .entry(row.mac_address.as_str())
                .and_modify(|current| {
                    if newest_first(row, *current).is_lt() {
                        *current = row;
                    }
                })
                .or_insert(row);
        }

        let mut rows: Vec<TelemetryRecord> = latest.into_values().cloned().collect();
        rows.sort_by(newest_first);
        Ok(rows)
    }

    async fn all_by_mac(&self, mac_address: &str) -> Result<Vec<TelemetryRecord>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<TelemetryRecord> = tables
            .telemetry
            .iter()
            .filter(|r| r.mac_address == mac_address)
            .cloned()
            .collect();
        rows.sort_by(newest_first);
        Ok(rows)
    }
}
