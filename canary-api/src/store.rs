use crate::errors::Result;
use crate::model::{
    DeviceRegistration, NewRegistration, NewTelemetry, RegistrationFields, TelemetryRecord,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence for device registrations.
///
/// Mutating calls return `false` when no row matched. Inserting or renaming a
/// registration onto an existing MAC address fails with `Error::Conflict`.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn mac_exists(&self, mac_address: &str) -> Result<bool>;

    async fn insert_registration(&self, id: Uuid, new: &NewRegistration) -> Result<()>;

    async fn set_approved(&self, id: Uuid, authenticator_key: &str) -> Result<bool>;

    async fn update_registration(&self, id: Uuid, fields: &RegistrationFields) -> Result<bool>;

    async fn update_registration_by_mac(
        &self,
        mac_address: &str,
        fields: &RegistrationFields,
    ) -> Result<bool>;

    async fn delete_registration(&self, id: Uuid) -> Result<bool>;

    async fn list_registrations(&self) -> Result<Vec<DeviceRegistration>>;

    async fn find_by_mac(&self, mac_address: &str) -> Result<Option<DeviceRegistration>>;

    async fn find_by_credentials(
        &self,
        mac_address: &str,
        authenticator_key: &str,
    ) -> Result<Option<DeviceRegistration>>;

    async fn set_update_script(&self, mac_address: &str, value: i32) -> Result<bool>;
}

/// Append-only telemetry persistence.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Inserts a row, snapshotting the registration's current device name.
    async fn insert_telemetry(&self, record: &NewTelemetry) -> Result<i64>;

    /// One row per MAC: latest timestamp, highest id on ties. Newest first.
    async fn latest_per_device(&self) -> Result<Vec<TelemetryRecord>>;

    async fn all_by_mac(&self, mac_address: &str) -> Result<Vec<TelemetryRecord>>;
}
