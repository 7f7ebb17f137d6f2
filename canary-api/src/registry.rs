use crate::artifacts::ArtifactStore;
use crate::errors::{Error, Result};
use crate::metrics::{APPROVALS_TOTAL, REGISTERED_DEVICES, REGISTRATIONS_TOTAL};
use crate::model::{DeviceRegistration, NewRegistration, RegistrationFields, UpdateArtifact};
use crate::store::RegistrationStore;
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Size of an authenticator key before hex encoding.
const KEY_BYTES: usize = 16;

/// Owns device identity and the `pending -> approved` lifecycle.
#[derive(Clone)]
pub struct DeviceRegistry {
    store: Arc<dyn RegistrationStore>,
    artifacts: ArtifactStore,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn RegistrationStore>, artifacts: ArtifactStore) -> Self {
        Self { store, artifacts }
    }

    /// Registers a device as `pending`. The existence check gives a clean
    /// error; the store's uniqueness guarantee covers concurrent inserts.
    pub async fn register(&self, new: NewRegistration) -> Result<Uuid> {
        if self.store.mac_exists(&new.mac_address).await? {
            warn!("Rejected duplicate registration for {}", new.mac_address);
            return Err(Error::Conflict("MAC address already registered.".to_string()));
        }

        let id = Uuid::new_v4();
        self.store.insert_registration(id, &new).await?;
        REGISTRATIONS_TOTAL.inc();

        info!(
            "Registered device {} ({}) as {}",
            new.device_name, new.mac_address, id
        );
        Ok(id)
    }

    /// Issues a fresh authenticator key and marks the device approved.
    /// Approving again rotates the key.
    pub async fn approve(&self, id: Uuid) -> Result<String> {
        let key = generate_authenticator_key();
        if !self.store.set_approved(id, &key).await? {
            return Err(Error::NotFound(format!("Device {} not found", id)));
        }
        APPROVALS_TOTAL.inc();

        info!("Approved device {}", id);
        Ok(key)
    }

    pub async fn update(&self, id: Uuid, fields: RegistrationFields) -> Result<()> {
        if !self.store.update_registration(id, &fields).await? {
            return Err(Error::NotFound(format!("Device {} not found", id)));
        }
        info!("Updated device {} ({})", id, fields.mac_address);
        Ok(())
    }

    /// Overwrites the registration keyed by `mac_address`. A supplied bundle is
    /// written to disk before the row is flagged for update; its path is returned.
    pub async fn update_by_mac(
        &self,
        mac_address: &str,
        mut fields: RegistrationFields,
        artifact: Option<UpdateArtifact>,
    ) -> Result<Option<PathBuf>> {
        if self.store.find_by_mac(mac_address).await?.is_none() {
            return Err(Error::NotFound(format!(
                "Device not found for MAC address {}",
                mac_address
            )));
        }

        let path = match &artifact {
            Some(artifact) => Some(self.artifacts.persist(artifact).await?),
            None => None,
        };
        fields.update_script = i32::from(path.is_some());

        if !self
            .store
            .update_registration_by_mac(mac_address, &fields)
            .await?
        {
            return Err(Error::NotFound(format!(
                "Device not found for MAC address {}",
                mac_address
            )));
        }

        info!(
            "Updated device {} (update_script={})",
            mac_address, fields.update_script
        );
        Ok(path)
    }

    /// Removes the registration. Telemetry already stored for it is kept.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if self.store.delete_registration(id).await? {
            info!("Deleted device {}", id);
        } else {
            debug!("Delete of unknown device {}", id);
        }
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<DeviceRegistration>> {
        let rows = self.store.list_registrations().await?;
        REGISTERED_DEVICES.set(rows.len() as f64);
        Ok(rows)
    }

    pub async fn find_by_mac(&self, mac_address: &str) -> Result<Option<DeviceRegistration>> {
        self.store.find_by_mac(mac_address).await
    }

    /// Matches the exact `(mac_address, authenticator_key)` pair. Approval
    /// status is not consulted.
    pub async fn authenticate(
        &self,
        mac_address: &str,
        authenticator_key: Option<&str>,
    ) -> Result<DeviceRegistration> {
        let Some(key) = authenticator_key.filter(|k| !k.is_empty()) else {
            return Err(Error::Unauthorized);
        };
        self.store
            .find_by_credentials(mac_address, key)
            .await?
            .ok_or(Error::Unauthorized)
    }

    /// Sets the update flag; devices report 0 once an update is applied.
    pub async fn reset_update_flag(&self, mac_address: &str, value: i32) -> Result<()> {
        if self.store.set_update_script(mac_address, value).await? {
            info!("Set update_script={} for {}", value, mac_address);
        } else {
            warn!("Flag reset for unregistered device {}", mac_address);
        }
        Ok(())
    }
}

/// 128 random bits, hex encoded.
pub fn generate_authenticator_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
