use crate::errors::{Error, Result};
use crate::model::{DeviceConfig, DeviceRegistration, DEFAULT_INTERVAL_MINUTES};
use crate::registry::DeviceRegistry;
use tracing::{debug, warn};

/// Derives the configuration a device polls for.
#[derive(Clone)]
pub struct ConfigResolver {
    registry: DeviceRegistry,
}

impl ConfigResolver {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self { registry }
    }

    pub async fn resolve(&self, mac_address: &str) -> Result<DeviceConfig> {
        let Some(registration) = self.registry.find_by_mac(mac_address).await? else {
            debug!("Config requested for unregistered device {}", mac_address);
            return Err(Error::NotFound(
                "Device not found for the given MAC address".to_string(),
            ));
        };
        Ok(device_config(registration))
    }
}

fn device_config(registration: DeviceRegistration) -> DeviceConfig {
    let destinations = match registration.destination.as_deref() {
        None | Some("") => Vec::new(),
        Some(raw) => serde_json::from_str::<Vec<String>>(raw).unwrap_or_else(|e| {
            warn!(
                "Unreadable destination for {}, using none: {}",
                registration.mac_address, e
            );
            Vec::new()
        }),
    };

    let interval_minutes = registration
        .interval_minutes
        .filter(|m| *m != 0)
        .unwrap_or(DEFAULT_INTERVAL_MINUTES);

    DeviceConfig {
        destinations,
        interval_minutes,
        authenticator_key: registration.authenticator_key,
        update_script: registration.update_script,
    }
}
