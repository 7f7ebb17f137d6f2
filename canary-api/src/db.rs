use crate::errors::{Error, Result};
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::{
    ApprovalStatus, DeviceRegistration, NewRegistration, NewTelemetry, RegistrationFields,
    TelemetryRecord,
};
use crate::store::{RegistrationStore, TelemetryStore};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const REGISTRATION_COLUMNS: &str = "id, device_name, mac_address, destination, interval_minutes, \
     approval_status, authenticator_key, update_script";

const TELEMETRY_COLUMNS: &str = "id, device_name, mac_address, url, http_status, load_time, \
     content_length, download_speed_mbps, upload_speed_mbps, ping_ms, error_message, \
     traceroute_hops, ts";

pub async fn make_pool(
    database_url: &str,
    max_connections: u32,
    timeout: Duration,
) -> Result<PgPool> {
    info!("Connecting to database...");
    let statement_timeout = timeout.as_millis().to_string();
    let options = PgConnectOptions::from_str(database_url)?
        .options([("statement_timeout", statement_timeout.as_str())]);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(timeout)
        .connect_with(options)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Strips credentials from a connection string before it is logged.
pub fn redact_url(database_url: &str) -> &str {
    match database_url.rsplit_once('@') {
        Some((_, host)) => host,
        None => database_url,
    }
}

/// PostgreSQL implementation of the registration and telemetry stores
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Maps storage errors, turning a unique violation on the MAC address into a conflict.
fn map_write_error(err: sqlx::Error, mac_address: &str) -> Error {
    if is_unique_violation(&err) {
        return Error::Conflict(format!("MAC address {} already registered.", mac_address));
    }
    DB_FAILURES_TOTAL.inc();
    Error::Database(err)
}

fn map_db_error(err: sqlx::Error) -> Error {
    DB_FAILURES_TOTAL.inc();
    Error::Database(err)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        // unique_violation
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code == "23505"),
        _ => false,
    }
}

#[async_trait]
impl RegistrationStore for PgStore {
    async fn mac_exists(&self, mac_address: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM canary_device_registration WHERE mac_address = $1)",
        )
        .bind(mac_address)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(exists)
    }

    async fn insert_registration(&self, id: Uuid, new: &NewRegistration) -> Result<()> {
        sqlx::query(
            "INSERT INTO canary_device_registration
                 (id, device_name, mac_address, destination, interval_minutes, approval_status)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(&new.device_name)
        .bind(&new.mac_address)
        .bind(&new.destination)
        .bind(new.interval_minutes)
        .bind(ApprovalStatus::Pending)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &new.mac_address))?;

        debug!("Inserted registration {} for {}", id, new.mac_address);
        Ok(())
    }

    async fn set_approved(&self, id: Uuid, authenticator_key: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE canary_device_registration
             SET approval_status = $1, authenticator_key = $2
             WHERE id = $3",
        )
        .bind(ApprovalStatus::Approved)
        .bind(authenticator_key)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_registration(&self, id: Uuid, fields: &RegistrationFields) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE canary_device_registration
             SET device_name = $1, mac_address = $2, destination = $3,
                 interval_minutes = $4, update_script = $5
             WHERE id = $6",
        )
        .bind(&fields.device_name)
        .bind(&fields.mac_address)
        .bind(&fields.destination)
        .bind(fields.interval_minutes)
        .bind(fields.update_script)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &fields.mac_address))?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_registration_by_mac(
        &self,
        mac_address: &str,
        fields: &RegistrationFields,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE canary_device_registration
             SET device_name = $1, mac_address = $2, destination = $3,
                 interval_minutes = $4, update_script = $5
             WHERE mac_address = $6",
        )
        .bind(&fields.device_name)
        .bind(&fields.mac_address)
        .bind(&fields.destination)
        .bind(fields.interval_minutes)
        .bind(fields.update_script)
        .bind(mac_address)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &fields.mac_address))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_registration(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM canary_device_registration WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_registrations(&self) -> Result<Vec<DeviceRegistration>> {
        let query = format!(
            "SELECT {} FROM canary_device_registration ORDER BY device_name, mac_address",
            REGISTRATION_COLUMNS
        );
        sqlx::query_as::<_, DeviceRegistration>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)
    }

    async fn find_by_mac(&self, mac_address: &str) -> Result<Option<DeviceRegistration>> {
        let query = format!(
            "SELECT {} FROM canary_device_registration WHERE mac_address = $1",
            REGISTRATION_COLUMNS
        );
        sqlx::query_as::<_, DeviceRegistration>(&query)
            .bind(mac_address)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)
    }

    async fn find_by_credentials(
        &self,
        mac_address: &str,
        authenticator_key: &str,
    ) -> Result<Option<DeviceRegistration>> {
        let query = format!(
            "SELECT {} FROM canary_device_registration
             WHERE mac_address = $1 AND authenticator_key = $2
             LIMIT 1",
            REGISTRATION_COLUMNS
        );
        sqlx::query_as::<_, DeviceRegistration>(&query)
            .bind(mac_address)
            .bind(authenticator_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)
    }

    async fn set_update_script(&self, mac_address: &str, value: i32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE canary_device_registration SET update_script = $1 WHERE mac_address = $2",
        )
        .bind(value)
        .bind(mac_address)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn insert_telemetry(&self, record: &NewTelemetry) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO canary_telemetry (
                ts, device_name, mac_address, url, http_status, load_time,
                content_length, download_speed_mbps, upload_speed_mbps, ping_ms,
                error_message, traceroute_hops
            )
            VALUES (
                $1,
                (SELECT device_name FROM canary_device_registration WHERE mac_address = $2 LIMIT 1),
                $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
            )
            RETURNING id
            "#,
        )
        .bind(record.timestamp)
        .bind(&record.mac_address)
        .bind(&record.url)
        .bind(record.http_status)
        .bind(record.load_time)
        .bind(record.content_length)
        .bind(record.download_speed_mbps)
        .bind(record.upload_speed_mbps)
        .bind(record.ping_ms)
        .bind(&record.error_message)
        .bind(&record.traceroute_hops)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(id)
    }

    async fn latest_per_device(&self) -> Result<Vec<TelemetryRecord>> {
        let query = format!(
            "SELECT {columns} FROM (
                 SELECT DISTINCT ON (mac_address) {columns}
                 FROM canary_telemetry
                 ORDER BY mac_address, ts DESC, id DESC
             ) AS latest
             ORDER BY ts DESC, id DESC",
            columns = TELEMETRY_COLUMNS
        );
        sqlx::query_as::<_, TelemetryRecord>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)
    }

    async fn all_by_mac(&self, mac_address: &str) -> Result<Vec<TelemetryRecord>> {
        let query = format!(
            "SELECT {} FROM canary_telemetry
             WHERE mac_address = $1
             ORDER BY ts DESC, id DESC",
            TELEMETRY_COLUMNS
        );
        sqlx::query_as::<_, TelemetryRecord>(&query)
            .bind(mac_address)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("postgres://canary:secret@db:5432/canary"),
            "db:5432/canary"
        );
        assert_eq!(redact_url("postgres://localhost/canary"), "postgres://localhost/canary");
    }

    #[test]
    fn test_non_database_errors_are_not_conflicts() {
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
        assert!(matches!(
            map_write_error(sqlx::Error::RowNotFound, "AA:BB:CC:DD:EE:FF"),
            Error::Database(_)
        ));
    }
}
