// ── Device Control Adapter ──
//
// Typed router operations the lifecycle engine needs, expressed over
// the binary API client. Every operation here is best-effort from the
// engine's point of view: devices go away, and the adapter's error
// classification tells the caller whether a retry is worth it.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tikvend_api::{CommandSentence, RosClient, RosClientConfig, RosRow, command};
use tracing::debug;

use crate::error::CoreError;
use crate::model::{DeviceId, DeviceRecord};

/// Connection coordinates for one router, resolved from its record.
#[derive(Debug, Clone)]
pub struct DeviceConn {
    pub device_id: DeviceId,
    pub address: String,
    pub username: String,
    pub password: SecretString,
}

impl DeviceConn {
    pub fn from_record(record: &DeviceRecord) -> Self {
        Self {
            device_id: record.id.clone(),
            address: record.api_address(),
            username: record.api_username.clone(),
            password: record.api_password.clone(),
        }
    }
}

/// One live hotspot session as the router reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDeviceSession {
    /// Opaque row handle, valid only for a subsequent remove on the
    /// same device.
    pub handle: String,
    pub username: String,
    /// Client address on the hotspot network.
    pub address: String,
    /// Uptime string as reported (e.g. `1h2m3s`).
    pub uptime: String,
}

/// Typed router operations.
#[trait_variant::make(DeviceControl: Send)]
pub trait LocalDeviceControl {
    /// Reachability probe. Never errors.
    async fn test_connection(&self, conn: &DeviceConn) -> bool;

    /// Run one raw command, mapping transport errors to core errors.
    async fn execute(
        &self,
        conn: &DeviceConn,
        cmd: &CommandSentence,
    ) -> Result<Vec<RosRow>, CoreError>;

    /// Active hotspot sessions, optionally filtered to one username.
    async fn list_active_sessions(
        &self,
        conn: &DeviceConn,
        username: Option<&str>,
    ) -> Result<Vec<ActiveDeviceSession>, CoreError>;

    /// Drop one active session by handle.
    ///
    /// A session that vanished between list and remove is success: the
    /// goal state (session gone) already holds.
    async fn force_disconnect(&self, conn: &DeviceConn, handle: &str) -> Result<(), CoreError>;

    /// Point the router's hotspot at the AAA server, updating the
    /// existing client entry in place if one exists.
    async fn push_access_policy(
        &self,
        conn: &DeviceConn,
        server_address: &str,
        secret: &SecretString,
    ) -> Result<(), CoreError>;

    /// Remove the router's AAA client entries for the given server.
    /// No matching entry is success.
    async fn revoke_access_policy(
        &self,
        conn: &DeviceConn,
        server_address: &str,
    ) -> Result<(), CoreError>;
}

// ── Binary-API implementation ────────────────────────────────────────

/// [`DeviceControl`] over the RouterOS binary API.
///
/// Holds only timeout policy; a fresh client (and hence a fresh
/// connection per command) is built from the `DeviceConn` on every
/// call.
#[derive(Debug, Clone)]
pub struct RosDeviceControl {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl Default for RosDeviceControl {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(4),
            command_timeout: Duration::from_secs(15),
        }
    }
}

impl RosDeviceControl {
    pub fn new(connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            command_timeout,
        }
    }

    fn client(&self, conn: &DeviceConn) -> RosClient {
        let config = RosClientConfig::new(
            conn.address.clone(),
            conn.username.clone(),
            conn.password.clone(),
        )
        .with_connect_timeout(self.connect_timeout)
        .with_command_timeout(self.command_timeout);
        RosClient::new(config)
    }
}

fn session_from_row(row: &RosRow) -> Option<ActiveDeviceSession> {
    Some(ActiveDeviceSession {
        handle: row.get(".id")?.clone(),
        username: row.get("user").cloned().unwrap_or_default(),
        address: row.get("address").cloned().unwrap_or_default(),
        uptime: row.get("uptime").cloned().unwrap_or_default(),
    })
}

impl DeviceControl for RosDeviceControl {
    async fn test_connection(&self, conn: &DeviceConn) -> bool {
        self.client(conn).probe().await
    }

    async fn execute(
        &self,
        conn: &DeviceConn,
        cmd: &CommandSentence,
    ) -> Result<Vec<RosRow>, CoreError> {
        self.client(conn)
            .execute(cmd)
            .await
            .map_err(|err| CoreError::device(&conn.device_id, err))
    }

    async fn list_active_sessions(
        &self,
        conn: &DeviceConn,
        username: Option<&str>,
    ) -> Result<Vec<ActiveDeviceSession>, CoreError> {
        let rows = DeviceControl::execute(self, conn, &command::hotspot_active_print(username))
            .await?;
        Ok(rows.iter().filter_map(session_from_row).collect())
    }

    async fn force_disconnect(&self, conn: &DeviceConn, handle: &str) -> Result<(), CoreError> {
        match self
            .client(conn)
            .execute(&command::hotspot_active_remove(handle))
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_missing_item() => {
                debug!(device = %conn.device_id, handle, "session already gone");
                Ok(())
            }
            Err(err) => Err(CoreError::device(&conn.device_id, err)),
        }
    }

    async fn push_access_policy(
        &self,
        conn: &DeviceConn,
        server_address: &str,
        secret: &SecretString,
    ) -> Result<(), CoreError> {
        let existing = DeviceControl::execute(self, conn, &command::radius_print()).await?;
        let entry = existing
            .iter()
            .find(|row| row.get("address").is_some_and(|a| a == server_address))
            .and_then(|row| row.get(".id"));

        let cmd = match entry {
            Some(id) => command::radius_set(id, server_address, secret.expose_secret()),
            None => command::radius_add(server_address, secret.expose_secret()),
        };
        DeviceControl::execute(self, conn, &cmd).await?;
        debug!(device = %conn.device_id, server = server_address, "access policy pushed");
        Ok(())
    }

    async fn revoke_access_policy(
        &self,
        conn: &DeviceConn,
        server_address: &str,
    ) -> Result<(), CoreError> {
        let existing = DeviceControl::execute(self, conn, &command::radius_print()).await?;
        let matching = existing.iter().filter_map(|row| {
            if row.get("address").is_some_and(|a| a == server_address) {
                row.get(".id")
            } else {
                None
            }
        });
        for id in matching {
            match self
                .client(conn)
                .execute(&command::radius_remove(id))
                .await
            {
                Ok(_) => {}
                Err(err) if err.is_missing_item() => {}
                Err(err) => return Err(CoreError::device(&conn.device_id, err)),
            }
        }
        Ok(())
    }
}
