//! Detection config persistence — one JSON row per tenant.

use super::SentinelStore;
use crate::{
    config::{ConfigRecord, DetectionConfig},
    error::SentinelResult,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl SentinelStore {
    /// The tenant's saved config, or the documented defaults (version 0)
    /// if it never saved one.
    pub fn detection_config(&self, tenant_id: &str) -> SentinelResult<ConfigRecord> {
        let row = self
            .conn
            .query_row(
                "SELECT config_json, version, updated_by, updated_at
                 FROM detection_config WHERE tenant_id = ?1",
                params![tenant_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, DateTime<Utc>>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(ConfigRecord::default_for(tenant_id)),
            Some((json, version, updated_by, updated_at)) => Ok(ConfigRecord {
                tenant_id: tenant_id.to_string(),
                config: serde_json::from_str::<DetectionConfig>(&json)?.normalized(),
                version,
                updated_by,
                updated_at: Some(updated_at),
            }),
        }
    }

    /// Validate and upsert. Each save bumps the version.
    pub fn save_detection_config(
        &self,
        tenant_id: &str,
        config: &DetectionConfig,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> SentinelResult<ConfigRecord> {
        config.validate()?;
        let json = serde_json::to_string(&config.clone().normalized())?;
        self.conn.execute(
            "INSERT INTO detection_config (tenant_id, config_json, version, updated_by, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT (tenant_id) DO UPDATE SET
                config_json = excluded.config_json,
                version     = detection_config.version + 1,
                updated_by  = excluded.updated_by,
                updated_at  = excluded.updated_at",
            params![tenant_id, json, actor_id, now],
        )?;
        self.detection_config(tenant_id)
    }

    /// Restore the documented defaults, keeping the tenant row.
    pub fn reset_detection_config(
        &self,
        tenant_id: &str,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> SentinelResult<ConfigRecord> {
        self.save_detection_config(tenant_id, &DetectionConfig::default(), actor_id, now)
    }
}
