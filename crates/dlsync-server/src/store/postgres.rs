//! PostgreSQL-backed store and registries

use super::{BackupTargetRegistry, ConnectionRegistry, ResultStore};
use crate::config::DatabaseConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use dlsync_common::types::{
    AgingPhase, BackupTargetDescriptor, ConnectionDescriptor, FileKind, RecordIdentity,
    ResultRecord,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Row};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Result store and both registries over one connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> SyncResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> SyncResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn port_from_row(row: &PgRow, table: &str) -> SyncResult<u16> {
    let port: i32 = row.try_get("port")?;
    u16::try_from(port)
        .map_err(|_| SyncError::Config(format!("{}: port {} out of range", table, port)))
}

fn identity_from_row(row: &PgRow) -> SyncResult<RecordIdentity> {
    let aging_phase: String = row.try_get("aging_phase")?;
    let file_kind: String = row.try_get("result_type")?;

    Ok(RecordIdentity {
        model: row.try_get("model")?,
        batch: row.try_get("batch")?,
        aging_phase: aging_phase.parse::<AgingPhase>()?,
        temperature: row.try_get("temperature")?,
        qualification_group: row.try_get("jd_group")?,
        chip_id: row.try_get("chip_id")?,
        file_kind: file_kind.parse::<FileKind>()?,
    })
}

#[async_trait]
impl ResultStore for PgStore {
    async fn find_by_identity(
        &self,
        identities: &[RecordIdentity],
    ) -> SyncResult<HashMap<RecordIdentity, String>> {
        let mut matches = HashMap::new();
        if identities.is_empty() {
            return Ok(matches);
        }

        let mut query_builder = QueryBuilder::new(
            "SELECT model, batch, aging_phase, temperature, jd_group, chip_id, result_type, path \
             FROM result_info WHERE ",
        );

        for (i, identity) in identities.iter().enumerate() {
            if i > 0 {
                query_builder.push(" OR ");
            }
            query_builder
                .push("(model = ")
                .push_bind(identity.model.clone())
                .push(" AND batch = ")
                .push_bind(identity.batch.clone())
                .push(" AND aging_phase = ")
                .push_bind(identity.aging_phase.as_str())
                .push(" AND temperature IS NOT DISTINCT FROM ")
                .push_bind(identity.temperature)
                .push(" AND jd_group IS NOT DISTINCT FROM ")
                .push_bind(identity.qualification_group.clone())
                .push(" AND chip_id = ")
                .push_bind(identity.chip_id.clone())
                .push(" AND result_type = ")
                .push_bind(identity.file_kind.as_str())
                .push(")");
        }
        query_builder.push(" ORDER BY create_time ASC, id ASC");

        let rows = query_builder.build().fetch_all(&self.pool).await?;

        for row in rows {
            let identity = identity_from_row(&row)?;
            let path: String = row.try_get("path")?;
            // Rows arrive oldest first; keep the first hit
            matches.entry(identity).or_insert(path);
        }

        debug!(
            queried = identities.len(),
            matched = matches.len(),
            "Looked up stored duplicates"
        );
        Ok(matches)
    }

    async fn insert_many(&self, records: &[ResultRecord]) -> SyncResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut query_builder = QueryBuilder::new(
            r#"
            INSERT INTO result_info (
                model, batch, aging_phase, aging_end_date, test_begin_date,
                temperature, jd_group, tester_name_abbr, chip_id, path,
                duplicate_path, surface_result, real_result, result_type, error,
                file_size, test_suite, test_suite_count, computer_name, system,
                create_time
            )
            "#,
        );

        query_builder.push_values(records.iter(), |mut b, record| {
            let file_size = record.file_size.and_then(|size| i64::try_from(size).ok());
            let suite_count = i32::try_from(record.test_suite_count()).unwrap_or(i32::MAX);

            b.push_bind(record.model.clone())
                .push_bind(record.batch.clone())
                .push_bind(record.aging_phase.as_str())
                .push_bind(record.aging_end_date)
                .push_bind(record.test_begin_date)
                .push_bind(record.temperature)
                .push_bind(record.qualification_group.clone())
                .push_bind(record.tester_abbr.clone())
                .push_bind(record.chip_id.clone())
                .push_bind(record.path.clone())
                .push_bind(record.duplicate_path.clone())
                .push_bind(record.surface_result.as_str())
                .push_bind(record.real_result.map(|r| r.as_str()))
                .push_bind(record.file_kind.as_str())
                .push_bind(record.content_error)
                .push_bind(file_size)
                .push_bind(record.test_suites.clone().map(Json))
                .push_bind(suite_count)
                .push_bind(record.station_name.clone())
                .push_bind(record.system.as_str())
                .push_bind(record.created_at);
        });

        let result = query_builder.build().execute(&self.pool).await?;

        debug!("Inserted {} result_info rows", result.rows_affected());
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ConnectionRegistry for PgStore {
    async fn list_connections(&self) -> SyncResult<Vec<ConnectionDescriptor>> {
        let rows = sqlx::query(
            r#"
            SELECT id, host, port, username, password, prefix_remote_path,
                   prefix_local_path, prefix_volume_path, system, computer_name, sync
            FROM connection_info
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ConnectionDescriptor {
                    id: row.try_get("id")?,
                    host: row.try_get("host")?,
                    port: port_from_row(row, "connection_info")?,
                    username: row.try_get("username")?,
                    password: row.try_get("password")?,
                    remote_prefix: row.try_get("prefix_remote_path")?,
                    local_prefix: row.try_get("prefix_local_path")?,
                    volume_prefix: row.try_get("prefix_volume_path")?,
                    system: row.try_get("system")?,
                    station_name: row.try_get("computer_name")?,
                    sync_enabled: row.try_get("sync")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl BackupTargetRegistry for PgStore {
    async fn list_backup_targets(&self) -> SyncResult<Vec<BackupTargetDescriptor>> {
        let rows = sqlx::query(
            r#"
            SELECT id, host, port, username, password, prefix_backup_path,
                   system, sync, compression_level
            FROM backup_info
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(BackupTargetDescriptor {
                    id: row.try_get("id")?,
                    host: row.try_get("host")?,
                    port: port_from_row(row, "backup_info")?,
                    username: row.try_get("username")?,
                    password: row.try_get("password")?,
                    backup_prefix: row.try_get("prefix_backup_path")?,
                    os: row.try_get("system")?,
                    sync_enabled: row.try_get("sync")?,
                    compression_level: row.try_get("compression_level")?,
                })
            })
            .collect()
    }
}
