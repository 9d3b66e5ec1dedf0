//! PostgreSQL store tests using testcontainers
//!
//! Run with: cargo test --test pg_store_tests -- --ignored

mod common;

use chrono::{NaiveDate, Utc};
use dlsync_common::types::{
    AgingPhase, FileKind, ResultRecord, SystemFamily, TestOutcome,
};
use dlsync_server::gateway::PersistenceGateway;
use dlsync_server::store::{BackupTargetRegistry, ConnectionRegistry, PgStore, ResultStore};
use sqlx::postgres::PgPoolOptions;
use std::collections::BTreeSet;
use std::sync::Arc;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    store: PgStore,
}

impl TestPostgres {
    async fn start() -> anyhow::Result<Self> {
        let container = Postgres::default().start().await?;
        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432.tcp()).await?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&format!("postgresql://postgres:postgres@{}:{}/postgres", host, port))
            .await?;

        let store = PgStore::new(pool);
        store.migrate().await?;
        Ok(Self {
            _container: container,
            store,
        })
    }
}

fn record(chip: &str, path: &str, temperature: Option<i32>) -> ResultRecord {
    ResultRecord {
        model: "2910".to_string(),
        batch: "202301".to_string(),
        aging_phase: AgingPhase::PostBurnIn,
        aging_end_date: NaiveDate::from_ymd_opt(2023, 3, 22),
        test_begin_date: NaiveDate::from_ymd_opt(2023, 3, 23).unwrap(),
        temperature,
        qualification_group: None,
        tester_abbr: "ZS".to_string(),
        chip_id: chip.to_string(),
        path: path.to_string(),
        duplicate_path: None,
        surface_result: TestOutcome::Passed,
        real_result: None,
        file_kind: FileKind::Process,
        content_error: true,
        file_size: Some(2048),
        test_suites: Some(BTreeSet::from(["FOO".to_string()])),
        station_name: "J750-01".to_string(),
        system: SystemFamily::J750,
        created_at: Utc::now(),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_insert_and_find_by_identity() {
    common::init_tracing();
    let pg = TestPostgres::start().await.unwrap();

    let first = record("1", "/vol/a/1.txt", Some(25));
    let later = ResultRecord {
        path: "/vol/b/1.txt".to_string(),
        created_at: first.created_at + chrono::Duration::seconds(5),
        ..first.clone()
    };
    let cold = record("1", "/vol/c/1.txt", None);

    assert_eq!(pg.store.insert_many(&[first.clone(), later]).await.unwrap(), 2);

    let found = pg
        .store
        .find_by_identity(&[first.identity(), cold.identity()])
        .await
        .unwrap();

    // Earliest row wins, NULL temperature does not match 25
    assert_eq!(found.len(), 1);
    assert_eq!(found.get(&first.identity()).map(String::as_str), Some("/vol/a/1.txt"));

    pg.store.insert_many(&[cold.clone()]).await.unwrap();
    let found = pg.store.find_by_identity(&[cold.identity()]).await.unwrap();
    assert_eq!(found.get(&cold.identity()).map(String::as_str), Some("/vol/c/1.txt"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_gateway_over_postgres() {
    let pg = TestPostgres::start().await.unwrap();
    let gateway = PersistenceGateway::new(Arc::new(pg.store.clone()));

    let records: Vec<_> = (0..60)
        .map(|i| record(&i.to_string(), &format!("/vol/{i}.txt"), Some(85)))
        .collect();
    let report = gateway.insert_batch(records).await;
    assert_eq!(report.inserted, 60);

    let report = gateway
        .insert_batch(vec![record("7", "/vol/retest/7.txt", Some(85))])
        .await;
    assert_eq!(report.stored_duplicates, 1);

    let duplicate: Option<String> = sqlx::query_scalar(
        "SELECT duplicate_path FROM result_info WHERE path = '/vol/retest/7.txt'",
    )
    .fetch_one(pg.store.pool())
    .await
    .unwrap();
    assert_eq!(duplicate.as_deref(), Some("/vol/7.txt"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_registries_read_rows() {
    let pg = TestPostgres::start().await.unwrap();

    sqlx::query(
        "INSERT INTO connection_info (host, port, username, password, prefix_remote_path, \
         prefix_local_path, prefix_volume_path, system, computer_name, sync) \
         VALUES ('10.0.0.1', 445, 'op', 'pw', 'share/logs', '/data/J750-01', NULL, 'J750', 'J750-01', TRUE)",
    )
    .execute(pg.store.pool())
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO backup_info (host, port, username, password, prefix_backup_path, system, sync, compression_level) \
         VALUES ('nas', 22, 'bk', 'pw', '/archive', 'LINUX', FALSE, 6)",
    )
    .execute(pg.store.pool())
    .await
    .unwrap();

    let connections = pg.store.list_connections().await.unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].port, 445);
    assert_eq!(connections[0].volume_prefix, None);
    assert_eq!(connections[0].effective_volume_prefix(), "/data/J750-01");
    assert_eq!(connections[0].system_family().unwrap(), SystemFamily::J750);

    let targets = pg.store.list_backup_targets().await.unwrap();
    assert_eq!(targets.len(), 1);
    assert!(!targets[0].sync_enabled);
    assert_eq!(targets[0].compression_level, Some(6));
}
