//! Service wiring shared by the binary's commands

use crate::backup::BackupPropagator;
use crate::config::Config;
use crate::flags::Switches;
use crate::gateway::PersistenceGateway;
use crate::parser::LogParser;
use crate::remote::{AdapterFactory, ProtocolAdapters};
use crate::store::PgStore;
use crate::sync::{SyncOrchestrator, SyncServices};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

/// Everything a running server needs, built from one [`Config`].
pub struct App {
    pub config: Config,
    pub store: PgStore,
    pub switches: Switches,
    pub backup: BackupPropagator,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl App {
    /// Connect to the database, apply migrations, and assemble the services.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let store = PgStore::connect(&config.database)
            .await
            .context("Failed to connect to database")?;
        info!("Database connection pool established");

        store
            .migrate()
            .await
            .context("Failed to run migrations")?;
        info!("Database migrations completed");

        Self::assemble(config, store)
    }

    fn assemble(config: Config, store: PgStore) -> anyhow::Result<Self> {
        let switches = Switches::new(config.schedule.sync_enabled, config.schedule.backup_enabled);
        let adapters: Arc<dyn AdapterFactory> =
            Arc::new(ProtocolAdapters::new(config.transfer.clone()));
        let shared = Arc::new(store.clone());

        let backup = BackupPropagator::new(shared.clone(), adapters.clone(), switches.backup.clone());
        let parser = LogParser::new().context("Failed to compile datalog grammar")?;

        let orchestrator = SyncOrchestrator::new(
            config.sync.clone(),
            config.archive,
            parser,
            SyncServices {
                adapters,
                gateway: PersistenceGateway::new(shared.clone()),
                backup: backup.clone(),
                connections: shared,
            },
            switches.sync.clone(),
        );

        info!(
            sync_enabled = switches.sync_status(),
            backup_enabled = switches.backup_status(),
            workers = config.sync.max_workers,
            "Sync services ready"
        );

        Ok(Self {
            config,
            store,
            switches,
            backup,
            orchestrator: Arc::new(orchestrator),
        })
    }
}
