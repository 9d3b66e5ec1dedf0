//! Runtime on/off switches for synchronization and backup.
//!
//! A switch is a shared atomic cell. Clones observe the same state, so the
//! orchestrator, the backup propagator, and whatever operator surface flips
//! them all agree without further locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Switch {
    name: &'static str,
    state: Arc<AtomicBool>,
}

impl Switch {
    pub fn new(name: &'static str, initially_open: bool) -> Self {
        Self {
            name,
            state: Arc::new(AtomicBool::new(initially_open)),
        }
    }

    /// Open the switch. Returns `false` if it was already open.
    pub fn open(&self) -> bool {
        let changed = self
            .state
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if changed {
            info!(switch = self.name, "Switch opened");
        }
        changed
    }

    /// Close the switch. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let changed = self
            .state
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if changed {
            info!(switch = self.name, "Switch closed");
        }
        changed
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// The two process-wide switches.
#[derive(Debug, Clone)]
pub struct Switches {
    pub sync: Switch,
    pub backup: Switch,
}

impl Switches {
    pub fn new(sync_enabled: bool, backup_enabled: bool) -> Self {
        Self {
            sync: Switch::new("sync", sync_enabled),
            backup: Switch::new("backup", backup_enabled),
        }
    }

    pub fn open_sync(&self) -> bool {
        self.sync.open()
    }

    pub fn close_sync(&self) -> bool {
        self.sync.close()
    }

    pub fn sync_status(&self) -> bool {
        self.sync.is_open()
    }

    pub fn open_backup(&self) -> bool {
        self.backup.open()
    }

    pub fn close_backup(&self) -> bool {
        self.backup.close()
    }

    pub fn backup_status(&self) -> bool {
        self.backup.is_open()
    }
}
