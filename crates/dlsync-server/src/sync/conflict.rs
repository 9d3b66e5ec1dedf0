//! Target path resolution with the conflict overflow area

use crate::config::SyncSettings;
use crate::remote::join_remote;
use chrono::NaiveDate;
use dlsync_common::types::ConnectionDescriptor;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Where one remote file lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPaths {
    pub local: PathBuf,
    /// Consumer-facing path recorded on the parsed record
    pub volume: String,
    /// Volume path of the existing file this one collided with
    pub duplicate_of: Option<String>,
    /// Local prefix the file was placed under, used as the parse root
    pub local_prefix: PathBuf,
}

/// Maps relative remote paths to local and volume targets for one
/// connection run.
///
/// Stations sharing a prefix pair get their own subtree:
/// `<local prefix>/<station>` and `<volume prefix>/<station>`. The first collision switches the resolver to
/// `<conflict root>/<YYYYMMDD>/<station>` for the rest of the run.
#[derive(Debug)]
pub struct TargetResolver {
    local_prefix: PathBuf,
    volume_prefix: String,
    conflict_local: PathBuf,
    conflict_volume: String,
    redirected: bool,
}

impl TargetResolver {
    pub fn new(
        connection: &ConnectionDescriptor,
        settings: &SyncSettings,
        run_date: NaiveDate,
    ) -> Self {
        let date = run_date.format("%Y%m%d").to_string();
        let station = &connection.station_name;

        Self {
            local_prefix: Path::new(&connection.local_prefix).join(station),
            volume_prefix: join_remote(connection.effective_volume_prefix(), station),
            conflict_local: settings.conflict_local_path.join(&date).join(station),
            conflict_volume: join_remote(&join_remote(&settings.conflict_volume_path, &date), station),
            redirected: false,
        }
    }

    pub fn is_redirected(&self) -> bool {
        self.redirected
    }

    pub fn resolve(&mut self, relative: &str) -> TargetPaths {
        let (local, volume) = self.targets_for(relative);
        if !local.exists() {
            return TargetPaths {
                local,
                volume,
                duplicate_of: None,
                local_prefix: self.current_local_prefix().to_path_buf(),
            };
        }

        self.redirected = true;
        let (redirected_local, redirected_volume) = self.targets_for(relative);
        warn!(
            from = %local.display(),
            to = %redirected_local.display(),
            "Target already exists, writing to conflict area"
        );

        TargetPaths {
            local: redirected_local,
            volume: redirected_volume,
            duplicate_of: Some(volume),
            local_prefix: self.current_local_prefix().to_path_buf(),
        }
    }

    fn current_local_prefix(&self) -> &Path {
        if self.redirected {
            &self.conflict_local
        } else {
            &self.local_prefix
        }
    }

    fn targets_for(&self, relative: &str) -> (PathBuf, String) {
        let relative = relative.trim_start_matches('/');
        let volume_prefix = if self.redirected {
            &self.conflict_volume
        } else {
            &self.volume_prefix
        };

        let mut local = self.current_local_prefix().to_path_buf();
        local.extend(relative.split('/').filter(|s| !s.is_empty()));
        (local, join_remote(volume_prefix, relative))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn connection(local: &Path) -> ConnectionDescriptor {
        ConnectionDescriptor {
            id: 1,
            host: "10.0.0.5".to_string(),
            port: 445,
            username: "op".to_string(),
            password: "secret".to_string(),
            remote_prefix: "share/logs".to_string(),
            local_prefix: local.to_string_lossy().into_owned(),
            volume_prefix: Some("/vol".to_string()),
            system: "J750".to_string(),
            station_name: "J750-01".to_string(),
            sync_enabled: true,
        }
    }

    fn settings(conflict: &Path) -> SyncSettings {
        SyncSettings {
            conflict_local_path: conflict.to_path_buf(),
            conflict_volume_path: "/vol/conflict".to_string(),
            ..SyncSettings::default()
        }
    }

    #[test]
    fn test_resolve_without_collision() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("mirror");
        let mut resolver = TargetResolver::new(
            &connection(&local),
            &settings(&temp.path().join("conflict")),
            NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
        );

        let target = resolver.resolve("2910_DATA/a.txt");
        let station_root = local.join("J750-01");
        assert_eq!(target.local, station_root.join("2910_DATA").join("a.txt"));
        assert_eq!(target.volume, "/vol/J750-01/2910_DATA/a.txt");
        assert_eq!(target.duplicate_of, None);
        assert_eq!(target.local_prefix, station_root);
        assert!(!resolver.is_redirected());
    }

    #[test]
    fn test_redirection_is_sticky() {
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join("mirror");
        let local = mirror.join("J750-01");
        let conflict = temp.path().join("conflict");
        fs::create_dir_all(local.join("d")).unwrap();
        fs::write(local.join("d").join("b.txt"), "old").unwrap();

        let mut resolver = TargetResolver::new(
            &connection(&mirror),
            &settings(&conflict),
            NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
        );

        let first = resolver.resolve("d/a.txt");
        assert_eq!(first.local, local.join("d").join("a.txt"));

        let collided = resolver.resolve("d/b.txt");
        let bucket = conflict.join("20240506").join("J750-01");
        assert_eq!(collided.local, bucket.join("d").join("b.txt"));
        assert_eq!(collided.volume, "/vol/conflict/20240506/J750-01/d/b.txt");
        assert_eq!(collided.duplicate_of.as_deref(), Some("/vol/J750-01/d/b.txt"));
        assert_eq!(collided.local_prefix, bucket);

        // Free in the primary tree, still redirected
        let after = resolver.resolve("d/c.txt");
        assert_eq!(after.local, bucket.join("d").join("c.txt"));
        assert_eq!(after.duplicate_of, None);
        assert!(resolver.is_redirected());
    }

    #[test]
    fn test_volume_prefix_falls_back_to_local_prefix() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("mirror");
        let mut conn = connection(&local);
        conn.volume_prefix = None;

        let mut resolver = TargetResolver::new(
            &conn,
            &settings(&temp.path().join("conflict")),
            NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
        );
        let target = resolver.resolve("x/y.txt");
        assert_eq!(
            target.volume,
            format!("{}/J750-01/x/y.txt", local.to_string_lossy().replace('\\', "/"))
        );
    }

    #[test]
    fn test_stations_sharing_a_prefix_do_not_collide() {
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join("mirror");
        let settings = settings(&temp.path().join("conflict"));
        let date = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();

        let first = connection(&mirror);
        let mut second = connection(&mirror);
        second.station_name = "J750-02".to_string();

        let a = TargetResolver::new(&first, &settings, date).resolve("d/1.txt");
        fs::create_dir_all(a.local.parent().unwrap()).unwrap();
        fs::write(&a.local, "from J750-01").unwrap();

        let mut resolver = TargetResolver::new(&second, &settings, date);
        let b = resolver.resolve("d/1.txt");
        assert_eq!(b.local, mirror.join("J750-02").join("d").join("1.txt"));
        assert_eq!(b.volume, "/vol/J750-02/d/1.txt");
        assert_eq!(b.duplicate_of, None);
        assert!(!resolver.is_redirected());
    }
}
