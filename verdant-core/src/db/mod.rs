//! The persistent data service
//!
//! [`DataService`] owns the store: one SQLite file, one executor in front of
//! it, a shared read cache, per-entity repositories, and the backup engine.
//! Construction opens (and migrates) the store; everything else hangs off the
//! returned handle.

pub mod backup;
pub mod cache;
pub mod executor;
pub mod export;
pub mod monitor;
pub mod perf;
pub mod repo;
pub mod schema;

use crate::config::Config;
use crate::error::Result;
use crate::types::*;
use backup::{BackupEngine, OptimizeReport};
use cache::Cache;
use executor::Executor;
use export::{Exporter, ImportReport};
use monitor::{HealthMonitor, HealthReport};
use perf::{ClassStats, PerfMonitor};
use repo::{AutomationLogRepo, Repository, SensorReadingRepo, SettingsRepo};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Handle to the local store and every service built on it
pub struct DataService {
    config: Config,
    db_path: PathBuf,
    exec: Arc<Executor>,
    cache: Arc<Cache>,
    monitor: Arc<HealthMonitor>,
    perf: Arc<PerfMonitor>,
    backup: BackupEngine,
    exporter: Exporter,

    pub users: Repository<User>,
    pub rooms: Repository<Room>,
    pub strains: Repository<Strain>,
    pub plants: Repository<Plant>,
    pub devices: Repository<SensorDevice>,
    pub rules: Repository<AutomationRule>,
    pub notes: Repository<PlantNote>,
    pub readings: SensorReadingRepo,
    pub automation_logs: AutomationLogRepo,
    pub settings: SettingsRepo,

    shutdown: watch::Sender<bool>,
}

impl DataService {
    /// Open the store at the configured default location
    pub fn open(config: Config) -> Result<Self> {
        let db_path = config.database_path();
        Self::open_at(&db_path, config)
    }

    /// Open (creating and migrating as needed) the store at `path`
    pub fn open_at(path: &Path, config: Config) -> Result<Self> {
        let mut conn = schema::open_connection(path, &config.database)?;
        schema::initialize(&mut conn)?;

        let monitor = Arc::new(HealthMonitor::new());
        let perf = Arc::new(PerfMonitor::new());
        let exec = Arc::new(Executor::new(
            conn,
            monitor.clone(),
            perf.clone(),
            &config.database,
        ));
        let cache = Arc::new(Cache::new(config.database.cache_ttl()));

        let backup_dir = config.backup_dir();
        let backup = BackupEngine::new(
            exec.clone(),
            cache.clone(),
            config.database.clone(),
            config.backup.clone(),
            path.to_path_buf(),
            backup_dir,
        );
        let exporter = Exporter::new(exec.clone(), cache.clone());
        let (shutdown, _) = watch::channel(false);

        tracing::info!(path = %path.display(), "Store opened");

        Ok(Self {
            users: Repository::new(exec.clone(), cache.clone()),
            rooms: Repository::new(exec.clone(), cache.clone()),
            strains: Repository::new(exec.clone(), cache.clone()),
            plants: Repository::new(exec.clone(), cache.clone()),
            devices: Repository::new(exec.clone(), cache.clone()),
            rules: Repository::new(exec.clone(), cache.clone()),
            notes: Repository::new(exec.clone(), cache.clone()),
            readings: SensorReadingRepo::new(exec.clone()),
            automation_logs: AutomationLogRepo::new(exec.clone(), cache.clone()),
            settings: SettingsRepo::new(exec.clone()),
            db_path: path.to_path_buf(),
            exec,
            cache,
            monitor,
            perf,
            backup,
            exporter,
            config,
            shutdown,
        })
    }

    // ============================================
    // Observability
    // ============================================

    /// Rolling health assessment from the recorded error history
    pub fn health_report(&self) -> HealthReport {
        self.monitor.health_report()
    }

    /// Per-statement-class latency snapshot
    pub fn performance_report(&self) -> Vec<ClassStats> {
        self.perf.snapshot()
    }

    /// Size of the store file on disk
    pub fn database_size_bytes(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.db_path)?.len())
    }

    /// Row count per table, in schema declaration order
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        self.exec
            .read("store.table_counts", perf::StatementClass::Select, |conn| {
                let mut counts = Vec::with_capacity(schema::TABLES.len());
                for table in schema::TABLES {
                    let sql = format!("SELECT COUNT(*) FROM {}", table.name);
                    let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
                    counts.push((table.name, n));
                }
                Ok(counts)
            })
    }

    /// Run a fallible read, degrade to `fallback` when the failure is
    /// low-severity, and record it either way.
    pub fn resolve<T>(&self, err: crate::error::Error, context: &str, fallback: T) -> Result<T> {
        self.monitor.resolve(err, context, fallback)
    }

    // ============================================
    // Backup / restore / maintenance
    // ============================================

    pub fn create_backup(&self, kind: BackupKind) -> Result<BackupInfo> {
        self.backup.create_backup(kind)
    }

    pub fn restore(&self, backup_path: &Path) -> Result<()> {
        self.backup.restore(backup_path)
    }

    pub fn verify_backup(&self, backup_path: &Path) -> Result<bool> {
        self.backup.verify_backup(backup_path)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        self.backup.list_backups()
    }

    pub fn optimize(&self) -> Result<OptimizeReport> {
        self.backup.optimize()
    }

    // ============================================
    // Export / import
    // ============================================

    pub fn export_data(&self, owner: Option<&str>) -> Result<serde_json::Value> {
        self.exporter.export_data(owner)
    }

    pub fn import_data(
        &self,
        envelope: &serde_json::Value,
        rewrite_owner: Option<&str>,
    ) -> Result<ImportReport> {
        self.exporter.import_data(envelope, rewrite_owner)
    }

    // ============================================
    // Background maintenance
    // ============================================

    /// Spawn the scheduled backup and maintenance timers. Tasks stop when
    /// [`close`](Self::close) flips the shutdown signal.
    pub fn start_background_tasks(self: Arc<Self>) {
        let service = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let backup_interval = self.config.backup.backup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(backup_interval);
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let svc = service.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            svc.create_backup(BackupKind::Scheduled)
                        })
                        .await;
                        match result {
                            Ok(Ok(info)) => {
                                tracing::info!(path = %info.path, "Scheduled backup complete")
                            }
                            Ok(Err(e)) => tracing::error!("Scheduled backup failed: {}", e),
                            Err(e) => tracing::error!("Scheduled backup panicked: {}", e),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });

        let service = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let optimize_interval = self.config.backup.optimize_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(optimize_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let svc = service.clone();
                        let result =
                            tokio::task::spawn_blocking(move || svc.optimize()).await;
                        match result {
                            Ok(Ok(report)) => tracing::info!(
                                readings_purged = report.readings_purged,
                                "Scheduled maintenance complete"
                            ),
                            Ok(Err(e)) => tracing::error!("Scheduled maintenance failed: {}", e),
                            Err(e) => tracing::error!("Scheduled maintenance panicked: {}", e),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    /// Stop background tasks and close the store handle
    pub fn close(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.cache.clear();
        self.exec.close()?;
        tracing::info!("Store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_service(dir: &TempDir) -> DataService {
        let mut config = Config::default();
        config.backup.backup_dir = Some(dir.path().join("backups"));
        DataService::open_at(&dir.path().join("verdant.db"), config).unwrap()
    }

    #[test]
    fn test_open_creates_and_migrates() {
        let dir = TempDir::new().unwrap();
        let svc = open_service(&dir);
        assert!(svc.database_size_bytes().unwrap() > 0);

        let report = svc.health_report();
        assert_eq!(report.score, 100);

        let counts = svc.table_counts().unwrap();
        assert_eq!(counts.len(), schema::TABLES.len());
        assert!(counts.iter().all(|(_, n)| *n == 0));
        svc.close().unwrap();
    }

    #[test]
    fn test_reopen_existing_store() {
        let dir = TempDir::new().unwrap();
        let svc = open_service(&dir);
        let room = svc.rooms.create(Room::new("o1", "Tent")).unwrap();
        svc.close().unwrap();

        let svc = open_service(&dir);
        let found = svc.rooms.get_by_id(&room.id, "o1").unwrap().unwrap();
        assert_eq!(found.name, "Tent");
        svc.close().unwrap();
    }

    #[test]
    fn test_performance_report_populates() {
        let dir = TempDir::new().unwrap();
        let svc = open_service(&dir);
        svc.rooms.create(Room::new("o1", "Tent")).unwrap();
        svc.rooms.get_all("o1").unwrap();

        let stats = svc.performance_report();
        assert!(stats
            .iter()
            .any(|s| s.class == perf::StatementClass::Insert && s.count >= 1));
        assert!(stats
            .iter()
            .any(|s| s.class == perf::StatementClass::Select && s.count >= 1));
        svc.close().unwrap();
    }
}
