//! Backup, restore, and store maintenance
//!
//! Backups are whole-file snapshots taken after a WAL checkpoint, fingerprinted
//! with SHA-256, and logged to the `backup_logs` table. Retention rotates the
//! oldest files out once the cap is exceeded. Restore always takes a safety
//! snapshot of the live store first, so a bad restore can itself be undone.

use crate::config::{BackupConfig, DatabaseConfig};
use crate::db::cache::Cache;
use crate::db::executor::Executor;
use crate::db::perf::StatementClass;
use crate::db::schema;
use crate::error::{Error, Result};
use crate::types::{BackupInfo, BackupKind};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// First bytes of every SQLite database file
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

/// Result of one maintenance pass
#[derive(Debug, Clone, Serialize)]
pub struct OptimizeReport {
    pub readings_purged: usize,
    pub automation_logs_purged: usize,
    pub backup_logs_purged: usize,
    pub size_before_bytes: u64,
    pub size_after_bytes: u64,
}

/// Whole-file snapshot engine over the live store
pub struct BackupEngine {
    exec: Arc<Executor>,
    cache: Arc<Cache>,
    db_config: DatabaseConfig,
    backup_config: BackupConfig,
    db_path: PathBuf,
    backup_dir: PathBuf,
}

impl BackupEngine {
    pub fn new(
        exec: Arc<Executor>,
        cache: Arc<Cache>,
        db_config: DatabaseConfig,
        backup_config: BackupConfig,
        db_path: PathBuf,
        backup_dir: PathBuf,
    ) -> Self {
        Self {
            exec,
            cache,
            db_config,
            backup_config,
            db_path,
            backup_dir,
        }
    }

    /// Snapshot the store into the backup directory.
    ///
    /// The WAL is checkpointed first so the main file alone is the complete
    /// store. Rotation runs afterwards, except for pre-restore snapshots:
    /// those must survive until the restore that requested them finishes.
    pub fn create_backup(&self, kind: BackupKind) -> Result<BackupInfo> {
        std::fs::create_dir_all(&self.backup_dir)?;

        let record_count = self.tenant_row_count()?;

        // Fold WAL contents into the main file before copying it
        self.exec.with_connection(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            Ok(())
        })?;

        let created_at = Utc::now();
        let file_name = format!(
            "verdant_backup_{}_{}.db",
            kind,
            created_at.timestamp_millis()
        );
        let dest = self.backup_dir.join(file_name);
        std::fs::copy(&self.db_path, &dest)?;

        let size_bytes = std::fs::metadata(&dest)?.len();
        let checksum = sha256_file_hex(&dest)?;
        let schema_version = self
            .exec
            .with_connection(schema::get_schema_version)?;

        let info = BackupInfo {
            id: None,
            created_at,
            kind,
            path: dest.to_string_lossy().into_owned(),
            size_bytes,
            record_count,
            checksum,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            schema_version,
            status: "completed".to_string(),
        };

        let mut info = info;
        info.id = Some(self.log_backup(&info)?);

        tracing::info!(
            kind = %kind,
            path = %info.path,
            size_bytes,
            record_count,
            "Backup created"
        );

        if kind != BackupKind::PreRestore {
            self.prune_backups()?;
        }
        Ok(info)
    }

    /// Replace the live store with the contents of `backup_path`.
    ///
    /// A pre-restore snapshot of the current store is taken first. If any
    /// later step fails the returned error names that snapshot, which is the
    /// path to recover from.
    pub fn restore(&self, backup_path: &Path) -> Result<()> {
        if !backup_path.exists() {
            return Err(Error::Backup(format!(
                "backup file not found: {}",
                backup_path.display()
            )));
        }
        if !has_sqlite_header(backup_path)? {
            return Err(Error::Backup(format!(
                "not a SQLite database: {}",
                backup_path.display()
            )));
        }

        let snapshot = self.create_backup(BackupKind::PreRestore)?;
        tracing::info!(snapshot = %snapshot.path, "Pre-restore snapshot taken");

        self.exec.close()?;
        let outcome = self.swap_store_file(backup_path);
        if let Err(e) = outcome {
            return Err(Error::Backup(format!(
                "restore from {} failed: {}; pre-restore snapshot at {}",
                backup_path.display(),
                e,
                snapshot.path
            )));
        }

        self.cache.clear();
        tracing::info!(from = %backup_path.display(), "Restore complete");
        Ok(())
    }

    fn swap_store_file(&self, backup_path: &Path) -> Result<()> {
        // Stale WAL/SHM sidecars would shadow the restored file
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = self.db_path.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
            }
        }
        std::fs::copy(backup_path, &self.db_path)?;

        self.exec.reopen(&self.db_path, &self.db_config)?;
        // The restored store may predate the current schema
        self.exec.with_connection_mut(schema::initialize)?;
        let ok: String = self.exec.with_connection(|conn| {
            Ok(conn.query_row("PRAGMA quick_check", [], |r| r.get(0))?)
        })?;
        if ok != "ok" {
            return Err(Error::Backup(format!("integrity check failed: {}", ok)));
        }
        Ok(())
    }

    /// Purge time-series rows past the retention window, then compact and
    /// re-analyze the store.
    pub fn optimize(&self) -> Result<OptimizeReport> {
        let size_before_bytes = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);
        let cutoff = Utc::now() - chrono::Duration::days(self.backup_config.data_retention_days);
        let cutoff = crate::db::repo::ts(&cutoff);

        let (readings_purged, automation_logs_purged, backup_logs_purged) =
            self.exec
                .write("maintenance.purge", StatementClass::Delete, |tx| {
                    let readings = tx.execute(
                        "DELETE FROM sensor_readings WHERE recorded_at < ?1",
                        params![cutoff],
                    )?;
                    let logs = tx.execute(
                        "DELETE FROM automation_logs WHERE executed_at < ?1",
                        params![cutoff],
                    )?;
                    // Backup history ages out on the same window as the
                    // other time-series tables.
                    let backups = tx.execute(
                        "DELETE FROM backup_logs WHERE created_at < ?1",
                        params![cutoff],
                    )?;
                    Ok((readings, logs, backups))
                })?;

        // VACUUM cannot run inside a transaction
        self.exec.with_connection(|conn| {
            conn.execute_batch("VACUUM; REINDEX; ANALYZE;")?;
            Ok(())
        })?;

        let size_after_bytes = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);
        let report = OptimizeReport {
            readings_purged,
            automation_logs_purged,
            backup_logs_purged,
            size_before_bytes,
            size_after_bytes,
        };
        tracing::info!(
            readings_purged,
            automation_logs_purged,
            backup_logs_purged,
            size_before_bytes,
            size_after_bytes,
            "Maintenance pass complete"
        );
        Ok(report)
    }

    /// Recompute a backup file's checksum against its logged fingerprint
    pub fn verify_backup(&self, backup_path: &Path) -> Result<bool> {
        if !backup_path.exists() || !has_sqlite_header(backup_path)? {
            return Ok(false);
        }
        let path_str = backup_path.to_string_lossy().into_owned();
        let recorded: Option<String> = self
            .exec
            .read("backup_logs.checksum", StatementClass::Select, |conn| {
                conn.query_row(
                    "SELECT checksum FROM backup_logs WHERE path = ?1",
                    params![path_str],
                    |r| r.get(0),
                )
                .optional()
            })?;

        let Some(recorded) = recorded else {
            return Err(Error::Backup(format!(
                "no backup record for {}",
                backup_path.display()
            )));
        };
        Ok(sha256_file_hex(backup_path)? == recorded)
    }

    /// Backup history, newest first
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        self.exec
            .read("backup_logs.list", StatementClass::Select, |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM backup_logs ORDER BY created_at DESC",
                )?;
                let rows = stmt.query_map([], backup_info_from_row)?;
                rows.collect()
            })
    }

    fn tenant_row_count(&self) -> Result<i64> {
        self.exec
            .read("backup.record_count", StatementClass::Select, |conn| {
                let mut total: i64 = 0;
                for table in schema::TABLES.iter().filter(|t| t.owner_scoped) {
                    let sql = format!("SELECT COUNT(*) FROM {}", table.name);
                    total += conn.query_row(&sql, [], |r| r.get::<_, i64>(0))?;
                }
                Ok(total)
            })
    }

    fn log_backup(&self, info: &BackupInfo) -> Result<i64> {
        self.exec
            .write("backup_logs.insert", StatementClass::Insert, |tx| {
                tx.execute(
                    "INSERT INTO backup_logs (created_at, kind, path, size_bytes, record_count,
                        checksum, app_version, schema_version, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        crate::db::repo::ts(&info.created_at),
                        info.kind.as_str(),
                        info.path,
                        info.size_bytes as i64,
                        info.record_count,
                        info.checksum,
                        info.app_version,
                        info.schema_version,
                        info.status,
                    ],
                )?;
                Ok(tx.last_insert_rowid())
            })
    }

    /// Delete the oldest backup files beyond the retention cap. Rotated
    /// entries stay in the log with their status flipped so history shows
    /// what existed.
    fn prune_backups(&self) -> Result<()> {
        let mut files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
        for entry in std::fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("verdant_backup_") && name.ends_with(".db") {
                let modified = entry.metadata()?.modified()?;
                files.push((entry.path(), modified));
            }
        }
        if files.len() <= self.backup_config.max_backup_files {
            return Ok(());
        }

        files.sort_by_key(|(_, modified)| *modified);
        let excess = files.len() - self.backup_config.max_backup_files;
        for (path, _) in files.into_iter().take(excess) {
            tracing::info!(path = %path.display(), "Rotating out old backup");
            std::fs::remove_file(&path)?;
            let path_str = path.to_string_lossy().into_owned();
            self.exec
                .write("backup_logs.rotate", StatementClass::Update, |tx| {
                    tx.execute(
                        "UPDATE backup_logs SET status = 'rotated' WHERE path = ?1",
                        params![path_str],
                    )?;
                    Ok(())
                })?;
        }
        Ok(())
    }
}

fn backup_info_from_row(row: &Row) -> rusqlite::Result<BackupInfo> {
    Ok(BackupInfo {
        id: row.get("id")?,
        created_at: crate::db::repo::parse_ts(&row.get::<_, String>("created_at")?),
        kind: row
            .get::<_, String>("kind")?
            .parse()
            .unwrap_or(BackupKind::Manual),
        path: row.get("path")?,
        size_bytes: row.get::<_, i64>("size_bytes")? as u64,
        record_count: row.get("record_count")?,
        checksum: row.get("checksum")?,
        app_version: row.get("app_version")?,
        schema_version: row.get("schema_version")?,
        status: row.get("status")?,
    })
}

/// Streaming SHA-256 of a file, hex-encoded
pub fn sha256_file_hex(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn has_sqlite_header(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    let mut header = [0u8; 16];
    match file.read_exact(&mut header) {
        Ok(()) => Ok(header == *SQLITE_MAGIC),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::monitor::HealthMonitor;
    use crate::db::perf::PerfMonitor;
    use crate::db::repo::Repository;
    use crate::types::Room;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir) -> (BackupEngine, Arc<Executor>, Arc<Cache>) {
        let config = Config::default();
        let db_path = dir.path().join("verdant.db");
        let backup_dir = dir.path().join("backups");

        let mut conn = schema::open_connection(&db_path, &config.database).unwrap();
        schema::initialize(&mut conn).unwrap();
        let exec = Arc::new(Executor::new(
            conn,
            Arc::new(HealthMonitor::new()),
            Arc::new(PerfMonitor::new()),
            &config.database,
        ));
        let cache = Arc::new(Cache::new(Duration::from_secs(300)));
        let engine = BackupEngine::new(
            exec.clone(),
            cache.clone(),
            config.database.clone(),
            config.backup.clone(),
            db_path,
            backup_dir,
        );
        (engine, exec, cache)
    }

    fn room_count(exec: &Executor) -> i64 {
        exec.read("rooms.count", StatementClass::Select, |conn| {
            conn.query_row("SELECT COUNT(*) FROM rooms", [], |r| r.get(0))
        })
        .unwrap()
    }

    #[test]
    fn test_backup_checksum_and_log() {
        let dir = TempDir::new().unwrap();
        let (engine, exec, cache) = fixture(&dir);
        let rooms: Repository<Room> = Repository::new(exec, cache);
        rooms.create(Room::new("o1", "Tent")).unwrap();

        let info = engine.create_backup(BackupKind::Manual).unwrap();
        let path = Path::new(&info.path);
        assert!(path.exists());
        assert_eq!(info.record_count, 1);
        assert_eq!(info.schema_version, schema::SCHEMA_VERSION);
        assert_eq!(info.checksum, sha256_file_hex(path).unwrap());
        assert!(engine.verify_backup(path).unwrap());

        let listed = engine.list_backups().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].checksum, info.checksum);
    }

    #[test]
    fn test_backup_file_name_carries_unix_millis() {
        let dir = TempDir::new().unwrap();
        let (engine, _exec, _cache) = fixture(&dir);

        let info = engine.create_backup(BackupKind::Scheduled).unwrap();
        let name = Path::new(&info.path)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let suffix = name
            .strip_prefix("verdant_backup_scheduled_")
            .unwrap()
            .strip_suffix(".db")
            .unwrap();
        let millis: i64 = suffix.parse().unwrap();
        assert_eq!(millis, info.created_at.timestamp_millis());
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let (engine, _exec, _cache) = fixture(&dir);

        let info = engine.create_backup(BackupKind::Manual).unwrap();
        let path = PathBuf::from(&info.path);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[100] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        assert!(!engine.verify_backup(&path).unwrap());
    }

    #[test]
    fn test_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let (engine, exec, cache) = fixture(&dir);
        let rooms: Repository<Room> = Repository::new(exec.clone(), cache);

        rooms.create(Room::new("o1", "Tent A")).unwrap();
        let info = engine.create_backup(BackupKind::Manual).unwrap();

        rooms.create(Room::new("o1", "Tent B")).unwrap();
        assert_eq!(room_count(&exec), 2);

        engine.restore(Path::new(&info.path)).unwrap();
        assert!(exec.is_open());
        assert_eq!(room_count(&exec), 1, "post-backup write rolled away");

        // A pre-restore snapshot was logged alongside the manual one
        let kinds: Vec<BackupKind> = engine
            .list_backups()
            .unwrap()
            .into_iter()
            .map(|b| b.kind)
            .collect();
        assert!(kinds.contains(&BackupKind::PreRestore));
    }

    #[test]
    fn test_restore_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let (engine, exec, _cache) = fixture(&dir);

        let bogus = dir.path().join("not_a_db.db");
        std::fs::write(&bogus, b"hello world, definitely not sqlite").unwrap();

        let err = engine.restore(&bogus).unwrap_err();
        assert!(matches!(err, Error::Backup(_)));
        // The live store is untouched
        assert!(exec.is_open());
    }

    #[test]
    fn test_retention_rotation() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _exec, _cache) = fixture(&dir);
        engine.backup_config.max_backup_files = 3;

        for _ in 0..5 {
            engine.create_backup(BackupKind::Manual).unwrap();
            // Distinct mtimes and file names
            std::thread::sleep(Duration::from_millis(5));
        }

        let on_disk = std::fs::read_dir(dir.path().join("backups"))
            .unwrap()
            .count();
        assert_eq!(on_disk, 3);

        let rotated = engine
            .list_backups()
            .unwrap()
            .into_iter()
            .filter(|b| b.status == "rotated")
            .count();
        assert_eq!(rotated, 2);
        // The survivors are the three newest
        let live: Vec<BackupInfo> = engine
            .list_backups()
            .unwrap()
            .into_iter()
            .filter(|b| b.status == "completed")
            .collect();
        assert_eq!(live.len(), 3);
        for b in live {
            assert!(Path::new(&b.path).exists());
        }
    }

    #[test]
    fn test_optimize_purges_and_compacts() {
        let dir = TempDir::new().unwrap();
        let (mut engine, exec, cache) = fixture(&dir);
        engine.backup_config.data_retention_days = 30;

        let rooms: Repository<Room> = Repository::new(exec.clone(), cache.clone());
        let devices: Repository<crate::types::SensorDevice> =
            Repository::new(exec.clone(), cache);
        let room = rooms.create(Room::new("o1", "Tent")).unwrap();
        let mut device = crate::types::SensorDevice::new("o1", "Probe", "temperature");
        device.room_id = Some(room.id.clone());
        let device = devices.create(device).unwrap();

        let readings = crate::db::repo::SensorReadingRepo::new(exec);
        let now = Utc::now();
        for days_ago in [40, 10] {
            readings
                .append(crate::types::SensorReading {
                    id: None,
                    owner_id: "o1".to_string(),
                    device_id: device.id.clone(),
                    recorded_at: now - chrono::Duration::days(days_ago),
                    value: 20.0,
                    unit: None,
                })
                .unwrap();
        }

        let report = engine.optimize().unwrap();
        assert_eq!(report.readings_purged, 1);
        assert_eq!(report.automation_logs_purged, 0);
        assert_eq!(report.backup_logs_purged, 0);

        let remaining = readings.latest(&device.id, "o1").unwrap().unwrap();
        assert_eq!(remaining.recorded_at.date_naive(), (now - chrono::Duration::days(10)).date_naive());
    }

    #[test]
    fn test_optimize_ages_out_backup_history() {
        let dir = TempDir::new().unwrap();
        let (mut engine, exec, _cache) = fixture(&dir);
        engine.backup_config.data_retention_days = 30;

        // One live entry, one past the retention window
        engine.create_backup(BackupKind::Manual).unwrap();
        let old = crate::db::repo::ts(&(Utc::now() - chrono::Duration::days(40)));
        exec.write("backup_logs.insert", StatementClass::Insert, |tx| {
            tx.execute(
                "INSERT INTO backup_logs (created_at, kind, path, checksum, app_version, schema_version)
                 VALUES (?1, 'manual', '/tmp/gone.db', 'deadbeef', '0.0.1', 1)",
                params![old],
            )?;
            Ok(())
        })
        .unwrap();
        assert_eq!(engine.list_backups().unwrap().len(), 2);

        let report = engine.optimize().unwrap();
        assert_eq!(report.backup_logs_purged, 1);

        let remaining = engine.list_backups().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].schema_version, schema::SCHEMA_VERSION);
    }
}
