//! End-to-end tests over the full service surface: open a real store in a
//! temp directory, drive it through the public API, and check the
//! cross-component guarantees (cache behavior, backup/restore, retention,
//! health reporting, export/import).

use std::path::Path;
use tempfile::TempDir;
use verdant_core::db::perf::StatementClass;
use verdant_core::types::*;
use verdant_core::{Config, DataService, Error};

fn open_service(dir: &TempDir) -> DataService {
    let mut config = Config::default();
    config.backup.backup_dir = Some(dir.path().join("backups"));
    DataService::open_at(&dir.path().join("verdant.db"), config).unwrap()
}

fn select_count(svc: &DataService) -> u64 {
    svc.performance_report()
        .iter()
        .find(|s| s.class == StatementClass::Select)
        .map(|s| s.count)
        .unwrap_or(0)
}

fn seed_grow(svc: &DataService, owner: &str) -> (Room, Strain, Plant) {
    let room = svc.rooms.create(Room::new(owner, "Veg Tent")).unwrap();
    let strain = svc.strains.create(Strain::new(owner, "Blue Dream")).unwrap();
    let plant = svc
        .plants
        .create(Plant::new(owner, "Plant A", &room.id, &strain.id))
        .unwrap();
    (room, strain, plant)
}

#[test]
fn full_grow_lifecycle() {
    let dir = TempDir::new().unwrap();
    let svc = open_service(&dir);
    let (room, _strain, plant) = seed_grow(&svc, "o1");

    // Note attached to the plant
    let note = svc
        .notes
        .create(PlantNote::new("o1", &plant.id, "topped today"))
        .unwrap();
    assert_eq!(note.plant_id, plant.id);

    // Advance the plant through a stage change
    let mut plant = plant;
    plant.growth_stage = GrowthStage::Vegetative;
    plant.watering_count += 1;
    let plant = svc.plants.update(&plant).unwrap();
    assert_eq!(plant.growth_stage, GrowthStage::Vegetative);
    assert!(plant.updated_at >= plant.created_at);

    // Archive it; it drops out of listings but the note still resolves
    assert!(svc.plants.delete(&plant.id, "o1").unwrap());
    assert!(svc.plants.get_all("o1").unwrap().is_empty());
    let archived = svc.plants.get_by_id(&plant.id, "o1").unwrap().unwrap();
    assert_eq!(archived.status, EntityStatus::Archived);
    assert!(svc.notes.get_by_id(&note.id, "o1").unwrap().is_some());

    // Typed settings ride along in the same store
    svc.settings
        .set("reminders", "o1", &SettingValue::Bool(true))
        .unwrap();
    assert_eq!(
        svc.settings.get("reminders", "o1").unwrap().unwrap(),
        SettingValue::Bool(true)
    );

    let _ = room;
    svc.close().unwrap();
}

#[test]
fn cached_reads_skip_the_store() {
    let dir = TempDir::new().unwrap();
    let svc = open_service(&dir);
    let room = svc.rooms.create(Room::new("o1", "Tent")).unwrap();

    // create() leaves the fresh entity cached, so reads by id never touch
    // the store until something invalidates the owner scope.
    let before = select_count(&svc);
    for _ in 0..5 {
        let cached = svc.rooms.get_by_id(&room.id, "o1").unwrap().unwrap();
        assert_eq!(cached.name, "Tent");
    }
    assert_eq!(select_count(&svc), before, "reads served from cache");

    // A write invalidates; the next read round-trips and re-primes
    let mut room = room;
    room.name = "Tent 2".to_string();
    svc.rooms.update(&room).unwrap();
    let fresh = svc.rooms.get_by_id(&room.id, "o1").unwrap().unwrap();
    assert_eq!(fresh.name, "Tent 2", "no stale read after a write");

    svc.close().unwrap();
}

#[test]
fn writes_invalidate_only_their_owner() {
    let dir = TempDir::new().unwrap();
    let svc = open_service(&dir);

    let r1 = svc.rooms.create(Room::new("o1", "Tent 1")).unwrap();
    let r2 = svc.rooms.create(Room::new("o2", "Tent 2")).unwrap();
    // Prime both owners' caches
    svc.rooms.get_by_id(&r1.id, "o1").unwrap();
    svc.rooms.get_by_id(&r2.id, "o2").unwrap();

    // A write under o1 must not evict o2's entries
    svc.strains.create(Strain::new("o1", "Haze")).unwrap();
    let before = select_count(&svc);
    svc.rooms.get_by_id(&r2.id, "o2").unwrap();
    assert_eq!(select_count(&svc), before, "o2 still cached");

    // o1's entry was evicted; this read goes to the store
    svc.rooms.get_by_id(&r1.id, "o1").unwrap();
    assert_eq!(select_count(&svc), before + 1);

    svc.close().unwrap();
}

#[test]
fn backup_restore_round_trip() {
    let dir = TempDir::new().unwrap();
    let svc = open_service(&dir);
    seed_grow(&svc, "o1");

    let info = svc.create_backup(BackupKind::Manual).unwrap();
    assert!(svc.verify_backup(Path::new(&info.path)).unwrap());
    assert_eq!(info.record_count, 3);

    // Diverge from the snapshot, then roll back to it
    svc.rooms.create(Room::new("o1", "Extra Tent")).unwrap();
    assert_eq!(svc.rooms.get_all("o1").unwrap().len(), 2);

    svc.restore(Path::new(&info.path)).unwrap();

    // The restored store file carries the exact content the backup
    // fingerprinted at snapshot time
    let restored_checksum =
        verdant_core::db::backup::sha256_file_hex(&dir.path().join("verdant.db")).unwrap();
    assert_eq!(restored_checksum, info.checksum);

    assert_eq!(svc.rooms.get_all("o1").unwrap().len(), 1);
    assert_eq!(svc.plants.get_all("o1").unwrap().len(), 1);

    // The restore logged its own safety snapshot
    let kinds: Vec<BackupKind> = svc
        .list_backups()
        .unwrap()
        .into_iter()
        .map(|b| b.kind)
        .collect();
    assert!(kinds.contains(&BackupKind::PreRestore));
    assert!(kinds.contains(&BackupKind::Manual));

    svc.close().unwrap();
}

#[test]
fn backup_rotation_keeps_newest() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.backup.backup_dir = Some(dir.path().join("backups"));
    config.backup.max_backup_files = 3;
    let svc = DataService::open_at(&dir.path().join("verdant.db"), config).unwrap();

    let mut paths = Vec::new();
    for _ in 0..5 {
        paths.push(svc.create_backup(BackupKind::Manual).unwrap().path);
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    // Two oldest rotated out, three newest kept
    assert!(!Path::new(&paths[0]).exists());
    assert!(!Path::new(&paths[1]).exists());
    for path in &paths[2..] {
        assert!(Path::new(path).exists());
    }

    svc.close().unwrap();
}

#[test]
fn retention_purges_old_time_series() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.backup.backup_dir = Some(dir.path().join("backups"));
    config.backup.data_retention_days = 30;
    let svc = DataService::open_at(&dir.path().join("verdant.db"), config).unwrap();

    let device = svc
        .devices
        .create(SensorDevice::new("o1", "Probe", "temperature"))
        .unwrap();
    let now = chrono::Utc::now();
    for days_ago in [40i64, 10] {
        svc.readings
            .append(SensorReading {
                id: None,
                owner_id: "o1".to_string(),
                device_id: device.id.clone(),
                recorded_at: now - chrono::Duration::days(days_ago),
                value: 20.0,
                unit: Some("c".to_string()),
            })
            .unwrap();
    }

    let report = svc.optimize().unwrap();
    assert_eq!(report.readings_purged, 1);

    let remaining = svc.readings.for_device(&device.id, "o1", None, 100).unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].recorded_at > now - chrono::Duration::days(30));

    svc.close().unwrap();
}

#[test]
fn health_degrades_with_error_volume() {
    let dir = TempDir::new().unwrap();
    let svc = open_service(&dir);

    assert_eq!(svc.health_report().score, 100);

    // Constraint violations: recorded, never retried, medium severity
    for i in 0..25 {
        let bad = Plant::new("o1", &format!("ghost {}", i), "no-room", "no-strain");
        let err = svc.plants.create(bad).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    let report = svc.health_report();
    assert_eq!(report.total_errors_recorded, 25);
    assert_eq!(report.score, 85, "volume alone degrades the score one step");
    assert_eq!(report.counts_last_hour.get("constraint"), Some(&25));
    assert!(!report.recommendations.is_empty());

    svc.close().unwrap();
}

#[test]
fn export_import_moves_a_store() {
    let dir = TempDir::new().unwrap();
    let svc = open_service(&dir);
    let (_, _, plant) = seed_grow(&svc, "o1");
    svc.notes
        .create(PlantNote::new("o1", &plant.id, "looking good"))
        .unwrap();

    let envelope = svc.export_data(None).unwrap();
    svc.close().unwrap();

    let dir2 = TempDir::new().unwrap();
    let svc2 = open_service(&dir2);
    let report = svc2.import_data(&envelope, None).unwrap();
    assert_eq!(report.total_rows, 4);

    let plants = svc2.plants.get_all("o1").unwrap();
    assert_eq!(plants.len(), 1);
    assert_eq!(plants[0].id, plant.id);

    // Exporting the imported store yields the same tenant tables
    let envelope2 = svc2.export_data(None).unwrap();
    assert_eq!(envelope2["plants"], envelope["plants"]);
    assert_eq!(envelope2["plant_notes"], envelope["plant_notes"]);

    svc2.close().unwrap();
}

#[test]
fn import_rehomes_under_new_owner() {
    let dir = TempDir::new().unwrap();
    let svc = open_service(&dir);
    seed_grow(&svc, "phone-a");
    let envelope = svc.export_data(Some("phone-a")).unwrap();
    svc.close().unwrap();

    let dir2 = TempDir::new().unwrap();
    let svc2 = open_service(&dir2);
    svc2.import_data(&envelope, Some("phone-b")).unwrap();

    assert!(svc2.plants.get_all("phone-a").unwrap().is_empty());
    assert_eq!(svc2.plants.get_all("phone-b").unwrap().len(), 1);

    svc2.close().unwrap();
}

#[tokio::test]
async fn background_tasks_stop_on_close() {
    let dir = TempDir::new().unwrap();
    let svc = std::sync::Arc::new(open_service(&dir));
    svc.clone().start_background_tasks();

    // Close flips the shutdown signal; the store handle is gone afterwards
    svc.close().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let err = svc.rooms.get_all("o1").unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
}
