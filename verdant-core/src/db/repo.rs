//! Per-entity repositories
//!
//! Each aggregate gets a [`Repository`] instance parameterized by its
//! [`EntityRecord`] mapping: a plain object holding the shared executor and
//! cache, not a mixin over a hidden connection. Reads consult the cache
//! first; every successful write clears the owner's cache scope before it
//! returns, so a caller always observes its own writes.
//!
//! Time-series tables (sensor readings, automation logs) have dedicated
//! repositories: append-heavy, never cached, purged by the maintenance pass.

use crate::db::cache::Cache;
use crate::db::executor::Executor;
use crate::db::perf::StatementClass;
use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Timestamp column format. Millisecond precision with a trailing Z, the
/// same shape the updated_at triggers write.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn opt_ts(dt: &Option<DateTime<Utc>>) -> SqlValue {
    match dt {
        Some(dt) => SqlValue::Text(ts(dt)),
        None => SqlValue::Null,
    }
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn get_ts(row: &Row, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(col)?;
    Ok(parse_ts(&s))
}

fn get_opt_ts(row: &Row, col: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(col)?;
    Ok(s.map(|s| parse_ts(&s)))
}

fn get_json(row: &Row, col: &str) -> rusqlite::Result<serde_json::Value> {
    let s: String = row.get(col)?;
    Ok(serde_json::from_str(&s).unwrap_or_else(|_| serde_json::json!({})))
}

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

fn opt_text(s: &Option<String>) -> SqlValue {
    match s {
        Some(s) => SqlValue::Text(s.clone()),
        None => SqlValue::Null,
    }
}

fn opt_real(v: &Option<f64>) -> SqlValue {
    match v {
        Some(v) => SqlValue::Real(*v),
        None => SqlValue::Null,
    }
}

fn opt_int(v: &Option<i64>) -> SqlValue {
    match v {
        Some(v) => SqlValue::Integer(*v),
        None => SqlValue::Null,
    }
}

fn json_col(v: &serde_json::Value) -> SqlValue {
    SqlValue::Text(v.to_string())
}

// ============================================
// Aggregate mapping
// ============================================

/// Row mapping for one aggregate entity kind.
///
/// A closed set of implementations (the seven aggregates); the generic
/// [`Repository`] provides the uniform CRUD contract over them.
pub trait EntityRecord: Serialize + DeserializeOwned + Clone {
    const TABLE: &'static str;
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn owner_id(&self) -> &str;
    fn from_row(row: &Row) -> rusqlite::Result<Self>;

    /// Full-column INSERT with positional placeholders
    fn insert_sql() -> &'static str;
    fn insert_params(&self) -> Vec<SqlValue>;

    /// UPDATE of the mutable columns; updated_at is trigger-maintained and
    /// never in the SET list. The last two placeholders are id, owner_id.
    fn update_sql() -> &'static str;
    fn update_params(&self) -> Vec<SqlValue>;
}

impl EntityRecord for User {
    const TABLE: &'static str = "users";
    const KIND: &'static str = "user";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            preferences: get_json(row, "preferences")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or_default(),
            created_at: get_ts(row, "created_at")?,
            updated_at: get_ts(row, "updated_at")?,
        })
    }

    fn insert_sql() -> &'static str {
        "INSERT INTO users (id, owner_id, name, email, preferences, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
    }

    fn insert_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.id),
            text(&self.owner_id),
            text(&self.name),
            opt_text(&self.email),
            json_col(&self.preferences),
            text(self.status.as_str()),
            SqlValue::Text(ts(&self.created_at)),
            SqlValue::Text(ts(&self.updated_at)),
        ]
    }

    fn update_sql() -> &'static str {
        "UPDATE users SET name = ?1, email = ?2, preferences = ?3, status = ?4
         WHERE id = ?5 AND owner_id = ?6"
    }

    fn update_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.name),
            opt_text(&self.email),
            json_col(&self.preferences),
            text(self.status.as_str()),
            text(&self.id),
            text(&self.owner_id),
        ]
    }
}

impl EntityRecord for Room {
    const TABLE: &'static str = "rooms";
    const KIND: &'static str = "room";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Room {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            target_temperature: row.get("target_temperature")?,
            target_humidity: row.get("target_humidity")?,
            target_ph: row.get("target_ph")?,
            target_ec: row.get("target_ec")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or_default(),
            created_at: get_ts(row, "created_at")?,
            updated_at: get_ts(row, "updated_at")?,
        })
    }

    fn insert_sql() -> &'static str {
        "INSERT INTO rooms (id, owner_id, name, description, target_temperature,
            target_humidity, target_ph, target_ec, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
    }

    fn insert_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.id),
            text(&self.owner_id),
            text(&self.name),
            opt_text(&self.description),
            opt_real(&self.target_temperature),
            opt_real(&self.target_humidity),
            opt_real(&self.target_ph),
            opt_real(&self.target_ec),
            text(self.status.as_str()),
            SqlValue::Text(ts(&self.created_at)),
            SqlValue::Text(ts(&self.updated_at)),
        ]
    }

    fn update_sql() -> &'static str {
        "UPDATE rooms SET name = ?1, description = ?2, target_temperature = ?3,
            target_humidity = ?4, target_ph = ?5, target_ec = ?6, status = ?7
         WHERE id = ?8 AND owner_id = ?9"
    }

    fn update_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.name),
            opt_text(&self.description),
            opt_real(&self.target_temperature),
            opt_real(&self.target_humidity),
            opt_real(&self.target_ph),
            opt_real(&self.target_ec),
            text(self.status.as_str()),
            text(&self.id),
            text(&self.owner_id),
        ]
    }
}

impl EntityRecord for Strain {
    const TABLE: &'static str = "strains";
    const KIND: &'static str = "strain";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Strain {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            name: row.get("name")?,
            breeder: row.get("breeder")?,
            genetics: row.get("genetics")?,
            flowering_days: row.get("flowering_days")?,
            description: row.get("description")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or_default(),
            created_at: get_ts(row, "created_at")?,
            updated_at: get_ts(row, "updated_at")?,
        })
    }

    fn insert_sql() -> &'static str {
        "INSERT INTO strains (id, owner_id, name, breeder, genetics, flowering_days,
            description, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
    }

    fn insert_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.id),
            text(&self.owner_id),
            text(&self.name),
            opt_text(&self.breeder),
            opt_text(&self.genetics),
            opt_int(&self.flowering_days),
            opt_text(&self.description),
            text(self.status.as_str()),
            SqlValue::Text(ts(&self.created_at)),
            SqlValue::Text(ts(&self.updated_at)),
        ]
    }

    fn update_sql() -> &'static str {
        "UPDATE strains SET name = ?1, breeder = ?2, genetics = ?3,
            flowering_days = ?4, description = ?5, status = ?6
         WHERE id = ?7 AND owner_id = ?8"
    }

    fn update_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.name),
            opt_text(&self.breeder),
            opt_text(&self.genetics),
            opt_int(&self.flowering_days),
            opt_text(&self.description),
            text(self.status.as_str()),
            text(&self.id),
            text(&self.owner_id),
        ]
    }
}

impl EntityRecord for Plant {
    const TABLE: &'static str = "plants";
    const KIND: &'static str = "plant";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Plant {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            name: row.get("name")?,
            room_id: row.get("room_id")?,
            strain_id: row.get("strain_id")?,
            growth_stage: row
                .get::<_, String>("growth_stage")?
                .parse()
                .unwrap_or_default(),
            health_status: row
                .get::<_, String>("health_status")?
                .parse()
                .unwrap_or_default(),
            watering_count: row.get("watering_count")?,
            feeding_count: row.get("feeding_count")?,
            started_at: get_ts(row, "started_at")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or_default(),
            created_at: get_ts(row, "created_at")?,
            updated_at: get_ts(row, "updated_at")?,
        })
    }

    fn insert_sql() -> &'static str {
        "INSERT INTO plants (id, owner_id, name, room_id, strain_id, growth_stage,
            health_status, watering_count, feeding_count, started_at, status,
            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
    }

    fn insert_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.id),
            text(&self.owner_id),
            text(&self.name),
            text(&self.room_id),
            text(&self.strain_id),
            text(self.growth_stage.as_str()),
            text(self.health_status.as_str()),
            SqlValue::Integer(self.watering_count),
            SqlValue::Integer(self.feeding_count),
            SqlValue::Text(ts(&self.started_at)),
            text(self.status.as_str()),
            SqlValue::Text(ts(&self.created_at)),
            SqlValue::Text(ts(&self.updated_at)),
        ]
    }

    fn update_sql() -> &'static str {
        "UPDATE plants SET name = ?1, room_id = ?2, strain_id = ?3, growth_stage = ?4,
            health_status = ?5, watering_count = ?6, feeding_count = ?7,
            started_at = ?8, status = ?9
         WHERE id = ?10 AND owner_id = ?11"
    }

    fn update_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.name),
            text(&self.room_id),
            text(&self.strain_id),
            text(self.growth_stage.as_str()),
            text(self.health_status.as_str()),
            SqlValue::Integer(self.watering_count),
            SqlValue::Integer(self.feeding_count),
            SqlValue::Text(ts(&self.started_at)),
            text(self.status.as_str()),
            text(&self.id),
            text(&self.owner_id),
        ]
    }
}

impl EntityRecord for SensorDevice {
    const TABLE: &'static str = "sensor_devices";
    const KIND: &'static str = "sensor_device";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SensorDevice {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            name: row.get("name")?,
            kind: row.get("kind")?,
            room_id: row.get("room_id")?,
            calibration_offset: row.get("calibration_offset")?,
            calibration_scale: row.get("calibration_scale")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or_default(),
            created_at: get_ts(row, "created_at")?,
            updated_at: get_ts(row, "updated_at")?,
        })
    }

    fn insert_sql() -> &'static str {
        "INSERT INTO sensor_devices (id, owner_id, name, kind, room_id,
            calibration_offset, calibration_scale, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
    }

    fn insert_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.id),
            text(&self.owner_id),
            text(&self.name),
            text(&self.kind),
            opt_text(&self.room_id),
            SqlValue::Real(self.calibration_offset),
            SqlValue::Real(self.calibration_scale),
            text(self.status.as_str()),
            SqlValue::Text(ts(&self.created_at)),
            SqlValue::Text(ts(&self.updated_at)),
        ]
    }

    fn update_sql() -> &'static str {
        "UPDATE sensor_devices SET name = ?1, kind = ?2, room_id = ?3,
            calibration_offset = ?4, calibration_scale = ?5, status = ?6
         WHERE id = ?7 AND owner_id = ?8"
    }

    fn update_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.name),
            text(&self.kind),
            opt_text(&self.room_id),
            SqlValue::Real(self.calibration_offset),
            SqlValue::Real(self.calibration_scale),
            text(self.status.as_str()),
            text(&self.id),
            text(&self.owner_id),
        ]
    }
}

impl EntityRecord for AutomationRule {
    const TABLE: &'static str = "automation_rules";
    const KIND: &'static str = "automation_rule";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AutomationRule {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            name: row.get("name")?,
            condition: get_json(row, "condition")?,
            action: get_json(row, "action")?,
            enabled: row.get("enabled")?,
            schedule: row.get("schedule")?,
            run_count: row.get("run_count")?,
            last_run_at: get_opt_ts(row, "last_run_at")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or_default(),
            created_at: get_ts(row, "created_at")?,
            updated_at: get_ts(row, "updated_at")?,
        })
    }

    fn insert_sql() -> &'static str {
        "INSERT INTO automation_rules (id, owner_id, name, condition, action, enabled,
            schedule, run_count, last_run_at, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
    }

    fn insert_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.id),
            text(&self.owner_id),
            text(&self.name),
            json_col(&self.condition),
            json_col(&self.action),
            SqlValue::Integer(self.enabled as i64),
            opt_text(&self.schedule),
            SqlValue::Integer(self.run_count),
            opt_ts(&self.last_run_at),
            text(self.status.as_str()),
            SqlValue::Text(ts(&self.created_at)),
            SqlValue::Text(ts(&self.updated_at)),
        ]
    }

    fn update_sql() -> &'static str {
        "UPDATE automation_rules SET name = ?1, condition = ?2, action = ?3,
            enabled = ?4, schedule = ?5, run_count = ?6, last_run_at = ?7, status = ?8
         WHERE id = ?9 AND owner_id = ?10"
    }

    fn update_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.name),
            json_col(&self.condition),
            json_col(&self.action),
            SqlValue::Integer(self.enabled as i64),
            opt_text(&self.schedule),
            SqlValue::Integer(self.run_count),
            opt_ts(&self.last_run_at),
            text(self.status.as_str()),
            text(&self.id),
            text(&self.owner_id),
        ]
    }
}

impl EntityRecord for PlantNote {
    const TABLE: &'static str = "plant_notes";
    const KIND: &'static str = "plant_note";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PlantNote {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            plant_id: row.get("plant_id")?,
            body: row.get("body")?,
            temperature: row.get("temperature")?,
            humidity: row.get("humidity")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or_default(),
            created_at: get_ts(row, "created_at")?,
            updated_at: get_ts(row, "updated_at")?,
        })
    }

    fn insert_sql() -> &'static str {
        "INSERT INTO plant_notes (id, owner_id, plant_id, body, temperature, humidity,
            status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    }

    fn insert_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.id),
            text(&self.owner_id),
            text(&self.plant_id),
            text(&self.body),
            opt_real(&self.temperature),
            opt_real(&self.humidity),
            text(self.status.as_str()),
            SqlValue::Text(ts(&self.created_at)),
            SqlValue::Text(ts(&self.updated_at)),
        ]
    }

    fn update_sql() -> &'static str {
        "UPDATE plant_notes SET body = ?1, temperature = ?2, humidity = ?3, status = ?4
         WHERE id = ?5 AND owner_id = ?6"
    }

    fn update_params(&self) -> Vec<SqlValue> {
        vec![
            text(&self.body),
            opt_real(&self.temperature),
            opt_real(&self.humidity),
            text(self.status.as_str()),
            text(&self.id),
            text(&self.owner_id),
        ]
    }
}

// ============================================
// Generic aggregate repository
// ============================================

/// Uniform CRUD over one aggregate kind, with read-through caching
pub struct Repository<M: EntityRecord> {
    exec: Arc<Executor>,
    cache: Arc<Cache>,
    _marker: PhantomData<M>,
}

impl<M: EntityRecord> Repository<M> {
    pub fn new(exec: Arc<Executor>, cache: Arc<Cache>) -> Self {
        Self {
            exec,
            cache,
            _marker: PhantomData,
        }
    }

    fn cache_entity(&self, entity: &M) {
        if let Ok(value) = serde_json::to_value(entity) {
            self.cache
                .put(M::KIND, entity.owner_id(), entity.id(), value);
        }
    }

    /// Fetch one entity by id within an owner scope
    pub fn get_by_id(&self, id: &str, owner: &str) -> Result<Option<M>> {
        if let Some(cached) = self.cache.get(M::KIND, owner, id) {
            if let Ok(entity) = serde_json::from_value::<M>(cached) {
                return Ok(Some(entity));
            }
        }

        let operation = format!("{}.get_by_id", M::TABLE);
        let sql = format!(
            "SELECT * FROM {} WHERE id = ?1 AND owner_id = ?2",
            M::TABLE
        );
        let found = self.exec.read(&operation, StatementClass::Select, |conn| {
            conn.query_row(&sql, params![id, owner], M::from_row)
                .optional()
        })?;

        if let Some(entity) = &found {
            self.cache_entity(entity);
        }
        Ok(found)
    }

    /// Fetch every active entity for an owner
    pub fn get_all(&self, owner: &str) -> Result<Vec<M>> {
        if let Some(cached) = self.cache.get(M::KIND, owner, "all") {
            if let Ok(entities) = serde_json::from_value::<Vec<M>>(cached) {
                return Ok(entities);
            }
        }

        let operation = format!("{}.get_all", M::TABLE);
        let sql = format!(
            "SELECT * FROM {} WHERE owner_id = ?1 AND status = 'active' ORDER BY created_at",
            M::TABLE
        );
        let entities = self.exec.read(&operation, StatementClass::Select, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([owner], M::from_row)?;
            rows.collect::<rusqlite::Result<Vec<M>>>()
        })?;

        if let Ok(value) = serde_json::to_value(&entities) {
            self.cache.put(M::KIND, owner, "all", value);
        }
        Ok(entities)
    }

    /// Insert a new entity. One executor call, hence one transaction;
    /// foreign keys that do not resolve reject the write here.
    pub fn create(&self, entity: M) -> Result<M> {
        let operation = format!("{}.create", M::TABLE);
        self.exec.write(&operation, StatementClass::Insert, |tx| {
            tx.execute(M::insert_sql(), params_from_iter(entity.insert_params()))?;
            Ok(())
        })?;

        self.cache.invalidate_owner(entity.owner_id());
        self.cache_entity(&entity);
        Ok(entity)
    }

    /// Update an existing entity and return the stored row (with the
    /// trigger-maintained updated_at).
    pub fn update(&self, entity: &M) -> Result<M> {
        let operation = format!("{}.update", M::TABLE);
        let select_sql = format!(
            "SELECT * FROM {} WHERE id = ?1 AND owner_id = ?2",
            M::TABLE
        );
        let fresh = self
            .exec
            .write(&operation, StatementClass::Update, |tx| {
                let changed =
                    tx.execute(M::update_sql(), params_from_iter(entity.update_params()))?;
                if changed == 0 {
                    return Err(rusqlite::Error::QueryReturnedNoRows);
                }
                tx.query_row(
                    &select_sql,
                    params![entity.id(), entity.owner_id()],
                    M::from_row,
                )
            })
            .map_err(|e| match e {
                Error::Database(rusqlite::Error::QueryReturnedNoRows) => Error::NotFound {
                    kind: M::KIND,
                    id: entity.id().to_string(),
                },
                other => other,
            })?;

        self.cache.invalidate_owner(entity.owner_id());
        self.cache_entity(&fresh);
        Ok(fresh)
    }

    /// Soft delete: flip the status to archived. The physical row persists
    /// for referential integrity of historical time-series data.
    pub fn delete(&self, id: &str, owner: &str) -> Result<bool> {
        let operation = format!("{}.delete", M::TABLE);
        let sql = format!(
            "UPDATE {} SET status = 'archived' WHERE id = ?1 AND owner_id = ?2 AND status = 'active'",
            M::TABLE
        );
        let changed = self.exec.write(&operation, StatementClass::Update, |tx| {
            tx.execute(&sql, params![id, owner])
        })?;

        self.cache.invalidate_owner(owner);
        Ok(changed > 0)
    }
}

// ============================================
// Time-series repositories
// ============================================

fn reading_from_row(row: &Row) -> rusqlite::Result<SensorReading> {
    Ok(SensorReading {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        device_id: row.get("device_id")?,
        recorded_at: get_ts(row, "recorded_at")?,
        value: row.get("value")?,
        unit: row.get("unit")?,
    })
}

/// Append-only sensor reading store. Uncached: readings arrive continuously
/// and are consumed in windows, so the entity cache would never hit.
pub struct SensorReadingRepo {
    exec: Arc<Executor>,
}

impl SensorReadingRepo {
    pub fn new(exec: Arc<Executor>) -> Self {
        Self { exec }
    }

    pub fn append(&self, mut reading: SensorReading) -> Result<SensorReading> {
        let id = self
            .exec
            .write("sensor_readings.append", StatementClass::Insert, |tx| {
                tx.execute(
                    "INSERT INTO sensor_readings (owner_id, device_id, recorded_at, value, unit)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        reading.owner_id,
                        reading.device_id,
                        ts(&reading.recorded_at),
                        reading.value,
                        reading.unit,
                    ],
                )?;
                Ok(tx.last_insert_rowid())
            })?;
        reading.id = Some(id);
        Ok(reading)
    }

    /// Readings for one device, newest first, optionally bounded below
    pub fn for_device(
        &self,
        device_id: &str,
        owner: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<SensorReading>> {
        let cutoff = since.map(|dt| ts(&dt)).unwrap_or_default();
        self.exec
            .read("sensor_readings.for_device", StatementClass::Select, |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM sensor_readings
                     WHERE device_id = ?1 AND owner_id = ?2 AND recorded_at >= ?3
                     ORDER BY recorded_at DESC LIMIT ?4",
                )?;
                let rows =
                    stmt.query_map(params![device_id, owner, cutoff, limit as i64], reading_from_row)?;
                rows.collect()
            })
    }

    pub fn latest(&self, device_id: &str, owner: &str) -> Result<Option<SensorReading>> {
        self.exec
            .read("sensor_readings.latest", StatementClass::Select, |conn| {
                conn.query_row(
                    "SELECT * FROM sensor_readings
                     WHERE device_id = ?1 AND owner_id = ?2
                     ORDER BY recorded_at DESC LIMIT 1",
                    params![device_id, owner],
                    reading_from_row,
                )
                .optional()
            })
    }

    /// Physically delete readings past the retention window. Returns the
    /// number of rows removed.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.exec
            .write("sensor_readings.purge", StatementClass::Delete, |tx| {
                tx.execute(
                    "DELETE FROM sensor_readings WHERE recorded_at < ?1",
                    params![ts(&cutoff)],
                )
            })
    }
}

fn automation_log_from_row(row: &Row) -> rusqlite::Result<AutomationLog> {
    Ok(AutomationLog {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        rule_id: row.get("rule_id")?,
        executed_at: get_ts(row, "executed_at")?,
        outcome: row.get("outcome")?,
        detail: row.get("detail")?,
    })
}

/// Append-only rule execution log
pub struct AutomationLogRepo {
    exec: Arc<Executor>,
    cache: Arc<Cache>,
}

impl AutomationLogRepo {
    pub fn new(exec: Arc<Executor>, cache: Arc<Cache>) -> Self {
        Self { exec, cache }
    }

    pub fn append(&self, mut log: AutomationLog) -> Result<AutomationLog> {
        let id = self
            .exec
            .write("automation_logs.append", StatementClass::Insert, |tx| {
                tx.execute(
                    "INSERT INTO automation_logs (owner_id, rule_id, executed_at, outcome, detail)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        log.owner_id,
                        log.rule_id,
                        ts(&log.executed_at),
                        log.outcome,
                        log.detail,
                    ],
                )?;
                Ok(tx.last_insert_rowid())
            })?;
        log.id = Some(id);
        Ok(log)
    }

    /// Record one rule execution: append the log row and bump the rule's
    /// run counter in the same transaction.
    pub fn record_execution(&self, log: AutomationLog) -> Result<AutomationLog> {
        let mut log = log;
        let id = self
            .exec
            .write("automation_logs.record_execution", StatementClass::Insert, |tx| {
                tx.execute(
                    "INSERT INTO automation_logs (owner_id, rule_id, executed_at, outcome, detail)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        log.owner_id,
                        log.rule_id,
                        ts(&log.executed_at),
                        log.outcome,
                        log.detail,
                    ],
                )?;
                let row_id = tx.last_insert_rowid();
                tx.execute(
                    "UPDATE automation_rules SET run_count = run_count + 1, last_run_at = ?1
                     WHERE id = ?2 AND owner_id = ?3",
                    params![ts(&log.executed_at), log.rule_id, log.owner_id],
                )?;
                Ok(row_id)
            })?;
        log.id = Some(id);
        // The rule aggregate changed underneath the cache
        self.cache.invalidate_owner(&log.owner_id);
        Ok(log)
    }

    pub fn for_rule(&self, rule_id: &str, owner: &str, limit: usize) -> Result<Vec<AutomationLog>> {
        self.exec
            .read("automation_logs.for_rule", StatementClass::Select, |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM automation_logs
                     WHERE rule_id = ?1 AND owner_id = ?2
                     ORDER BY executed_at DESC LIMIT ?3",
                )?;
                let rows = stmt.query_map(
                    params![rule_id, owner, limit as i64],
                    automation_log_from_row,
                )?;
                rows.collect()
            })
    }

    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.exec
            .write("automation_logs.purge", StatementClass::Delete, |tx| {
                tx.execute(
                    "DELETE FROM automation_logs WHERE executed_at < ?1",
                    params![ts(&cutoff)],
                )
            })
    }
}

// ============================================
// Settings
// ============================================

/// Typed key/value configuration rows
pub struct SettingsRepo {
    exec: Arc<Executor>,
}

impl SettingsRepo {
    pub fn new(exec: Arc<Executor>) -> Self {
        Self { exec }
    }

    pub fn get(&self, key: &str, owner: &str) -> Result<Option<SettingValue>> {
        let row = self
            .exec
            .read("app_settings.get", StatementClass::Select, |conn| {
                conn.query_row(
                    "SELECT value, value_type FROM app_settings WHERE key = ?1 AND owner_id = ?2",
                    params![key, owner],
                    |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
                )
                .optional()
            })?;

        match row {
            Some((value, value_type)) => SettingValue::from_column(&value, &value_type)
                .map(Some)
                .map_err(Error::Config),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: &str, owner: &str, value: &SettingValue) -> Result<()> {
        let now = ts(&Utc::now());
        self.exec
            .write("app_settings.set", StatementClass::Insert, |tx| {
                tx.execute(
                    "INSERT INTO app_settings (key, owner_id, value, value_type, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(key, owner_id) DO UPDATE SET
                         value = excluded.value,
                         value_type = excluded.value_type,
                         updated_at = excluded.updated_at",
                    params![key, owner, value.to_column(), value.type_tag(), now],
                )?;
                Ok(())
            })
    }

    pub fn remove(&self, key: &str, owner: &str) -> Result<bool> {
        let changed = self
            .exec
            .write("app_settings.remove", StatementClass::Delete, |tx| {
                tx.execute(
                    "DELETE FROM app_settings WHERE key = ?1 AND owner_id = ?2",
                    params![key, owner],
                )
            })?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::monitor::HealthMonitor;
    use crate::db::perf::PerfMonitor;
    use crate::db::schema;
    use std::time::Duration;

    fn fixture() -> (Arc<Executor>, Arc<Cache>) {
        let config = DatabaseConfig::default();
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
        schema::initialize(&mut conn).unwrap();
        let exec = Arc::new(Executor::new(
            conn,
            Arc::new(HealthMonitor::new()),
            Arc::new(PerfMonitor::new()),
            &config,
        ));
        let cache = Arc::new(Cache::new(Duration::from_secs(300)));
        (exec, cache)
    }

    fn make_room(owner: &str) -> Room {
        Room::new(owner, "Veg Tent")
    }

    #[test]
    fn test_room_crud() {
        let (exec, cache) = fixture();
        let rooms: Repository<Room> = Repository::new(exec, cache);

        let created = rooms.create(make_room("o1")).unwrap();
        let fetched = rooms.get_by_id(&created.id, "o1").unwrap().unwrap();
        assert_eq!(fetched.name, "Veg Tent");

        let mut room = fetched;
        room.name = "Flower Tent".to_string();
        room.target_temperature = Some(24.5);
        let updated = rooms.update(&room).unwrap();
        assert_eq!(updated.name, "Flower Tent");
        assert_eq!(updated.target_temperature, Some(24.5));

        assert!(rooms.delete(&room.id, "o1").unwrap());
        // Archived rows drop out of get_all but the row still exists
        assert!(rooms.get_all("o1").unwrap().is_empty());
        let archived = rooms.get_by_id(&room.id, "o1").unwrap().unwrap();
        assert_eq!(archived.status, EntityStatus::Archived);
        // Second delete is a no-op
        assert!(!rooms.delete(&room.id, "o1").unwrap());
    }

    #[test]
    fn test_owner_isolation() {
        let (exec, cache) = fixture();
        let rooms: Repository<Room> = Repository::new(exec, cache);

        let created = rooms.create(make_room("o1")).unwrap();
        assert!(rooms.get_by_id(&created.id, "o2").unwrap().is_none());
        assert!(rooms.get_all("o2").unwrap().is_empty());
        assert!(!rooms.delete(&created.id, "o2").unwrap());
    }

    #[test]
    fn test_update_missing_row() {
        let (exec, cache) = fixture();
        let rooms: Repository<Room> = Repository::new(exec, cache);
        let ghost = make_room("o1");
        let err = rooms.update(&ghost).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "room", .. }));
    }

    #[test]
    fn test_plant_foreign_keys_enforced() {
        let (exec, cache) = fixture();
        let rooms: Repository<Room> = Repository::new(exec.clone(), cache.clone());
        let strains: Repository<Strain> = Repository::new(exec.clone(), cache.clone());
        let plants: Repository<Plant> = Repository::new(exec, cache);

        let room = rooms.create(make_room("o1")).unwrap();
        let strain = strains.create(Strain::new("o1", "Northern Lights")).unwrap();

        // Dangling strain reference is rejected
        let bad = Plant::new("o1", "Plant A", &room.id, "no-such-strain");
        assert!(plants.create(bad).is_err());

        // Resolving references succeed
        let good = Plant::new("o1", "Plant A", &room.id, &strain.id);
        let plant = plants.create(good).unwrap();
        assert_eq!(plant.growth_stage, GrowthStage::Seedling);

        // Cross-owner references do not resolve either
        let other_owner = Plant::new("o2", "Plant B", &room.id, &strain.id);
        assert!(plants.create(other_owner).is_err());
    }

    #[test]
    fn test_trigger_bumps_updated_at() {
        let (exec, cache) = fixture();
        let rooms: Repository<Room> = Repository::new(exec, cache.clone());

        let created = rooms.create(make_room("o1")).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let mut room = created.clone();
        room.description = Some("north wall".to_string());
        let updated = rooms.update(&room).unwrap();
        assert!(updated.updated_at > created.updated_at);
    }

    #[test]
    fn test_readings_append_and_window() {
        let (exec, cache) = fixture();
        let rooms: Repository<Room> = Repository::new(exec.clone(), cache.clone());
        let devices: Repository<SensorDevice> = Repository::new(exec.clone(), cache.clone());
        let readings = SensorReadingRepo::new(exec);

        let room = rooms.create(make_room("o1")).unwrap();
        let mut device = SensorDevice::new("o1", "Tent probe", "temperature");
        device.room_id = Some(room.id.clone());
        let device = devices.create(device).unwrap();

        let now = Utc::now();
        for i in 0..5 {
            readings
                .append(SensorReading {
                    id: None,
                    owner_id: "o1".to_string(),
                    device_id: device.id.clone(),
                    recorded_at: now - chrono::Duration::minutes(i),
                    value: 21.0 + i as f64,
                    unit: Some("c".to_string()),
                })
                .unwrap();
        }

        let latest = readings.latest(&device.id, "o1").unwrap().unwrap();
        assert_eq!(latest.value, 21.0);

        let window = readings
            .for_device(&device.id, "o1", Some(now - chrono::Duration::minutes(2)), 100)
            .unwrap();
        assert_eq!(window.len(), 3);

        let purged = readings
            .purge_older_than(now - chrono::Duration::minutes(3))
            .unwrap();
        assert_eq!(purged, 1);
    }

    #[test]
    fn test_record_execution_bumps_rule() {
        let (exec, cache) = fixture();
        let rules: Repository<AutomationRule> = Repository::new(exec.clone(), cache.clone());
        let logs = AutomationLogRepo::new(exec, cache);

        let rule = rules
            .create(AutomationRule::new("o1", "Lights on"))
            .unwrap();
        assert_eq!(rule.run_count, 0);

        logs.record_execution(AutomationLog {
            id: None,
            owner_id: "o1".to_string(),
            rule_id: rule.id.clone(),
            executed_at: Utc::now(),
            outcome: "success".to_string(),
            detail: None,
        })
        .unwrap();

        let rule = rules.get_by_id(&rule.id, "o1").unwrap().unwrap();
        assert_eq!(rule.run_count, 1);
        assert!(rule.last_run_at.is_some());

        let history = logs.for_rule(&rule.id, "o1", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, "success");
    }

    #[test]
    fn test_settings_round_trip() {
        let (exec, _cache) = fixture();
        let settings = SettingsRepo::new(exec);

        assert!(settings.get("theme", "o1").unwrap().is_none());

        settings
            .set("theme", "o1", &SettingValue::String("dark".to_string()))
            .unwrap();
        settings.set("retries", "o1", &SettingValue::Int(5)).unwrap();
        // Overwrite changes the type
        settings
            .set("theme", "o1", &SettingValue::Bool(true))
            .unwrap();

        assert_eq!(
            settings.get("retries", "o1").unwrap().unwrap(),
            SettingValue::Int(5)
        );
        assert_eq!(
            settings.get("theme", "o1").unwrap().unwrap(),
            SettingValue::Bool(true)
        );
        // Owner-scoped
        assert!(settings.get("theme", "o2").unwrap().is_none());

        assert!(settings.remove("theme", "o1").unwrap());
        assert!(!settings.remove("theme", "o1").unwrap());
    }
}
