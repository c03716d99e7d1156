//! Core domain types for verdant
//!
//! These types represent the persisted data model. Every tenant-scoped entity
//! is keyed by `(id, owner_id)` so one store file can hold several isolated
//! accounts without any query ever crossing an owner boundary.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Owner** | The tenant boundary; every aggregate row belongs to exactly one owner |
//! | **Aggregate** | A long-lived entity (User, Room, Strain, Plant, SensorDevice, AutomationRule, PlantNote) that is archived, never physically deleted |
//! | **Time-series** | Append-only rows (SensorReading, AutomationLog) purged past the retention window |
//! | **Room** | A cultivation space with target environmental setpoints |
//! | **Strain** | Cultivar catalog metadata |
//! | **Reading** | One sensor sample tied to a registered SensorDevice |
//!
//! Aggregates carry an [`EntityStatus`] rather than a boolean flag: `delete`
//! flips the status to `archived` and the row stays behind so historical
//! time-series references keep resolving.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Status & enums
// ============================================

/// Lifecycle status of an aggregate row.
///
/// Soft deletion is a status change; physical rows persist for referential
/// integrity of historical time-series data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    Active,
    Archived,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::Archived => "archived",
        }
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EntityStatus::Active),
            "archived" => Ok(EntityStatus::Archived),
            _ => Err(format!("unknown entity status: {}", s)),
        }
    }
}

/// Growth stage of a plant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GrowthStage {
    #[default]
    Seedling,
    Vegetative,
    Flowering,
    Harvested,
    Curing,
}

impl GrowthStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrowthStage::Seedling => "seedling",
            GrowthStage::Vegetative => "vegetative",
            GrowthStage::Flowering => "flowering",
            GrowthStage::Harvested => "harvested",
            GrowthStage::Curing => "curing",
        }
    }
}

impl std::str::FromStr for GrowthStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seedling" => Ok(GrowthStage::Seedling),
            "vegetative" => Ok(GrowthStage::Vegetative),
            "flowering" => Ok(GrowthStage::Flowering),
            "harvested" => Ok(GrowthStage::Harvested),
            "curing" => Ok(GrowthStage::Curing),
            _ => Err(format!("unknown growth stage: {}", s)),
        }
    }
}

/// Health assessment of a plant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlantHealth {
    #[default]
    Healthy,
    Stressed,
    Sick,
    Recovering,
}

impl PlantHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlantHealth::Healthy => "healthy",
            PlantHealth::Stressed => "stressed",
            PlantHealth::Sick => "sick",
            PlantHealth::Recovering => "recovering",
        }
    }
}

impl std::str::FromStr for PlantHealth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(PlantHealth::Healthy),
            "stressed" => Ok(PlantHealth::Stressed),
            "sick" => Ok(PlantHealth::Sick),
            "recovering" => Ok(PlantHealth::Recovering),
            _ => Err(format!("unknown plant health: {}", s)),
        }
    }
}

// ============================================
// Aggregates
// ============================================

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// An account profile within the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Tenant boundary this row belongs to
    pub owner_id: String,
    /// Display name
    pub name: String,
    /// Contact email (optional)
    pub email: Option<String>,
    /// Free-form preference map
    pub preferences: serde_json::Value,
    /// Lifecycle status
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    /// Maintained by a store-level trigger, never set by callers
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(owner_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            email: None,
            preferences: serde_json::json!({}),
            status: EntityStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A cultivation space with target environmental setpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Target temperature, °C
    pub target_temperature: Option<f64>,
    /// Target relative humidity, %
    pub target_humidity: Option<f64>,
    /// Target pH of the nutrient solution
    pub target_ph: Option<f64>,
    /// Target electrical conductivity, mS/cm
    pub target_ec: Option<f64>,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn new(owner_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            description: None,
            target_temperature: None,
            target_humidity: None,
            target_ph: None,
            target_ec: None,
            status: EntityStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Cultivar catalog metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strain {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub breeder: Option<String>,
    /// Lineage description, e.g. "Parent A x Parent B"
    pub genetics: Option<String>,
    /// Expected flowering duration in days
    pub flowering_days: Option<i64>,
    pub description: Option<String>,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strain {
    pub fn new(owner_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            breeder: None,
            genetics: None,
            flowering_days: None,
            description: None,
            status: EntityStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A tracked plant. References a Room and a Strain; both must resolve or the
/// write is rejected by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plant {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    /// Room this plant lives in
    pub room_id: String,
    /// Strain this plant was grown from
    pub strain_id: String,
    pub growth_stage: GrowthStage,
    pub health_status: PlantHealth,
    /// Cumulative watering counter
    pub watering_count: i64,
    /// Cumulative feeding counter
    pub feeding_count: i64,
    /// When cultivation of this plant began
    pub started_at: DateTime<Utc>,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plant {
    pub fn new(owner_id: &str, name: &str, room_id: &str, strain_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            room_id: room_id.to_string(),
            strain_id: strain_id.to_string(),
            growth_stage: GrowthStage::Seedling,
            health_status: PlantHealth::Healthy,
            watering_count: 0,
            feeding_count: 0,
            started_at: now,
            status: EntityStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A registered sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDevice {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    /// Sensor kind, e.g. "temperature", "humidity", "ph", "ec"
    pub kind: String,
    /// Room the sensor is installed in (optional)
    pub room_id: Option<String>,
    /// Calibration: reading is `raw * scale + offset`
    pub calibration_offset: f64,
    pub calibration_scale: f64,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SensorDevice {
    pub fn new(owner_id: &str, name: &str, kind: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
            room_id: None,
            calibration_offset: 0.0,
            calibration_scale: 1.0,
            status: EntityStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A trigger/action automation definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    /// Trigger condition payload
    pub condition: serde_json::Value,
    /// Action payload executed when the condition fires
    pub action: serde_json::Value,
    pub enabled: bool,
    /// Scheduling metadata, e.g. a cron-like expression (optional)
    pub schedule: Option<String>,
    /// Cumulative execution counter
    pub run_count: i64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationRule {
    pub fn new(owner_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            condition: serde_json::json!({}),
            action: serde_json::json!({}),
            enabled: true,
            schedule: None,
            run_count: 0,
            last_run_at: None,
            status: EntityStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A free-text observation tied to a plant, with an optional environmental
/// snapshot taken at note time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlantNote {
    pub id: String,
    pub owner_id: String,
    pub plant_id: String,
    pub body: String,
    /// Ambient temperature at note time, °C (optional)
    pub temperature: Option<f64>,
    /// Ambient humidity at note time, % (optional)
    pub humidity: Option<f64>,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlantNote {
    pub fn new(owner_id: &str, plant_id: &str, body: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            owner_id: owner_id.to_string(),
            plant_id: plant_id.to_string(),
            body: body.to_string(),
            temperature: None,
            humidity: None,
            status: EntityStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================
// Time-series
// ============================================

/// One sensor sample. Append-only; purged past the retention window,
/// never soft-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    /// Autoincrement row id (None until inserted)
    pub id: Option<i64>,
    pub owner_id: String,
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
    pub value: f64,
    pub unit: Option<String>,
}

/// One rule execution record. Append-only; purged past the retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationLog {
    pub id: Option<i64>,
    pub owner_id: String,
    pub rule_id: String,
    pub executed_at: DateTime<Utc>,
    /// Execution outcome: "success", "skipped", "failed"
    pub outcome: String,
    pub detail: Option<String>,
}

// ============================================
// Settings
// ============================================

/// Typed value stored in the settings table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SettingValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Json(serde_json::Value),
}

impl SettingValue {
    /// Storage type tag for the `value_type` column
    pub fn type_tag(&self) -> &'static str {
        match self {
            SettingValue::String(_) => "string",
            SettingValue::Int(_) => "int",
            SettingValue::Float(_) => "float",
            SettingValue::Bool(_) => "bool",
            SettingValue::Json(_) => "json",
        }
    }

    /// Serialize the payload for the `value` column
    pub fn to_column(&self) -> String {
        match self {
            SettingValue::String(s) => s.clone(),
            SettingValue::Int(i) => i.to_string(),
            SettingValue::Float(f) => f.to_string(),
            SettingValue::Bool(b) => b.to_string(),
            SettingValue::Json(v) => v.to_string(),
        }
    }

    /// Parse a `(value, value_type)` column pair back into a typed value
    pub fn from_column(value: &str, value_type: &str) -> Result<Self, String> {
        match value_type {
            "string" => Ok(SettingValue::String(value.to_string())),
            "int" => value
                .parse()
                .map(SettingValue::Int)
                .map_err(|e| format!("bad int setting: {}", e)),
            "float" => value
                .parse()
                .map(SettingValue::Float)
                .map_err(|e| format!("bad float setting: {}", e)),
            "bool" => value
                .parse()
                .map(SettingValue::Bool)
                .map_err(|e| format!("bad bool setting: {}", e)),
            "json" => serde_json::from_str(value)
                .map(SettingValue::Json)
                .map_err(|e| format!("bad json setting: {}", e)),
            other => Err(format!("unknown setting type: {}", other)),
        }
    }
}

// ============================================
// Backups
// ============================================

/// Why a backup was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    /// User-initiated
    Manual,
    /// Background timer
    Scheduled,
    /// Safety snapshot taken immediately before a restore
    PreRestore,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Manual => "manual",
            BackupKind::Scheduled => "scheduled",
            BackupKind::PreRestore => "prerestore",
        }
    }
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(BackupKind::Manual),
            "scheduled" => Ok(BackupKind::Scheduled),
            "prerestore" => Ok(BackupKind::PreRestore),
            _ => Err(format!("unknown backup kind: {}", s)),
        }
    }
}

/// Metadata record for one backup artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    pub id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub kind: BackupKind,
    /// Path of the backup file on disk
    pub path: String,
    pub size_bytes: u64,
    /// Total rows across tenant tables at snapshot time
    pub record_count: i64,
    /// SHA-256 of the backup file contents, hex-encoded
    pub checksum: String,
    pub app_version: String,
    pub schema_version: i32,
    /// "completed" or "failed"
    pub status: String,
}
