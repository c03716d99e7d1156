//! Database schema, DDL generation, and migrations
//!
//! The schema is declared as plain descriptor structs ([`TableSpec`],
//! [`ColumnSpec`]) consumed by a small DDL builder, and versioned via
//! `PRAGMA user_version`. A fresh store gets the full current schema in one
//! bootstrap transaction; existing stores are upgraded step by step, each
//! step in its own transaction so a failure leaves the prior version intact.

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::Path;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Column storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
}

impl ColumnType {
    fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }
}

/// One column declaration
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub default: Option<&'static str>,
}

impl ColumnSpec {
    const fn required(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            default: None,
        }
    }

    const fn optional(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
            default: None,
        }
    }

    const fn with_default(name: &'static str, ty: ColumnType, default: &'static str) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            default: Some(default),
        }
    }
}

/// Composite foreign key declaration
#[derive(Debug, Clone, Copy)]
pub struct ForeignKeySpec {
    pub columns: &'static [&'static str],
    pub parent_table: &'static str,
    pub parent_columns: &'static [&'static str],
}

/// One table declaration
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
    /// Primary key columns. A single INTEGER key with `autoincrement`
    /// renders as `INTEGER PRIMARY KEY AUTOINCREMENT`.
    pub primary_key: &'static [&'static str],
    pub autoincrement: bool,
    pub foreign_keys: &'static [ForeignKeySpec],
    /// Rows carry an `owner_id` and every query filters on it
    pub owner_scoped: bool,
    /// Append-only rows, physically purged past the retention window
    pub time_series: bool,
    /// Maintain `updated_at` via an AFTER UPDATE trigger
    pub touch_trigger: bool,
}

/// Secondary index declaration
#[derive(Debug, Clone, Copy)]
pub struct IndexSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub columns: &'static [&'static str],
}

const ID: ColumnSpec = ColumnSpec::required("id", ColumnType::Text);
const OWNER: ColumnSpec = ColumnSpec::required("owner_id", ColumnType::Text);
const STATUS: ColumnSpec = ColumnSpec::with_default("status", ColumnType::Text, "'active'");
const CREATED_AT: ColumnSpec = ColumnSpec::required("created_at", ColumnType::Text);
const UPDATED_AT: ColumnSpec = ColumnSpec::required("updated_at", ColumnType::Text);

/// All tables, parents before children so bootstrap and import can run in
/// declaration order without tripping foreign keys.
pub const TABLES: &[TableSpec] = &[
    TableSpec {
        name: "users",
        columns: &[
            ID,
            OWNER,
            ColumnSpec::required("name", ColumnType::Text),
            ColumnSpec::optional("email", ColumnType::Text),
            ColumnSpec::with_default("preferences", ColumnType::Text, "'{}'"),
            STATUS,
            CREATED_AT,
            UPDATED_AT,
        ],
        primary_key: &["id", "owner_id"],
        autoincrement: false,
        foreign_keys: &[],
        owner_scoped: true,
        time_series: false,
        touch_trigger: true,
    },
    TableSpec {
        name: "rooms",
        columns: &[
            ID,
            OWNER,
            ColumnSpec::required("name", ColumnType::Text),
            ColumnSpec::optional("description", ColumnType::Text),
            ColumnSpec::optional("target_temperature", ColumnType::Real),
            ColumnSpec::optional("target_humidity", ColumnType::Real),
            ColumnSpec::optional("target_ph", ColumnType::Real),
            ColumnSpec::optional("target_ec", ColumnType::Real),
            STATUS,
            CREATED_AT,
            UPDATED_AT,
        ],
        primary_key: &["id", "owner_id"],
        autoincrement: false,
        foreign_keys: &[],
        owner_scoped: true,
        time_series: false,
        touch_trigger: true,
    },
    TableSpec {
        name: "strains",
        columns: &[
            ID,
            OWNER,
            ColumnSpec::required("name", ColumnType::Text),
            ColumnSpec::optional("breeder", ColumnType::Text),
            ColumnSpec::optional("genetics", ColumnType::Text),
            ColumnSpec::optional("flowering_days", ColumnType::Integer),
            ColumnSpec::optional("description", ColumnType::Text),
            STATUS,
            CREATED_AT,
            UPDATED_AT,
        ],
        primary_key: &["id", "owner_id"],
        autoincrement: false,
        foreign_keys: &[],
        owner_scoped: true,
        time_series: false,
        touch_trigger: true,
    },
    TableSpec {
        name: "plants",
        columns: &[
            ID,
            OWNER,
            ColumnSpec::required("name", ColumnType::Text),
            ColumnSpec::required("room_id", ColumnType::Text),
            ColumnSpec::required("strain_id", ColumnType::Text),
            ColumnSpec::with_default("growth_stage", ColumnType::Text, "'seedling'"),
            ColumnSpec::with_default("health_status", ColumnType::Text, "'healthy'"),
            ColumnSpec::with_default("watering_count", ColumnType::Integer, "0"),
            ColumnSpec::with_default("feeding_count", ColumnType::Integer, "0"),
            ColumnSpec::required("started_at", ColumnType::Text),
            STATUS,
            CREATED_AT,
            UPDATED_AT,
        ],
        primary_key: &["id", "owner_id"],
        autoincrement: false,
        foreign_keys: &[
            ForeignKeySpec {
                columns: &["room_id", "owner_id"],
                parent_table: "rooms",
                parent_columns: &["id", "owner_id"],
            },
            ForeignKeySpec {
                columns: &["strain_id", "owner_id"],
                parent_table: "strains",
                parent_columns: &["id", "owner_id"],
            },
        ],
        owner_scoped: true,
        time_series: false,
        touch_trigger: true,
    },
    TableSpec {
        name: "sensor_devices",
        columns: &[
            ID,
            OWNER,
            ColumnSpec::required("name", ColumnType::Text),
            ColumnSpec::required("kind", ColumnType::Text),
            ColumnSpec::optional("room_id", ColumnType::Text),
            ColumnSpec::with_default("calibration_offset", ColumnType::Real, "0.0"),
            ColumnSpec::with_default("calibration_scale", ColumnType::Real, "1.0"),
            STATUS,
            CREATED_AT,
            UPDATED_AT,
        ],
        primary_key: &["id", "owner_id"],
        autoincrement: false,
        foreign_keys: &[ForeignKeySpec {
            columns: &["room_id", "owner_id"],
            parent_table: "rooms",
            parent_columns: &["id", "owner_id"],
        }],
        owner_scoped: true,
        time_series: false,
        touch_trigger: true,
    },
    TableSpec {
        name: "automation_rules",
        columns: &[
            ID,
            OWNER,
            ColumnSpec::required("name", ColumnType::Text),
            ColumnSpec::with_default("condition", ColumnType::Text, "'{}'"),
            ColumnSpec::with_default("action", ColumnType::Text, "'{}'"),
            ColumnSpec::with_default("enabled", ColumnType::Integer, "1"),
            ColumnSpec::optional("schedule", ColumnType::Text),
            ColumnSpec::with_default("run_count", ColumnType::Integer, "0"),
            ColumnSpec::optional("last_run_at", ColumnType::Text),
            STATUS,
            CREATED_AT,
            UPDATED_AT,
        ],
        primary_key: &["id", "owner_id"],
        autoincrement: false,
        foreign_keys: &[],
        owner_scoped: true,
        time_series: false,
        touch_trigger: true,
    },
    TableSpec {
        name: "plant_notes",
        columns: &[
            ID,
            OWNER,
            ColumnSpec::required("plant_id", ColumnType::Text),
            ColumnSpec::required("body", ColumnType::Text),
            ColumnSpec::optional("temperature", ColumnType::Real),
            ColumnSpec::optional("humidity", ColumnType::Real),
            STATUS,
            CREATED_AT,
            UPDATED_AT,
        ],
        primary_key: &["id", "owner_id"],
        autoincrement: false,
        foreign_keys: &[ForeignKeySpec {
            columns: &["plant_id", "owner_id"],
            parent_table: "plants",
            parent_columns: &["id", "owner_id"],
        }],
        owner_scoped: true,
        time_series: false,
        touch_trigger: true,
    },
    TableSpec {
        name: "sensor_readings",
        columns: &[
            ColumnSpec::required("id", ColumnType::Integer),
            OWNER,
            ColumnSpec::required("device_id", ColumnType::Text),
            ColumnSpec::required("recorded_at", ColumnType::Text),
            ColumnSpec::required("value", ColumnType::Real),
            ColumnSpec::optional("unit", ColumnType::Text),
        ],
        primary_key: &["id"],
        autoincrement: true,
        foreign_keys: &[ForeignKeySpec {
            columns: &["device_id", "owner_id"],
            parent_table: "sensor_devices",
            parent_columns: &["id", "owner_id"],
        }],
        owner_scoped: true,
        time_series: true,
        touch_trigger: false,
    },
    TableSpec {
        name: "automation_logs",
        columns: &[
            ColumnSpec::required("id", ColumnType::Integer),
            OWNER,
            ColumnSpec::required("rule_id", ColumnType::Text),
            ColumnSpec::required("executed_at", ColumnType::Text),
            ColumnSpec::required("outcome", ColumnType::Text),
            ColumnSpec::optional("detail", ColumnType::Text),
        ],
        primary_key: &["id"],
        autoincrement: true,
        foreign_keys: &[ForeignKeySpec {
            columns: &["rule_id", "owner_id"],
            parent_table: "automation_rules",
            parent_columns: &["id", "owner_id"],
        }],
        owner_scoped: true,
        time_series: true,
        touch_trigger: false,
    },
    TableSpec {
        name: "app_settings",
        columns: &[
            ColumnSpec::required("key", ColumnType::Text),
            OWNER,
            ColumnSpec::required("value", ColumnType::Text),
            ColumnSpec::with_default("value_type", ColumnType::Text, "'string'"),
            ColumnSpec::required("updated_at", ColumnType::Text),
        ],
        primary_key: &["key", "owner_id"],
        autoincrement: false,
        foreign_keys: &[],
        owner_scoped: true,
        time_series: false,
        touch_trigger: false,
    },
    TableSpec {
        name: "backup_logs",
        columns: &[
            ColumnSpec::required("id", ColumnType::Integer),
            ColumnSpec::required("created_at", ColumnType::Text),
            ColumnSpec::required("kind", ColumnType::Text),
            ColumnSpec::required("path", ColumnType::Text),
            ColumnSpec::with_default("size_bytes", ColumnType::Integer, "0"),
            ColumnSpec::with_default("record_count", ColumnType::Integer, "0"),
            ColumnSpec::required("checksum", ColumnType::Text),
            ColumnSpec::required("app_version", ColumnType::Text),
            ColumnSpec::required("schema_version", ColumnType::Integer),
            ColumnSpec::with_default("status", ColumnType::Text, "'completed'"),
        ],
        primary_key: &["id"],
        autoincrement: true,
        foreign_keys: &[],
        owner_scoped: false,
        time_series: true,
        touch_trigger: false,
    },
];

pub const INDEXES: &[IndexSpec] = &[
    IndexSpec {
        name: "idx_plants_room",
        table: "plants",
        columns: &["room_id", "owner_id"],
    },
    IndexSpec {
        name: "idx_plants_strain",
        table: "plants",
        columns: &["strain_id", "owner_id"],
    },
    IndexSpec {
        name: "idx_sensor_devices_room",
        table: "sensor_devices",
        columns: &["room_id", "owner_id"],
    },
    IndexSpec {
        name: "idx_sensor_readings_device",
        table: "sensor_readings",
        columns: &["device_id", "owner_id", "recorded_at"],
    },
    IndexSpec {
        name: "idx_sensor_readings_recorded_at",
        table: "sensor_readings",
        columns: &["recorded_at"],
    },
    IndexSpec {
        name: "idx_automation_logs_rule",
        table: "automation_logs",
        columns: &["rule_id", "owner_id"],
    },
    IndexSpec {
        name: "idx_automation_logs_executed_at",
        table: "automation_logs",
        columns: &["executed_at"],
    },
    IndexSpec {
        name: "idx_plant_notes_plant",
        table: "plant_notes",
        columns: &["plant_id", "owner_id"],
    },
    IndexSpec {
        name: "idx_backup_logs_created_at",
        table: "backup_logs",
        columns: &["created_at"],
    },
];

/// Look up a table descriptor by name
pub fn table_spec(name: &str) -> Option<&'static TableSpec> {
    TABLES.iter().find(|t| t.name == name)
}

/// SQLite datetime expression producing the same RFC 3339 shape the
/// repositories write from chrono.
const NOW_EXPR: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

// ============================================
// DDL builder
// ============================================

fn column_sql(col: &ColumnSpec, inline_pk: bool) -> String {
    let mut sql = format!("{} {}", col.name, col.ty.as_sql());
    if inline_pk {
        sql.push_str(" PRIMARY KEY AUTOINCREMENT");
    }
    if !col.nullable && !inline_pk {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = col.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    sql
}

/// Render a CREATE TABLE statement from a descriptor
pub fn create_table_sql(table: &TableSpec) -> String {
    let inline_pk = table.autoincrement && table.primary_key.len() == 1;
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_sql(c, inline_pk && c.name == table.primary_key[0]))
        .collect();

    if !inline_pk {
        parts.push(format!("PRIMARY KEY ({})", table.primary_key.join(", ")));
    }

    for fk in table.foreign_keys {
        parts.push(format!(
            "FOREIGN KEY ({}) REFERENCES {}({})",
            fk.columns.join(", "),
            fk.parent_table,
            fk.parent_columns.join(", ")
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table.name,
        parts.join(",\n    ")
    )
}

/// Render a CREATE INDEX statement from a descriptor
pub fn create_index_sql(index: &IndexSpec) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}({})",
        index.name,
        index.table,
        index.columns.join(", ")
    )
}

/// Render the updated_at maintenance trigger for an aggregate table.
///
/// The WHEN guard skips rows where the caller already bumped updated_at,
/// which keeps the trigger from firing on its own write when recursive
/// triggers are enabled.
pub fn touch_trigger_sql(table: &TableSpec) -> String {
    format!(
        "CREATE TRIGGER IF NOT EXISTS trg_{table}_touch\n\
         AFTER UPDATE ON {table}\n\
         FOR EACH ROW\n\
         WHEN NEW.updated_at = OLD.updated_at\n\
         BEGIN\n    \
             UPDATE {table} SET updated_at = {now} WHERE id = NEW.id AND owner_id = NEW.owner_id;\n\
         END",
        table = table.name,
        now = NOW_EXPR,
    )
}

/// Full bootstrap DDL: every table, index, and trigger of the current schema
fn bootstrap_sql() -> String {
    let mut statements: Vec<String> = Vec::new();
    for table in TABLES {
        statements.push(create_table_sql(table));
    }
    for index in INDEXES {
        statements.push(create_index_sql(index));
    }
    for table in TABLES.iter().filter(|t| t.touch_trigger) {
        statements.push(touch_trigger_sql(table));
    }
    let mut sql = statements.join(";\n\n");
    sql.push(';');
    sql
}

// ============================================
// Migrations
// ============================================

struct Migration {
    version: i32,
    description: &'static str,
    apply: fn(&rusqlite::Transaction) -> rusqlite::Result<()>,
}

/// Upgrade steps for stores created before the current schema version.
/// Version 1 was the launch schema; new stores bootstrap directly at
/// [`SCHEMA_VERSION`] and never run these.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "add scheduling metadata to automation rules",
    apply: |tx| {
        tx.execute_batch(
            "ALTER TABLE automation_rules ADD COLUMN schedule TEXT;
             CREATE INDEX IF NOT EXISTS idx_automation_logs_executed_at
                 ON automation_logs(executed_at);",
        )
    },
}];

fn user_version(conn: &Connection) -> Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

fn set_user_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {}", version))
}

/// Bring the store up to the current schema version.
///
/// A fresh store (user_version 0) gets the full schema in one transaction.
/// Older stores run each pending migration in its own transaction; the first
/// failure rolls that step back and aborts, leaving the prior version intact.
/// Migration failures are fatal and never retried.
pub fn initialize(conn: &mut Connection) -> Result<()> {
    let current = user_version(conn)?;

    if current == 0 {
        tracing::info!(version = SCHEMA_VERSION, "Bootstrapping schema");
        let tx = conn.transaction()?;
        tx.execute_batch(&bootstrap_sql())
            .map_err(|e| Error::Migration {
                version: SCHEMA_VERSION,
                source: e,
            })?;
        set_user_version(&tx, SCHEMA_VERSION).map_err(|e| Error::Migration {
            version: SCHEMA_VERSION,
            source: e,
        })?;
        tx.commit().map_err(|e| Error::Migration {
            version: SCHEMA_VERSION,
            source: e,
        })?;
        return Ok(());
    }

    if current > SCHEMA_VERSION {
        return Err(Error::Config(format!(
            "store schema version {} is newer than supported version {}",
            current, SCHEMA_VERSION
        )));
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Running migration"
        );
        let tx = conn.transaction()?;
        (migration.apply)(&tx).map_err(|e| Error::Migration {
            version: migration.version,
            source: e,
        })?;
        set_user_version(&tx, migration.version).map_err(|e| Error::Migration {
            version: migration.version,
            source: e,
        })?;
        tx.commit().map_err(|e| Error::Migration {
            version: migration.version,
            source: e,
        })?;
    }

    if current < SCHEMA_VERSION {
        tracing::info!(from = current, to = SCHEMA_VERSION, "Migrations complete");
    }

    Ok(())
}

/// Get the current schema version from the store
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    user_version(conn)
}

// ============================================
// Connection setup
// ============================================

/// Open a connection and apply the fixed runtime parameters: referential
/// integrity, write-ahead journaling, page cache size, busy timeout.
pub fn open_connection(path: &Path, config: &DatabaseConfig) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    apply_pragmas(&conn, config)?;
    Ok(conn)
}

/// Apply engine runtime parameters to an open connection
pub fn apply_pragmas(conn: &Connection, config: &DatabaseConfig) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA foreign_keys = {};
         PRAGMA journal_mode = {};
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = {};",
        if config.enable_foreign_keys { "ON" } else { "OFF" },
        if config.enable_wal { "WAL" } else { "DELETE" },
        config.cache_size,
    ))?;
    conn.busy_timeout(config.busy_timeout())?;
    Ok(())
}
