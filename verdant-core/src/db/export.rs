//! JSON export and import
//!
//! Export walks the schema descriptors, so a new table shows up in the
//! envelope without touching this module. The envelope is flat: a `metadata`
//! object and one top-level array per table. Import replays it inside one
//! transaction in table declaration order, which satisfies every foreign
//! key without deferring constraints.
//!
//! The `backup_logs` table is local history, not tenant data, and stays out
//! of the envelope.

use crate::db::cache::Cache;
use crate::db::executor::Executor;
use crate::db::perf::StatementClass;
use crate::db::schema::{self, TableSpec};
use crate::error::{Error, Result};
use chrono::Utc;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Transaction};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Outcome of one import
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    /// Rows inserted per table, in declaration order
    pub rows_imported: Vec<(String, usize)>,
    pub total_rows: usize,
}

/// Schema-driven data porter
pub struct Exporter {
    exec: Arc<Executor>,
    cache: Arc<Cache>,
}

impl Exporter {
    pub fn new(exec: Arc<Executor>, cache: Arc<Cache>) -> Self {
        Self { exec, cache }
    }

    /// Serialize the store (or one owner's slice of it) into a JSON envelope
    pub fn export_data(&self, owner: Option<&str>) -> Result<Value> {
        let schema_version = self.exec.with_connection(schema::get_schema_version)?;
        let tables = self
            .exec
            .read("export.dump", StatementClass::Select, |conn| {
                let mut tables = Map::new();
                for table in exportable_tables() {
                    tables.insert(
                        table.name.to_string(),
                        Value::Array(dump_table(conn, table, owner)?),
                    );
                }
                Ok(tables)
            })?;

        let mut envelope = Map::new();
        envelope.insert(
            "metadata".to_string(),
            json!({
                "exported_at": crate::db::repo::ts(&Utc::now()),
                "version": env!("CARGO_PKG_VERSION"),
                "schema_version": schema_version,
                "owner": owner,
            }),
        );
        // Table arrays sit at the top level, next to metadata
        envelope.extend(tables);
        Ok(Value::Object(envelope))
    }

    /// Replay an envelope into the store.
    ///
    /// All rows land in one transaction; a single bad row rolls the whole
    /// import back. With `rewrite_owner` set, every owner-scoped row is
    /// re-homed under that owner on the way in.
    pub fn import_data(&self, envelope: &Value, rewrite_owner: Option<&str>) -> Result<ImportReport> {
        let tables = envelope
            .as_object()
            .ok_or_else(|| Error::Import("envelope is not an object".to_string()))?;
        if !tables.get("metadata").map(Value::is_object).unwrap_or(false) {
            return Err(Error::Import(
                "envelope has no metadata object".to_string(),
            ));
        }

        let report = self
            .exec
            .write("import.replay", StatementClass::Insert, |tx| {
                let mut rows_imported = Vec::new();
                let mut total_rows = 0;
                for table in exportable_tables() {
                    let Some(rows) = tables.get(table.name).and_then(Value::as_array) else {
                        continue;
                    };
                    let inserted = insert_rows(tx, table, rows, rewrite_owner)
                        .map_err(to_sqlite_error)?;
                    total_rows += inserted;
                    rows_imported.push((table.name.to_string(), inserted));
                }
                Ok(ImportReport {
                    rows_imported,
                    total_rows,
                })
            })?;

        // Imported rows supersede anything cached
        self.cache.clear();
        tracing::info!(total_rows = report.total_rows, "Import complete");
        Ok(report)
    }
}

fn exportable_tables() -> impl Iterator<Item = &'static TableSpec> {
    schema::TABLES.iter().filter(|t| t.name != "backup_logs")
}

fn dump_table(
    conn: &Connection,
    table: &TableSpec,
    owner: Option<&str>,
) -> rusqlite::Result<Vec<Value>> {
    let sql = match owner {
        Some(_) if table.owner_scoped => {
            format!("SELECT * FROM {} WHERE owner_id = ?1", table.name)
        }
        _ => format!("SELECT * FROM {}", table.name),
    };
    let mut stmt = conn.prepare(&sql)?;

    // Column access by name: a store migrated with ALTER TABLE has its
    // added columns at the end, so positional order is not reliable.
    let row_to_json = |row: &rusqlite::Row| -> rusqlite::Result<Value> {
        let mut obj = Map::new();
        for col in table.columns {
            obj.insert(col.name.to_string(), sql_to_json(row.get_ref(col.name)?));
        }
        Ok(Value::Object(obj))
    };

    let rows = match owner {
        Some(owner) if table.owner_scoped => stmt
            .query_map([owner], row_to_json)?
            .collect::<rusqlite::Result<Vec<Value>>>()?,
        _ => stmt
            .query_map([], row_to_json)?
            .collect::<rusqlite::Result<Vec<Value>>>()?,
    };
    Ok(rows)
}

fn insert_rows(
    tx: &Transaction,
    table: &TableSpec,
    rows: &[Value],
    rewrite_owner: Option<&str>,
) -> std::result::Result<usize, Error> {
    // Autoincrement ids are local to the source store; let the target
    // assign fresh ones.
    let columns: Vec<&str> = table
        .columns
        .iter()
        .map(|c| c.name)
        .filter(|name| !(table.autoincrement && *name == "id"))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name,
        columns.join(", "),
        placeholders.join(", ")
    );

    let mut inserted = 0;
    for row in rows {
        let obj = row.as_object().ok_or_else(|| {
            Error::Import(format!("non-object row in table {}", table.name))
        })?;
        let mut values = Vec::with_capacity(columns.len());
        for col in &columns {
            let value = match (*col, rewrite_owner) {
                ("owner_id", Some(owner)) if table.owner_scoped => {
                    SqlValue::Text(owner.to_string())
                }
                _ => json_to_sql(obj.get(*col).unwrap_or(&Value::Null)),
            };
            values.push(value);
        }
        tx.execute(&sql, params_from_iter(values))?;
        inserted += 1;
    }
    Ok(inserted)
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => json!(hex::encode(b)),
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Import errors cross the executor's rusqlite boundary wrapped in a
/// statement-level failure so the transaction still rolls back.
fn to_sqlite_error(err: Error) -> rusqlite::Error {
    match err {
        Error::Database(e) => e,
        other => rusqlite::Error::ToSqlConversionFailure(Box::new(other)),
    }
}
