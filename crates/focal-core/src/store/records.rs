//! Typed row records decoded at the store boundary.
//!
//! Serialization stays inside this module: JSON text columns become
//! `serde_json::Value` here and nowhere else. Sample windows keep their
//! JSON-blob representation because their element shape is legitimately
//! heterogeneous per field.

use super::StoreError;
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

/// Extracts a non-nullable field from a row.
fn get_required<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get::<T, _>(column)
        .map_err(|e| StoreError::Decode(format!("column '{column}': {e}")))
}

/// Decodes a JSON text column, treating NULL as `Value::Null`.
fn get_json(row: &SqliteRow, column: &str) -> Result<Value, StoreError> {
    let text: Option<String> = row
        .try_get(column)
        .map_err(|e| StoreError::Decode(format!("column '{column}': {e}")))?;
    match text {
        None => Ok(Value::Null),
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| StoreError::Decode(format!("column '{column}': {e}"))),
    }
}

/// The `chain` table's single row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRecord {
    pub name: String,
    pub id: String,
}

impl ChainRecord {
    pub(super) fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        Ok(Self { name: get_required(row, "name")?, id: get_required(row, "id")? })
    }
}

/// The watched account's public row.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub name: String,
    /// `None` until the bootstrap vote lands.
    pub id: Option<String>,
    pub fees_account: Value,
    pub ltm: bool,
    pub cancels: Value,
}

impl AccountRecord {
    pub(super) fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        Ok(Self {
            name: get_required(row, "name")?,
            id: row.try_get("id").unwrap_or(None),
            fees_account: get_json(row, "fees_account")?,
            ltm: get_required::<i64>(row, "ltm")? != 0,
            cancels: get_json(row, "cancels")?,
        })
    }
}

/// One configured node's latest classification.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub url: String,
    pub ping: f64,
    pub handshake: f64,
    pub blocktime: i64,
    pub code: i64,
    pub status: String,
    /// Independent flag: whether the node supports trade history.
    pub history: bool,
}

impl NodeRecord {
    pub(super) fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        Ok(Self {
            url: get_required(row, "url")?,
            ping: get_required(row, "ping")?,
            handshake: get_required(row, "handshake")?,
            blocktime: get_required(row, "blocktime")?,
            code: get_required(row, "code")?,
            status: get_required(row, "status")?,
            history: get_required::<i64>(row, "history")? != 0,
        })
    }

    /// Whitelist eligibility.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.code == 200
    }
}

/// One chain object id registered at bootstrap.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub id: String,
    pub name: String,
    pub precision: Option<i64>,
}

impl ObjectRecord {
    pub(super) fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: get_required(row, "id")?,
            name: get_required(row, "name")?,
            precision: row.try_get("precision").unwrap_or(None),
        })
    }
}

/// One tracked asset's public row.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub name: String,
    pub id: Option<String>,
    pub precision: i64,
    pub supply: f64,
    pub fees_asset: Value,
    pub balance: Value,
}

impl AssetRecord {
    pub(super) fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        Ok(Self {
            name: get_required(row, "name")?,
            id: row.try_get("id").unwrap_or(None),
            precision: get_required(row, "precision")?,
            supply: get_required(row, "supply")?,
            fees_asset: get_json(row, "fees_asset")?,
            balance: get_json(row, "balance")?,
        })
    }
}

/// One tracked pair's public row.
#[derive(Debug, Clone)]
pub struct PairRecord {
    pub name: String,
    pub id: Option<String>,
    pub invert_pair: Option<String>,
    pub invert_id: Option<String>,
    pub ops: Value,
    pub last: f64,
    pub book: Value,
    pub history: Value,
    pub opens: Value,
    pub fills: Value,
}

impl PairRecord {
    pub(super) fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        Ok(Self {
            name: get_required(row, "name")?,
            id: row.try_get("id").unwrap_or(None),
            invert_pair: row.try_get("invert_pair").unwrap_or(None),
            invert_id: row.try_get("invert_id").unwrap_or(None),
            ops: get_json(row, "ops")?,
            last: get_required(row, "last")?,
            book: get_json(row, "book")?,
            history: get_json(row, "history")?,
            opens: get_json(row, "opens")?,
            fills: get_json(row, "fills")?,
        })
    }
}

/// The timing table's single row of reduced latency/height values.
#[derive(Debug, Clone)]
pub struct TimingRecord {
    pub name: String,
    pub blocknum: i64,
    pub blocktime: i64,
    pub server: f64,
    pub ping: f64,
    pub handshake: f64,
    pub read: f64,
    /// Engine start time, stamped once at `restart()`.
    pub begin: f64,
}

impl TimingRecord {
    pub(super) fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        Ok(Self {
            name: get_required(row, "name")?,
            blocknum: get_required(row, "blocknum")?,
            blocktime: get_required(row, "blocktime")?,
            server: get_required(row, "server")?,
            ping: get_required(row, "ping")?,
            handshake: get_required(row, "handshake")?,
            read: get_required(row, "read")?,
            begin: get_required(row, "begin")?,
        })
    }
}
