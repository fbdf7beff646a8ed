//! Shared SQLite store: the only resource mutated by more than one task.
//!
//! Every persisted row is owned by this module. Mutations go through
//! [`Store::execute`] (one statement or an ordered write-only batch, one
//! `BEGIN IMMEDIATE` transaction) or [`Store::append_sample`] (atomic
//! read-append-trim-write against one maven window). A lock-busy condition
//! retries the whole transaction with increasing, capped backoff; conflicts
//! never reach callers. Reads decode into the typed records in [`records`].

pub mod records;
mod schema;

use crate::{
    config::FocalConfig,
    types::{NodeStatus, Sample, Table, Tracker, LATENCY_SENTINEL},
    utils::{json_canonical, unix_now},
};
use records::{
    AccountRecord, AssetRecord, ChainRecord, NodeRecord, ObjectRecord, PairRecord, TimingRecord,
};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    SqliteConnection, SqlitePool,
};
use std::{cmp::Ordering, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

/// Graphene chains register their core token under this object id.
pub const CORE_ASSET_ID: &str = "1.3.0";

/// Errors surfaced by store operations.
///
/// Lock contention (`SQLITE_BUSY`/`SQLITE_LOCKED`) is consumed internally by
/// the retry helper and never appears here.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row decode error: {0}")]
    Decode(String),

    #[error("a read may not appear in a multi-statement batch")]
    ReadInBatch,

    #[error("missing row: {0}")]
    MissingRow(String),

    #[error("tracker '{0}' has no sample window")]
    NoWindow(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the error is SQLite lock contention, retryable by design.
    fn is_busy(&self) -> bool {
        match self {
            Self::Sqlx(sqlx::Error::Database(db)) => {
                let code = db.code();
                let code = code.as_deref().unwrap_or_default();
                // 5 = SQLITE_BUSY, 6 = SQLITE_LOCKED, plus extended variants
                matches!(code, "5" | "6" | "261" | "262" | "517") ||
                    db.message().contains("locked") ||
                    db.message().contains("busy")
            }
            _ => false,
        }
    }
}

/// One bound parameter.
#[derive(Debug, Clone)]
pub enum Bind {
    Text(String),
    Real(f64),
    Int(i64),
    Null,
}

/// One SQL statement with its ordered binds.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<Bind>,
}

impl Statement {
    #[must_use]
    pub fn new(sql: impl Into<String>, binds: Vec<Bind>) -> Self {
        Self { sql: sql.into(), binds }
    }

    fn is_read(&self) -> bool {
        self.sql.trim_start().get(..6).is_some_and(|head| head.eq_ignore_ascii_case("select"))
    }
}

/// Transactional operations understood by the shared retry helper.
enum TxnOp<'a> {
    /// Ordered write statements executed in one transaction.
    Batch(&'a [Statement]),
    /// A single read statement.
    Select(&'a Statement),
    /// Atomic read-append-trim-write against one maven window.
    Append { tracker: Tracker, key: &'a str, sample: &'a Sample, window: usize },
}

/// The shared SQLite store.
pub struct Store {
    pool: SqlitePool,
    config: Arc<FocalConfig>,
}

impl Store {
    /// Opens (creating if missing) the store file for the configured chain.
    ///
    /// WAL journaling plus a short driver-level busy timeout: contention
    /// beyond the driver timeout surfaces as `SQLITE_BUSY` and is handled by
    /// the retry helper, so latency degrades instead of failing.
    ///
    /// # Errors
    /// Returns `StoreError` if the data directory or pool cannot be created.
    pub async fn open(config: Arc<FocalConfig>) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let options = SqliteConnectOptions::new()
            .filename(config.db_path())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(100));
        let pool = SqlitePoolOptions::new()
            .max_connections(config.tuning.collectors as u32 + 4)
            .connect_with(options)
            .await?;
        Ok(Self { pool, config })
    }

    /// Drops and recreates the full schema, then seeds one row per
    /// configured node, asset, and pair. Idempotent.
    ///
    /// # Errors
    /// Returns `StoreError` if schema creation fails.
    pub async fn restart(&self) -> Result<(), StoreError> {
        let chain = &self.config.chain;
        let mut statements = Vec::new();
        for table in schema::TABLES {
            statements.push(Statement::new(format!("DROP TABLE IF EXISTS {table}"), vec![]));
        }
        for create in schema::CREATES {
            statements.push(Statement::new(*create, vec![]));
        }

        statements.push(Statement::new(
            "INSERT INTO chain (name, id) VALUES (?, ?)",
            vec![Bind::Text(chain.name.clone()), Bind::Text(chain.chain_id.clone())],
        ));
        statements.push(Statement::new(
            "INSERT INTO timing (name, blocknum, blocktime, server, ping, handshake, read, begin) \
             VALUES (?, 0, 0, 0.0, ?, ?, ?, ?)",
            vec![
                Bind::Text(chain.account.clone()),
                Bind::Real(LATENCY_SENTINEL),
                Bind::Real(LATENCY_SENTINEL),
                Bind::Real(LATENCY_SENTINEL),
                Bind::Real(unix_now()),
            ],
        ));
        statements.push(Statement::new(
            "INSERT INTO maven_timing (name, blocknum, blocktime, read) \
             VALUES (?, '[]', '[]', '[]')",
            vec![Bind::Text(chain.account.clone())],
        ));
        statements.push(Statement::new(
            "INSERT INTO account (name, fees_account, ltm, cancels) VALUES (?, '{}', 0, '[]')",
            vec![Bind::Text(chain.account.clone())],
        ));
        statements.push(Statement::new(
            "INSERT INTO maven_account (name, fees_account, ltm, cancels) \
             VALUES (?, '[]', '[]', '[]')",
            vec![Bind::Text(chain.account.clone())],
        ));
        statements.push(Statement::new(
            "INSERT INTO objects (id, name) VALUES (?, ?)",
            vec![Bind::Text(CORE_ASSET_ID.into()), Bind::Text(chain.core.clone())],
        ));
        for asset in &chain.assets {
            statements.push(Statement::new(
                "INSERT INTO assets (name, precision, supply, fees_asset, balance) \
                 VALUES (?, 0, 0.0, '{}', '{}')",
                vec![Bind::Text(asset.clone())],
            ));
            statements.push(Statement::new(
                "INSERT INTO maven_assets (name, supply, fees_asset, balance) \
                 VALUES (?, '[]', '[]', '[]')",
                vec![Bind::Text(asset.clone())],
            ));
        }
        for pair in chain.all_pairs() {
            statements.push(Statement::new(
                "INSERT INTO pairs (name, last, ops, book, history, opens, fills) \
                 VALUES (?, 0.0, '[]', '{}', '[]', '[]', '[]')",
                vec![Bind::Text(pair.clone())],
            ));
            statements.push(Statement::new(
                "INSERT INTO maven_pairs (name, ops, last, book, history, opens, fills) \
                 VALUES (?, '[]', '[]', '[]', '[]', '[]', '[]')",
                vec![Bind::Text(pair)],
            ));
        }
        for node in &chain.nodes {
            statements.push(Statement::new(
                "INSERT INTO nodes (url, ping, handshake, blocktime, code, status, history) \
                 VALUES (?, 999.9, 999.9, 0, ?, ?, 1)",
                vec![
                    Bind::Text(node.clone()),
                    Bind::Int(NodeStatus::Initializing.code()),
                    Bind::Text(NodeStatus::Initializing.as_str().into()),
                ],
            ));
        }

        self.transact(TxnOp::Batch(&statements)).await?;
        debug!(chain = %chain.name, "store schema recreated and seeded");
        Ok(())
    }

    /// Executes one statement or an ordered write-only batch in a single
    /// transaction, retrying on lock contention until it commits.
    ///
    /// A read is only permitted as the sole statement; its rows are
    /// returned. Mixing a read into a multi-statement batch is rejected.
    ///
    /// # Errors
    /// Returns `StoreError::ReadInBatch` on a mixed batch; database errors
    /// other than lock contention propagate.
    pub async fn execute(&self, statements: Vec<Statement>) -> Result<Vec<SqliteRow>, StoreError> {
        match statements.as_slice() {
            [single] if single.is_read() => self.transact(TxnOp::Select(single)).await,
            batch => {
                if batch.iter().any(Statement::is_read) {
                    return Err(StoreError::ReadInBatch);
                }
                self.transact(TxnOp::Batch(batch)).await
            }
        }
    }

    /// Appends one raw sample to a field's maven window, evicting the oldest
    /// entries beyond the configured depth. Atomic: the read, trim, and
    /// write happen in one transaction, so racing collectors can lose a
    /// sample to a concurrent append but can never corrupt the window.
    ///
    /// # Errors
    /// Returns `StoreError::NoWindow` for trackers without a maven window.
    pub async fn append_sample(
        &self,
        tracker: Tracker,
        key: &str,
        sample: &Sample,
    ) -> Result<(), StoreError> {
        if !tracker.has_window() {
            return Err(StoreError::NoWindow(tracker.column()));
        }
        let window = self.config.tuning.window;
        self.transact(TxnOp::Append { tracker, key, sample, window }).await?;
        Ok(())
    }

    /// Reads a field's maven window.
    ///
    /// # Errors
    /// Returns `StoreError::NoWindow` for trackers without a maven window,
    /// `StoreError::MissingRow` for an unseeded key.
    pub async fn read_window(&self, tracker: Tracker, key: &str) -> Result<Vec<Sample>, StoreError> {
        if !tracker.has_window() {
            return Err(StoreError::NoWindow(tracker.column()));
        }
        let statement = Statement::new(
            format!(
                "SELECT {} FROM {} WHERE name = ?",
                tracker.column(),
                tracker.table().maven()
            ),
            vec![Bind::Text(key.into())],
        );
        let rows = self.transact(TxnOp::Select(&statement)).await?;
        let row = rows
            .first()
            .ok_or_else(|| StoreError::MissingRow(format!("{}/{key}", tracker.table().maven())))?;
        let text: String = sqlx::Row::try_get(row, 0)
            .map_err(|e| StoreError::Decode(format!("window {}: {e}", tracker.column())))?;
        let values: Vec<Value> = serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(column = tracker.column(), key, error = %e, "malformed maven window, treating as empty");
            Vec::new()
        });
        Ok(values.into_iter().map(Sample::new).collect())
    }

    /// Writes a reduced public value for a tracked field.
    ///
    /// Scalar columns receive native REAL/INTEGER binds; compound columns
    /// receive canonical JSON text. Timing rows are singletons, so timing
    /// trackers ignore the key.
    ///
    /// # Errors
    /// Returns `StoreError::Decode` when the value's shape does not match
    /// the column type.
    pub async fn write_public(
        &self,
        tracker: Tracker,
        key: &str,
        value: &Value,
    ) -> Result<(), StoreError> {
        let bind = match tracker {
            Tracker::Last |
            Tracker::Supply |
            Tracker::Server |
            Tracker::Read |
            Tracker::Ping |
            Tracker::Handshake => Bind::Real(value.as_f64().ok_or_else(|| {
                StoreError::Decode(format!("{} expects a number, got {value}", tracker.column()))
            })?),
            Tracker::Blocknum | Tracker::Blocktime => {
                Bind::Int(value.as_i64().or_else(|| value.as_f64().map(|f| f as i64)).ok_or_else(
                    || {
                        StoreError::Decode(format!(
                            "{} expects an integer, got {value}",
                            tracker.column()
                        ))
                    },
                )?)
            }
            Tracker::Ltm => Bind::Int(
                value.as_bool().map(i64::from).or_else(|| value.as_i64()).ok_or_else(|| {
                    StoreError::Decode(format!("ltm expects a flag, got {value}"))
                })?,
            ),
            _ => Bind::Text(json_canonical::canonical_string(value)),
        };
        let statement = if tracker.table() == Table::Timing {
            Statement::new(format!("UPDATE timing SET {} = ?", tracker.column()), vec![bind])
        } else {
            Statement::new(
                format!("UPDATE {} SET {} = ? WHERE name = ?", tracker.table().base(), tracker.column()),
                vec![bind, Bind::Text(key.into())],
            )
        };
        self.transact(TxnOp::Batch(std::slice::from_ref(&statement))).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // typed reads
    // ------------------------------------------------------------------

    /// # Errors
    /// Returns `StoreError::MissingRow` before `restart()` has run.
    pub async fn chain(&self) -> Result<ChainRecord, StoreError> {
        let rows = self.select("SELECT * FROM chain").await?;
        ChainRecord::from_row(rows.first().ok_or_else(|| StoreError::MissingRow("chain".into()))?)
    }

    /// # Errors
    /// Returns `StoreError::MissingRow` before `restart()` has run.
    pub async fn account(&self) -> Result<AccountRecord, StoreError> {
        let rows = self.select("SELECT * FROM account").await?;
        AccountRecord::from_row(
            rows.first().ok_or_else(|| StoreError::MissingRow("account".into()))?,
        )
    }

    /// # Errors
    /// Returns `StoreError` on database failure.
    pub async fn nodes(&self) -> Result<Vec<NodeRecord>, StoreError> {
        self.select("SELECT * FROM nodes").await?.iter().map(NodeRecord::from_row).collect()
    }

    /// # Errors
    /// Returns `StoreError` on database failure.
    pub async fn assets(&self) -> Result<Vec<AssetRecord>, StoreError> {
        self.select("SELECT * FROM assets").await?.iter().map(AssetRecord::from_row).collect()
    }

    /// # Errors
    /// Returns `StoreError` on database failure.
    pub async fn objects(&self) -> Result<Vec<ObjectRecord>, StoreError> {
        self.select("SELECT * FROM objects").await?.iter().map(ObjectRecord::from_row).collect()
    }

    /// # Errors
    /// Returns `StoreError` on database failure.
    pub async fn pairs(&self) -> Result<Vec<PairRecord>, StoreError> {
        self.select("SELECT * FROM pairs").await?.iter().map(PairRecord::from_row).collect()
    }

    /// # Errors
    /// Returns `StoreError::MissingRow` before `restart()` has run.
    pub async fn timing(&self) -> Result<TimingRecord, StoreError> {
        let rows = self.select("SELECT * FROM timing").await?;
        TimingRecord::from_row(rows.first().ok_or_else(|| StoreError::MissingRow("timing".into()))?)
    }

    /// Currently healthy node URLs, ascending by ping.
    ///
    /// A single-node configuration returns that node regardless of status.
    ///
    /// # Errors
    /// Returns `StoreError` on database failure.
    pub async fn whitelist(&self) -> Result<Vec<String>, StoreError> {
        let nodes = self.nodes().await?;
        if nodes.len() == 1 {
            return Ok(nodes.into_iter().map(|node| node.url).collect());
        }
        let mut connected: Vec<NodeRecord> =
            nodes.into_iter().filter(NodeRecord::is_connected).collect();
        connected.sort_by(|a, b| a.ping.partial_cmp(&b.ping).unwrap_or(Ordering::Equal));
        Ok(connected.into_iter().map(|node| node.url).collect())
    }

    // ------------------------------------------------------------------
    // transaction machinery
    // ------------------------------------------------------------------

    async fn select(&self, sql: &str) -> Result<Vec<SqliteRow>, StoreError> {
        let statement = Statement::new(sql, vec![]);
        self.transact(TxnOp::Select(&statement)).await
    }

    /// The shared retrying-transaction helper.
    ///
    /// Runs the operation inside `BEGIN IMMEDIATE … COMMIT`; on lock
    /// contention the whole transaction is rolled back, the task sleeps for
    /// an increasing capped backoff, and the operation re-runs from its
    /// initial read. Success is eventually guaranteed while the backing
    /// file remains reachable; latency is not bounded.
    async fn transact(&self, op: TxnOp<'_>) -> Result<Vec<SqliteRow>, StoreError> {
        let max_backoff = self.config.tuning.store_max_backoff();
        let mut attempt: u32 = 0;
        loop {
            let mut conn = self.pool.acquire().await?;
            match Self::attempt_txn(&mut conn, &op).await {
                Err(err) if err.is_busy() => {
                    drop(conn);
                    let pause = busy_backoff(attempt, max_backoff);
                    debug!(attempt, pause_ms = pause.as_millis() as u64, "store busy, retrying");
                    tokio::time::sleep(pause).await;
                    attempt = attempt.saturating_add(1);
                }
                outcome => return outcome,
            }
        }
    }

    async fn attempt_txn(
        conn: &mut SqliteConnection,
        op: &TxnOp<'_>,
    ) -> Result<Vec<SqliteRow>, StoreError> {
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        match Self::run_statements(conn, op).await {
            Ok(rows) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(rows)
            }
            Err(err) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(err)
            }
        }
    }

    async fn run_statements(
        conn: &mut SqliteConnection,
        op: &TxnOp<'_>,
    ) -> Result<Vec<SqliteRow>, StoreError> {
        match op {
            TxnOp::Batch(statements) => {
                for statement in *statements {
                    bind_query(statement).execute(&mut *conn).await?;
                }
                Ok(Vec::new())
            }
            TxnOp::Select(statement) => Ok(bind_query(statement).fetch_all(&mut *conn).await?),
            TxnOp::Append { tracker, key, sample, window } => {
                let select = format!(
                    "SELECT {} FROM {} WHERE name = ?",
                    tracker.column(),
                    tracker.table().maven()
                );
                let row = sqlx::query(&select)
                    .bind(*key)
                    .fetch_optional(&mut *conn)
                    .await?
                    .ok_or_else(|| {
                        StoreError::MissingRow(format!("{}/{key}", tracker.table().maven()))
                    })?;
                let text: String = sqlx::Row::try_get(&row, 0)
                    .map_err(|e| StoreError::Decode(format!("window {}: {e}", tracker.column())))?;
                let mut items: Vec<Value> = serde_json::from_str(&text).unwrap_or_default();
                items.push(sample.value().clone());
                if items.len() > *window {
                    let excess = items.len() - *window;
                    items.drain(..excess);
                }
                let serialized = serde_json::to_string(&items)
                    .map_err(|e| StoreError::Decode(format!("window {}: {e}", tracker.column())))?;
                let update = format!(
                    "UPDATE {} SET {} = ? WHERE name = ?",
                    tracker.table().maven(),
                    tracker.column()
                );
                sqlx::query(&update).bind(serialized).bind(*key).execute(&mut *conn).await?;
                Ok(Vec::new())
            }
        }
    }
}

/// Increasing capped backoff for lock contention.
fn busy_backoff(attempt: u32, max: Duration) -> Duration {
    let exp = Duration::from_millis(5u64.saturating_mul(1u64 << attempt.min(16)));
    exp.min(max)
}

fn bind_query<'q>(
    statement: &'q Statement,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    let mut query = sqlx::query(&statement.sql);
    for bind in &statement.binds {
        query = match bind {
            Bind::Text(text) => query.bind(text.as_str()),
            Bind::Real(real) => query.bind(*real),
            Bind::Int(int) => query.bind(*int),
            Bind::Null => query.bind(Option::<String>::None),
        };
    }
    query
}
