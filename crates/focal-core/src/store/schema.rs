//! Store schema: base tables and their maven shadow tables.
//!
//! Base tables hold public (reduced) values; `maven_*` tables hold the
//! bounded JSON-array sample windows feeding them. Column shapes follow the
//! tracked-field model: compound values are canonical JSON text, scalars are
//! native REAL/INTEGER.

/// Dropped in reverse creation order by `restart()`.
pub const TABLES: &[&str] = &[
    "chain",
    "account",
    "nodes",
    "objects",
    "timing",
    "assets",
    "pairs",
    "maven_account",
    "maven_assets",
    "maven_pairs",
    "maven_timing",
];

pub const CREATES: &[&str] = &[
    "CREATE TABLE chain (
        name TEXT PRIMARY KEY,
        id TEXT UNIQUE
    )",
    "CREATE TABLE account (
        name TEXT PRIMARY KEY,
        id TEXT UNIQUE,
        fees_account TEXT,
        ltm INTEGER,
        cancels TEXT
    )",
    "CREATE TABLE nodes (
        url TEXT PRIMARY KEY,
        ping REAL,
        handshake REAL,
        blocktime INTEGER,
        code INTEGER,
        status TEXT,
        history INTEGER
    )",
    "CREATE TABLE objects (
        id TEXT PRIMARY KEY,
        name TEXT,
        precision INTEGER
    )",
    "CREATE TABLE timing (
        name TEXT PRIMARY KEY,
        blocknum INTEGER,
        blocktime INTEGER,
        server REAL,
        ping REAL,
        handshake REAL,
        read REAL,
        begin REAL
    )",
    "CREATE TABLE assets (
        name TEXT PRIMARY KEY,
        id TEXT UNIQUE,
        precision INTEGER,
        supply REAL,
        fees_asset TEXT,
        balance TEXT
    )",
    "CREATE TABLE pairs (
        name TEXT PRIMARY KEY,
        id TEXT,
        invert_pair TEXT,
        invert_id TEXT,
        ops TEXT,
        last REAL,
        book TEXT,
        history TEXT,
        opens TEXT,
        fills TEXT
    )",
    "CREATE TABLE maven_account (
        name TEXT PRIMARY KEY,
        fees_account TEXT,
        ltm TEXT,
        cancels TEXT
    )",
    "CREATE TABLE maven_assets (
        name TEXT PRIMARY KEY,
        supply TEXT,
        fees_asset TEXT,
        balance TEXT
    )",
    "CREATE TABLE maven_pairs (
        name TEXT PRIMARY KEY,
        ops TEXT,
        last TEXT,
        book TEXT,
        history TEXT,
        opens TEXT,
        fills TEXT
    )",
    "CREATE TABLE maven_timing (
        name TEXT PRIMARY KEY,
        blocknum TEXT,
        blocktime TEXT,
        read TEXT
    )",
];
