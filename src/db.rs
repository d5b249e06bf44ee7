// ==========================================
// 药品登记数据同步系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并行同步时的偶发 busy 错误
// - 建库（幂等）：版本化记录表、审计表、处理台账、配置表
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS registry_record (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    business_key TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    valid_from TEXT NOT NULL,
    missing_since TEXT,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (entity_type, business_key)
);

CREATE INDEX IF NOT EXISTS idx_registry_record_missing
    ON registry_record (entity_type, missing_since);

CREATE TABLE IF NOT EXISTS attribute_change_log (
    log_id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    record_id INTEGER NOT NULL REFERENCES registry_record(id),
    attribute TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    observed_as_of TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_change_log_record
    ON attribute_change_log (entity_type, record_id);

CREATE TABLE IF NOT EXISTS temporary_absence (
    absence_id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    record_id INTEGER NOT NULL REFERENCES registry_record(id),
    missing_from TEXT NOT NULL,
    missing_to TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_absence_record
    ON temporary_absence (entity_type, record_id);

CREATE TABLE IF NOT EXISTS processed_unit (
    dataset TEXT NOT NULL,
    period TEXT NOT NULL,
    valid_from TEXT,
    run_id TEXT NOT NULL,
    processed_at TEXT NOT NULL,
    PRIMARY KEY (dataset, period)
);

CREATE TABLE IF NOT EXISTS dispensing_record (
    period TEXT NOT NULL,
    product_code TEXT NOT NULL,
    region_code TEXT NOT NULL,
    quantity REAL NOT NULL,
    amount REAL,
    PRIMARY KEY (period, product_code, region_code)
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);
"#;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 建库（幂等），并记录 schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
