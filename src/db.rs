// ==========================================
// 屋面估价引擎 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为 (外键/busy_timeout)
// - 提供幂等建表 init_schema, 供 CLI init 与测试共用
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

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

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL DEFAULT 'global',
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS line_item_type (
    line_item_type_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    unit TEXT,
    base_material_cost REAL NOT NULL DEFAULT 0 CHECK (base_material_cost >= 0),
    base_labor_cost REAL NOT NULL DEFAULT 0 CHECK (base_labor_cost >= 0),
    base_equipment_cost REAL NOT NULL DEFAULT 0 CHECK (base_equipment_cost >= 0),
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS geo_pricing (
    geo_pricing_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    material_multiplier REAL,
    labor_multiplier REAL,
    equipment_multiplier REAL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS estimate (
    estimate_id TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL,
    name TEXT NOT NULL,
    version INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'DRAFT',
    is_superseded INTEGER NOT NULL DEFAULT 0,
    roof_variables_json TEXT NOT NULL,
    geo_pricing_id TEXT,
    overhead_pct REAL NOT NULL DEFAULT 0,
    profit_pct REAL NOT NULL DEFAULT 0,
    tax_pct REAL NOT NULL DEFAULT 0,
    total_material REAL NOT NULL DEFAULT 0,
    total_labor REAL NOT NULL DEFAULT 0,
    total_equipment REAL NOT NULL DEFAULT 0,
    subtotal REAL NOT NULL DEFAULT 0,
    overhead_amount REAL NOT NULL DEFAULT 0,
    profit_amount REAL NOT NULL DEFAULT 0,
    taxable_amount REAL NOT NULL DEFAULT 0,
    tax_amount REAL NOT NULL DEFAULT 0,
    price_low REAL NOT NULL DEFAULT 0,
    price_likely REAL NOT NULL DEFAULT 0,
    price_high REAL NOT NULL DEFAULT 0,
    revision INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    sent_at TEXT,
    accepted_at TEXT,
    declined_at TEXT,
    expired_at TEXT,
    superseded_at TEXT,
    UNIQUE (subject_id, version)
);

CREATE INDEX IF NOT EXISTS idx_estimate_subject ON estimate(subject_id, version);

CREATE TABLE IF NOT EXISTS estimate_line_item (
    line_item_id TEXT PRIMARY KEY,
    estimate_id TEXT NOT NULL REFERENCES estimate(estimate_id) ON DELETE CASCADE,
    line_item_type_id TEXT NOT NULL,
    description TEXT,
    slope_name TEXT,
    sort_order INTEGER NOT NULL DEFAULT 0,
    quantity REAL NOT NULL DEFAULT 0,
    quantity_formula TEXT,
    quantity_override INTEGER NOT NULL DEFAULT 0,
    waste_factor REAL NOT NULL DEFAULT 1,
    material_unit_cost REAL NOT NULL DEFAULT 0,
    labor_unit_cost REAL NOT NULL DEFAULT 0,
    equipment_unit_cost REAL NOT NULL DEFAULT 0,
    cost_override INTEGER NOT NULL DEFAULT 0,
    material_total REAL NOT NULL DEFAULT 0,
    labor_total REAL NOT NULL DEFAULT 0,
    equipment_total REAL NOT NULL DEFAULT 0,
    line_total REAL NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_line_item_estimate ON estimate_line_item(estimate_id, sort_order);
"#;

/// 建表 (幂等) 并登记 schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);

        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }
}
