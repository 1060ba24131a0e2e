// ==========================================
// 屋面估价引擎 - 价目表数据仓储
// ==========================================
// 表: line_item_type
// 说明: 重算时整体加载为 CatalogSnapshot, 引擎不直接访问数据库
// ==========================================

use crate::domain::pricing::{BaseCosts, CatalogEntry};
use crate::engine::line_item_calc::CatalogSnapshot;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::format_ts;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct CatalogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新增或覆盖条目
    pub fn upsert(&self, entry: &CatalogEntry) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        upsert_row(&conn, entry)?;
        Ok(())
    }

    /// 批量新增或覆盖 (单事务)
    pub fn upsert_batch(&self, entries: &[CatalogEntry]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for entry in entries {
            upsert_row(&tx, entry)?;
        }
        tx.commit()?;
        Ok(entries.len())
    }

    pub fn find_by_id(&self, line_item_type_id: &str) -> RepositoryResult<Option<CatalogEntry>> {
        let conn = self.get_conn()?;

        Ok(conn
            .query_row(
                r#"SELECT line_item_type_id, name, unit,
                          base_material_cost, base_labor_cost, base_equipment_cost
                   FROM line_item_type
                   WHERE line_item_type_id = ?"#,
                params![line_item_type_id],
                map_row,
            )
            .optional()?)
    }

    pub fn list_all(&self) -> RepositoryResult<Vec<CatalogEntry>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT line_item_type_id, name, unit,
                      base_material_cost, base_labor_cost, base_equipment_cost
               FROM line_item_type
               ORDER BY line_item_type_id"#,
        )?;
        let entries = stmt
            .query_map([], map_row)?
            .collect::<Result<Vec<CatalogEntry>, _>>()?;
        Ok(entries)
    }

    /// 加载价目表快照
    pub fn load_snapshot(&self) -> RepositoryResult<CatalogSnapshot> {
        Ok(CatalogSnapshot::from_entries(self.list_all()?))
    }
}

fn upsert_row(conn: &Connection, entry: &CatalogEntry) -> rusqlite::Result<usize> {
    let now = chrono::Utc::now().naive_utc();
    conn.execute(
        r#"INSERT INTO line_item_type (
               line_item_type_id, name, unit,
               base_material_cost, base_labor_cost, base_equipment_cost, updated_at
           ) VALUES (?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(line_item_type_id) DO UPDATE SET
               name = excluded.name,
               unit = excluded.unit,
               base_material_cost = excluded.base_material_cost,
               base_labor_cost = excluded.base_labor_cost,
               base_equipment_cost = excluded.base_equipment_cost,
               updated_at = excluded.updated_at"#,
        params![
            &entry.line_item_type_id,
            &entry.name,
            &entry.unit,
            entry.base_costs.base_material_cost,
            entry.base_costs.base_labor_cost,
            entry.base_costs.base_equipment_cost,
            format_ts(&now),
        ],
    )
}

fn map_row(row: &rusqlite::Row) -> rusqlite::Result<CatalogEntry> {
    Ok(CatalogEntry {
        line_item_type_id: row.get(0)?,
        name: row.get(1)?,
        unit: row.get(2)?,
        base_costs: BaseCosts {
            base_material_cost: row.get(3)?,
            base_labor_cost: row.get(4)?,
            base_equipment_cost: row.get(5)?,
        },
    })
}
