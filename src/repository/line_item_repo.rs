// ==========================================
// 屋面估价引擎 - 估价明细数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: 明细写入与估价单 revision 递增在同一事务内完成, 以编辑方读到的 revision 为条件
// ==========================================

use crate::domain::line_item::EstimateLineItem;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::estimate_repo::bump_revision;
use crate::repository::{format_ts, parse_ts};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

const LINE_ITEM_COLUMNS: &str = r#"line_item_id, estimate_id, line_item_type_id, description,
    slope_name, sort_order, quantity, quantity_formula, quantity_override, waste_factor,
    material_unit_cost, labor_unit_cost, equipment_unit_cost, cost_override,
    material_total, labor_total, equipment_total, line_total, updated_at"#;

// ==========================================
// LineItemRepository - 估价明细仓储
// ==========================================
pub struct LineItemRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LineItemRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新增明细, 同一事务内递增所属估价单 revision
    ///
    /// # 参数
    /// - item: 明细
    /// - expected_revision: 编辑方读到的估价单 revision
    ///
    /// # 返回
    /// - Ok(i32): 估价单新 revision
    /// - Err(OptimisticLockFailure): 估价单已被其他写入修改
    pub fn insert(&self, item: &EstimateLineItem, expected_revision: i32) -> RepositoryResult<i32> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let revision = bump_revision(&tx, &item.estimate_id, expected_revision)?;

        tx.execute(
            &format!(
                "INSERT INTO estimate_line_item ({}) VALUES \
                 (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                LINE_ITEM_COLUMNS
            ),
            params![
                &item.line_item_id,
                &item.estimate_id,
                &item.line_item_type_id,
                &item.description,
                &item.slope_name,
                item.sort_order,
                item.quantity,
                &item.quantity_formula,
                item.quantity_override,
                item.waste_factor,
                item.material_unit_cost,
                item.labor_unit_cost,
                item.equipment_unit_cost,
                item.cost_override,
                item.material_total,
                item.labor_total,
                item.equipment_total,
                item.line_total,
                format_ts(&item.updated_at),
            ],
        )?;

        tx.commit()?;
        Ok(revision)
    }

    /// 按ID查询明细
    pub fn find_by_id(&self, line_item_id: &str) -> RepositoryResult<Option<EstimateLineItem>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            &format!(
                "SELECT {} FROM estimate_line_item WHERE line_item_id = ?",
                LINE_ITEM_COLUMNS
            ),
            params![line_item_id],
            map_row,
        ) {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询估价单下全部明细 (按 sort_order, line_item_id 排序, 保证重算顺序稳定)
    pub fn find_by_estimate(&self, estimate_id: &str) -> RepositoryResult<Vec<EstimateLineItem>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM estimate_line_item WHERE estimate_id = ? \
             ORDER BY sort_order ASC, line_item_id ASC",
            LINE_ITEM_COLUMNS
        ))?;

        let items = stmt
            .query_map(params![estimate_id], map_row)?
            .collect::<Result<Vec<EstimateLineItem>, _>>()?;

        Ok(items)
    }

    /// 更新明细 (编辑面写入的全部字段), 同一事务内递增所属估价单 revision
    ///
    /// # 返回
    /// - Ok(i32): 估价单新 revision
    /// - Err(OptimisticLockFailure): 估价单已被其他写入修改 (含重算保存)
    /// - Err(NotFound): 明细不存在或不属于该估价单
    pub fn update(&self, item: &EstimateLineItem, expected_revision: i32) -> RepositoryResult<i32> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let revision = bump_revision(&tx, &item.estimate_id, expected_revision)?;

        let rows_affected = tx.execute(
            r#"UPDATE estimate_line_item
               SET line_item_type_id = ?, description = ?, slope_name = ?, sort_order = ?,
                   quantity = ?, quantity_formula = ?, quantity_override = ?, waste_factor = ?,
                   material_unit_cost = ?, labor_unit_cost = ?, equipment_unit_cost = ?,
                   cost_override = ?, material_total = ?, labor_total = ?,
                   equipment_total = ?, line_total = ?, updated_at = ?
               WHERE line_item_id = ? AND estimate_id = ?"#,
            params![
                &item.line_item_type_id,
                &item.description,
                &item.slope_name,
                item.sort_order,
                item.quantity,
                &item.quantity_formula,
                item.quantity_override,
                item.waste_factor,
                item.material_unit_cost,
                item.labor_unit_cost,
                item.equipment_unit_cost,
                item.cost_override,
                item.material_total,
                item.labor_total,
                item.equipment_total,
                item.line_total,
                format_ts(&item.updated_at),
                &item.line_item_id,
                &item.estimate_id,
            ],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "EstimateLineItem".to_string(),
                id: item.line_item_id.clone(),
            });
        }

        tx.commit()?;
        Ok(revision)
    }

    /// 删除明细, 同一事务内递增所属估价单 revision
    ///
    /// # 返回
    /// - Ok(i32): 估价单新 revision
    pub fn delete(
        &self,
        estimate_id: &str,
        line_item_id: &str,
        expected_revision: i32,
    ) -> RepositoryResult<i32> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let revision = bump_revision(&tx, estimate_id, expected_revision)?;

        let rows_affected = tx.execute(
            "DELETE FROM estimate_line_item WHERE line_item_id = ? AND estimate_id = ?",
            params![line_item_id, estimate_id],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "EstimateLineItem".to_string(),
                id: line_item_id.to_string(),
            });
        }

        tx.commit()?;
        Ok(revision)
    }
}

/// 写回重算结果 (数量/单价/合计), 供重算事务内复用
pub(crate) fn write_calculated(conn: &Connection, item: &EstimateLineItem) -> rusqlite::Result<usize> {
    conn.execute(
        r#"UPDATE estimate_line_item
           SET quantity = ?, material_unit_cost = ?, labor_unit_cost = ?,
               equipment_unit_cost = ?, material_total = ?, labor_total = ?,
               equipment_total = ?, line_total = ?, updated_at = ?
           WHERE line_item_id = ? AND estimate_id = ?"#,
        params![
            item.quantity,
            item.material_unit_cost,
            item.labor_unit_cost,
            item.equipment_unit_cost,
            item.material_total,
            item.labor_total,
            item.equipment_total,
            item.line_total,
            format_ts(&item.updated_at),
            &item.line_item_id,
            &item.estimate_id,
        ],
    )
}

/// 映射数据库行到 EstimateLineItem
fn map_row(row: &rusqlite::Row) -> rusqlite::Result<EstimateLineItem> {
    Ok(EstimateLineItem {
        line_item_id: row.get(0)?,
        estimate_id: row.get(1)?,
        line_item_type_id: row.get(2)?,
        description: row.get(3)?,
        slope_name: row.get(4)?,
        sort_order: row.get(5)?,
        quantity: row.get(6)?,
        quantity_formula: row.get(7)?,
        quantity_override: row.get(8)?,
        waste_factor: row.get(9)?,
        material_unit_cost: row.get(10)?,
        labor_unit_cost: row.get(11)?,
        equipment_unit_cost: row.get(12)?,
        cost_override: row.get(13)?,
        material_total: row.get(14)?,
        labor_total: row.get(15)?,
        equipment_total: row.get(16)?,
        line_total: row.get(17)?,
        updated_at: parse_ts(18, &row.get::<_, String>(18)?)?,
    })
}
