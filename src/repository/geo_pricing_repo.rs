// ==========================================
// 屋面估价引擎 - 区域定价数据仓储
// ==========================================
// 表: geo_pricing
// 说明: 系数列可为 NULL, 解析时按 1.0 处理
// ==========================================

use crate::domain::pricing::GeographicPricing;
use crate::engine::line_item_calc::GeoPricingSnapshot;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::format_ts;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct GeoPricingRepository {
    conn: Arc<Mutex<Connection>>,
}

impl GeoPricingRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn upsert(&self, pricing: &GeographicPricing) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        upsert_row(&conn, pricing)?;
        Ok(())
    }

    /// 批量新增或覆盖 (单事务)
    pub fn upsert_batch(&self, pricings: &[GeographicPricing]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for pricing in pricings {
            upsert_row(&tx, pricing)?;
        }
        tx.commit()?;
        Ok(pricings.len())
    }

    pub fn find_by_id(&self, geo_pricing_id: &str) -> RepositoryResult<Option<GeographicPricing>> {
        let conn = self.get_conn()?;

        Ok(conn
            .query_row(
                r#"SELECT geo_pricing_id, name, material_multiplier,
                          labor_multiplier, equipment_multiplier
                   FROM geo_pricing
                   WHERE geo_pricing_id = ?"#,
                params![geo_pricing_id],
                map_row,
            )
            .optional()?)
    }

    pub fn list_all(&self) -> RepositoryResult<Vec<GeographicPricing>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT geo_pricing_id, name, material_multiplier,
                      labor_multiplier, equipment_multiplier
               FROM geo_pricing
               ORDER BY geo_pricing_id"#,
        )?;
        let rows = stmt
            .query_map([], map_row)?
            .collect::<Result<Vec<GeographicPricing>, _>>()?;
        Ok(rows)
    }

    /// 加载区域定价快照
    pub fn load_snapshot(&self) -> RepositoryResult<GeoPricingSnapshot> {
        Ok(GeoPricingSnapshot::from_pricings(self.list_all()?))
    }
}

fn upsert_row(conn: &Connection, pricing: &GeographicPricing) -> rusqlite::Result<usize> {
    let now = chrono::Utc::now().naive_utc();
    conn.execute(
        r#"INSERT INTO geo_pricing (
               geo_pricing_id, name, material_multiplier,
               labor_multiplier, equipment_multiplier, updated_at
           ) VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(geo_pricing_id) DO UPDATE SET
               name = excluded.name,
               material_multiplier = excluded.material_multiplier,
               labor_multiplier = excluded.labor_multiplier,
               equipment_multiplier = excluded.equipment_multiplier,
               updated_at = excluded.updated_at"#,
        params![
            &pricing.geo_pricing_id,
            &pricing.name,
            pricing.material_multiplier,
            pricing.labor_multiplier,
            pricing.equipment_multiplier,
            format_ts(&now),
        ],
    )
}

fn map_row(row: &rusqlite::Row) -> rusqlite::Result<GeographicPricing> {
    Ok(GeographicPricing {
        geo_pricing_id: row.get(0)?,
        name: row.get(1)?,
        material_multiplier: row.get(2)?,
        labor_multiplier: row.get(3)?,
        equipment_multiplier: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use crate::domain::pricing::CostMultipliers;
    use crate::engine::line_item_calc::GeoMultiplierResolver;

    fn repo() -> GeoPricingRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        GeoPricingRepository::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_null_multipliers_round_trip() {
        let repo = repo();
        let pricing = GeographicPricing {
            geo_pricing_id: "TX-AUS".to_string(),
            name: "Austin".to_string(),
            material_multiplier: Some(1.05),
            labor_multiplier: None,
            equipment_multiplier: None,
        };
        repo.upsert(&pricing).unwrap();
        assert_eq!(repo.find_by_id("TX-AUS").unwrap(), Some(pricing));

        let snapshot = repo.load_snapshot().unwrap();
        assert_eq!(
            snapshot.resolve(Some("TX-AUS")),
            CostMultipliers {
                material: 1.05,
                labor: 1.0,
                equipment: 1.0,
            }
        );
    }
}
