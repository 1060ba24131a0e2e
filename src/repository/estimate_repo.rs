// ==========================================
// 屋面估价引擎 - 估价单数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 并发控制: 所有改动估价单的写入 revision + 1;
//           带预期 revision 的写入不匹配即 OptimisticLockFailure, 不自动重试
// 版本号: 事务内 MAX(version) + 1, (subject_id, version) 唯一
// ==========================================

use crate::domain::estimate::{Estimate, EstimateTotals};
use crate::domain::types::{EstimateStatus, VersioningPolicy};
use crate::engine::lifecycle::plan_new_version;
use crate::engine::recalc::RecalcOutcome;
use crate::engine::rollup::RollupPercentages;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::line_item_repo::write_calculated;
use crate::repository::{format_ts, parse_opt_ts, parse_ts};
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const ESTIMATE_COLUMNS: &str = r#"estimate_id, subject_id, name, version, status, is_superseded,
    roof_variables_json, geo_pricing_id, overhead_pct, profit_pct, tax_pct,
    total_material, total_labor, total_equipment, subtotal, overhead_amount, profit_amount,
    taxable_amount, tax_amount, price_low, price_likely, price_high, revision,
    created_at, updated_at, sent_at, accepted_at, declined_at, expired_at, superseded_at"#;

// ==========================================
// EstimateRepository - 估价单仓储
// ==========================================
pub struct EstimateRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EstimateRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 创建估价单并分配版本号
    ///
    /// # 红线
    /// - 必须在事务中完成: 读取同标的已有版本 → 分配版本号 → (按策略) 取代旧版本 → 插入
    ///
    /// # 返回
    /// 落库后的估价单 (version / revision 已填充)
    pub fn create_with_next_version(
        &self,
        estimate: &Estimate,
        policy: VersioningPolicy,
    ) -> RepositoryResult<Estimate> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let existing = query_by_subject(&tx, &estimate.subject_id)?;
        let plan = plan_new_version(policy, &existing);
        let now = chrono::Utc::now().naive_utc();

        for superseded_id in &plan.supersede_ids {
            tx.execute(
                r#"UPDATE estimate
                   SET is_superseded = 1, superseded_at = ?, updated_at = ?,
                       revision = revision + 1
                   WHERE estimate_id = ?"#,
                params![format_ts(&now), format_ts(&now), superseded_id],
            )?;
        }

        let mut stored = estimate.clone();
        stored.version = plan.version;
        stored.is_superseded = false;
        stored.superseded_at = None;
        stored.revision = 0;
        insert_row(&tx, &stored)?;

        tx.commit()?;

        tracing::info!(
            estimate_id = %stored.estimate_id,
            subject_id = %stored.subject_id,
            version = stored.version,
            policy = policy.as_str(),
            superseded = plan.supersede_ids.len(),
            "估价单已创建"
        );
        Ok(stored)
    }

    /// 按ID查询估价单
    pub fn find_by_id(&self, estimate_id: &str) -> RepositoryResult<Option<Estimate>> {
        let conn = self.get_conn()?;

        Ok(conn
            .query_row(
                &format!("SELECT {} FROM estimate WHERE estimate_id = ?", ESTIMATE_COLUMNS),
                params![estimate_id],
                map_row,
            )
            .optional()?)
    }

    /// 查询标的下全部估价单 (按版本升序)
    pub fn find_by_subject(&self, subject_id: &str) -> RepositoryResult<Vec<Estimate>> {
        let conn = self.get_conn()?;
        Ok(query_by_subject(&conn, subject_id)?)
    }

    /// 写入状态及状态时间戳 (带乐观锁检查)
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision不匹配
    /// - `RepositoryError::NotFound`: estimate_id不存在
    pub fn update_status(&self, estimate: &Estimate) -> RepositoryResult<i32> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"UPDATE estimate
               SET status = ?, sent_at = ?, accepted_at = ?, declined_at = ?, expired_at = ?,
                   updated_at = ?, revision = revision + 1
               WHERE estimate_id = ? AND revision = ?"#,
            params![
                estimate.status.to_db_str(),
                estimate.sent_at.as_ref().map(format_ts),
                estimate.accepted_at.as_ref().map(format_ts),
                estimate.declined_at.as_ref().map(format_ts),
                estimate.expired_at.as_ref().map(format_ts),
                format_ts(&estimate.updated_at),
                &estimate.estimate_id,
                estimate.revision,
            ],
        )?;

        check_guarded_write(&conn, &estimate.estimate_id, estimate.revision, rows_affected)?;
        Ok(estimate.revision + 1)
    }

    /// 更新费率并写入新的汇总 (带乐观锁检查)
    pub fn update_percentages(
        &self,
        estimate_id: &str,
        expected_revision: i32,
        pct: &RollupPercentages,
        totals: &EstimateTotals,
    ) -> RepositoryResult<i32> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().naive_utc();

        let rows_affected = tx.execute(
            r#"UPDATE estimate
               SET overhead_pct = ?, profit_pct = ?, tax_pct = ?,
                   updated_at = ?, revision = revision + 1
               WHERE estimate_id = ? AND revision = ?"#,
            params![
                pct.overhead_pct,
                pct.profit_pct,
                pct.tax_pct,
                format_ts(&now),
                estimate_id,
                expected_revision,
            ],
        )?;
        check_guarded_write(&tx, estimate_id, expected_revision, rows_affected)?;
        write_totals(&tx, estimate_id, totals)?;

        tx.commit()?;
        Ok(expected_revision + 1)
    }

    /// 写回重算结果 (明细 + 汇总, 单事务)
    ///
    /// # 并发控制
    /// 以 outcome.base_revision 为预期修订号; 期间有其他写入则整体回滚
    ///
    /// # 返回
    /// 新的 revision
    pub fn save_recalc(&self, outcome: &RecalcOutcome) -> RepositoryResult<i32> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let revision = bump_revision(&tx, &outcome.estimate_id, outcome.base_revision)?;

        for item in outcome.changed_items() {
            if write_calculated(&tx, item)? == 0 {
                // 明细在快照之后被删除; 回滚整体
                return Err(RepositoryError::NotFound {
                    entity: "EstimateLineItem".to_string(),
                    id: item.line_item_id.clone(),
                });
            }
        }
        write_totals(&tx, &outcome.estimate_id, &outcome.totals)?;

        tx.commit()?;
        Ok(revision)
    }

    /// 删除估价单 (明细级联删除)
    pub fn delete(&self, estimate_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            "DELETE FROM estimate WHERE estimate_id = ?",
            params![estimate_id],
        )?;
        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Estimate".to_string(),
                id: estimate_id.to_string(),
            });
        }
        Ok(())
    }
}

// ==========================================
// 内部 SQL 辅助
// ==========================================

fn query_by_subject(conn: &Connection, subject_id: &str) -> rusqlite::Result<Vec<Estimate>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM estimate WHERE subject_id = ? ORDER BY version ASC",
        ESTIMATE_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![subject_id], map_row)?
        .collect::<Result<Vec<Estimate>, _>>()?;
    Ok(rows)
}

/// 带 revision 条件递增修订号, 与同一事务内的其他写入一起提交
///
/// # 错误
/// - `RepositoryError::OptimisticLockFailure`: revision不匹配
/// - `RepositoryError::NotFound`: estimate_id不存在
pub(crate) fn bump_revision(
    conn: &Connection,
    estimate_id: &str,
    expected: i32,
) -> RepositoryResult<i32> {
    let now = chrono::Utc::now().naive_utc();
    let rows_affected = conn.execute(
        r#"UPDATE estimate
           SET updated_at = ?, revision = revision + 1
           WHERE estimate_id = ? AND revision = ?"#,
        params![format_ts(&now), estimate_id, expected],
    )?;
    check_guarded_write(conn, estimate_id, expected, rows_affected)?;
    Ok(expected + 1)
}

/// 判断带 revision 条件的写入是否生效: 记录不存在 / revision 冲突
fn check_guarded_write(
    conn: &Connection,
    estimate_id: &str,
    expected: i32,
    rows_affected: usize,
) -> RepositoryResult<()> {
    if rows_affected > 0 {
        return Ok(());
    }

    let actual: Option<i32> = conn
        .query_row(
            "SELECT revision FROM estimate WHERE estimate_id = ?",
            params![estimate_id],
            |row| row.get(0),
        )
        .optional()?;

    match actual {
        Some(actual) => {
            tracing::warn!(estimate_id, expected, actual, "乐观锁冲突");
            Err(RepositoryError::OptimisticLockFailure {
                estimate_id: estimate_id.to_string(),
                expected,
                actual,
            })
        }
        None => Err(RepositoryError::NotFound {
            entity: "Estimate".to_string(),
            id: estimate_id.to_string(),
        }),
    }
}

fn write_totals(conn: &Connection, estimate_id: &str, t: &EstimateTotals) -> rusqlite::Result<usize> {
    conn.execute(
        r#"UPDATE estimate
           SET total_material = ?, total_labor = ?, total_equipment = ?, subtotal = ?,
               overhead_amount = ?, profit_amount = ?, taxable_amount = ?, tax_amount = ?,
               price_low = ?, price_likely = ?, price_high = ?
           WHERE estimate_id = ?"#,
        params![
            t.total_material,
            t.total_labor,
            t.total_equipment,
            t.subtotal,
            t.overhead_amount,
            t.profit_amount,
            t.taxable_amount,
            t.tax_amount,
            t.price_low,
            t.price_likely,
            t.price_high,
            estimate_id,
        ],
    )
}

fn insert_row(conn: &Connection, e: &Estimate) -> RepositoryResult<()> {
    let roof_variables_json = serde_json::to_string(&e.roof_variables)?;
    let t = &e.totals;

    conn.execute(
        &format!(
            "INSERT INTO estimate ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
             ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ESTIMATE_COLUMNS
        ),
        params![
            &e.estimate_id,
            &e.subject_id,
            &e.name,
            e.version,
            e.status.to_db_str(),
            e.is_superseded,
            roof_variables_json,
            &e.geo_pricing_id,
            e.overhead_pct,
            e.profit_pct,
            e.tax_pct,
            t.total_material,
            t.total_labor,
            t.total_equipment,
            t.subtotal,
            t.overhead_amount,
            t.profit_amount,
            t.taxable_amount,
            t.tax_amount,
            t.price_low,
            t.price_likely,
            t.price_high,
            e.revision,
            format_ts(&e.created_at),
            format_ts(&e.updated_at),
            e.sent_at.as_ref().map(format_ts),
            e.accepted_at.as_ref().map(format_ts),
            e.declined_at.as_ref().map(format_ts),
            e.expired_at.as_ref().map(format_ts),
            e.superseded_at.as_ref().map(format_ts),
        ],
    )?;
    Ok(())
}

/// 映射数据库行到 Estimate
fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Estimate> {
    let status_raw: String = row.get(4)?;
    let status = EstimateStatus::from_str(&status_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;

    let vars_raw: String = row.get(6)?;
    let roof_variables = serde_json::from_str(&vars_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Estimate {
        estimate_id: row.get(0)?,
        subject_id: row.get(1)?,
        name: row.get(2)?,
        version: row.get(3)?,
        status,
        is_superseded: row.get(5)?,
        roof_variables,
        geo_pricing_id: row.get(7)?,
        overhead_pct: row.get(8)?,
        profit_pct: row.get(9)?,
        tax_pct: row.get(10)?,
        totals: EstimateTotals {
            total_material: row.get(11)?,
            total_labor: row.get(12)?,
            total_equipment: row.get(13)?,
            subtotal: row.get(14)?,
            overhead_amount: row.get(15)?,
            profit_amount: row.get(16)?,
            taxable_amount: row.get(17)?,
            tax_amount: row.get(18)?,
            price_low: row.get(19)?,
            price_likely: row.get(20)?,
            price_high: row.get(21)?,
        },
        revision: row.get(22)?,
        created_at: parse_ts(23, &row.get::<_, String>(23)?)?,
        updated_at: parse_ts(24, &row.get::<_, String>(24)?)?,
        sent_at: parse_opt_ts(25, row.get(25)?)?,
        accepted_at: parse_opt_ts(26, row.get(26)?)?,
        declined_at: parse_opt_ts(27, row.get(27)?)?,
        expired_at: parse_opt_ts(28, row.get(28)?)?,
        superseded_at: parse_opt_ts(29, row.get(29)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use crate::domain::variables::RoofVariables;
    use crate::engine::lifecycle::resolve_current;

    fn repo() -> EstimateRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        EstimateRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn draft(id: &str, subject: &str) -> Estimate {
        let vars = RoofVariables::from_pairs([("SQ", 24.0), ("EAVE", 150.0)]).unwrap();
        Estimate::new_draft(id, subject, "估价", vars)
    }

    #[test]
    fn test_versions_increment_per_subject() {
        let repo = repo();
        let a1 = repo
            .create_with_next_version(&draft("a1", "lead-a"), VersioningPolicy::Additive)
            .unwrap();
        let a2 = repo
            .create_with_next_version(&draft("a2", "lead-a"), VersioningPolicy::Additive)
            .unwrap();
        let b1 = repo
            .create_with_next_version(&draft("b1", "lead-b"), VersioningPolicy::Additive)
            .unwrap();

        assert_eq!((a1.version, a2.version, b1.version), (1, 2, 1));

        let versions = repo.find_by_subject("lead-a").unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions.iter().all(|e| !e.is_superseded));
    }

    #[test]
    fn test_supersede_on_create_marks_prior() {
        let repo = repo();
        let policy = VersioningPolicy::SupersedeOnCreate;
        repo.create_with_next_version(&draft("e1", "lead-1"), policy).unwrap();
        repo.create_with_next_version(&draft("e2", "lead-1"), policy).unwrap();
        repo.create_with_next_version(&draft("e3", "lead-1"), policy).unwrap();

        let all = repo.find_by_subject("lead-1").unwrap();
        let live: Vec<&str> = all
            .iter()
            .filter(|e| !e.is_superseded)
            .map(|e| e.estimate_id.as_str())
            .collect();
        assert_eq!(live, vec!["e3"]);
        assert!(all[0].superseded_at.is_some());
        assert_eq!(
            resolve_current(policy, &all).map(|e| e.estimate_id.as_str()),
            Some("e3")
        );
    }

    #[test]
    fn test_round_trip_roof_variables_and_status() {
        let repo = repo();
        let created = repo
            .create_with_next_version(&draft("e1", "lead-1"), VersioningPolicy::Additive)
            .unwrap();
        let loaded = repo.find_by_id("e1").unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.roof_variables.sq, 24.0);
        assert_eq!(loaded.status, EstimateStatus::Draft);
        assert!(repo.find_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_stale_revision_rejected() {
        let repo = repo();
        let mut e = repo
            .create_with_next_version(&draft("e1", "lead-1"), VersioningPolicy::Additive)
            .unwrap();

        let totals = EstimateTotals::default();
        repo.update_percentages("e1", 0, &RollupPercentages::default(), &totals)
            .unwrap();

        e.status = EstimateStatus::Sent;
        match repo.update_status(&e).unwrap_err() {
            RepositoryError::OptimisticLockFailure {
                estimate_id,
                expected,
                actual,
            } => {
                assert_eq!(estimate_id, "e1");
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("期望乐观锁冲突, 实际: {:?}", other),
        }

        e.revision = 1;
        assert_eq!(repo.update_status(&e).unwrap(), 2);
        assert_eq!(repo.find_by_id("e1").unwrap().unwrap().status, EstimateStatus::Sent);
    }

    #[test]
    fn test_update_percentages_writes_totals() {
        let repo = repo();
        repo.create_with_next_version(&draft("e1", "lead-1"), VersioningPolicy::Additive)
            .unwrap();
        let totals = EstimateTotals {
            subtotal: 1000.0,
            overhead_amount: 100.0,
            profit_amount: 165.0,
            taxable_amount: 1265.0,
            price_likely: 1265.0,
            ..Default::default()
        };
        let revision = repo
            .update_percentages("e1", 0, &RollupPercentages::new(10.0, 15.0, 0.0), &totals)
            .unwrap();
        assert_eq!(revision, 1);

        let loaded = repo.find_by_id("e1").unwrap().unwrap();
        assert_eq!(loaded.overhead_pct, 10.0);
        assert_eq!(loaded.totals, totals);
        assert_eq!(loaded.revision, 1);
    }

    #[test]
    fn test_missing_estimate_is_not_found() {
        let repo = repo();
        assert!(matches!(
            repo.update_percentages("ghost", 0, &RollupPercentages::default(), &EstimateTotals::default())
                .unwrap_err(),
            RepositoryError::NotFound { .. }
        ));
        assert!(repo.delete("ghost").is_err());
    }
}
