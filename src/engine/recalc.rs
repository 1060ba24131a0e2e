// ==========================================
// 屋面估价引擎 - 估价单重算编排
// ==========================================
// 流程: 读取快照 → 逐行计算 (顺序, 确定性) → 汇总
// 红线: 单行失败只产出诊断, 不中断批次
// 红线: 汇总失败整体失败, 不产出半成品合计
// 说明: 本模块为纯计算, 不做 I/O; 持久化与乐观锁校验由调用方完成
// ==========================================

use crate::domain::estimate::{Estimate, EstimateTotals};
use crate::domain::line_item::EstimateLineItem;
use crate::domain::pricing::CostMultipliers;
use crate::engine::line_item_calc::{CatalogLookup, Diagnostic, LineItemCalculator};
use crate::engine::rollup::{EstimateRollup, PriceBandPolicy, RollupError, RollupPercentages};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

/// 重算错误 (整体失败)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecalcError {
    #[error("明细数量超出上限: count={count}, max={max}")]
    TooManyLineItems { count: usize, max: usize },

    #[error("明细不属于该估价单: line_item_id={line_item_id}, estimate_id={estimate_id}")]
    ForeignLineItem {
        line_item_id: String,
        estimate_id: String,
    },

    #[error(transparent)]
    Rollup(#[from] RollupError),
}

// ==========================================
// EstimateSnapshot - 重算输入快照
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateSnapshot {
    pub estimate: Estimate,
    pub line_items: Vec<EstimateLineItem>,
}

// ==========================================
// RecalcOutcome - 重算结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalcOutcome {
    pub estimate_id: String,
    pub base_revision: i32,                  // 快照时读取的修订号 (写回时校验)
    pub line_items: Vec<EstimateLineItem>,   // 全部明细 (含未变化的)
    pub changed_item_ids: Vec<String>,       // 实际变化的明细
    pub totals: EstimateTotals,              // 新汇总
    pub diagnostics: Vec<Diagnostic>,        // 非致命诊断
    pub elapsed_ms: i64,                     // 耗时(毫秒)
}

impl RecalcOutcome {
    pub fn changed_items(&self) -> impl Iterator<Item = &EstimateLineItem> {
        self.line_items
            .iter()
            .filter(|item| self.changed_item_ids.contains(&item.line_item_id))
    }
}

// ==========================================
// RecalcConfig - 重算配置
// ==========================================
#[derive(Debug, Clone)]
pub struct RecalcConfig {
    pub max_line_items: Option<usize>, // 单次重算明细上限 (调用方策略)
    pub band_policy: PriceBandPolicy,  // 价格区间策略
}

impl Default for RecalcConfig {
    fn default() -> Self {
        Self {
            max_line_items: Some(500),
            band_policy: PriceBandPolicy::default(),
        }
    }
}

// ==========================================
// RecalcEngine - 重算引擎
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct RecalcEngine {
    calculator: LineItemCalculator,
    rollup: EstimateRollup,
    config: RecalcConfig,
}

impl RecalcEngine {
    pub fn new(config: RecalcConfig) -> Self {
        Self {
            calculator: LineItemCalculator::new(),
            rollup: EstimateRollup::new(config.band_policy),
            config,
        }
    }

    pub fn config(&self) -> &RecalcConfig {
        &self.config
    }

    /// 全量重算
    ///
    /// # 参数
    /// - `snapshot`: 估价单 + 明细快照
    /// - `multipliers`: 该估价单已解析的区域系数
    /// - `catalog`: 价目表 (只读)
    ///
    /// # 返回
    /// - `Ok(RecalcOutcome)`: 新明细 + 新汇总 + 诊断
    /// - `Err(RecalcError)`: 明细超限 / 汇总失败
    #[instrument(skip_all, fields(estimate_id = %snapshot.estimate.estimate_id))]
    pub fn recalculate(
        &self,
        snapshot: &EstimateSnapshot,
        multipliers: &CostMultipliers,
        catalog: &dyn CatalogLookup,
    ) -> Result<RecalcOutcome, RecalcError> {
        let start = Instant::now();
        let estimate = &snapshot.estimate;

        if let Some(max) = self.config.max_line_items {
            if snapshot.line_items.len() > max {
                return Err(RecalcError::TooManyLineItems {
                    count: snapshot.line_items.len(),
                    max,
                });
            }
        }

        if let Some(foreign) = snapshot
            .line_items
            .iter()
            .find(|item| item.estimate_id != estimate.estimate_id)
        {
            return Err(RecalcError::ForeignLineItem {
                line_item_id: foreign.line_item_id.clone(),
                estimate_id: estimate.estimate_id.clone(),
            });
        }

        let mut line_items = Vec::with_capacity(snapshot.line_items.len());
        let mut changed_item_ids = Vec::new();
        let mut diagnostics = Vec::new();

        for (index, item) in snapshot.line_items.iter().enumerate() {
            let result = self.calculator.recalculate(
                index,
                item,
                &estimate.roof_variables,
                multipliers,
                catalog,
            );
            if result.changed {
                changed_item_ids.push(result.item.line_item_id.clone());
            }
            diagnostics.extend(result.diagnostics);
            line_items.push(result.item);
        }

        let totals = self
            .rollup
            .rollup(&line_items, &RollupPercentages::of(estimate))?;

        let elapsed_ms = start.elapsed().as_millis() as i64;
        tracing::info!(
            items = line_items.len(),
            changed = changed_item_ids.len(),
            diagnostics = diagnostics.len(),
            price_likely = totals.price_likely,
            elapsed_ms,
            "估价单重算完成"
        );

        Ok(RecalcOutcome {
            estimate_id: estimate.estimate_id.clone(),
            base_revision: estimate.revision,
            line_items,
            changed_item_ids,
            totals,
            diagnostics,
            elapsed_ms,
        })
    }

    /// 仅重新汇总 (费率变化时使用, 明细不重算)
    pub fn rollup_only(
        &self,
        estimate: &Estimate,
        line_items: &[EstimateLineItem],
    ) -> Result<EstimateTotals, RecalcError> {
        Ok(self
            .rollup
            .rollup(line_items, &RollupPercentages::of(estimate))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pricing::BaseCosts;
    use crate::domain::variables::RoofVariables;
    use crate::engine::line_item_calc::{CatalogSnapshot, DiagnosticKind};

    fn snapshot(formulas: &[(&str, Option<&str>, f64)]) -> EstimateSnapshot {
        let vars = RoofVariables::from_pairs([("SQ", 20.0), ("EAVE", 120.0)]).unwrap();
        let mut estimate = Estimate::new_draft("est-1", "lead-1", "主屋面", vars);
        estimate.overhead_pct = 10.0;
        estimate.profit_pct = 15.0;
        estimate.revision = 4;

        let line_items = formulas
            .iter()
            .map(|(id, formula, qty)| {
                let mut item = EstimateLineItem::new(id, "est-1", "SHINGLE");
                item.quantity_formula = formula.map(str::to_string);
                item.quantity = *qty;
                item
            })
            .collect();
        EstimateSnapshot {
            estimate,
            line_items,
        }
    }

    fn catalog() -> CatalogSnapshot {
        let mut c = CatalogSnapshot::new();
        c.insert(
            "SHINGLE",
            BaseCosts {
                base_material_cost: 30.0,
                base_labor_cost: 20.0,
                base_equipment_cost: 0.0,
            },
        );
        c
    }

    #[test]
    fn test_partial_failure_does_not_abort_batch() {
        let engine = RecalcEngine::new(RecalcConfig {
            max_line_items: None,
            band_policy: PriceBandPolicy::Flat,
        });
        let snap = snapshot(&[
            ("a", Some("SQ"), 0.0),
            ("b", Some("EAVE / 0"), 15.0),
            ("c", Some("SQ * 0.5"), 0.0),
        ]);

        let outcome = engine
            .recalculate(&snap, &CostMultipliers::default(), &catalog())
            .unwrap();

        assert_eq!(outcome.base_revision, 4);
        assert_eq!(outcome.line_items.len(), 3);
        assert_eq!(outcome.line_items[0].quantity, 20.0);
        assert_eq!(outcome.line_items[1].quantity, 15.0);
        assert_eq!(outcome.line_items[2].quantity, 10.0);

        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].index, 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::DivisionByZero);

        // (20 + 15 + 10) × 50 = 2250
        assert_eq!(outcome.totals.subtotal, 2250.0);
        assert_eq!(outcome.totals.overhead_amount, 225.0);
        assert_eq!(outcome.totals.profit_amount, 371.25);
        assert_eq!(outcome.totals.price_likely, 2846.25);
    }

    #[test]
    fn test_too_many_line_items() {
        let engine = RecalcEngine::new(RecalcConfig {
            max_line_items: Some(1),
            band_policy: PriceBandPolicy::Flat,
        });
        let snap = snapshot(&[("a", Some("SQ"), 0.0), ("b", Some("SQ"), 0.0)]);
        assert_eq!(
            engine
                .recalculate(&snap, &CostMultipliers::default(), &catalog())
                .unwrap_err(),
            RecalcError::TooManyLineItems { count: 2, max: 1 }
        );
    }

    #[test]
    fn test_invalid_percentage_aborts_whole_recalc() {
        let engine = RecalcEngine::default();
        let mut snap = snapshot(&[("a", Some("SQ"), 0.0)]);
        snap.estimate.tax_pct = 35.0;
        assert!(matches!(
            engine
                .recalculate(&snap, &CostMultipliers::default(), &catalog())
                .unwrap_err(),
            RecalcError::Rollup(RollupError::InvalidPercentage { .. })
        ));
    }

    #[test]
    fn test_recalc_is_deterministic_and_converges() {
        let engine = RecalcEngine::default();
        let snap = snapshot(&[("a", Some("SQ * 1.1"), 0.0), ("b", None, 3.0)]);
        let first = engine
            .recalculate(&snap, &CostMultipliers::default(), &catalog())
            .unwrap();
        let again = engine
            .recalculate(&snap, &CostMultipliers::default(), &catalog())
            .unwrap();
        assert_eq!(first.totals, again.totals);
        assert_eq!(first.changed_item_ids, again.changed_item_ids);

        // 以结果为新快照再算一次: 无变化
        let next = EstimateSnapshot {
            estimate: snap.estimate.clone(),
            line_items: first.line_items.clone(),
        };
        let settled = engine
            .recalculate(&next, &CostMultipliers::default(), &catalog())
            .unwrap();
        assert!(settled.changed_item_ids.is_empty());
        assert_eq!(settled.totals, first.totals);
    }

    #[test]
    fn test_foreign_line_item_rejected() {
        let engine = RecalcEngine::default();
        let mut snap = snapshot(&[("a", Some("SQ"), 0.0)]);
        snap.line_items[0].estimate_id = "est-other".to_string();
        assert!(matches!(
            engine
                .recalculate(&snap, &CostMultipliers::default(), &catalog())
                .unwrap_err(),
            RecalcError::ForeignLineItem { .. }
        ));
    }
}
