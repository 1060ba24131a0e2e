// ==========================================
// 屋面估价引擎 - 报价汇总
// ==========================================
// 输入: 明细合计 + 管理费/利润/税率 + 价格区间策略
// 输出: EstimateTotals (subtotal ~ price_high)
// 红线: 纯函数, 可重复执行; 费率越界整体失败, 不做截断
// 红线: 不产出半成品合计
// ==========================================

use crate::domain::estimate::{Estimate, EstimateTotals};
use crate::domain::line_item::EstimateLineItem;
use crate::engine::money::round2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const OVERHEAD_PCT_RANGE: (f64, f64) = (0.0, 50.0);
pub const PROFIT_PCT_RANGE: (f64, f64) = (0.0, 50.0);
pub const TAX_PCT_RANGE: (f64, f64) = (0.0, 20.0);

/// 汇总错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RollupError {
    #[error("费率越界: {field}={value}, 允许范围 [{min}, {max}]")]
    InvalidPercentage {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("价格区间非法: {0}")]
    InvalidBand(String),

    #[error("明细金额非有限数: line_item_id={0}")]
    NonFiniteAmount(String),
}

// ==========================================
// RollupPercentages - 费率
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RollupPercentages {
    pub overhead_pct: f64,
    pub profit_pct: f64,
    pub tax_pct: f64,
}

impl RollupPercentages {
    pub fn new(overhead_pct: f64, profit_pct: f64, tax_pct: f64) -> Self {
        Self {
            overhead_pct,
            profit_pct,
            tax_pct,
        }
    }

    pub fn of(estimate: &Estimate) -> Self {
        Self::new(estimate.overhead_pct, estimate.profit_pct, estimate.tax_pct)
    }

    /// 校验费率范围: 管理费/利润 [0, 50], 税率 [0, 20]
    pub fn validate(&self) -> Result<(), RollupError> {
        check_range("overhead_pct", self.overhead_pct, OVERHEAD_PCT_RANGE)?;
        check_range("profit_pct", self.profit_pct, PROFIT_PCT_RANGE)?;
        check_range("tax_pct", self.tax_pct, TAX_PCT_RANGE)?;
        Ok(())
    }
}

fn check_range(field: &str, value: f64, (min, max): (f64, f64)) -> Result<(), RollupError> {
    // NaN 不满足任何比较, 也落入越界
    if !(value >= min && value <= max) {
        return Err(RollupError::InvalidPercentage {
            field: field.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

// ==========================================
// PriceBandPolicy - 价格区间策略
// ==========================================
// 由调用方显式传入, 不在汇总中写死
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PriceBandPolicy {
    /// 低/高价 = 最可能价
    Flat,
    /// 对称浮动 ±pct%
    Symmetric { pct: f64 },
    /// 非对称浮动 (-low_pct%, +high_pct%)
    Asymmetric { low_pct: f64, high_pct: f64 },
}

impl Default for PriceBandPolicy {
    fn default() -> Self {
        PriceBandPolicy::Symmetric { pct: 10.0 }
    }
}

impl PriceBandPolicy {
    fn percents(&self) -> (f64, f64) {
        match *self {
            PriceBandPolicy::Flat => (0.0, 0.0),
            PriceBandPolicy::Symmetric { pct } => (pct, pct),
            PriceBandPolicy::Asymmetric { low_pct, high_pct } => (low_pct, high_pct),
        }
    }

    pub fn validate(&self) -> Result<(), RollupError> {
        let (low, high) = self.percents();
        for (name, v) in [("low_pct", low), ("high_pct", high)] {
            if !(v >= 0.0 && v <= 100.0) {
                return Err(RollupError::InvalidBand(format!(
                    "{}={} 超出 [0, 100]",
                    name, v
                )));
            }
        }
        Ok(())
    }

    /// (price_low, price_high)
    pub fn apply(&self, price_likely: f64) -> (f64, f64) {
        let (low, high) = self.percents();
        (
            round2(price_likely * (1.0 - low / 100.0)),
            round2(price_likely * (1.0 + high / 100.0)),
        )
    }
}

// ==========================================
// EstimateRollup - 汇总器
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimateRollup {
    band: PriceBandPolicy,
}

impl EstimateRollup {
    pub fn new(band: PriceBandPolicy) -> Self {
        Self { band }
    }

    pub fn band(&self) -> PriceBandPolicy {
        self.band
    }

    /// 汇总明细 → 估价合计
    ///
    /// # 错误
    /// - `InvalidPercentage`: 费率越界 (整体失败)
    /// - `InvalidBand`: 区间策略非法
    /// - `NonFiniteAmount`: 明细金额为 NaN / Infinity
    pub fn rollup(
        &self,
        line_items: &[EstimateLineItem],
        pct: &RollupPercentages,
    ) -> Result<EstimateTotals, RollupError> {
        pct.validate()?;
        self.band.validate()?;

        let mut total_material = 0.0;
        let mut total_labor = 0.0;
        let mut total_equipment = 0.0;
        for item in line_items {
            if !(item.material_total.is_finite()
                && item.labor_total.is_finite()
                && item.equipment_total.is_finite())
            {
                return Err(RollupError::NonFiniteAmount(item.line_item_id.clone()));
            }
            total_material += item.material_total;
            total_labor += item.labor_total;
            total_equipment += item.equipment_total;
        }

        // 各项均为分精度, 求和后舍入仅清除浮点噪声
        let total_material = round2(total_material);
        let total_labor = round2(total_labor);
        let total_equipment = round2(total_equipment);
        let subtotal = round2(total_material + total_labor + total_equipment);

        let overhead_amount = round2(subtotal * pct.overhead_pct / 100.0);
        let profit_amount = round2((subtotal + overhead_amount) * pct.profit_pct / 100.0);
        let taxable_amount = round2(subtotal + overhead_amount + profit_amount);
        let tax_amount = round2(taxable_amount * pct.tax_pct / 100.0);
        let price_likely = round2(taxable_amount + tax_amount);
        let (price_low, price_high) = self.band.apply(price_likely);

        Ok(EstimateTotals {
            total_material,
            total_labor,
            total_equipment,
            subtotal,
            overhead_amount,
            profit_amount,
            taxable_amount,
            tax_amount,
            price_low,
            price_likely,
            price_high,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, material: f64, labor: f64, equipment: f64) -> EstimateLineItem {
        let mut item = EstimateLineItem::new(id, "est-1", "T");
        item.material_total = material;
        item.labor_total = labor;
        item.equipment_total = equipment;
        item.line_total = material + labor + equipment;
        item
    }

    #[test]
    fn test_overhead_then_profit() {
        let rollup = EstimateRollup::new(PriceBandPolicy::Flat);
        let items = vec![line("a", 600.0, 300.0, 0.0), line("b", 0.0, 0.0, 100.0)];
        let totals = rollup
            .rollup(&items, &RollupPercentages::new(10.0, 15.0, 0.0))
            .unwrap();

        assert_eq!(totals.subtotal, 1000.0);
        assert_eq!(totals.overhead_amount, 100.0);
        assert_eq!(totals.profit_amount, 165.0);
        assert_eq!(totals.tax_amount, 0.0);
        assert_eq!(totals.price_likely, 1265.0);
        assert_eq!(totals.price_low, 1265.0);
        assert_eq!(totals.price_high, 1265.0);
    }

    #[test]
    fn test_tax_applies_to_taxable_amount() {
        let rollup = EstimateRollup::new(PriceBandPolicy::Symmetric { pct: 10.0 });
        let items = vec![line("a", 1000.0, 0.0, 0.0)];
        let totals = rollup
            .rollup(&items, &RollupPercentages::new(10.0, 15.0, 8.0))
            .unwrap();

        assert_eq!(totals.taxable_amount, 1265.0);
        assert_eq!(totals.tax_amount, 101.2);
        assert_eq!(totals.price_likely, 1366.2);
        assert_eq!(totals.price_low, 1229.58);
        assert_eq!(totals.price_high, 1502.82);
    }

    #[test]
    fn test_subtotal_is_exact_sum_of_categories() {
        let rollup = EstimateRollup::default();
        let items = vec![
            line("a", 0.1, 0.2, 0.3),
            line("b", 10.01, 20.02, 30.03),
            line("c", 1234.56, 0.07, 99.99),
        ];
        let totals = rollup.rollup(&items, &RollupPercentages::default()).unwrap();
        assert_eq!(totals.total_material, 1244.67);
        assert_eq!(totals.total_labor, 20.29);
        assert_eq!(totals.total_equipment, 130.32);
        assert_eq!(totals.subtotal, 1395.28);
        assert_eq!(totals.price_likely, 1395.28);
    }

    #[test]
    fn test_sums_carry_no_float_noise() {
        let rollup = EstimateRollup::default();
        let items = vec![line("a", 0.1, 0.2, 0.0)];
        let totals = rollup
            .rollup(&items, &RollupPercentages::new(10.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(totals.subtotal, 0.3);
        assert_eq!(totals.overhead_amount, 0.03);
        assert_eq!(totals.taxable_amount, 0.33);
        assert_eq!(totals.price_likely, 0.33);
    }

    #[test]
    fn test_out_of_range_percentage_fails() {
        let rollup = EstimateRollup::default();
        let items = vec![line("a", 100.0, 0.0, 0.0)];

        let err = rollup
            .rollup(&items, &RollupPercentages::new(55.0, 10.0, 5.0))
            .unwrap_err();
        assert!(matches!(err, RollupError::InvalidPercentage { ref field, .. } if field == "overhead_pct"));

        let err = rollup
            .rollup(&items, &RollupPercentages::new(10.0, 10.0, 20.5))
            .unwrap_err();
        assert!(matches!(err, RollupError::InvalidPercentage { ref field, .. } if field == "tax_pct"));

        assert!(rollup
            .rollup(&items, &RollupPercentages::new(f64::NAN, 0.0, 0.0))
            .is_err());
        assert!(rollup
            .rollup(&items, &RollupPercentages::new(50.0, 50.0, 20.0))
            .is_ok());
    }

    #[test]
    fn test_non_finite_line_total_fails() {
        let rollup = EstimateRollup::default();
        let items = vec![line("bad", f64::NAN, 0.0, 0.0)];
        assert_eq!(
            rollup.rollup(&items, &RollupPercentages::default()).unwrap_err(),
            RollupError::NonFiniteAmount("bad".to_string())
        );
    }

    #[test]
    fn test_invalid_band_fails() {
        let rollup = EstimateRollup::new(PriceBandPolicy::Asymmetric {
            low_pct: 120.0,
            high_pct: 5.0,
        });
        assert!(matches!(
            rollup.rollup(&[], &RollupPercentages::default()).unwrap_err(),
            RollupError::InvalidBand(_)
        ));
    }

    #[test]
    fn test_rollup_is_idempotent() {
        let rollup = EstimateRollup::default();
        let items = vec![line("a", 333.33, 111.11, 22.22)];
        let pct = RollupPercentages::new(12.5, 7.5, 6.25);
        let first = rollup.rollup(&items, &pct).unwrap();
        let second = rollup.rollup(&items, &pct).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_estimate_rolls_up_to_zero() {
        let totals = EstimateRollup::default()
            .rollup(&[], &RollupPercentages::new(10.0, 10.0, 5.0))
            .unwrap();
        assert_eq!(totals, EstimateTotals::default());
    }
}
