// ==========================================
// 屋面估价引擎 - 明细行计算器
// ==========================================
// 职责: 数量(公式/人工) × 损耗 × 单价(价目表×区域系数/人工) → 四项合计
// 红线: 人工数量 (quantity_override 且无公式) 永不覆盖
// 红线: 公式失败保留原数量; 价目表缺失保留原单价; 均以诊断返回,不中断批次
// 红线: 合计逐项舍入到分 (远离零), line_total 为三项舍入值之和
// ==========================================

use crate::domain::line_item::EstimateLineItem;
use crate::domain::pricing::{BaseCosts, CatalogEntry, CostMultipliers, GeographicPricing};
use crate::domain::variables::{RoofVariables, VariableError};
use crate::engine::formula::{self, FormulaError};
use crate::engine::money::round2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ==========================================
// 外部协作者接口
// ==========================================

/// 价目表查询 (只读)
pub trait CatalogLookup {
    /// 按明细类型查基础单价; 不存在返回 None
    fn find_base_costs(&self, line_item_type_id: &str) -> Option<BaseCosts>;
}

/// 区域系数解析 (只读)
pub trait GeoMultiplierResolver {
    /// 解析区域系数; 未指定或不存在时返回 (1, 1, 1)
    fn resolve(&self, geo_pricing_id: Option<&str>) -> CostMultipliers;
}

/// 价目表快照 (一次重算内只读)
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    entries: HashMap<String, BaseCosts>,
}

impl CatalogSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut snapshot = Self::new();
        for entry in entries {
            snapshot.insert(&entry.line_item_type_id, entry.base_costs);
        }
        snapshot
    }

    pub fn insert(&mut self, line_item_type_id: &str, costs: BaseCosts) {
        self.entries.insert(line_item_type_id.to_string(), costs);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CatalogLookup for CatalogSnapshot {
    fn find_base_costs(&self, line_item_type_id: &str) -> Option<BaseCosts> {
        self.entries.get(line_item_type_id).copied()
    }
}

/// 区域定价快照
#[derive(Debug, Clone, Default)]
pub struct GeoPricingSnapshot {
    entries: HashMap<String, CostMultipliers>,
}

impl GeoPricingSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pricings(pricings: impl IntoIterator<Item = GeographicPricing>) -> Self {
        let mut snapshot = Self::new();
        for pricing in pricings {
            snapshot
                .entries
                .insert(pricing.geo_pricing_id.clone(), pricing.multipliers());
        }
        snapshot
    }
}

impl GeoMultiplierResolver for GeoPricingSnapshot {
    fn resolve(&self, geo_pricing_id: Option<&str>) -> CostMultipliers {
        let Some(id) = geo_pricing_id else {
            return CostMultipliers::default();
        };
        match self.entries.get(id) {
            Some(m) => *m,
            None => {
                tracing::warn!(geo_pricing_id = id, "区域定价不存在, 按系数 1.0 计算");
                CostMultipliers::default()
            }
        }
    }
}

// ==========================================
// 诊断 (非致命, 逐项返回)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticKind {
    SyntaxError,
    UnknownVariable,
    DivisionByZero,
    NonFiniteResult,
    UnknownSlope,
    NegativeQuantity,
    CatalogEntryMissing,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::SyntaxError => "SYNTAX_ERROR",
            DiagnosticKind::UnknownVariable => "UNKNOWN_VARIABLE",
            DiagnosticKind::DivisionByZero => "DIVISION_BY_ZERO",
            DiagnosticKind::NonFiniteResult => "NON_FINITE_RESULT",
            DiagnosticKind::UnknownSlope => "UNKNOWN_SLOPE",
            DiagnosticKind::NegativeQuantity => "NEGATIVE_QUANTITY",
            DiagnosticKind::CatalogEntryMissing => "CATALOG_ENTRY_MISSING",
        };
        f.write_str(s)
    }
}

impl From<&FormulaError> for DiagnosticKind {
    fn from(err: &FormulaError) -> Self {
        match err {
            FormulaError::SyntaxError { .. } => DiagnosticKind::SyntaxError,
            FormulaError::UnknownVariable(_) => DiagnosticKind::UnknownVariable,
            FormulaError::DivisionByZero => DiagnosticKind::DivisionByZero,
            FormulaError::NonFiniteResult { .. } => DiagnosticKind::NonFiniteResult,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub index: usize,         // 批次内序号 (从 0 开始)
    pub line_item_id: String, // 明细ID
    pub kind: DiagnosticKind, // 失败类型
    pub message: String,      // 可读原因
}

// ==========================================
// LineItemRecalc - 单行重算结果
// ==========================================
#[derive(Debug, Clone)]
pub struct LineItemRecalc {
    pub item: EstimateLineItem,
    pub changed: bool,
    pub diagnostics: Vec<Diagnostic>,
}

// ==========================================
// LineItemCalculator - 明细行计算器
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct LineItemCalculator;

impl LineItemCalculator {
    pub fn new() -> Self {
        Self
    }

    /// 重算单行明细
    ///
    /// # 参数
    /// - `index`: 批次内序号 (写入诊断)
    /// - `item`: 当前明细 (不修改)
    /// - `variables`: 估价单屋面变量
    /// - `multipliers`: 已解析的区域系数
    /// - `catalog`: 价目表查询
    ///
    /// # 返回
    /// 更新后的明细 (或原样) + 诊断列表
    pub fn recalculate(
        &self,
        index: usize,
        item: &EstimateLineItem,
        variables: &RoofVariables,
        multipliers: &CostMultipliers,
        catalog: &dyn CatalogLookup,
    ) -> LineItemRecalc {
        let mut diagnostics = Vec::new();
        let mut updated = item.clone();

        // 1. 数量
        match self.resolve_quantity(item, variables) {
            Ok(Some(quantity)) => updated.quantity = quantity,
            Ok(None) => {}
            Err((kind, message)) => {
                diagnostics.push(self.diagnostic(index, item, kind, message));
            }
        }

        // 2. 单价
        if !item.cost_override {
            match catalog.find_base_costs(&item.line_item_type_id) {
                Some(base) => {
                    let unit = multipliers.apply(&base);
                    updated.material_unit_cost = unit.base_material_cost;
                    updated.labor_unit_cost = unit.base_labor_cost;
                    updated.equipment_unit_cost = unit.base_equipment_cost;
                }
                None => diagnostics.push(self.diagnostic(
                    index,
                    item,
                    DiagnosticKind::CatalogEntryMissing,
                    format!("价目表条目不存在: {}", item.line_item_type_id),
                )),
            }
        }

        // 3. 合计
        Self::apply_totals(&mut updated);
        if ![
            updated.material_total,
            updated.labor_total,
            updated.equipment_total,
            updated.line_total,
        ]
        .iter()
        .all(|v| v.is_finite())
        {
            diagnostics.push(self.diagnostic(
                index,
                item,
                DiagnosticKind::NonFiniteResult,
                "合计金额溢出, 保留原值".to_string(),
            ));
            return LineItemRecalc {
                item: item.clone(),
                changed: false,
                diagnostics,
            };
        }

        let changed = updated != *item;
        if changed {
            updated.updated_at = chrono::Utc::now().naive_utc();
        }

        tracing::debug!(
            line_item_id = %item.line_item_id,
            quantity = updated.quantity,
            line_total = updated.line_total,
            changed,
            "明细重算完成"
        );

        LineItemRecalc {
            item: updated,
            changed,
            diagnostics,
        }
    }

    /// 按当前数量/损耗/单价计算四项合计
    pub fn apply_totals(item: &mut EstimateLineItem) {
        let quantity_with_waste = item.quantity_with_waste();
        item.material_total = round2(quantity_with_waste * item.material_unit_cost);
        item.labor_total = round2(quantity_with_waste * item.labor_unit_cost);
        item.equipment_total = round2(quantity_with_waste * item.equipment_unit_cost);
        item.line_total = round2(item.material_total + item.labor_total + item.equipment_total);
    }

    /// 数量解析
    ///
    /// - `Ok(None)`: 人工数量锁定, 不重算
    /// - `Ok(Some(q))`: 公式求值成功
    /// - `Err`: 公式失败 (调用方保留原数量)
    fn resolve_quantity(
        &self,
        item: &EstimateLineItem,
        variables: &RoofVariables,
    ) -> Result<Option<f64>, (DiagnosticKind, String)> {
        if item.is_quantity_locked() {
            return Ok(None);
        }
        let Some(formula) = item.formula() else {
            return Ok(None);
        };

        let bindings = match item.slope_name.as_deref() {
            Some(slope) => variables
                .bindings_for_slope(slope)
                .map_err(|e: VariableError| (DiagnosticKind::UnknownSlope, e.to_string()))?,
            None => variables.bindings(),
        };

        let quantity = formula::evaluate(formula, &bindings)
            .map_err(|e| (DiagnosticKind::from(&e), format!("公式 '{}' 求值失败: {}", formula, e)))?;

        if quantity < 0.0 {
            return Err((
                DiagnosticKind::NegativeQuantity,
                format!("公式 '{}' 结果为负数: {}", formula, quantity),
            ));
        }
        Ok(Some(quantity))
    }

    fn diagnostic(
        &self,
        index: usize,
        item: &EstimateLineItem,
        kind: DiagnosticKind,
        message: String,
    ) -> Diagnostic {
        tracing::warn!(
            index,
            line_item_id = %item.line_item_id,
            kind = %kind,
            "{}",
            message
        );
        Diagnostic {
            index,
            line_item_id: item.line_item_id.clone(),
            kind,
            message,
        }
    }
}
