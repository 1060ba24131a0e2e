// ==========================================
// 屋面估价引擎 - 估价明细领域模型
// ==========================================
// 红线: quantity_override = true 且无公式时,数量永不被重算覆盖
// 红线: cost_override = true 时,单价永不被价目表覆盖
// 说明: 单价为上次重算时的缓存值,可能滞后,直到下次显式重算
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// EstimateLineItem - 估价明细行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateLineItem {
    // ===== 主键与归属 =====
    pub line_item_id: String,      // 明细ID
    pub estimate_id: String,       // 关联估价单
    pub line_item_type_id: String, // 价目表条目ID
    pub description: Option<String>,
    pub slope_name: Option<String>, // 坡面作用域 (None = 整体屋面)
    pub sort_order: i32,            // 显示顺序

    // ===== 数量 =====
    pub quantity: f64,                    // 数量 (公式派生或人工录入)
    pub quantity_formula: Option<String>, // 数量公式
    pub quantity_override: bool,          // 人工数量标志
    pub waste_factor: f64,                // 损耗系数 (>= 1, 默认 1)

    // ===== 单价 =====
    pub material_unit_cost: f64,
    pub labor_unit_cost: f64,
    pub equipment_unit_cost: f64,
    pub cost_override: bool, // 人工单价标志

    // ===== 派生合计 =====
    pub material_total: f64,
    pub labor_total: f64,
    pub equipment_total: f64,
    pub line_total: f64,

    pub updated_at: NaiveDateTime,
}

impl EstimateLineItem {
    /// 创建空白明细 (合计为 0, 待重算)
    pub fn new(line_item_id: &str, estimate_id: &str, line_item_type_id: &str) -> Self {
        Self {
            line_item_id: line_item_id.to_string(),
            estimate_id: estimate_id.to_string(),
            line_item_type_id: line_item_type_id.to_string(),
            description: None,
            slope_name: None,
            sort_order: 0,
            quantity: 0.0,
            quantity_formula: None,
            quantity_override: false,
            waste_factor: 1.0,
            material_unit_cost: 0.0,
            labor_unit_cost: 0.0,
            equipment_unit_cost: 0.0,
            cost_override: false,
            material_total: 0.0,
            labor_total: 0.0,
            equipment_total: 0.0,
            line_total: 0.0,
            updated_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// 有效公式 (空白字符串视为无公式)
    pub fn formula(&self) -> Option<&str> {
        self.quantity_formula
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    /// 是否锁定数量 (人工录入且无公式)
    pub fn is_quantity_locked(&self) -> bool {
        self.quantity_override && self.formula().is_none()
    }

    /// 生效的损耗系数: 未设置或 <= 0 时按 1 处理
    pub fn effective_waste_factor(&self) -> f64 {
        if self.waste_factor.is_finite() && self.waste_factor > 0.0 {
            self.waste_factor
        } else {
            1.0
        }
    }

    pub fn quantity_with_waste(&self) -> f64 {
        self.quantity * self.effective_waste_factor()
    }
}
