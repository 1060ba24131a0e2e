// ==========================================
// 屋面估价引擎 - 价目表 / 区域系数领域模型
// ==========================================
// 职责: 价目表基础单价、区域成本系数
// 说明: 区域系数缺省为 1.0
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// BaseCosts - 基础单价 (材料/人工/设备)
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseCosts {
    pub base_material_cost: f64,
    pub base_labor_cost: f64,
    pub base_equipment_cost: f64,
}

// ==========================================
// CatalogEntry - 价目表条目 (明细类型)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub line_item_type_id: String, // 条目ID
    pub name: String,              // 名称
    pub unit: Option<String>,      // 计量单位 (SQ/LF/EA...)
    pub base_costs: BaseCosts,
}

// ==========================================
// CostMultipliers - 已解析的区域系数
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostMultipliers {
    pub material: f64,
    pub labor: f64,
    pub equipment: f64,
}

impl Default for CostMultipliers {
    fn default() -> Self {
        Self {
            material: 1.0,
            labor: 1.0,
            equipment: 1.0,
        }
    }
}

impl CostMultipliers {
    /// 基础单价 × 区域系数
    pub fn apply(&self, base: &BaseCosts) -> BaseCosts {
        BaseCosts {
            base_material_cost: base.base_material_cost * self.material,
            base_labor_cost: base.base_labor_cost * self.labor,
            base_equipment_cost: base.base_equipment_cost * self.equipment,
        }
    }
}

// ==========================================
// GeographicPricing - 区域定价
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographicPricing {
    pub geo_pricing_id: String,
    pub name: String,
    pub material_multiplier: Option<f64>,
    pub labor_multiplier: Option<f64>,
    pub equipment_multiplier: Option<f64>,
}

impl GeographicPricing {
    /// 解析系数 (缺失项取 1.0)
    pub fn multipliers(&self) -> CostMultipliers {
        CostMultipliers {
            material: self.material_multiplier.unwrap_or(1.0),
            labor: self.labor_multiplier.unwrap_or(1.0),
            equipment: self.equipment_multiplier.unwrap_or(1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_multipliers_default_to_one() {
        let geo = GeographicPricing {
            geo_pricing_id: "TX-AUS".to_string(),
            name: "Austin".to_string(),
            material_multiplier: Some(1.1),
            labor_multiplier: None,
            equipment_multiplier: None,
        };
        let m = geo.multipliers();
        assert_eq!(m.material, 1.1);
        assert_eq!(m.labor, 1.0);
        assert_eq!(m.equipment, 1.0);
    }

    #[test]
    fn test_apply_multipliers() {
        let base = BaseCosts {
            base_material_cost: 100.0,
            base_labor_cost: 50.0,
            base_equipment_cost: 0.0,
        };
        let m = CostMultipliers {
            material: 1.5,
            labor: 2.0,
            equipment: 3.0,
        };
        let applied = m.apply(&base);
        assert_eq!(applied.base_material_cost, 150.0);
        assert_eq!(applied.base_labor_cost, 100.0);
        assert_eq!(applied.base_equipment_cost, 0.0);
    }
}
