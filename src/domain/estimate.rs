// ==========================================
// 屋面估价引擎 - 估价单领域模型
// ==========================================
// 生命周期: 新建时合计为 0 且无明细; 合计只由显式重算写入
// 并发控制: revision 乐观锁,每次写入 +1
// ==========================================

use crate::domain::types::EstimateStatus;
use crate::domain::variables::RoofVariables;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// EstimateTotals - 估价汇总
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimateTotals {
    pub total_material: f64,
    pub total_labor: f64,
    pub total_equipment: f64,
    pub subtotal: f64,
    pub overhead_amount: f64,
    pub profit_amount: f64,
    pub taxable_amount: f64,
    pub tax_amount: f64,
    pub price_low: f64,
    pub price_likely: f64,
    pub price_high: f64,
}

// ==========================================
// Estimate - 估价单
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub estimate_id: String,             // 估价单ID
    pub subject_id: String,              // 标的 (线索/房产) ID
    pub name: String,                    // 名称
    pub version: i32,                    // 同一标的下的版本号 (仓储层分配)
    pub status: EstimateStatus,          // 状态
    pub is_superseded: bool,             // 是否已被取代
    pub roof_variables: RoofVariables,   // 屋面测量值
    pub geo_pricing_id: Option<String>,  // 区域定价
    pub overhead_pct: f64,               // 管理费率 (%)
    pub profit_pct: f64,                 // 利润率 (%)
    pub tax_pct: f64,                    // 税率 (%)
    pub totals: EstimateTotals,          // 汇总
    pub revision: i32,                   // 乐观锁：修订号
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
    pub accepted_at: Option<NaiveDateTime>,
    pub declined_at: Option<NaiveDateTime>,
    pub expired_at: Option<NaiveDateTime>,
    pub superseded_at: Option<NaiveDateTime>,
}

impl Estimate {
    /// 创建草稿估价单 (version 由仓储层在事务内分配)
    pub fn new_draft(
        estimate_id: &str,
        subject_id: &str,
        name: &str,
        roof_variables: RoofVariables,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            estimate_id: estimate_id.to_string(),
            subject_id: subject_id.to_string(),
            name: name.to_string(),
            version: 0,
            status: EstimateStatus::Draft,
            is_superseded: false,
            roof_variables,
            geo_pricing_id: None,
            overhead_pct: 0.0,
            profit_pct: 0.0,
            tax_pct: 0.0,
            totals: EstimateTotals::default(),
            revision: 0,
            created_at: now,
            updated_at: now,
            sent_at: None,
            accepted_at: None,
            declined_at: None,
            expired_at: None,
            superseded_at: None,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.status == EstimateStatus::Draft
    }
}
