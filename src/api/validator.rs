// ==========================================
// 屋面估价引擎 - 边界输入校验器
// ==========================================
// 职责: 写入前校验费率 / 屋面变量 / 明细字段 / 公式
// 说明: 收集全部违规后一次性返回, 便于编辑面逐项提示
// ==========================================

use crate::api::error::{ApiError, ApiResult, ValidationViolation};
use crate::domain::line_item::EstimateLineItem;
use crate::domain::variables::RoofVariables;
use crate::engine::formula::validate_formula;
use crate::engine::rollup::RollupPercentages;

/// 费率校验: 管理费/利润 [0, 50], 税率 [0, 20]
pub fn validate_percentages(pct: &RollupPercentages) -> ApiResult<()> {
    match pct.validate() {
        Ok(()) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// 屋面变量校验 (非负有限数, 含各坡面)
pub fn validate_roof_variables(variables: &RoofVariables) -> ApiResult<()> {
    variables.validate().map_err(|e| ApiError::ValidationFailed {
        reason: e.to_string(),
        violations: vec![ValidationViolation::new("roof_variables", &e.to_string())],
    })
}

/// 明细校验
///
/// # 规则
/// - waste_factor >= 1 且有限
/// - quantity / 各单价非负有限
/// - 公式语法正确且只引用已知变量 (坡面明细按坡面词表)
/// - slope_name 必须存在于估价单的坡面测量值中
pub fn validate_line_item(item: &EstimateLineItem, variables: &RoofVariables) -> ApiResult<()> {
    let mut violations = Vec::new();

    if !(item.waste_factor.is_finite() && item.waste_factor >= 1.0) {
        violations.push(ValidationViolation::new(
            "waste_factor",
            &format!("损耗系数必须 >= 1: {}", item.waste_factor),
        ));
    }

    for (field, value) in [
        ("quantity", item.quantity),
        ("material_unit_cost", item.material_unit_cost),
        ("labor_unit_cost", item.labor_unit_cost),
        ("equipment_unit_cost", item.equipment_unit_cost),
    ] {
        if !(value.is_finite() && value >= 0.0) {
            violations.push(ValidationViolation::new(
                field,
                &format!("必须为非负有限数: {}", value),
            ));
        }
    }

    if item.line_item_type_id.trim().is_empty() {
        violations.push(ValidationViolation::new("line_item_type_id", "不能为空"));
    }

    if let Some(slope) = item.slope_name.as_deref() {
        if !variables.slopes.contains_key(slope) {
            violations.push(ValidationViolation::new(
                "slope_name",
                &format!("坡面不存在: {}", slope),
            ));
        }
    }

    if let Some(formula) = item.formula() {
        if let Err(e) = validate_formula(formula, item.slope_name.is_some()) {
            violations.push(ValidationViolation::new("quantity_formula", &e.to_string()));
        }
    }

    if violations.is_empty() {
        return Ok(());
    }

    let reason = violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.reason))
        .collect::<Vec<_>>()
        .join("; ");
    tracing::debug!(line_item_id = %item.line_item_id, %reason, "明细校验失败");
    Err(ApiError::ValidationFailed { reason, violations })
}
