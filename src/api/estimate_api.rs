// ==========================================
// 屋面估价引擎 - 估价单 API
// ==========================================
// 职责: 估价单创建 / 明细编辑 / 重算 / 费率调整 / 状态流转 / 版本查询
// 红线: 合计只由显式重算或费率调整写入
// 红线: 写入带 revision 乐观锁, 冲突直接返回, 由调用方决定是否重试
// ==========================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::error::{ApiError, ApiResult};
use crate::api::validator;
use crate::domain::estimate::Estimate;
use crate::domain::line_item::EstimateLineItem;
use crate::domain::types::{EstimateStatus, VersioningPolicy};
use crate::domain::variables::RoofVariables;
use crate::engine::lifecycle;
use crate::engine::line_item_calc::GeoMultiplierResolver;
use crate::engine::recalc::{EstimateSnapshot, RecalcEngine, RecalcOutcome};
use crate::engine::rollup::RollupPercentages;
use crate::repository::{
    CatalogRepository, EstimateRepository, GeoPricingRepository, LineItemRepository,
};

// ==========================================
// 请求对象
// ==========================================

/// 创建估价单请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateEstimateRequest {
    pub subject_id: String,
    pub name: String,
    #[serde(default)]
    pub roof_variables: RoofVariables,
    #[serde(default)]
    pub geo_pricing_id: Option<String>,
    #[serde(default)]
    pub overhead_pct: f64,
    #[serde(default)]
    pub profit_pct: f64,
    #[serde(default)]
    pub tax_pct: f64,
}

/// 明细编辑输入 (编辑面可写字段)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItemInput {
    pub line_item_type_id: String,
    pub description: Option<String>,
    pub slope_name: Option<String>,
    pub sort_order: i32,
    pub quantity: f64,
    pub quantity_formula: Option<String>,
    pub quantity_override: bool,
    pub waste_factor: f64,
    pub material_unit_cost: f64,
    pub labor_unit_cost: f64,
    pub equipment_unit_cost: f64,
    pub cost_override: bool,
}

impl Default for LineItemInput {
    fn default() -> Self {
        Self {
            line_item_type_id: String::new(),
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
        }
    }
}

impl LineItemInput {
    /// 覆盖明细的可编辑字段; 派生合计保留到下次重算
    fn apply_to(&self, item: &mut EstimateLineItem) {
        item.line_item_type_id = self.line_item_type_id.trim().to_string();
        item.description = self.description.clone();
        item.slope_name = self.slope_name.clone();
        item.sort_order = self.sort_order;
        item.quantity = self.quantity;
        item.quantity_formula = self.quantity_formula.clone();
        item.quantity_override = self.quantity_override;
        item.waste_factor = self.waste_factor;
        item.material_unit_cost = self.material_unit_cost;
        item.labor_unit_cost = self.labor_unit_cost;
        item.equipment_unit_cost = self.equipment_unit_cost;
        item.cost_override = self.cost_override;
        item.updated_at = chrono::Utc::now().naive_utc();
    }
}

// ==========================================
// EstimateApi - 估价单 API
// ==========================================

/// 估价单API
///
/// 职责：
/// 1. 估价单管理（创建、查询、删除、版本解析）
/// 2. 明细编辑（新增、修改、删除）
/// 3. 重算（明细 + 汇总）与费率调整（仅汇总）
/// 4. 状态流转（发送、接受、拒绝、过期）
pub struct EstimateApi {
    estimate_repo: Arc<EstimateRepository>,
    line_item_repo: Arc<LineItemRepository>,
    catalog_repo: Arc<CatalogRepository>,
    geo_pricing_repo: Arc<GeoPricingRepository>,
    recalc_engine: Arc<RecalcEngine>,
    versioning_policy: VersioningPolicy,
}

impl EstimateApi {
    /// 创建新的EstimateApi实例
    pub fn new(
        estimate_repo: Arc<EstimateRepository>,
        line_item_repo: Arc<LineItemRepository>,
        catalog_repo: Arc<CatalogRepository>,
        geo_pricing_repo: Arc<GeoPricingRepository>,
        recalc_engine: Arc<RecalcEngine>,
        versioning_policy: VersioningPolicy,
    ) -> Self {
        Self {
            estimate_repo,
            line_item_repo,
            catalog_repo,
            geo_pricing_repo,
            recalc_engine,
            versioning_policy,
        }
    }

    pub fn versioning_policy(&self) -> VersioningPolicy {
        self.versioning_policy
    }

    // ==========================================
    // 估价单管理
    // ==========================================

    /// 创建估价单 (草稿, 合计为 0, 无明细)
    ///
    /// # 返回
    /// - Ok(Estimate): 已分配版本号的估价单
    /// - Err(ApiError): 输入非法 / 区域定价不存在 / 数据库错误
    pub fn create_estimate(&self, request: CreateEstimateRequest) -> ApiResult<Estimate> {
        if request.subject_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("subject_id不能为空".to_string()));
        }
        if request.name.trim().is_empty() {
            return Err(ApiError::InvalidInput("估价单名称不能为空".to_string()));
        }
        validator::validate_roof_variables(&request.roof_variables)?;
        let pct = RollupPercentages::new(request.overhead_pct, request.profit_pct, request.tax_pct);
        validator::validate_percentages(&pct)?;

        if let Some(geo_id) = request.geo_pricing_id.as_deref() {
            if self.geo_pricing_repo.find_by_id(geo_id)?.is_none() {
                return Err(ApiError::InvalidInput(format!("区域定价不存在: {}", geo_id)));
            }
        }

        let mut estimate = Estimate::new_draft(
            &uuid::Uuid::new_v4().to_string(),
            request.subject_id.trim(),
            request.name.trim(),
            request.roof_variables,
        );
        estimate.geo_pricing_id = request.geo_pricing_id;
        estimate.overhead_pct = pct.overhead_pct;
        estimate.profit_pct = pct.profit_pct;
        estimate.tax_pct = pct.tax_pct;

        Ok(self
            .estimate_repo
            .create_with_next_version(&estimate, self.versioning_policy)?)
    }

    /// 查询估价单及其明细
    pub fn get_estimate(&self, estimate_id: &str) -> ApiResult<EstimateSnapshot> {
        let estimate = self.load_estimate(estimate_id)?;
        let line_items = self.line_item_repo.find_by_estimate(estimate_id)?;
        Ok(EstimateSnapshot {
            estimate,
            line_items,
        })
    }

    /// 查询标的下全部版本 (按版本升序)
    pub fn list_versions(&self, subject_id: &str) -> ApiResult<Vec<Estimate>> {
        Ok(self.estimate_repo.find_by_subject(subject_id)?)
    }

    /// 解析标的的当前估价单 (按部署的版本策略)
    pub fn current_estimate(&self, subject_id: &str) -> ApiResult<Option<Estimate>> {
        let versions = self.estimate_repo.find_by_subject(subject_id)?;
        Ok(lifecycle::resolve_current(self.versioning_policy, &versions).cloned())
    }

    /// 删除估价单 (仅草稿)
    pub fn delete_estimate(&self, estimate_id: &str) -> ApiResult<()> {
        let estimate = self.load_estimate(estimate_id)?;
        lifecycle::ensure_deletable(&estimate)?;
        self.estimate_repo.delete(estimate_id)?;

        tracing::info!(estimate_id, "估价单已删除");
        Ok(())
    }

    // ==========================================
    // 明细编辑
    // ==========================================

    /// 新增明细
    pub fn add_line_item(&self, estimate_id: &str, input: LineItemInput) -> ApiResult<EstimateLineItem> {
        let estimate = self.load_editable(estimate_id)?;

        let mut item = EstimateLineItem::new(
            &uuid::Uuid::new_v4().to_string(),
            estimate_id,
            &input.line_item_type_id,
        );
        input.apply_to(&mut item);
        validator::validate_line_item(&item, &estimate.roof_variables)?;

        self.line_item_repo.insert(&item, estimate.revision)?;

        tracing::debug!(estimate_id, line_item_id = %item.line_item_id, "明细已新增");
        Ok(item)
    }

    /// 修改明细
    pub fn update_line_item(&self, line_item_id: &str, input: LineItemInput) -> ApiResult<EstimateLineItem> {
        let mut item = self
            .line_item_repo
            .find_by_id(line_item_id)?
            .ok_or_else(|| ApiError::NotFound(format!("明细(id={})不存在", line_item_id)))?;
        let estimate = self.load_editable(&item.estimate_id)?;

        input.apply_to(&mut item);
        validator::validate_line_item(&item, &estimate.roof_variables)?;

        self.line_item_repo.update(&item, estimate.revision)?;
        Ok(item)
    }

    /// 删除明细
    pub fn remove_line_item(&self, line_item_id: &str) -> ApiResult<()> {
        let item = self
            .line_item_repo
            .find_by_id(line_item_id)?
            .ok_or_else(|| ApiError::NotFound(format!("明细(id={})不存在", line_item_id)))?;
        let estimate = self.load_editable(&item.estimate_id)?;

        self.line_item_repo
            .delete(&item.estimate_id, line_item_id, estimate.revision)?;
        Ok(())
    }

    // ==========================================
    // 重算 / 费率
    // ==========================================

    /// 全量重算: 明细 (数量/单价/合计) + 汇总, 单事务写回
    ///
    /// # 返回
    /// - Ok(RecalcOutcome): 含逐项诊断 (非致命)
    /// - Err(ApiError::OptimisticLockFailure): 快照读取后估价单被修改
    #[instrument(skip(self))]
    pub fn recalculate_estimate(&self, estimate_id: &str) -> ApiResult<RecalcOutcome> {
        let estimate = self.load_editable(estimate_id)?;
        let line_items = self.line_item_repo.find_by_estimate(estimate_id)?;

        let catalog = self.catalog_repo.load_snapshot()?;
        let geo = self.geo_pricing_repo.load_snapshot()?;
        let multipliers = geo.resolve(estimate.geo_pricing_id.as_deref());

        let snapshot = EstimateSnapshot {
            estimate,
            line_items,
        };
        let outcome = self
            .recalc_engine
            .recalculate(&snapshot, &multipliers, &catalog)?;

        let revision = self.estimate_repo.save_recalc(&outcome)?;
        tracing::info!(
            estimate_id,
            revision,
            changed = outcome.changed_item_ids.len(),
            diagnostics = outcome.diagnostics.len(),
            "重算结果已写回"
        );
        Ok(outcome)
    }

    /// 调整费率并重新汇总 (明细不重算)
    pub fn update_percentages(&self, estimate_id: &str, pct: RollupPercentages) -> ApiResult<Estimate> {
        validator::validate_percentages(&pct)?;
        let mut estimate = self.load_editable(estimate_id)?;
        let line_items = self.line_item_repo.find_by_estimate(estimate_id)?;

        estimate.overhead_pct = pct.overhead_pct;
        estimate.profit_pct = pct.profit_pct;
        estimate.tax_pct = pct.tax_pct;
        let totals = self.recalc_engine.rollup_only(&estimate, &line_items)?;

        estimate.revision =
            self.estimate_repo
                .update_percentages(estimate_id, estimate.revision, &pct, &totals)?;
        estimate.totals = totals;
        Ok(estimate)
    }

    // ==========================================
    // 状态流转
    // ==========================================

    pub fn send_estimate(&self, estimate_id: &str) -> ApiResult<Estimate> {
        self.change_status(estimate_id, EstimateStatus::Sent)
    }

    pub fn accept_estimate(&self, estimate_id: &str) -> ApiResult<Estimate> {
        self.change_status(estimate_id, EstimateStatus::Accepted)
    }

    pub fn decline_estimate(&self, estimate_id: &str) -> ApiResult<Estimate> {
        self.change_status(estimate_id, EstimateStatus::Declined)
    }

    /// 过期 (由外部定时任务触发)
    pub fn expire_estimate(&self, estimate_id: &str) -> ApiResult<Estimate> {
        self.change_status(estimate_id, EstimateStatus::Expired)
    }

    fn change_status(&self, estimate_id: &str, to: EstimateStatus) -> ApiResult<Estimate> {
        let mut estimate = self.load_estimate(estimate_id)?;
        lifecycle::transition(&mut estimate, to, chrono::Utc::now().naive_utc())?;
        estimate.revision = self.estimate_repo.update_status(&estimate)?;
        Ok(estimate)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn load_estimate(&self, estimate_id: &str) -> ApiResult<Estimate> {
        self.estimate_repo
            .find_by_id(estimate_id)?
            .ok_or_else(|| ApiError::NotFound(format!("估价单(id={})不存在", estimate_id)))
    }

    /// 仅草稿且未被取代的估价单允许编辑 / 重算
    fn load_editable(&self, estimate_id: &str) -> ApiResult<Estimate> {
        let estimate = self.load_estimate(estimate_id)?;
        if !estimate.is_draft() {
            return Err(ApiError::BusinessRuleViolation(format!(
                "估价单{}状态为{}，仅草稿可编辑",
                estimate_id, estimate.status
            )));
        }
        if estimate.is_superseded {
            return Err(ApiError::BusinessRuleViolation(format!(
                "估价单{}已被取代，不可编辑",
                estimate_id
            )));
        }
        Ok(estimate)
    }
}
