// ==========================================
// 屋面估价引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、变量表
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod estimate;
pub mod line_item;
pub mod pricing;
pub mod types;
pub mod variables;

// 重导出核心类型
pub use estimate::{Estimate, EstimateTotals};
pub use line_item::EstimateLineItem;
pub use pricing::{BaseCosts, CatalogEntry, CostMultipliers, GeographicPricing};
pub use types::{EstimateStatus, VersioningPolicy};
pub use variables::{
    RoofVariable, RoofVariables, SlopeVariable, SlopeVariables, VariableBindings, VariableError,
};
