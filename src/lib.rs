// ==========================================
// 屋面估价引擎 - 核心库
// ==========================================
// 组成: 公式求值 / 明细重算 / 报价汇总 / 版本与生命周期
// 技术栈: Rust + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 计算规则
pub mod engine;

// 导入层 - 价目表 / 区域定价
pub mod importer;

// 配置层 - 部署配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/表结构）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{EstimateStatus, VersioningPolicy};

// 领域实体
pub use domain::{
    CatalogEntry, CostMultipliers, Estimate, EstimateLineItem, EstimateTotals, GeographicPricing,
    RoofVariables, SlopeVariables,
};

// 引擎
pub use engine::{
    evaluate, parse_formula, EstimateRollup, LineItemCalculator, PriceBandPolicy, RecalcEngine,
    RecalcOutcome, RollupPercentages,
};

// API
pub use api::{ApiError, ApiResult, EstimateApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "屋面估价引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert!(!APP_NAME.is_empty());
    }
}
