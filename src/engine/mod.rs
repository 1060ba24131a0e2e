// ==========================================
// 屋面估价引擎 - 引擎层
// ==========================================
// 职责: 公式求值 / 明细计算 / 汇总 / 重算编排 / 生命周期
// 红线: Engine 不拼 SQL, 不做 I/O; 价目表与区域系数以快照传入
// ==========================================

pub mod formula;
pub mod lifecycle;
pub mod line_item_calc;
pub mod money;
pub mod recalc;
pub mod rollup;

// 重导出核心引擎
pub use formula::{evaluate, parse_formula, validate_formula, Expr, FormulaError};
pub use lifecycle::{
    ensure_deletable, plan_new_version, resolve_current, transition, LifecycleError,
    NewVersionPlan,
};
pub use line_item_calc::{
    CatalogLookup, CatalogSnapshot, Diagnostic, DiagnosticKind, GeoMultiplierResolver,
    GeoPricingSnapshot, LineItemCalculator, LineItemRecalc,
};
pub use money::round2;
pub use recalc::{EstimateSnapshot, RecalcConfig, RecalcEngine, RecalcError, RecalcOutcome};
pub use rollup::{EstimateRollup, PriceBandPolicy, RollupError, RollupPercentages};
