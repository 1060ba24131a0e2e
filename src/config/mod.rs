// ==========================================
// 屋面估价引擎 - 配置层
// ==========================================
// 职责: 部署级配置 (版本策略 / 价格区间 / 重算上限)
// 存储: config_kv 表
// ==========================================

pub mod config_manager;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager, EngineConfig};
