// ==========================================
// 屋面估价引擎 - 应用层
// ==========================================
// 职责: 组装连接 / 配置 / 仓储 / API, 供 CLI 使用
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
