// ==========================================
// 屋面估价引擎 - 导入层
// ==========================================
// 职责: 外部 CSV 数据导入 (价目表 / 区域定价)
// ==========================================

pub mod catalog_importer;
pub mod error;
pub mod file_parser;

// 重导出核心类型
pub use catalog_importer::{CatalogImporter, ImportSummary, RowRejection};
pub use error::{ImportError, ImportResult};
pub use file_parser::{CsvParser, RawRow};
