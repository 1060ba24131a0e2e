// ==========================================
// 屋面估价引擎 - 数据仓储层
// ==========================================
// 职责: 数据访问, SQL 只出现在本层
// 红线: Repository 不含业务逻辑, 不做计算
// 并发: 共享 Arc<Mutex<Connection>>, 估价单写入带 revision 乐观锁
// ==========================================

pub mod catalog_repo;
pub mod error;
pub mod estimate_repo;
pub mod geo_pricing_repo;
pub mod line_item_repo;

pub use catalog_repo::CatalogRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use estimate_repo::EstimateRepository;
pub use geo_pricing_repo::GeoPricingRepository;
pub use line_item_repo::LineItemRepository;

use chrono::NaiveDateTime;

/// 时间戳存储格式 (保留亚秒)
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub(crate) fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(DATETIME_FORMAT).to_string()
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<NaiveDateTime>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}
