// ==========================================
// 屋面估价引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、写入
// 存储: config_kv 表 (key-value + scope, 当前仅 global)
// 说明: 配置值格式错误时记录告警并回落默认值, 不中断启动
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::types::VersioningPolicy;
use crate::engine::recalc::RecalcConfig;
use crate::engine::rollup::PriceBandPolicy;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// 默认价格区间 (±10%)
pub const DEFAULT_BAND_PCT: f64 = 10.0;
/// 默认单次重算明细上限
pub const DEFAULT_MAX_LINE_ITEMS: usize = 500;

// ==========================================
// EngineConfig - 引擎配置 (类型化)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub versioning_policy: VersioningPolicy,
    pub band_policy: PriceBandPolicy,
    pub max_line_items: Option<usize>, // None = 不限
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            versioning_policy: VersioningPolicy::default(),
            band_policy: PriceBandPolicy::Symmetric {
                pct: DEFAULT_BAND_PCT,
            },
            max_line_items: Some(DEFAULT_MAX_LINE_ITEMS),
        }
    }
}

impl EngineConfig {
    pub fn recalc_config(&self) -> RecalcConfig {
        RecalcConfig {
            max_line_items: self.max_line_items,
            band_policy: self.band_policy,
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入 global scope 配置 (UPSERT)
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;

        tracing::info!(config_key = key, value, "配置已更新");
        Ok(())
    }

    /// 获取所有 global 配置的快照
    pub fn get_config_snapshot(&self) -> Result<BTreeMap<String, String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut snapshot = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }

    // ===== 估价配置 =====

    /// 版本策略
    ///
    /// 未配置时按 Additive 处理并告警: 部署应显式选择一种策略
    pub fn get_versioning_policy(&self) -> Result<VersioningPolicy, Box<dyn Error>> {
        match self.get_config_value(config_keys::VERSIONING_POLICY)? {
            Some(raw) => Ok(VersioningPolicy::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(
                    config_key = config_keys::VERSIONING_POLICY,
                    raw_value = %raw,
                    error = %e,
                    "版本策略配置格式错误，使用 additive"
                );
                VersioningPolicy::default()
            })),
            None => {
                tracing::warn!(
                    config_key = config_keys::VERSIONING_POLICY,
                    "未配置版本策略，使用 additive"
                );
                Ok(VersioningPolicy::default())
            }
        }
    }

    /// 价格区间策略 (low/high 百分比)
    ///
    /// - 两者均为 0 → Flat
    /// - 两者相等 → Symmetric
    /// - 否则 → Asymmetric
    pub fn get_band_policy(&self) -> Result<PriceBandPolicy, Box<dyn Error>> {
        let low = self.get_pct_or_default(config_keys::PRICE_BAND_LOW_PCT, DEFAULT_BAND_PCT)?;
        let high = self.get_pct_or_default(config_keys::PRICE_BAND_HIGH_PCT, DEFAULT_BAND_PCT)?;

        let policy = if low == 0.0 && high == 0.0 {
            PriceBandPolicy::Flat
        } else if low == high {
            PriceBandPolicy::Symmetric { pct: low }
        } else {
            PriceBandPolicy::Asymmetric {
                low_pct: low,
                high_pct: high,
            }
        };

        if let Err(e) = policy.validate() {
            tracing::warn!(error = %e, "价格区间配置越界，使用默认 ±10%");
            return Ok(EngineConfig::default().band_policy);
        }
        Ok(policy)
    }

    /// 单次重算明细上限 (0 = 不限)
    pub fn get_max_line_items(&self) -> Result<Option<usize>, Box<dyn Error>> {
        let value = self.get_config_value(config_keys::MAX_LINE_ITEMS)?;
        let Some(raw) = value else {
            return Ok(Some(DEFAULT_MAX_LINE_ITEMS));
        };

        match raw.trim().parse::<usize>() {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(n)),
            Err(_) => {
                tracing::warn!(
                    config_key = config_keys::MAX_LINE_ITEMS,
                    raw_value = %raw,
                    "明细上限配置格式错误，使用默认值"
                );
                Ok(Some(DEFAULT_MAX_LINE_ITEMS))
            }
        }
    }

    /// 加载完整引擎配置
    pub fn load_engine_config(&self) -> Result<EngineConfig, Box<dyn Error>> {
        Ok(EngineConfig {
            versioning_policy: self.get_versioning_policy()?,
            band_policy: self.get_band_policy()?,
            max_line_items: self.get_max_line_items()?,
        })
    }

    fn get_pct_or_default(&self, key: &str, default: f64) -> Result<f64, Box<dyn Error>> {
        let Some(raw) = self.get_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => {
                tracing::warn!(config_key = key, raw_value = %raw, "百分比配置格式错误，使用默认值");
                Ok(default)
            }
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 版本策略: supersede_on_create | additive
    pub const VERSIONING_POLICY: &str = "estimate/versioning_policy";

    // 价格区间
    pub const PRICE_BAND_LOW_PCT: &str = "estimate/price_band_low_pct";
    pub const PRICE_BAND_HIGH_PCT: &str = "estimate/price_band_high_pct";

    // 重算
    pub const MAX_LINE_ITEMS: &str = "estimate/max_line_items";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = manager().load_engine_config().unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.versioning_policy, VersioningPolicy::Additive);
    }

    #[test]
    fn test_explicit_values() {
        let m = manager();
        m.set_config_value(config_keys::VERSIONING_POLICY, "supersede_on_create")
            .unwrap();
        m.set_config_value(config_keys::PRICE_BAND_LOW_PCT, "5").unwrap();
        m.set_config_value(config_keys::PRICE_BAND_HIGH_PCT, "15").unwrap();
        m.set_config_value(config_keys::MAX_LINE_ITEMS, "0").unwrap();

        let config = m.load_engine_config().unwrap();
        assert_eq!(config.versioning_policy, VersioningPolicy::SupersedeOnCreate);
        assert_eq!(
            config.band_policy,
            PriceBandPolicy::Asymmetric {
                low_pct: 5.0,
                high_pct: 15.0
            }
        );
        assert_eq!(config.max_line_items, None);
        assert_eq!(config.recalc_config().max_line_items, None);
    }

    #[test]
    fn test_flat_and_symmetric_band() {
        let m = manager();
        m.set_config_value(config_keys::PRICE_BAND_LOW_PCT, "0").unwrap();
        m.set_config_value(config_keys::PRICE_BAND_HIGH_PCT, "0").unwrap();
        assert_eq!(m.get_band_policy().unwrap(), PriceBandPolicy::Flat);

        m.set_config_value(config_keys::PRICE_BAND_LOW_PCT, "7.5").unwrap();
        m.set_config_value(config_keys::PRICE_BAND_HIGH_PCT, "7.5").unwrap();
        assert_eq!(
            m.get_band_policy().unwrap(),
            PriceBandPolicy::Symmetric { pct: 7.5 }
        );
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let m = manager();
        m.set_config_value(config_keys::VERSIONING_POLICY, "whatever").unwrap();
        m.set_config_value(config_keys::PRICE_BAND_HIGH_PCT, "250").unwrap();
        m.set_config_value(config_keys::MAX_LINE_ITEMS, "lots").unwrap();

        let config = m.load_engine_config().unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_snapshot_lists_global_values() {
        let m = manager();
        m.set_config_value(config_keys::MAX_LINE_ITEMS, "50").unwrap();
        m.set_config_value(config_keys::MAX_LINE_ITEMS, "80").unwrap();
        let snapshot = m.get_config_snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(config_keys::MAX_LINE_ITEMS).map(String::as_str), Some("80"));
    }
}
