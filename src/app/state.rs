// ==========================================
// 屋面估价引擎 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享连接、仓储和API实例
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::EstimateApi;
use crate::config::{ConfigManager, EngineConfig};
use crate::db::{open_sqlite_connection, init_schema, read_schema_version};
use crate::engine::RecalcEngine;
use crate::importer::CatalogImporter;
use crate::repository::{
    CatalogRepository, EstimateRepository, GeoPricingRepository, LineItemRepository,
};

/// 应用状态
///
/// 所有仓储共享同一个 SQLite 连接
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 估价单API
    pub estimate_api: Arc<EstimateApi>,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 启动时加载的引擎配置
    pub engine_config: EngineConfig,

    /// 价目表仓储（供导入使用）
    pub catalog_repo: Arc<CatalogRepository>,

    /// 区域定价仓储（供导入使用）
    pub geo_pricing_repo: Arc<GeoPricingRepository>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开数据库并初始化表结构（幂等）
    /// 2. 从 config_kv 加载引擎配置
    /// 3. 初始化所有Repository和API实例
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("数据库表结构初始化失败: {}", e))?;
        match read_schema_version(&conn) {
            Ok(Some(version)) => tracing::debug!(schema_version = version, "数据库表结构就绪"),
            Ok(None) => tracing::warn!("schema_version 表为空"),
            Err(e) => tracing::warn!("读取 schema_version 失败: {}", e),
        }
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 初始化配置
        // ==========================================
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let engine_config = config_manager
            .load_engine_config()
            .map_err(|e| format!("加载引擎配置失败: {}", e))?;

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let estimate_repo = Arc::new(EstimateRepository::new(conn.clone()));
        let line_item_repo = Arc::new(LineItemRepository::new(conn.clone()));
        let catalog_repo = Arc::new(CatalogRepository::new(conn.clone()));
        let geo_pricing_repo = Arc::new(GeoPricingRepository::new(conn));

        // ==========================================
        // 初始化Engine层与API层
        // ==========================================
        let recalc_engine = Arc::new(RecalcEngine::new(engine_config.recalc_config()));
        let estimate_api = Arc::new(EstimateApi::new(
            estimate_repo,
            line_item_repo,
            catalog_repo.clone(),
            geo_pricing_repo.clone(),
            recalc_engine,
            engine_config.versioning_policy,
        ));

        tracing::info!(
            versioning_policy = engine_config.versioning_policy.as_str(),
            max_line_items = ?engine_config.max_line_items,
            "AppState初始化完成"
        );

        Ok(Self {
            db_path,
            estimate_api,
            config_manager,
            engine_config,
            catalog_repo,
            geo_pricing_repo,
        })
    }

    /// 创建价目表 / 区域定价导入器
    pub fn catalog_importer(&self) -> CatalogImporter<'_> {
        CatalogImporter::new(&self.catalog_repo, &self.geo_pricing_repo)
    }
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 ROOF_ESTIMATE_DB_PATH > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("ROOF_ESTIMATE_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./roof_estimate.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("roof-estimate");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("roof_estimate.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_app_state_bootstraps_empty_db() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db").to_string_lossy().to_string();

        let state = AppState::new(db_path.clone()).unwrap();
        assert_eq!(state.db_path, db_path);
        assert_eq!(state.engine_config.max_line_items, Some(500));
        assert!(state.estimate_api.list_versions("nobody").unwrap().is_empty());

        // 再次打开同一个库不报错
        AppState::new(db_path).unwrap();
    }
}
