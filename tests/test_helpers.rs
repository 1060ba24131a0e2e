// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库初始化、API 组装、测试数据构造
// ==========================================
#![allow(dead_code)]

use roof_estimate::api::{CreateEstimateRequest, EstimateApi, LineItemInput};
use roof_estimate::db::{init_schema, open_sqlite_connection};
use roof_estimate::domain::{BaseCosts, CatalogEntry, GeographicPricing, RoofVariables};
use roof_estimate::engine::{RecalcConfig, RecalcEngine};
use roof_estimate::repository::{
    CatalogRepository, EstimateRepository, GeoPricingRepository, LineItemRepository,
};
use roof_estimate::VersioningPolicy;
use rusqlite::Connection;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是 UTF-8")?
        .to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 测试环境: 共享连接 + 全部仓储 + EstimateApi
pub struct TestEnv {
    pub temp_file: NamedTempFile,
    pub db_path: String,
    pub conn: Arc<Mutex<Connection>>,
    pub estimate_repo: Arc<EstimateRepository>,
    pub line_item_repo: Arc<LineItemRepository>,
    pub catalog_repo: Arc<CatalogRepository>,
    pub geo_repo: Arc<GeoPricingRepository>,
    pub api: Arc<EstimateApi>,
}

pub fn setup_env(policy: VersioningPolicy) -> TestEnv {
    roof_estimate::logging::init_test();
    let (temp_file, db_path) = create_test_db().unwrap();
    let conn = Arc::new(Mutex::new(open_sqlite_connection(&db_path).unwrap()));

    let estimate_repo = Arc::new(EstimateRepository::new(conn.clone()));
    let line_item_repo = Arc::new(LineItemRepository::new(conn.clone()));
    let catalog_repo = Arc::new(CatalogRepository::new(conn.clone()));
    let geo_repo = Arc::new(GeoPricingRepository::new(conn.clone()));

    let api = Arc::new(EstimateApi::new(
        estimate_repo.clone(),
        line_item_repo.clone(),
        catalog_repo.clone(),
        geo_repo.clone(),
        Arc::new(RecalcEngine::new(RecalcConfig::default())),
        policy,
    ));

    TestEnv {
        temp_file,
        db_path,
        conn,
        estimate_repo,
        line_item_repo,
        catalog_repo,
        geo_repo,
        api,
    }
}

/// 标准价目表: SHINGLE 100/50/0, DRIP 2/1/0
pub fn seed_catalog(repo: &CatalogRepository) {
    repo.upsert_batch(&[
        catalog_entry("SHINGLE", "Architectural shingle", 100.0, 50.0, 0.0),
        catalog_entry("DRIP", "Drip edge", 2.0, 1.0, 0.0),
    ])
    .unwrap();
}

pub fn catalog_entry(id: &str, name: &str, material: f64, labor: f64, equipment: f64) -> CatalogEntry {
    CatalogEntry {
        line_item_type_id: id.to_string(),
        name: name.to_string(),
        unit: None,
        base_costs: BaseCosts {
            base_material_cost: material,
            base_labor_cost: labor,
            base_equipment_cost: equipment,
        },
    }
}

/// Denver: 材料 ×1.5, 人工缺省 (按 1.0)
pub fn seed_denver(repo: &GeoPricingRepository) {
    repo.upsert(&GeographicPricing {
        geo_pricing_id: "CO-DEN".to_string(),
        name: "Denver metro".to_string(),
        material_multiplier: Some(1.5),
        labor_multiplier: None,
        equipment_multiplier: Some(1.0),
    })
    .unwrap();
}

/// SQ=20, EAVE=100, RAKE=50
pub fn sample_roof() -> RoofVariables {
    RoofVariables::from_pairs([("SQ", 20.0), ("EAVE", 100.0), ("RAKE", 50.0)]).unwrap()
}

pub fn create_request(subject_id: &str) -> CreateEstimateRequest {
    CreateEstimateRequest {
        subject_id: subject_id.to_string(),
        name: format!("{} 报价", subject_id),
        roof_variables: sample_roof(),
        geo_pricing_id: None,
        overhead_pct: 10.0,
        profit_pct: 20.0,
        tax_pct: 5.0,
    }
}

pub fn formula_item(type_id: &str, formula: &str) -> LineItemInput {
    LineItemInput {
        line_item_type_id: type_id.to_string(),
        quantity_formula: Some(formula.to_string()),
        ..LineItemInput::default()
    }
}

pub fn assert_money(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 0.005,
        "金额不符: actual={}, expected={}",
        actual,
        expected
    );
}
