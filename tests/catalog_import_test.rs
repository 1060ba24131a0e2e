// ==========================================
// 价目表 / 区域定价导入集成测试
// ==========================================
// 覆盖: CSV 文件导入 → 拒绝行 → 导入数据驱动重算
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

use roof_estimate::api::LineItemInput;
use roof_estimate::app::AppState;
use roof_estimate::config::config_keys;
use roof_estimate::importer::ImportError;
use roof_estimate::VersioningPolicy;
use std::path::{Path, PathBuf};
use test_helpers::*;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn test_import_fixtures_and_recalculate() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let state = AppState::new(db_path).unwrap();
    let importer = state.catalog_importer();

    let catalog = importer.import_catalog(&fixture("catalog.csv")).unwrap();
    assert_eq!(catalog.imported, 3);
    let rejected: Vec<usize> = catalog.rejected.iter().map(|r| r.row).collect();
    assert_eq!(rejected, vec![4, 5]);
    assert!(!catalog.batch_id.is_empty());

    let geo = importer.import_geo_pricing(&fixture("geo_pricing.csv")).unwrap();
    assert_eq!(geo.imported, 1);
    assert_eq!(geo.rejected.len(), 1);
    assert_eq!(geo.rejected[0].row, 3);

    assert!(state.catalog_repo.find_by_id("VENT").unwrap().is_none());
    let denver = state.geo_pricing_repo.find_by_id("CO-DEN").unwrap().unwrap();
    assert_eq!(denver.labor_multiplier, None);

    // 导入数据驱动重算
    let api = &state.estimate_api;
    let mut request = create_request("lead-1");
    request.geo_pricing_id = Some("CO-DEN".to_string());
    request.overhead_pct = 0.0;
    request.profit_pct = 0.0;
    request.tax_pct = 0.0;
    let estimate = api.create_estimate(request).unwrap();

    api.add_line_item(&estimate.estimate_id, formula_item("SHINGLE", "SQ"))
        .unwrap();
    let dumpster = LineItemInput {
        line_item_type_id: "DUMPSTER".to_string(),
        quantity: 1.0,
        quantity_override: true,
        sort_order: 1,
        ..LineItemInput::default()
    };
    api.add_line_item(&estimate.estimate_id, dumpster).unwrap();

    let outcome = api.recalculate_estimate(&estimate.estimate_id).unwrap();
    assert!(outcome.diagnostics.is_empty());
    assert_money(outcome.totals.total_material, 3000.0);
    assert_money(outcome.totals.total_labor, 1000.0);
    assert_money(outcome.totals.total_equipment, 350.0);
    assert_money(outcome.totals.price_likely, 4350.0);
}

#[test]
fn test_reimport_overwrites_prices() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let state = AppState::new(db_path).unwrap();
    let importer = state.catalog_importer();

    importer.import_catalog(&fixture("catalog.csv")).unwrap();
    let update = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    std::fs::write(
        update.path(),
        "line_item_type_id,name,unit,base_material_cost,base_labor_cost,base_equipment_cost\n\
         SHINGLE,Premium shingle,SQ,120,55,0\n",
    )
    .unwrap();
    let summary = importer.import_catalog(update.path()).unwrap();
    assert_eq!(summary.imported, 1);

    let shingle = state.catalog_repo.find_by_id("SHINGLE").unwrap().unwrap();
    assert_eq!(shingle.name, "Premium shingle");
    assert_eq!(shingle.base_costs.base_material_cost, 120.0);
    // 未出现在新文件中的条目保留
    assert!(state.catalog_repo.find_by_id("DRIP").unwrap().is_some());
}

#[test]
fn test_file_level_errors() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let state = AppState::new(db_path).unwrap();
    let importer = state.catalog_importer();

    assert!(matches!(
        importer.import_catalog(Path::new("/nonexistent/catalog.csv")),
        Err(ImportError::FileNotFound(_))
    ));

    let xlsx = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
    assert!(matches!(
        importer.import_catalog(xlsx.path()),
        Err(ImportError::UnsupportedFormat(_))
    ));

    let no_id = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    std::fs::write(no_id.path(), "name,unit\nShingle,SQ\n").unwrap();
    assert!(matches!(
        importer.import_catalog(no_id.path()),
        Err(ImportError::MissingColumn(_))
    ));
}

#[test]
fn test_deployment_config_drives_versioning() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    {
        let state = AppState::new(db_path.clone()).unwrap();
        assert_eq!(state.engine_config.versioning_policy, VersioningPolicy::Additive);
        state
            .config_manager
            .set_config_value(config_keys::VERSIONING_POLICY, "SUPERSEDE_ON_CREATE")
            .unwrap();
    }

    let state = AppState::new(db_path).unwrap();
    assert_eq!(
        state.engine_config.versioning_policy,
        VersioningPolicy::SupersedeOnCreate
    );
    state.estimate_api.create_estimate(create_request("house-1")).unwrap();
    state.estimate_api.create_estimate(create_request("house-1")).unwrap();
    let versions = state.estimate_api.list_versions("house-1").unwrap();
    assert!(versions[0].is_superseded);
}
