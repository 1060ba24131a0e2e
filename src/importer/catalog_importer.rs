// ==========================================
// 屋面估价引擎 - 价目表 / 区域定价导入器
// ==========================================
// 流程: 解析 → 逐行映射校验 → 合法行批量 UPSERT (单事务)
// 红线: 行级问题 (主键缺失/数值非法/负数) 记为拒绝行, 不中断导入
// ==========================================

use crate::domain::pricing::{BaseCosts, CatalogEntry, GeographicPricing};
use crate::importer::error::ImportResult;
use crate::importer::file_parser::{CsvParser, RawRow};
use crate::repository::{CatalogRepository, GeoPricingRepository};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const CATALOG_COLUMNS: [&str; 6] = [
    "line_item_type_id",
    "name",
    "unit",
    "base_material_cost",
    "base_labor_cost",
    "base_equipment_cost",
];

pub const GEO_PRICING_COLUMNS: [&str; 5] = [
    "geo_pricing_id",
    "name",
    "material_multiplier",
    "labor_multiplier",
    "equipment_multiplier",
];

// ==========================================
// 导入结果
// ==========================================

/// 拒绝行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRejection {
    pub row: usize,     // 文件行号
    pub reason: String, // 拒绝原因
}

/// 导入汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: String,
    pub total_rows: usize,
    pub imported: usize,
    pub rejected: Vec<RowRejection>,
    pub elapsed_ms: i64,
}

// ==========================================
// CatalogImporter
// ==========================================
pub struct CatalogImporter<'a> {
    catalog_repo: &'a CatalogRepository,
    geo_repo: &'a GeoPricingRepository,
    parser: CsvParser,
}

impl<'a> CatalogImporter<'a> {
    pub fn new(catalog_repo: &'a CatalogRepository, geo_repo: &'a GeoPricingRepository) -> Self {
        Self {
            catalog_repo,
            geo_repo,
            parser: CsvParser,
        }
    }

    /// 导入价目表 CSV
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn import_catalog(&self, path: &Path) -> ImportResult<ImportSummary> {
        let rows = self
            .parser
            .parse_file(path, &["line_item_type_id", "name"])?;
        self.import_catalog_rows(rows)
    }

    /// 导入区域定价 CSV
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn import_geo_pricing(&self, path: &Path) -> ImportResult<ImportSummary> {
        let rows = self.parser.parse_file(path, &["geo_pricing_id", "name"])?;
        self.import_geo_rows(rows)
    }

    pub fn import_catalog_rows(&self, rows: Vec<RawRow>) -> ImportResult<ImportSummary> {
        let start = Instant::now();
        let total_rows = rows.len();
        let (entries, rejected) = map_rows(rows, map_catalog_row, |e: &CatalogEntry| {
            e.line_item_type_id.clone()
        });

        let imported = self.catalog_repo.upsert_batch(&entries)?;
        Ok(finish("价目表", start, total_rows, imported, rejected))
    }

    pub fn import_geo_rows(&self, rows: Vec<RawRow>) -> ImportResult<ImportSummary> {
        let start = Instant::now();
        let total_rows = rows.len();
        let (pricings, rejected) = map_rows(rows, map_geo_row, |p: &GeographicPricing| {
            p.geo_pricing_id.clone()
        });

        let imported = self.geo_repo.upsert_batch(&pricings)?;
        Ok(finish("区域定价", start, total_rows, imported, rejected))
    }
}

/// 逐行映射; 文件内重复主键以后出现者为准
fn map_rows<T>(
    rows: Vec<RawRow>,
    map: fn(&RawRow) -> Result<T, String>,
    key: fn(&T) -> String,
) -> (Vec<T>, Vec<RowRejection>) {
    let mut accepted: Vec<T> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut rejected = Vec::new();

    for raw in &rows {
        match map(raw) {
            Ok(value) => {
                let k = key(&value);
                match index.get(&k) {
                    Some(&pos) => {
                        warn!(row = raw.row, key = %k, "文件内主键重复, 以后出现的行为准");
                        accepted[pos] = value;
                    }
                    None => {
                        index.insert(k, accepted.len());
                        accepted.push(value);
                    }
                }
            }
            Err(reason) => {
                warn!(row = raw.row, reason = %reason, "导入行被拒绝");
                rejected.push(RowRejection {
                    row: raw.row,
                    reason,
                });
            }
        }
    }
    (accepted, rejected)
}

fn finish(
    kind: &str,
    start: Instant,
    total_rows: usize,
    imported: usize,
    rejected: Vec<RowRejection>,
) -> ImportSummary {
    let summary = ImportSummary {
        batch_id: Uuid::new_v4().to_string(),
        total_rows,
        imported,
        rejected,
        elapsed_ms: start.elapsed().as_millis() as i64,
    };
    info!(
        kind,
        batch_id = %summary.batch_id,
        total_rows,
        imported,
        rejected = summary.rejected.len(),
        elapsed_ms = summary.elapsed_ms,
        "导入完成"
    );
    summary
}

// ==========================================
// 行映射
// ==========================================

fn map_catalog_row(raw: &RawRow) -> Result<CatalogEntry, String> {
    let id = raw
        .get("line_item_type_id")
        .ok_or_else(|| "主键缺失: line_item_type_id 为空".to_string())?;
    let name = raw.get("name").unwrap_or(id);

    Ok(CatalogEntry {
        line_item_type_id: id.to_string(),
        name: name.to_string(),
        unit: raw.get("unit").map(str::to_string),
        base_costs: BaseCosts {
            base_material_cost: parse_amount(raw, "base_material_cost")?.unwrap_or(0.0),
            base_labor_cost: parse_amount(raw, "base_labor_cost")?.unwrap_or(0.0),
            base_equipment_cost: parse_amount(raw, "base_equipment_cost")?.unwrap_or(0.0),
        },
    })
}

fn map_geo_row(raw: &RawRow) -> Result<GeographicPricing, String> {
    let id = raw
        .get("geo_pricing_id")
        .ok_or_else(|| "主键缺失: geo_pricing_id 为空".to_string())?;
    let name = raw.get("name").unwrap_or(id);

    Ok(GeographicPricing {
        geo_pricing_id: id.to_string(),
        name: name.to_string(),
        // 空白系数按 1.0 处理 (存 NULL)
        material_multiplier: parse_amount(raw, "material_multiplier")?,
        labor_multiplier: parse_amount(raw, "labor_multiplier")?,
        equipment_multiplier: parse_amount(raw, "equipment_multiplier")?,
    })
}

/// 解析非负有限数; 空白返回 None
fn parse_amount(raw: &RawRow, column: &str) -> Result<Option<f64>, String> {
    let Some(text) = raw.get(column) else {
        return Ok(None);
    };
    let value: f64 = text
        .parse()
        .map_err(|_| format!("{} 不是数值: {}", column, text))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{} 必须为非负有限数: {}", column, text));
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn repos() -> (CatalogRepository, GeoPricingRepository) {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        (
            CatalogRepository::new(conn.clone()),
            GeoPricingRepository::new(conn),
        )
    }

    #[test]
    fn test_catalog_rows_with_rejections() {
        let (catalog, geo) = repos();
        let importer = CatalogImporter::new(&catalog, &geo);
        let csv = "line_item_type_id,name,unit,base_material_cost,base_labor_cost,base_equipment_cost\n\
                   SHINGLE,Architectural shingle,SQ,95.5,60,5\n\
                   ,No id,EA,1,1,1\n\
                   DRIP,Drip edge,LF,abc,1,0\n\
                   VENT,Ridge vent,LF,-2,1,0\n\
                   FELT,Synthetic felt,SQ,18,,\n";
        let rows = CsvParser
            .parse_reader(csv.as_bytes(), &CATALOG_COLUMNS)
            .unwrap();

        let summary = importer.import_catalog_rows(rows).unwrap();
        assert_eq!(summary.total_rows, 5);
        assert_eq!(summary.imported, 2);
        let rejected_rows: Vec<usize> = summary.rejected.iter().map(|r| r.row).collect();
        assert_eq!(rejected_rows, vec![3, 4, 5]);

        let felt = catalog.find_by_id("FELT").unwrap().unwrap();
        assert_eq!(felt.base_costs.base_material_cost, 18.0);
        assert_eq!(felt.base_costs.base_labor_cost, 0.0);
    }

    #[test]
    fn test_geo_blank_multiplier_is_null() {
        let (catalog, geo) = repos();
        let importer = CatalogImporter::new(&catalog, &geo);
        let csv = "geo_pricing_id,name,material_multiplier,labor_multiplier,equipment_multiplier\n\
                   CO-DEN,Denver,1.2,,0.9\n";
        let rows = CsvParser
            .parse_reader(csv.as_bytes(), &GEO_PRICING_COLUMNS)
            .unwrap();

        let summary = importer.import_geo_rows(rows).unwrap();
        assert_eq!(summary.imported, 1);
        let stored = geo.find_by_id("CO-DEN").unwrap().unwrap();
        assert_eq!(stored.labor_multiplier, None);
        assert_eq!(stored.multipliers().labor, 1.0);
    }

    #[test]
    fn test_duplicate_key_last_wins() {
        let (catalog, geo) = repos();
        let importer = CatalogImporter::new(&catalog, &geo);
        let csv = "line_item_type_id,name\nA,First\nA,Second\n";
        let rows = CsvParser.parse_reader(csv.as_bytes(), &[]).unwrap();

        let summary = importer.import_catalog_rows(rows).unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(catalog.find_by_id("A").unwrap().unwrap().name, "Second");
    }
}
