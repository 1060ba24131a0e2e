// ==========================================
// 屋面估价引擎 - CSV 文件解析
// ==========================================
// 输出: (文件行号, 表头 → 值) 列表; 值已去除首尾空白
// 说明: 完全空白的行跳过
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// 原始行 (行号从 1 开始, 表头为第 1 行)
#[derive(Debug, Clone)]
pub struct RawRow {
    pub row: usize,
    pub fields: HashMap<String, String>,
}

impl RawRow {
    /// 取字段值; 空串视为缺失
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

// ==========================================
// CsvParser
// ==========================================
pub struct CsvParser;

impl CsvParser {
    /// 解析 CSV 文件
    pub fn parse_file(&self, path: &Path, required: &[&str]) -> ImportResult<Vec<RawRow>> {
        // 检查文件存在
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        // 检查扩展名
        if let Some(ext) = path.extension() {
            if !ext.eq_ignore_ascii_case("csv") {
                return Err(ImportError::UnsupportedFormat(
                    ext.to_string_lossy().to_string(),
                ));
            }
        }

        let file = File::open(path)?;
        self.parse_reader(file, required)
    }

    /// 从任意 Reader 解析 (测试/内存数据)
    pub fn parse_reader<R: Read>(&self, source: R, required: &[&str]) -> ImportResult<Vec<RawRow>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .trim(csv::Trim::All)
            .from_reader(source);

        // 读取表头
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
            .collect();

        for column in required {
            if !headers.iter().any(|h| h == column) {
                return Err(ImportError::MissingColumn(column.to_string()));
            }
        }

        let mut rows = Vec::new();
        for (row_idx, result) in reader.records().enumerate() {
            let record = result?;
            let mut fields = HashMap::new();

            for (col_idx, value) in record.iter().enumerate() {
                if let Some(header) = headers.get(col_idx) {
                    fields.insert(header.clone(), value.trim().to_string());
                }
            }

            // 跳过完全空白的行
            if fields.values().all(|v| v.is_empty()) {
                continue;
            }

            let row = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(row_idx + 2);
            rows.push(RawRow { row, fields });
        }

        Ok(rows)
    }
}
