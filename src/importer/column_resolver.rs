// ==========================================
// 药品登记数据同步系统 - 列别名解析器
// ==========================================
// 职责: 按字段别名列表匹配表头，确定每个逻辑字段的列位置
// 红线: 与列顺序无关；必需列缺失 → 整个文件失败
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use std::collections::HashMap;

// ==========================================
// ColumnSpec - 逻辑列声明
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub field_id: String,
    pub aliases: Vec<String>,
    pub required: bool,
}

impl ColumnSpec {
    pub fn required(field_id: &str, aliases: &[&str]) -> Self {
        Self::new(field_id, aliases, true)
    }

    pub fn optional(field_id: &str, aliases: &[&str]) -> Self {
        Self::new(field_id, aliases, false)
    }

    fn new(field_id: &str, aliases: &[&str], required: bool) -> Self {
        Self {
            field_id: field_id.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            required,
        }
    }
}

// ==========================================
// ResolvedColumns - 解析结果
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ResolvedColumns {
    positions: HashMap<String, usize>,
    absent: Vec<String>,
}

impl ResolvedColumns {
    /// 字段所在列下标（缺席的非必需列返回 None）
    pub fn position(&self, field_id: &str) -> Option<usize> {
        self.positions.get(field_id).copied()
    }

    /// 未匹配到的非必需字段
    pub fn absent_fields(&self) -> &[String] {
        &self.absent
    }
}

/// 规范化表头单元格（去空白、去引号残留、小写）
fn normalize_header(cell: &str) -> String {
    cell.trim()
        .trim_start_matches('\u{feff}')
        .trim_matches('"')
        .trim()
        .to_lowercase()
}

/// 解析表头
///
/// # 参数
/// - header: 表头行（原始顺序）
/// - specs: 字段声明
///
/// # 返回
/// - Ok(ResolvedColumns): 每个字段的列位置
/// - Err(MissingRequiredColumn): 必需字段的所有别名都未命中
pub fn resolve_columns(header: &[String], specs: &[ColumnSpec]) -> ImportResult<ResolvedColumns> {
    let normalized: Vec<String> = header.iter().map(|h| normalize_header(h)).collect();
    let mut resolved = ResolvedColumns::default();

    for spec in specs {
        // 按别名声明顺序尝试，第一个命中的别名决定列位置
        let position = spec.aliases.iter().find_map(|alias| {
            let wanted = normalize_header(alias);
            normalized.iter().position(|cell| *cell == wanted)
        });

        match position {
            Some(idx) => {
                resolved.positions.insert(spec.field_id.clone(), idx);
            }
            None if spec.required => {
                return Err(ImportError::MissingRequiredColumn {
                    field: spec.field_id.clone(),
                    aliases: spec.aliases.clone(),
                });
            }
            None => {
                tracing::debug!(field = %spec.field_id, "可选列未出现在表头中");
                resolved.absent.push(spec.field_id.clone());
            }
        }
    }

    Ok(resolved)
}
