// ==========================================
// 药品登记数据同步系统 - 行映射器接口
// ==========================================
// 职责: 解析后的 CSV 行 → 领域记录 或 分类失败
// 红线: 映射器是纯函数，只允许读取注入的参考键集合
// ==========================================

use crate::domain::versioned::BusinessKey;
use crate::importer::column_resolver::ColumnSpec;
use crate::importer::csv_row::{CsvRow, FieldFailure, FieldResult, RowMappingResult};
use std::collections::HashSet;
use std::sync::Arc;

/// 只读参考键集合（来自参考数据缓存）
pub type ReferenceKeys = Arc<HashSet<BusinessKey>>;

// ==========================================
// RowMapper Trait
// ==========================================
// 用途: CSV 导入引擎按行调用
// 实现者: registry_mappers 中各参考表映射器, DispensingMapper
pub trait RowMapper<T>: Send + Sync {
    /// 该数据集可接受的列声明
    fn column_specs(&self) -> Vec<ColumnSpec>;

    /// 字段级映射（任一字段失败即整行失败）
    fn map_row(&self, row: &CsvRow<'_>) -> FieldResult<T>;

    /// 行级映射（附带原始行）
    fn map(&self, row: &CsvRow<'_>) -> RowMappingResult<T> {
        RowMappingResult::from_field_result(self.map_row(row), row.raw_line())
    }
}

/// 校验外键是否已同步（未注入参考集合时不校验）
pub fn check_reference(
    keys: Option<&ReferenceKeys>,
    field_id: &str,
    key: &BusinessKey,
) -> FieldResult<()> {
    match keys {
        Some(keys) if !keys.contains(key) => {
            Err(FieldFailure::unknown_reference(field_id, &key.to_db_string()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_reference() {
        let keys: ReferenceKeys = Arc::new([BusinessKey::single("TBL")].into_iter().collect());

        assert!(check_reference(Some(&keys), "form", &BusinessKey::single("TBL")).is_ok());
        assert!(check_reference(None, "form", &BusinessKey::single("XXX")).is_ok());

        let failure = check_reference(Some(&keys), "form", &BusinessKey::single("XXX")).unwrap_err();
        assert_eq!(failure.reason, crate::domain::types::FailureReason::UnknownReference);
        assert_eq!(failure.column.as_deref(), Some("form"));
    }
}
