// ==========================================
// 药品登记数据同步系统 - 审计记录
// ==========================================
// 职责: 属性变更日志 + 临时缺失区间
// 红线: 仅用于历史/审计视图，当前状态查询不得关联这些表
// ==========================================

use crate::domain::types::EntityType;
use crate::domain::versioned::AttributeChange;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// AttributeChangeLogEntry - 属性变更日志
// ==========================================
// 对齐: attribute_change_log 表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChangeLogEntry {
    pub entity_type: EntityType,
    pub record_id: i64,
    pub attribute: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub observed_as_of: NaiveDate,
}

impl AttributeChangeLogEntry {
    pub fn from_change(
        entity_type: EntityType,
        record_id: i64,
        change: AttributeChange,
        observed_as_of: NaiveDate,
    ) -> Self {
        Self {
            entity_type,
            record_id,
            attribute: change.attribute,
            old_value: change.old_value,
            new_value: change.new_value,
            observed_as_of,
        }
    }
}

// ==========================================
// TemporaryAbsenceRecord - 临时缺失区间
// ==========================================
// 每段连续缺失恰好一条，在记录重新出现时闭合
// 对齐: temporary_absence 表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryAbsenceRecord {
    pub entity_type: EntityType,
    pub record_id: i64,
    pub missing_from: NaiveDate,
    pub missing_to: NaiveDate,
}
