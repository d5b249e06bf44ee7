// ==========================================
// 药品登记数据同步系统 - 同步变更集
// ==========================================
// 职责: 一次 (实体表, 周期) 同步计算出的完整差异
// 红线: 变更集必须整体落库或整体放弃
// ==========================================

use crate::domain::audit::{AttributeChangeLogEntry, TemporaryAbsenceRecord};
use crate::domain::types::EntityType;
use crate::domain::versioned::{BusinessKey, VersionedEntity};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// ChangeSet - 待提交差异
// ==========================================
#[derive(Debug, Clone)]
pub struct ChangeSet<T: VersionedEntity> {
    pub entity_type: EntityType,
    pub valid_from: NaiveDate,

    // ===== 实体写入 =====
    pub inserts: Vec<T>,        // 新业务键（id 由存储分配）
    pub updates: Vec<T>,        // 属性变化（保留 id / first_seen）
    pub reactivations: Vec<T>,  // 软删除后重新出现
    pub newly_missing: Vec<T>,  // 本期缺失（missing_since = valid_from）

    // ===== 审计写入 =====
    pub change_log: Vec<AttributeChangeLogEntry>,
    pub absences: Vec<TemporaryAbsenceRecord>,

    // ===== 统计 =====
    pub unchanged: usize,
    pub duplicate_keys: Vec<BusinessKey>, // 同一快照内重复出现的业务键（仅保留首次）
}

impl<T: VersionedEntity> ChangeSet<T> {
    pub fn new(valid_from: NaiveDate) -> Self {
        Self {
            entity_type: T::ENTITY_TYPE,
            valid_from,
            inserts: Vec::new(),
            updates: Vec::new(),
            reactivations: Vec::new(),
            newly_missing: Vec::new(),
            change_log: Vec::new(),
            absences: Vec::new(),
            unchanged: 0,
            duplicate_keys: Vec::new(),
        }
    }

    /// 需要写入存储的实体数量
    pub fn mutation_count(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.reactivations.len() + self.newly_missing.len()
    }

    /// 无任何实体或审计写入
    pub fn is_empty(&self) -> bool {
        self.mutation_count() == 0 && self.change_log.is_empty() && self.absences.is_empty()
    }

    pub fn report(&self) -> SyncReport {
        SyncReport {
            entity_type: self.entity_type,
            valid_from: self.valid_from,
            inserted: self.inserts.len(),
            updated: self.updates.len(),
            reactivated: self.reactivations.len(),
            newly_missing: self.newly_missing.len(),
            unchanged: self.unchanged,
            duplicate_keys: self.duplicate_keys.len(),
            attribute_changes: self.change_log.len(),
            absences_closed: self.absences.len(),
        }
    }
}

// ==========================================
// SyncReport - 同步结果汇总
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub entity_type: EntityType,
    pub valid_from: NaiveDate,
    pub inserted: usize,
    pub updated: usize,
    pub reactivated: usize,
    pub newly_missing: usize,
    pub unchanged: usize,
    pub duplicate_keys: usize,
    pub attribute_changes: usize,
    pub absences_closed: usize,
}

impl SyncReport {
    pub fn total_mutations(&self) -> usize {
        self.inserted + self.updated + self.reactivated + self.newly_missing
    }
}
