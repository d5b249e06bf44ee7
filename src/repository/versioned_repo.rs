// ==========================================
// 药品登记数据同步系统 - 版本化仓储接口
// ==========================================
// 职责: 同步器依赖的窄存储端口 (find_all / save_all)
// 红线: save_all 对整个 ChangeSet 原子生效，要么全部落库，要么全部不落库
// ==========================================

use crate::domain::audit::{AttributeChangeLogEntry, TemporaryAbsenceRecord};
use crate::domain::change_set::ChangeSet;
use crate::domain::versioned::VersionedEntity;
use crate::repository::error::RepositoryResult;

// ==========================================
// VersionedRepository Trait
// ==========================================
// 实现者: SqliteVersionedRepository, InMemoryRepository
pub trait VersionedRepository<T: VersionedEntity>: Send + Sync {
    /// 读取该表全部记录（含已软删除）
    fn find_all(&self) -> RepositoryResult<Vec<T>>;

    /// 原子写入一次同步计算出的全部变更
    ///
    /// # 说明
    /// - inserts: 由存储分配 id，first_seen = valid_from
    /// - updates / reactivations / newly_missing 必须携带已有 id
    ///
    /// # 返回
    /// - Ok(usize): 写入的实体行数
    fn save_all(&self, change_set: &ChangeSet<T>) -> RepositoryResult<usize>;

    /// 某记录的属性变更历史（审计视图）
    fn change_log_for(&self, record_id: i64) -> RepositoryResult<Vec<AttributeChangeLogEntry>>;

    /// 某记录的临时缺失区间（审计视图）
    fn absences_for(&self, record_id: i64) -> RepositoryResult<Vec<TemporaryAbsenceRecord>>;
}
