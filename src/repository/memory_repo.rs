// ==========================================
// 药品登记数据同步系统 - 内存版本化仓储
// ==========================================
// 职责: 与 SQLite 仓储同一契约的内存实现（测试替身 / 试运行）
// 说明: 支持一次性故障注入，用于验证整批原子性
// ==========================================

use crate::domain::audit::{AttributeChangeLogEntry, TemporaryAbsenceRecord};
use crate::domain::change_set::ChangeSet;
use crate::domain::versioned::VersionedEntity;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::unit_scope::Checkpoint;
use crate::repository::versioned_repo::VersionedRepository;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct MemoryState<T> {
    records: Vec<T>,
    change_log: Vec<AttributeChangeLogEntry>,
    absences: Vec<TemporaryAbsenceRecord>,
    next_id: i64,
}

#[derive(Debug)]
struct Inner<T> {
    state: MemoryState<T>,
    checkpoint: Option<MemoryState<T>>, // 单元作用域开始时的状态
    fail_next_save: bool,
    save_count: usize,
}

// ==========================================
// InMemoryRepository<T>
// ==========================================
#[derive(Debug)]
pub struct InMemoryRepository<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: VersionedEntity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: VersionedEntity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: MemoryState {
                    records: Vec::new(),
                    change_log: Vec::new(),
                    absences: Vec::new(),
                    next_id: 1,
                },
                checkpoint: None,
                fail_next_save: false,
                save_count: 0,
            }),
        }
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, Inner<T>>> {
        self.inner
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 下一次 save_all 在写入过程中失败（状态保持不变）
    pub fn fail_next_save(&self) -> RepositoryResult<()> {
        self.lock()?.fail_next_save = true;
        Ok(())
    }

    /// 成功提交的 save_all 次数
    pub fn save_count(&self) -> RepositoryResult<usize> {
        Ok(self.lock()?.save_count)
    }

    /// 全部审计日志（测试断言用）
    pub fn all_change_log(&self) -> RepositoryResult<Vec<AttributeChangeLogEntry>> {
        Ok(self.lock()?.state.change_log.clone())
    }

    pub fn all_absences(&self) -> RepositoryResult<Vec<TemporaryAbsenceRecord>> {
        Ok(self.lock()?.state.absences.clone())
    }
}

impl<T: VersionedEntity> MemoryState<T> {
    fn position_of(&self, id: i64) -> RepositoryResult<usize> {
        self.records
            .iter()
            .position(|r| r.identity().id == Some(id))
            .ok_or_else(|| RepositoryError::NotFound {
                entity: T::ENTITY_TYPE.to_string(),
                id: id.to_string(),
            })
    }

    fn apply(&mut self, change_set: &ChangeSet<T>) -> RepositoryResult<usize> {
        let mut keys: HashSet<_> = self.records.iter().map(|r| r.business_key()).collect();
        let mut count = 0;

        for record in &change_set.inserts {
            let key = record.business_key();
            if !keys.insert(key.clone()) {
                return Err(RepositoryError::UniqueConstraintViolation(format!(
                    "{} business_key={}",
                    T::ENTITY_TYPE,
                    key
                )));
            }
            let mut stored = record.clone();
            let identity = stored.identity_mut();
            identity.id = Some(self.next_id);
            identity.first_seen = Some(change_set.valid_from);
            identity.valid_from = Some(change_set.valid_from);
            identity.missing_since = None;
            self.next_id += 1;
            self.records.push(stored);
            count += 1;
        }

        for record in change_set.updates.iter().chain(&change_set.reactivations) {
            let id = required_id(record)?;
            let pos = self.position_of(id)?;
            let mut stored = record.clone();
            let identity = stored.identity_mut();
            identity.first_seen = self.records[pos].identity().first_seen;
            identity.valid_from = Some(change_set.valid_from);
            identity.missing_since = None;
            self.records[pos] = stored;
            count += 1;
        }

        for record in &change_set.newly_missing {
            let id = required_id(record)?;
            let pos = self.position_of(id)?;
            let missing_since = record.identity().missing_since.ok_or_else(|| {
                RepositoryError::FieldValueError {
                    field: "missing_since".to_string(),
                    message: format!("软删除记录 id={} 未设置 missing_since", id),
                }
            })?;
            self.records[pos].identity_mut().missing_since = Some(missing_since);
            count += 1;
        }

        self.change_log.extend(change_set.change_log.iter().cloned());
        self.absences.extend(change_set.absences.iter().cloned());
        Ok(count)
    }
}

fn required_id<T: VersionedEntity>(record: &T) -> RepositoryResult<i64> {
    record.identity().id.ok_or_else(|| RepositoryError::FieldValueError {
        field: "id".to_string(),
        message: format!("{} 记录缺少存储 id: {}", T::ENTITY_TYPE, record.business_key()),
    })
}

impl<T: VersionedEntity> VersionedRepository<T> for InMemoryRepository<T> {
    fn find_all(&self) -> RepositoryResult<Vec<T>> {
        Ok(self.lock()?.state.records.clone())
    }

    fn save_all(&self, change_set: &ChangeSet<T>) -> RepositoryResult<usize> {
        let mut inner = self.lock()?;

        // 在副本上应用，成功后整体替换
        let mut staged = inner.state.clone();
        let count = staged.apply(change_set)?;

        if inner.fail_next_save {
            inner.fail_next_save = false;
            return Err(RepositoryError::DatabaseTransactionError(
                "注入的存储故障".to_string(),
            ));
        }

        inner.state = staged;
        inner.save_count += 1;
        Ok(count)
    }

    fn change_log_for(&self, record_id: i64) -> RepositoryResult<Vec<AttributeChangeLogEntry>> {
        Ok(self
            .lock()?
            .state
            .change_log
            .iter()
            .filter(|e| e.record_id == record_id)
            .cloned()
            .collect())
    }

    fn absences_for(&self, record_id: i64) -> RepositoryResult<Vec<TemporaryAbsenceRecord>> {
        Ok(self
            .lock()?
            .state
            .absences
            .iter()
            .filter(|a| a.record_id == record_id)
            .cloned()
            .collect())
    }
}

impl<T: VersionedEntity> Checkpoint for InMemoryRepository<T> {
    fn checkpoint(&self) -> RepositoryResult<()> {
        let mut inner = self.lock()?;
        inner.checkpoint = Some(inner.state.clone());
        Ok(())
    }

    fn release_checkpoint(&self) -> RepositoryResult<()> {
        self.lock()?.checkpoint = None;
        Ok(())
    }

    fn restore_checkpoint(&self) -> RepositoryResult<()> {
        let mut inner = self.lock()?;
        if let Some(state) = inner.checkpoint.take() {
            inner.state = state;
        }
        Ok(())
    }
}
