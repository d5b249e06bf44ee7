// ==========================================
// 药品登记数据同步系统 - 实体同步器
// ==========================================
// 职责: 上期存储状态 + 本期快照 → 新增 / 更新 / 重新出现 / 软删除 + 审计
// 红线: 一次 (表, 周期) 的差异整体提交；提交成功后才失效参考缓存
// 红线: 同一快照、同一 valid_from 重复执行不产生任何写入
// ==========================================

use crate::domain::audit::{AttributeChangeLogEntry, TemporaryAbsenceRecord};
use crate::domain::change_set::{ChangeSet, SyncReport};
use crate::domain::versioned::{BusinessKey, VersionedEntity};
use crate::engine::error::{SyncError, SyncResult};
use crate::engine::reference_cache::ReferenceDataCache;
use crate::repository::VersionedRepository;
use chrono::{Days, NaiveDate};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ==========================================
// EntitySynchronizer - 通用对账器
// ==========================================
/// 对任意 `VersionedEntity` 表执行快照对账
///
/// # 职责
/// - `plan`: 纯计算，不接触存储
/// - `synchronize`: 读取上期状态 → plan → save_all → 失效缓存
#[derive(Clone, Default)]
pub struct EntitySynchronizer {
    cache: Option<Arc<ReferenceDataCache>>,
}

impl EntitySynchronizer {
    pub fn new() -> Self {
        Self { cache: None }
    }

    /// 提交成功后自动失效该表的参考缓存
    pub fn with_cache(cache: Arc<ReferenceDataCache>) -> Self {
        Self { cache: Some(cache) }
    }

    /// 计算变更集
    ///
    /// # 参数
    /// - previous: 该表当前全部存储记录（含已软删除）
    /// - incoming: 本期快照成功映射的记录
    /// - valid_from: 本期有效起始日
    ///
    /// # 规则
    /// 1. 业务键不存在 → 新增
    /// 2. 存在且已软删除 → 重新出现（闭合缺失区间 + 属性变更日志）
    /// 3. 存在且属性不同 → 更新（逐属性变更日志）
    /// 4. 存在且属性相同 → 不写入
    /// 5. 上期存在、本期缺失且尚未软删除 → 软删除
    ///
    /// 同一快照内重复的业务键只取首次出现
    pub fn plan<T: VersionedEntity>(
        previous: Vec<T>,
        incoming: Vec<T>,
        valid_from: NaiveDate,
    ) -> SyncResult<ChangeSet<T>> {
        let mut change_set = ChangeSet::new(valid_from);

        let mut index: HashMap<BusinessKey, usize> = HashMap::with_capacity(previous.len());
        for (pos, record) in previous.iter().enumerate() {
            index.entry(record.business_key()).or_insert(pos);
        }

        let mut seen: HashSet<BusinessKey> = HashSet::with_capacity(incoming.len());

        for record in incoming {
            let key = record.business_key();
            if !seen.insert(key.clone()) {
                warn!(
                    entity_type = %T::ENTITY_TYPE,
                    business_key = %key,
                    "快照内业务键重复，保留首次出现"
                );
                change_set.duplicate_keys.push(key);
                continue;
            }

            let Some(&pos) = index.get(&key) else {
                let mut inserted = record;
                let identity = inserted.identity_mut();
                identity.id = None;
                identity.first_seen = Some(valid_from);
                identity.valid_from = Some(valid_from);
                identity.missing_since = None;
                change_set.inserts.push(inserted);
                continue;
            };

            let stored = &previous[pos];
            let record_id = stored_id(stored, &key)?;
            let changes = stored.diff_business_attributes(&record);

            if let Some(missing_from) = stored.identity().missing_since {
                change_set.absences.push(TemporaryAbsenceRecord {
                    entity_type: T::ENTITY_TYPE,
                    record_id,
                    missing_from,
                    missing_to: absence_end(missing_from, valid_from, &key),
                });
            } else if changes.is_empty() {
                change_set.unchanged += 1;
                continue;
            }

            change_set.change_log.extend(changes.into_iter().map(|change| {
                AttributeChangeLogEntry::from_change(T::ENTITY_TYPE, record_id, change, valid_from)
            }));

            let mut merged = record.with_identity_from(stored);
            let identity = merged.identity_mut();
            identity.valid_from = Some(valid_from);
            identity.missing_since = None;

            if stored.is_missing() {
                change_set.reactivations.push(merged);
            } else {
                change_set.updates.push(merged);
            }
        }

        for stored in &previous {
            if stored.is_missing() {
                continue;
            }
            let key = stored.business_key();
            if seen.contains(&key) {
                continue;
            }
            stored_id(stored, &key)?;
            change_set.newly_missing.push(stored.mark_missing(valid_from));
        }

        debug!(
            entity_type = %T::ENTITY_TYPE,
            %valid_from,
            inserts = change_set.inserts.len(),
            updates = change_set.updates.len(),
            reactivations = change_set.reactivations.len(),
            newly_missing = change_set.newly_missing.len(),
            unchanged = change_set.unchanged,
            "变更集计算完成"
        );

        Ok(change_set)
    }

    /// 对账并原子提交
    ///
    /// # 返回
    /// - Ok(SyncReport): 本次同步统计（空变更集不调用 save_all）
    /// - Err: 读取、计算或写入失败，存储保持不变
    pub fn synchronize<T, R>(
        &self,
        repo: &R,
        incoming: Vec<T>,
        valid_from: NaiveDate,
    ) -> SyncResult<SyncReport>
    where
        T: VersionedEntity,
        R: VersionedRepository<T> + ?Sized,
    {
        let previous = repo.find_all()?;
        let change_set = Self::plan(previous, incoming, valid_from)?;
        let report = change_set.report();

        if change_set.is_empty() {
            info!(
                entity_type = %T::ENTITY_TYPE,
                %valid_from,
                unchanged = report.unchanged,
                "快照与存储一致，无需写入"
            );
            return Ok(report);
        }

        let written = repo.save_all(&change_set)?;

        if let Some(cache) = &self.cache {
            cache.invalidate(T::ENTITY_TYPE)?;
        }

        info!(
            entity_type = %T::ENTITY_TYPE,
            %valid_from,
            written,
            inserted = report.inserted,
            updated = report.updated,
            reactivated = report.reactivated,
            newly_missing = report.newly_missing,
            unchanged = report.unchanged,
            duplicate_keys = report.duplicate_keys,
            "同步提交完成"
        );
        Ok(report)
    }
}

fn stored_id<T: VersionedEntity>(stored: &T, key: &BusinessKey) -> SyncResult<i64> {
    stored.identity().id.ok_or_else(|| SyncError::MissingRecordId {
        entity_type: T::ENTITY_TYPE,
        business_key: key.to_string(),
    })
}

/// 缺失区间终点 = valid_from 前一天，不早于起点
fn absence_end(missing_from: NaiveDate, valid_from: NaiveDate, key: &BusinessKey) -> NaiveDate {
    let day_before = valid_from
        .checked_sub_days(Days::new(1))
        .unwrap_or(valid_from);
    if day_before < missing_from {
        warn!(
            business_key = %key,
            %missing_from,
            %valid_from,
            "重新出现日期不晚于缺失起点，缺失区间按单日记录"
        );
        return missing_from;
    }
    day_before
}
