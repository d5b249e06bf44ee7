// ==========================================
// 药品登记数据同步系统 - 参考数据缓存
// ==========================================
// 职责: 已同步参考表的业务键集合，惰性加载，显式失效
// 红线: 失效粒度为整张表；写入成功后失效，单元回滚后全部失效
// 红线: 已软删除的记录不可被引用
// 说明: 由编排器持有，不存在进程级全局缓存
// ==========================================

use crate::domain::types::EntityType;
use crate::domain::versioned::{BusinessKey, VersionedEntity};
use crate::engine::error::{SyncError, SyncResult};
use crate::importer::ReferenceKeys;
use crate::repository::{RepositoryError, RepositoryResult, VersionedRepository};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

type KeyLoader = Box<dyn Fn() -> RepositoryResult<HashSet<BusinessKey>> + Send + Sync>;

struct CacheSlot {
    loader: KeyLoader,
    cached: Mutex<Option<ReferenceKeys>>,
}

impl CacheSlot {
    fn lock(&self) -> SyncResult<MutexGuard<'_, Option<ReferenceKeys>>> {
        self.cached
            .lock()
            .map_err(|e| SyncError::Repository(RepositoryError::LockError(e.to_string())))
    }
}

// ==========================================
// ReferenceDataCache
// ==========================================
#[derive(Default)]
pub struct ReferenceDataCache {
    slots: HashMap<EntityType, CacheSlot>,
}

impl ReferenceDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一张参考表（读取该表现存记录的业务键，不含已软删除）
    pub fn register<T, R>(&mut self, repo: Arc<R>)
    where
        T: VersionedEntity,
        R: VersionedRepository<T> + ?Sized + 'static,
    {
        let loader: KeyLoader = Box::new(move || {
            Ok(repo
                .find_all()?
                .iter()
                .filter(|record| !record.is_missing())
                .map(|record| record.business_key())
                .collect())
        });
        self.slots.insert(
            T::ENTITY_TYPE,
            CacheSlot {
                loader,
                cached: Mutex::new(None),
            },
        );
    }

    fn slot(&self, entity_type: EntityType) -> SyncResult<&CacheSlot> {
        self.slots
            .get(&entity_type)
            .ok_or(SyncError::UnregisteredReference(entity_type))
    }

    /// 读取业务键集合（未加载时从存储加载）
    pub fn keys(&self, entity_type: EntityType) -> SyncResult<ReferenceKeys> {
        let slot = self.slot(entity_type)?;
        let mut cached = slot.lock()?;
        if let Some(keys) = cached.as_ref() {
            return Ok(Arc::clone(keys));
        }

        let keys: ReferenceKeys = Arc::new((slot.loader)()?);
        debug!(entity_type = %entity_type, size = keys.len(), "参考缓存已加载");
        *cached = Some(Arc::clone(&keys));
        Ok(keys)
    }

    /// 丢弃整张表的缓存，下次读取时重建
    pub fn invalidate(&self, entity_type: EntityType) -> SyncResult<()> {
        // 未注册的表没有缓存可失效
        let Some(slot) = self.slots.get(&entity_type) else {
            return Ok(());
        };
        if slot.lock()?.take().is_some() {
            debug!(entity_type = %entity_type, "参考缓存已失效");
        }
        Ok(())
    }

    pub fn invalidate_all(&self) -> SyncResult<()> {
        for entity_type in self.slots.keys() {
            self.invalidate(*entity_type)?;
        }
        Ok(())
    }

    pub fn is_loaded(&self, entity_type: EntityType) -> SyncResult<bool> {
        match self.slots.get(&entity_type) {
            Some(slot) => Ok(slot.lock()?.is_some()),
            None => Ok(false),
        }
    }
}
