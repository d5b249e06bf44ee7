// ==========================================
// 药品登记数据同步系统 - 引擎层
// ==========================================
// 职责: 快照对账、参考数据缓存、处理单元编排
// 红线: Engine 不拼 SQL，存储只经由仓储端口访问
// ==========================================

pub mod error;
pub mod reference_cache;
pub mod snapshot_sync;
pub mod synchronizer;

// 重导出核心引擎
pub use error::{SyncError, SyncResult};
pub use reference_cache::ReferenceDataCache;
pub use snapshot_sync::{
    run_parallel, DispensingImportSummary, RegistryRepositories, RegistrySyncSummary,
    SnapshotSynchronizer, TableSyncOutcome, UnitOutcome, REGISTRY_STAGES, REGISTRY_UNIT,
};
pub use synchronizer::EntitySynchronizer;
