// ==========================================
// 药品登记数据同步系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod dispensing_repo;
pub mod error;
pub mod memory_repo;
pub mod processed_unit_repo;
pub mod sqlite_versioned_repo;
pub mod unit_scope;
pub mod versioned_repo;

// 重导出核心仓储
pub use dispensing_repo::{
    DispensingRepository, MemoryDispensingRepository, SqliteDispensingRepository,
};
pub use error::{RepositoryError, RepositoryResult};
pub use memory_repo::InMemoryRepository;
pub use processed_unit_repo::{
    MemoryProcessedUnitLedger, ProcessedUnitLedger, SqliteProcessedUnitLedger,
};
pub use sqlite_versioned_repo::SqliteVersionedRepository;
pub use unit_scope::{Checkpoint, MemoryUnitScope, SqliteUnitScope, UnitScope};
pub use versioned_repo::VersionedRepository;
