// ==========================================
// 药品登记数据同步系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、版本化能力接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod audit;
pub mod change_set;
pub mod movement;
pub mod registry;
pub mod types;
pub mod versioned;

// 重导出核心类型
pub use audit::{AttributeChangeLogEntry, TemporaryAbsenceRecord};
pub use change_set::{ChangeSet, SyncReport};
pub use movement::DispensingRecord;
pub use registry::{
    AdministrationRoute, Country, DosageForm, MedicinalProduct, Organisation, PackageType,
};
pub use types::{EntityType, FailureReason, YearMonth, YearMonthParseError};
pub use versioned::{
    AttributeChange, AttributeDiff, BusinessKey, EntityIdentity, VersionedEntity,
};
