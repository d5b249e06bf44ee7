// ==========================================
// 药品登记数据同步系统 - 核心库
// ==========================================
// 职责: 登记快照解析、对账、时态版本化存储
// 技术栈: Rust + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 对账与编排
pub mod engine;

// 导入层 - 外部数据
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{EntityType, FailureReason, YearMonth};

// 领域实体
pub use domain::{
    AdministrationRoute, ChangeSet, Country, DispensingRecord, DosageForm, MedicinalProduct,
    Organisation, PackageType, SyncReport, VersionedEntity,
};

// 引擎
pub use engine::{EntitySynchronizer, ReferenceDataCache, SnapshotSynchronizer};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "药品登记数据同步系统";
