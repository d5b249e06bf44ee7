// ==========================================
// 药品登记数据同步系统 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 同步级错误统一在此汇聚，任何一种都使整个 (表, 周期) 单元回滚
// ==========================================

use crate::config::ConfigError;
use crate::domain::types::EntityType;
use crate::importer::ImportError;
use crate::repository::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum SyncError {
    // ===== 文件级 =====
    #[error("导入失败: {0}")]
    Import(#[from] ImportError),

    // ===== 同步级 =====
    #[error("存储失败: {0}")]
    Repository(#[from] RepositoryError),

    #[error("已存储记录缺少 id (entity={entity_type}, business_key={business_key})")]
    MissingRecordId {
        entity_type: EntityType,
        business_key: String,
    },

    #[error("参考数据缓存未注册该表: {0}")]
    UnregisteredReference(EntityType),

    // ===== 环境 =====
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error("后台任务执行失败: {0}")]
    TaskJoin(String),
}

/// Result 类型别名
pub type SyncResult<T> = Result<T, SyncError>;
