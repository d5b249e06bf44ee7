// ==========================================
// 药品登记数据同步系统 - 配置层
// ==========================================
// 职责: 导入配置管理，config_kv 覆写 + 编译期默认值
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod error;
pub mod import_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, validate_config_value, ConfigManager};
pub use error::{ConfigError, ConfigResult};
pub use import_config_trait::{
    dataset_names, DatasetSettings, ImportConfigReader, ImportSettings, DEFAULT_VALIDITY_CUTOVER,
};
