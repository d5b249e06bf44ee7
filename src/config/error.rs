// ==========================================
// 药品登记数据同步系统 - 配置层错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 配置层错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("配置读取失败: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("配置项格式错误 (key={key}): {message}")]
    InvalidValue { key: String, message: String },

    #[error("未配置的数据集: {0}")]
    UnknownDataset(String),
}

impl ConfigError {
    pub fn invalid(key: &str, message: impl ToString) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

/// Result 类型别名
pub type ConfigResult<T> = Result<T, ConfigError>;
