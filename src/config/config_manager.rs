// ==========================================
// 药品登记数据同步系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)，未配置项回落到编译期默认值
// ==========================================

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::import_config_trait::{
    dataset_names, DatasetSettings, ImportConfigReader, ImportSettings,
};
use crate::db::open_sqlite_connection;
use crate::domain::types::YearMonth;
use crate::importer::text_decoder::SourceEncoding;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
    defaults: ImportSettings,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            defaults: ImportSettings::default(),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| ConfigError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self {
            conn,
            defaults: ImportSettings::default(),
        })
    }

    /// 替换编译期默认值（测试 / 试运行）
    pub fn with_defaults(mut self, defaults: ImportSettings) -> Self {
        self.defaults = defaults;
        self
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::LockError(e.to_string()))?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::LockError(e.to_string()))?;

        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 校验后写入 global scope 配置
    ///
    /// # 错误
    /// - InvalidValue / UnknownDataset: 值无法被对应配置项解析，不写入
    pub fn set_checked_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        validate_config_value(key, value)?;
        self.set_global_config_value(key, value)
    }

    /// 获取所有 import/ 前缀配置（诊断输出）
    pub fn get_config_snapshot(&self) -> ConfigResult<BTreeMap<String, String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::LockError(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' AND key LIKE 'import/%' ORDER BY key",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// 读取 JSON 配置项
    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> ConfigResult<Option<T>> {
        match self.get_config_value(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| ConfigError::invalid(key, e)),
            None => Ok(None),
        }
    }
}

/// 按读取时的解析规则校验单个配置值（不访问存储）
///
/// 未登记的键不做格式约束
pub fn validate_config_value(key: &str, value: &str) -> ConfigResult<()> {
    fn parse_json<T: serde::de::DeserializeOwned>(key: &str, value: &str) -> ConfigResult<T> {
        serde_json::from_str(value).map_err(|e| ConfigError::invalid(key, e))
    }

    match key {
        config_keys::VALIDITY_CUTOVER => {
            YearMonth::parse(value).map_err(|e| ConfigError::invalid(key, e))?;
        }
        config_keys::VALIDITY_ENCODING => {
            parse_json::<SourceEncoding>(key, value)?;
        }
        config_keys::REPEATING_REGIONS => {
            parse_json::<Vec<String>>(key, value)?;
        }
        _ => {
            if let Some(dataset) = key.strip_prefix(config_keys::DATASET_PREFIX) {
                if !dataset_names::REGISTRY_ORDER.contains(&dataset)
                    && dataset != dataset_names::DISPENSING
                {
                    return Err(ConfigError::UnknownDataset(dataset.to_string()));
                }
                parse_json::<DatasetSettings>(key, value)?.csv_options()?;
            }
        }
    }
    Ok(())
}

// ==========================================
// ImportConfigReader Trait 实现
// ==========================================
impl ImportConfigReader for ConfigManager {
    fn validity_cutover(&self) -> ConfigResult<YearMonth> {
        match self.get_config_value(config_keys::VALIDITY_CUTOVER)? {
            Some(raw) => YearMonth::parse(&raw)
                .map_err(|e| ConfigError::invalid(config_keys::VALIDITY_CUTOVER, e)),
            None => Ok(self.defaults.validity_cutover),
        }
    }

    fn validity_file_name(&self) -> ConfigResult<String> {
        Ok(self
            .get_config_value(config_keys::VALIDITY_FILE)?
            .unwrap_or_else(|| self.defaults.validity_file.clone()))
    }

    fn validity_encoding(&self) -> ConfigResult<SourceEncoding> {
        Ok(self
            .get_json(config_keys::VALIDITY_ENCODING)?
            .unwrap_or(self.defaults.validity_encoding))
    }

    fn dataset_settings(&self, dataset: &str) -> ConfigResult<DatasetSettings> {
        let key = config_keys::dataset_key(dataset);
        match self.get_json::<DatasetSettings>(&key)? {
            Some(settings) => {
                tracing::debug!(dataset = %dataset, "使用 config_kv 中的数据集配置");
                Ok(settings)
            }
            None => self.defaults.dataset_settings(dataset),
        }
    }

    fn repeating_regions(&self) -> ConfigResult<Vec<String>> {
        Ok(self
            .get_json(config_keys::REPEATING_REGIONS)?
            .unwrap_or_else(|| self.defaults.repeating_regions.clone()))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 有效期
    pub const VALIDITY_CUTOVER: &str = "import/validity_cutover"; // yyyy-mm
    pub const VALIDITY_FILE: &str = "import/validity_file";
    pub const VALIDITY_ENCODING: &str = "import/validity_encoding"; // JSON: "UTF8" / "WINDOWS1250"

    // 地区重复行合并
    pub const REPEATING_REGIONS: &str = "import/repeating_regions"; // JSON 数组

    // 数据集文件格式 (JSON DatasetSettings)
    pub const DATASET_PREFIX: &str = "import/dataset/";

    pub fn dataset_key(dataset: &str) -> String {
        format!("{}{}", DATASET_PREFIX, dataset)
    }
}
