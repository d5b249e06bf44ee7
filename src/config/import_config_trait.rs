// ==========================================
// 药品登记数据同步系统 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入模块所需的配置读取接口与默认值
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::error::{ConfigError, ConfigResult};
use crate::domain::types::YearMonth;
use crate::importer::csv_engine::CsvOptions;
use crate::importer::regional_merge::DEFAULT_REPEATING_REGIONS;
use crate::importer::text_decoder::SourceEncoding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// 数据集名称
// ==========================================
pub mod dataset_names {
    pub const COUNTRIES: &str = "countries";
    pub const DOSAGE_FORMS: &str = "dosage_forms";
    pub const ROUTES: &str = "routes";
    pub const PACKAGE_TYPES: &str = "package_types";
    pub const ORGANISATIONS: &str = "organisations";
    pub const PRODUCTS: &str = "products";
    pub const DISPENSING: &str = "dispensing";

    /// 登记快照包内各表的同步顺序（被引用的表在前）
    pub const REGISTRY_ORDER: &[&str] = &[
        COUNTRIES,
        DOSAGE_FORMS,
        ROUTES,
        PACKAGE_TYPES,
        ORGANISATIONS,
        PRODUCTS,
    ];
}

/// 默认有效期文件切换月
pub const DEFAULT_VALIDITY_CUTOVER: YearMonth = YearMonth::from_ym_const(2021, 1);

// ==========================================
// DatasetSettings - 单个数据集的文件格式
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSettings {
    pub dataset: String,
    pub file_name: String,
    pub separator: char,
    pub encoding: SourceEncoding,
}

impl DatasetSettings {
    pub fn new(dataset: &str, file_name: &str, separator: char, encoding: SourceEncoding) -> Self {
        Self {
            dataset: dataset.to_string(),
            file_name: file_name.to_string(),
            separator,
            encoding,
        }
    }

    /// 转换为 CSV 引擎参数（分隔符必须为单字节字符）
    pub fn csv_options(&self) -> ConfigResult<CsvOptions> {
        let separator = u8::try_from(self.separator)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                ConfigError::invalid(&self.dataset, format!("分隔符不是 ASCII 字符: {:?}", self.separator))
            })?;
        Ok(CsvOptions::new(self.dataset.clone(), separator, self.encoding))
    }
}

// ==========================================
// ImportSettings - 导入配置全集
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSettings {
    pub validity_cutover: YearMonth,        // 有效期文件强制要求的起始月
    pub validity_file: String,
    pub validity_encoding: SourceEncoding,
    pub repeating_regions: Vec<String>,     // 允许重复出现的地区代码
    pub datasets: BTreeMap<String, DatasetSettings>,
}

impl Default for ImportSettings {
    fn default() -> Self {
        use dataset_names::*;

        let registry = |name: &str, file: &str| {
            DatasetSettings::new(name, file, ';', SourceEncoding::Windows1250)
        };
        let datasets = [
            registry(COUNTRIES, "dlp_zeme.csv"),
            registry(DOSAGE_FORMS, "dlp_formy.csv"),
            registry(ROUTES, "dlp_cesty.csv"),
            registry(PACKAGE_TYPES, "dlp_obaly.csv"),
            registry(ORGANISATIONS, "dlp_organizace.csv"),
            registry(PRODUCTS, "dlp_lecivepripravky.csv"),
            DatasetSettings::new(DISPENSING, "vydeje.csv", ',', SourceEncoding::Utf8),
        ]
        .into_iter()
        .map(|d| (d.dataset.clone(), d))
        .collect();

        Self {
            validity_cutover: DEFAULT_VALIDITY_CUTOVER,
            validity_file: "dlp_platnost.csv".to_string(),
            validity_encoding: SourceEncoding::Windows1250,
            repeating_regions: DEFAULT_REPEATING_REGIONS.iter().map(|r| r.to_string()).collect(),
            datasets,
        }
    }
}

impl ImportSettings {
    pub fn dataset(&self, dataset: &str) -> ConfigResult<&DatasetSettings> {
        self.datasets
            .get(dataset)
            .ok_or_else(|| ConfigError::UnknownDataset(dataset.to_string()))
    }
}

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入模块所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）, ImportSettings（静态配置）
pub trait ImportConfigReader: Send + Sync {
    /// 有效期文件切换月
    ///
    /// # 默认值
    /// - 2021-01
    fn validity_cutover(&self) -> ConfigResult<YearMonth>;

    /// 有效期文件名
    ///
    /// # 默认值
    /// - dlp_platnost.csv
    fn validity_file_name(&self) -> ConfigResult<String>;

    fn validity_encoding(&self) -> ConfigResult<SourceEncoding>;

    /// 数据集文件格式
    fn dataset_settings(&self, dataset: &str) -> ConfigResult<DatasetSettings>;

    /// 地区重复行合并允许的地区代码
    ///
    /// # 默认值
    /// - ["PHA"]
    fn repeating_regions(&self) -> ConfigResult<Vec<String>>;

    /// 一次性读取全部导入配置
    fn load_import_settings(&self) -> ConfigResult<ImportSettings> {
        let mut datasets = BTreeMap::new();
        for name in dataset_names::REGISTRY_ORDER
            .iter()
            .chain(std::iter::once(&dataset_names::DISPENSING))
        {
            datasets.insert(name.to_string(), self.dataset_settings(name)?);
        }

        Ok(ImportSettings {
            validity_cutover: self.validity_cutover()?,
            validity_file: self.validity_file_name()?,
            validity_encoding: self.validity_encoding()?,
            repeating_regions: self.repeating_regions()?,
            datasets,
        })
    }
}

impl ImportConfigReader for ImportSettings {
    fn validity_cutover(&self) -> ConfigResult<YearMonth> {
        Ok(self.validity_cutover)
    }

    fn validity_file_name(&self) -> ConfigResult<String> {
        Ok(self.validity_file.clone())
    }

    fn validity_encoding(&self) -> ConfigResult<SourceEncoding> {
        Ok(self.validity_encoding)
    }

    fn dataset_settings(&self, dataset: &str) -> ConfigResult<DatasetSettings> {
        self.dataset(dataset).cloned()
    }

    fn repeating_regions(&self) -> ConfigResult<Vec<String>> {
        Ok(self.repeating_regions.clone())
    }
}
