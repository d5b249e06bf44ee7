// ==========================================
// 药品登记数据同步系统 - 导入模块错误类型
// ==========================================
// 职责: 文件级错误（对单个 (数据集, 周期) 致命，整单元下次重试）
// 工具: thiserror 派生宏
// 红线: 行级失败不走此类型，见 RowMappingResult
// ==========================================

use crate::domain::types::YearMonth;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 表头错误 =====
    #[error("缺少必需列 {field}（可接受的列名: {}）", .aliases.join(", "))]
    MissingRequiredColumn { field: String, aliases: Vec<String> },

    #[error("文件为空或缺少表头: {0}")]
    EmptyFile(String),

    // ===== 有效期文件错误 =====
    #[error("周期 {period} 缺少有效期文件 {file_name}")]
    MissingValidityFile { period: YearMonth, file_name: String },

    #[error("有效期文件 {file_name} 无数据行")]
    EmptyValidityFile { file_name: String },

    #[error("有效期日期格式错误: 期望 dd.mm.yyyy，实际 {0}")]
    InvalidValidityDate(String),

    // ===== 快照包错误 =====
    #[error("快照包中不存在文件: {0}")]
    FileNotInBundle(String),

    #[error("嵌套压缩包中未找到周期 {0} 对应的月度包")]
    NestedArchiveNotFound(YearMonth),

    #[error("压缩包损坏或无法读取: {0}")]
    ArchiveError(String),

    // ===== 读取错误 =====
    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<zip::result::ZipError>
impl From<zip::result::ZipError> for ImportError {
    fn from(err: zip::result::ZipError) -> Self {
        ImportError::ArchiveError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
