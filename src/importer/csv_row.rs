// ==========================================
// 药品登记数据同步系统 - CSV 行与字段转换
// ==========================================
// 职责: 按解析后的列位置取值 + 本地化数值/周期转换
// 红线: 字段转换失败只产生行级失败，不中断导入
// ==========================================

use crate::domain::types::{FailureReason, YearMonth};
use crate::importer::column_resolver::ResolvedColumns;
use chrono::NaiveDate;

// ==========================================
// FieldFailure - 字段级失败
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    pub reason: FailureReason,
    pub column: Option<String>,
    pub message: String,
}

impl FieldFailure {
    pub fn missing(column: &str) -> Self {
        Self {
            reason: FailureReason::MissingAttribute,
            column: Some(column.to_string()),
            message: format!("必填字段为空: {}", column),
        }
    }

    pub fn parse(column: &str, value: &str, expected: &str) -> Self {
        Self {
            reason: FailureReason::ParseError,
            column: Some(column.to_string()),
            message: format!("无法解析为{}: {}", expected, value),
        }
    }

    pub fn unknown_reference(column: &str, value: &str) -> Self {
        Self {
            reason: FailureReason::UnknownReference,
            column: Some(column.to_string()),
            message: format!("参考数据中不存在: {}", value),
        }
    }
}

/// 字段转换结果
pub type FieldResult<T> = Result<T, FieldFailure>;

// ==========================================
// RowMappingResult - 行映射结果
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum RowMappingResult<T> {
    Success(T),
    Failure {
        reason: FailureReason,
        column: Option<String>,
        message: String,
        raw_line: String,
    },
}

impl<T> RowMappingResult<T> {
    /// 附带原始行文本，将字段结果转换为行结果
    pub fn from_field_result(result: FieldResult<T>, raw_line: &str) -> Self {
        match result {
            Ok(value) => RowMappingResult::Success(value),
            Err(failure) => RowMappingResult::Failure {
                reason: failure.reason,
                column: failure.column,
                message: failure.message,
                raw_line: raw_line.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RowMappingResult::Success(_))
    }
}

// ==========================================
// CsvRow - 一行数据（按逻辑字段访问）
// ==========================================
#[derive(Debug)]
pub struct CsvRow<'a> {
    columns: &'a ResolvedColumns,
    values: Vec<String>,
    raw_line: &'a str,
    row_number: usize,
}

impl<'a> CsvRow<'a> {
    pub fn new(
        columns: &'a ResolvedColumns,
        values: Vec<String>,
        raw_line: &'a str,
        row_number: usize,
    ) -> Self {
        Self {
            columns,
            values,
            raw_line,
            row_number,
        }
    }

    /// 原始行文本（逐字保留，用于诊断）
    pub fn raw_line(&self) -> &str {
        self.raw_line
    }

    /// 数据行序号（从 1 开始，不含表头与空行）
    pub fn row_number(&self) -> usize {
        self.row_number
    }

    /// 取字段值（去空白；空值/缺席列返回 None）
    pub fn get(&self, field_id: &str) -> Option<&str> {
        let idx = self.columns.position(field_id)?;
        let value = self.values.get(idx)?.trim();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    pub fn optional_string(&self, field_id: &str) -> Option<String> {
        self.get(field_id).map(str::to_string)
    }

    /// 必填字符串
    pub fn required_string(&self, field_id: &str) -> FieldResult<String> {
        self.get(field_id)
            .map(str::to_string)
            .ok_or_else(|| FieldFailure::missing(field_id))
    }

    /// 可空数值（支持逗号小数点）
    pub fn decimal(&self, field_id: &str) -> FieldResult<Option<f64>> {
        match self.get(field_id) {
            None => Ok(None),
            Some(value) => parse_decimal(value)
                .map(Some)
                .ok_or_else(|| FieldFailure::parse(field_id, value, "数值")),
        }
    }

    /// 必填数值
    pub fn required_decimal(&self, field_id: &str) -> FieldResult<f64> {
        self.decimal(field_id)?
            .ok_or_else(|| FieldFailure::missing(field_id))
    }

    /// 必填年月（源格式 yyyy.mm）
    pub fn required_year_month(&self, field_id: &str) -> FieldResult<YearMonth> {
        let value = self
            .get(field_id)
            .ok_or_else(|| FieldFailure::missing(field_id))?;
        YearMonth::parse(value).map_err(|_| FieldFailure::parse(field_id, value, "年月 (yyyy.mm)"))
    }

    /// 是/否标记（空值视为否）
    pub fn flag(&self, field_id: &str) -> FieldResult<bool> {
        match self.get(field_id) {
            None => Ok(false),
            Some(value) => {
                parse_flag(value).ok_or_else(|| FieldFailure::parse(field_id, value, "是/否标记"))
            }
        }
    }
}

// ==========================================
// 本地化转换工具
// ==========================================

/// 解析数值：逗号视为小数点；同时出现点与逗号时点视为千分位；忽略空格
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    if compact.is_empty() {
        return None;
    }

    let normalized = if compact.contains(',') {
        compact.replace('.', "").replace(',', ".")
    } else {
        compact
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// 解析是/否标记
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_uppercase().as_str() {
        "A" | "ANO" | "Y" | "YES" | "1" | "TRUE" | "X" => Some(true),
        "N" | "NE" | "NO" | "0" | "FALSE" => Some(false),
        _ => None,
    }
}

/// 解析日期：dd.mm.yyyy（允许附带时间部分）或 yyyy-mm-dd
pub fn parse_registry_date(raw: &str) -> Option<NaiveDate> {
    let token = raw.trim().trim_matches('"').split_whitespace().next()?;
    NaiveDate::parse_from_str(token, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(token, "%Y-%m-%d"))
        .ok()
}

/// 药品编码规范化：纯数字编码补齐为 7 位
pub fn normalize_product_code(raw: &str) -> String {
    let code = raw.trim();
    if !code.is_empty() && code.len() < 7 && code.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0>7}", code)
    } else {
        code.to_string()
    }
}
