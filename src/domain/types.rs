// ==========================================
// 药品登记数据同步系统 - 领域类型定义
// ==========================================
// 职责: 同步表标识、行级失败原因、年月周期
// ==========================================

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ==========================================
// 同步表标识 (Entity Type)
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Country,             // 国家
    DosageForm,          // 剂型
    AdministrationRoute, // 给药途径
    PackageType,         // 包装类型
    Organisation,        // 组织（生产商/持证商）
    MedicinalProduct,    // 药品
}

impl EntityType {
    /// 数据库存储字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            EntityType::Country => "COUNTRY",
            EntityType::DosageForm => "DOSAGE_FORM",
            EntityType::AdministrationRoute => "ADMINISTRATION_ROUTE",
            EntityType::PackageType => "PACKAGE_TYPE",
            EntityType::Organisation => "ORGANISATION",
            EntityType::MedicinalProduct => "MEDICINAL_PRODUCT",
        }
    }

    /// 从数据库字符串解析（未知值返回 None）
    pub fn from_db_str(raw: &str) -> Option<Self> {
        match raw.trim() {
            "COUNTRY" => Some(EntityType::Country),
            "DOSAGE_FORM" => Some(EntityType::DosageForm),
            "ADMINISTRATION_ROUTE" => Some(EntityType::AdministrationRoute),
            "PACKAGE_TYPE" => Some(EntityType::PackageType),
            "ORGANISATION" => Some(EntityType::Organisation),
            "MEDICINAL_PRODUCT" => Some(EntityType::MedicinalProduct),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 行级失败原因 (Failure Reason)
// ==========================================
// 红线: 三类原因必须严格区分，日志聚合与告警依赖该分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    MissingAttribute, // 必填列为空
    ParseError,       // 有值但无法转换为目标类型
    UnknownReference, // 外部业务键在参考缓存中不存在
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MissingAttribute => write!(f, "MISSING_ATTRIBUTE"),
            FailureReason::ParseError => write!(f, "PARSE_ERROR"),
            FailureReason::UnknownReference => write!(f, "UNKNOWN_REFERENCE"),
        }
    }
}

// ==========================================
// 年月周期 (Year Month)
// ==========================================
// 内部以当月 1 日存储，保证构造即合法
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth(NaiveDate);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("无效的年月周期: {0}")]
pub struct YearMonthParseError(pub String);

impl YearMonth {
    /// 构造年月（月份越界返回 None）
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(YearMonth)
    }

    /// 常量上下文构造（月份越界在编译期报错）
    pub const fn from_ym_const(year: i32, month: u32) -> Self {
        match NaiveDate::from_ymd_opt(year, month, 1) {
            Some(date) => YearMonth(date),
            None => panic!("无效的年月常量"),
        }
    }

    /// 取日期所在月份
    pub fn from_date(date: NaiveDate) -> Self {
        YearMonth(date.with_day(1).unwrap_or(date))
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    /// 当月第一天
    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    /// 紧凑格式 yyyymm
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year(), self.month())
    }

    /// 解析 yyyy.mm / yyyy-mm / yyyy/mm / yyyymm
    pub fn parse(raw: &str) -> Result<Self, YearMonthParseError> {
        let value = raw.trim();
        let err = || YearMonthParseError(raw.to_string());

        let (year_part, month_part) = match value.find(['.', '-', '/']) {
            Some(pos) => (&value[..pos], &value[pos + 1..]),
            None if value.len() == 6 && value.is_char_boundary(4) => (&value[..4], &value[4..]),
            None => return Err(err()),
        };

        if year_part.len() != 4 || month_part.is_empty() || month_part.len() > 2 {
            return Err(err());
        }

        let year: i32 = year_part.parse().map_err(|_| err())?;
        let month: u32 = month_part.parse().map_err(|_| err())?;
        YearMonth::new(year, month).ok_or_else(err)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for YearMonth {
    type Err = YearMonthParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        YearMonth::parse(s)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = YearMonthParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        YearMonth::parse(&value)
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}
