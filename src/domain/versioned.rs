// ==========================================
// 药品登记数据同步系统 - 时态版本实体
// ==========================================
// 职责: 定义所有同步表共享的版本化能力接口
// 红线: id / first_seen 一经分配永不改变；记录只做软删除
// ==========================================

use crate::domain::types::EntityType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// EntityIdentity - 存储身份与时态字段
// ==========================================
/// 每个版本化记录携带的身份信息，业务属性比较时一律忽略
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIdentity {
    pub id: Option<i64>,                  // 存储首次插入时分配
    pub first_seen: Option<NaiveDate>,    // 首次出现的 validFrom
    pub valid_from: Option<NaiveDate>,    // 最近一次写入该版本的 validFrom
    pub missing_since: Option<NaiveDate>, // 非空 = 已软删除
}

impl EntityIdentity {
    pub fn is_missing(&self) -> bool {
        self.missing_since.is_some()
    }
}

// ==========================================
// BusinessKey - 业务键
// ==========================================
/// 与存储 id 无关的自然键；单列编码或多列外键组合
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BusinessKey(Vec<String>);

impl BusinessKey {
    pub fn single(value: impl Into<String>) -> Self {
        BusinessKey(vec![value.into()])
    }

    pub fn composite<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BusinessKey(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// 存储用字符串形式（各部分以 '|' 连接）
    pub fn to_db_string(&self) -> String {
        self.0.join("|")
    }
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_db_string())
    }
}

// ==========================================
// AttributeChange - 单个业务属性差异
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub attribute: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// 逐字段比较的构建器，供各实体实现 diff_business_attributes
#[derive(Debug, Default)]
pub struct AttributeDiff {
    changes: Vec<AttributeChange>,
}

impl AttributeDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// 比较必填字段
    pub fn field<V>(mut self, attribute: &str, old: &V, new: &V) -> Self
    where
        V: PartialEq + fmt::Display,
    {
        if old != new {
            self.changes.push(AttributeChange {
                attribute: attribute.to_string(),
                old_value: Some(old.to_string()),
                new_value: Some(new.to_string()),
            });
        }
        self
    }

    /// 比较可空字段
    pub fn optional<V>(mut self, attribute: &str, old: &Option<V>, new: &Option<V>) -> Self
    where
        V: PartialEq + fmt::Display,
    {
        if old != new {
            self.changes.push(AttributeChange {
                attribute: attribute.to_string(),
                old_value: old.as_ref().map(ToString::to_string),
                new_value: new.as_ref().map(ToString::to_string),
            });
        }
        self
    }

    pub fn finish(self) -> Vec<AttributeChange> {
        self.changes
    }
}

// ==========================================
// VersionedEntity Trait
// ==========================================
// 用途: 通用同步器的唯一依赖面
// 实现者: Country, DosageForm, AdministrationRoute, PackageType, Organisation, MedicinalProduct
pub trait VersionedEntity: Clone + fmt::Debug + Send + Sync + 'static {
    /// 所属同步表
    const ENTITY_TYPE: EntityType;

    fn identity(&self) -> &EntityIdentity;

    fn identity_mut(&mut self) -> &mut EntityIdentity;

    /// 跨快照稳定的业务键
    fn business_key(&self) -> BusinessKey;

    /// 返回取值不同的业务属性（self 视为旧版本，other 视为新版本）
    ///
    /// 不比较 id / first_seen / valid_from / missing_since
    fn diff_business_attributes(&self, other: &Self) -> Vec<AttributeChange>;

    /// 保留 previous 的 id 与 first_seen，其余字段取自 self
    fn with_identity_from(&self, previous: &Self) -> Self {
        let mut next = self.clone();
        let prev = previous.identity();
        let identity = next.identity_mut();
        identity.id = prev.id;
        identity.first_seen = prev.first_seen;
        next
    }

    /// 返回 missing_since = as_of 的副本
    fn mark_missing(&self, as_of: NaiveDate) -> Self {
        let mut next = self.clone();
        next.identity_mut().missing_since = Some(as_of);
        next
    }

    fn is_missing(&self) -> bool {
        self.identity().is_missing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_diff_collects_only_changes() {
        let changes = AttributeDiff::new()
            .field("name", &"A".to_string(), &"B".to_string())
            .field("code", &"X".to_string(), &"X".to_string())
            .optional("note", &None::<String>, &Some("n".to_string()))
            .optional("ddd", &Some(1.5_f64), &Some(1.5_f64))
            .finish();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].attribute, "name");
        assert_eq!(changes[0].old_value.as_deref(), Some("A"));
        assert_eq!(changes[0].new_value.as_deref(), Some("B"));
        assert_eq!(changes[1].attribute, "note");
        assert_eq!(changes[1].old_value, None);
    }

    #[test]
    fn test_business_key_equality_is_exact() {
        let a = BusinessKey::composite(["ABC", "CZ"]);
        let b = BusinessKey::composite(["ABC", "CZ"]);
        let c = BusinessKey::composite(["abc", "CZ"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_db_string(), "ABC|CZ");
    }
}
