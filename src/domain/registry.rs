// ==========================================
// 药品登记数据同步系统 - 登记参考表实体
// ==========================================
// 职责: 药品主表及辅助编码表的领域模型
// 用途: 导入层写入，下游聚合服务只读
// 对齐: registry_record 表（payload 仅含业务属性）
// ==========================================

use crate::domain::types::EntityType;
use crate::domain::versioned::{
    AttributeChange, AttributeDiff, BusinessKey, EntityIdentity, VersionedEntity,
};
use serde::{Deserialize, Serialize};

// ==========================================
// Country - 国家
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    #[serde(skip)]
    pub identity: EntityIdentity,

    pub code: String,              // 国家代码
    pub name: String,              // 名称
    pub name_en: Option<String>,   // 英文名称
    pub edqm_code: Option<String>, // EDQM 代码
}

impl VersionedEntity for Country {
    const ENTITY_TYPE: EntityType = EntityType::Country;

    fn identity(&self) -> &EntityIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut EntityIdentity {
        &mut self.identity
    }

    fn business_key(&self) -> BusinessKey {
        BusinessKey::single(&self.code)
    }

    fn diff_business_attributes(&self, other: &Self) -> Vec<AttributeChange> {
        AttributeDiff::new()
            .field("name", &self.name, &other.name)
            .optional("name_en", &self.name_en, &other.name_en)
            .optional("edqm_code", &self.edqm_code, &other.edqm_code)
            .finish()
    }
}

// ==========================================
// DosageForm - 剂型
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosageForm {
    #[serde(skip)]
    pub identity: EntityIdentity,

    pub code: String,
    pub name: String,
    pub name_en: Option<String>,
    pub name_lat: Option<String>, // 拉丁文名称
}

impl VersionedEntity for DosageForm {
    const ENTITY_TYPE: EntityType = EntityType::DosageForm;

    fn identity(&self) -> &EntityIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut EntityIdentity {
        &mut self.identity
    }

    fn business_key(&self) -> BusinessKey {
        BusinessKey::single(&self.code)
    }

    fn diff_business_attributes(&self, other: &Self) -> Vec<AttributeChange> {
        AttributeDiff::new()
            .field("name", &self.name, &other.name)
            .optional("name_en", &self.name_en, &other.name_en)
            .optional("name_lat", &self.name_lat, &other.name_lat)
            .finish()
    }
}

// ==========================================
// AdministrationRoute - 给药途径
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdministrationRoute {
    #[serde(skip)]
    pub identity: EntityIdentity,

    pub code: String,
    pub name: String,
    pub name_en: Option<String>,
    pub name_lat: Option<String>,
}

impl VersionedEntity for AdministrationRoute {
    const ENTITY_TYPE: EntityType = EntityType::AdministrationRoute;

    fn identity(&self) -> &EntityIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut EntityIdentity {
        &mut self.identity
    }

    fn business_key(&self) -> BusinessKey {
        BusinessKey::single(&self.code)
    }

    fn diff_business_attributes(&self, other: &Self) -> Vec<AttributeChange> {
        AttributeDiff::new()
            .field("name", &self.name, &other.name)
            .optional("name_en", &self.name_en, &other.name_en)
            .optional("name_lat", &self.name_lat, &other.name_lat)
            .finish()
    }
}

// ==========================================
// PackageType - 包装类型
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageType {
    #[serde(skip)]
    pub identity: EntityIdentity,

    pub code: String,
    pub name: String,
    pub name_en: Option<String>,
}

impl VersionedEntity for PackageType {
    const ENTITY_TYPE: EntityType = EntityType::PackageType;

    fn identity(&self) -> &EntityIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut EntityIdentity {
        &mut self.identity
    }

    fn business_key(&self) -> BusinessKey {
        BusinessKey::single(&self.code)
    }

    fn diff_business_attributes(&self, other: &Self) -> Vec<AttributeChange> {
        AttributeDiff::new()
            .field("name", &self.name, &other.name)
            .optional("name_en", &self.name_en, &other.name_en)
            .finish()
    }
}

// ==========================================
// Organisation - 组织（生产商 / 上市许可持有人）
// ==========================================
// 业务键: (组织缩写, 国家代码) 组合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organisation {
    #[serde(skip)]
    pub identity: EntityIdentity,

    pub code: String,
    pub country_code: String,
    pub name: String,
    pub is_manufacturer: bool,
    pub is_holder: bool,
}

impl VersionedEntity for Organisation {
    const ENTITY_TYPE: EntityType = EntityType::Organisation;

    fn identity(&self) -> &EntityIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut EntityIdentity {
        &mut self.identity
    }

    fn business_key(&self) -> BusinessKey {
        BusinessKey::composite([self.code.as_str(), self.country_code.as_str()])
    }

    fn diff_business_attributes(&self, other: &Self) -> Vec<AttributeChange> {
        AttributeDiff::new()
            .field("name", &self.name, &other.name)
            .field("is_manufacturer", &self.is_manufacturer, &other.is_manufacturer)
            .field("is_holder", &self.is_holder, &other.is_holder)
            .finish()
    }
}

// ==========================================
// MedicinalProduct - 药品（登记主表）
// ==========================================
// 业务键: 7 位药品编码（前导零补齐）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicinalProduct {
    #[serde(skip)]
    pub identity: EntityIdentity,

    // ===== 主键 =====
    pub code: String,

    // ===== 基础信息 =====
    pub name: String,
    pub strength: Option<String>,          // 规格
    pub package_size: Option<String>,      // 包装规格

    // ===== 参考表外键 =====
    pub dosage_form_code: Option<String>,
    pub route_code: Option<String>,
    pub package_type_code: Option<String>,
    pub holder_code: Option<String>,
    pub holder_country: Option<String>,

    // ===== 分类与剂量 =====
    pub atc_code: Option<String>,
    pub ddd_amount: Option<f64>,           // 限定日剂量
    pub ddd_unit: Option<String>,
    pub registration_status: Option<String>,
}

impl VersionedEntity for MedicinalProduct {
    const ENTITY_TYPE: EntityType = EntityType::MedicinalProduct;

    fn identity(&self) -> &EntityIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut EntityIdentity {
        &mut self.identity
    }

    fn business_key(&self) -> BusinessKey {
        BusinessKey::single(&self.code)
    }

    fn diff_business_attributes(&self, other: &Self) -> Vec<AttributeChange> {
        AttributeDiff::new()
            .field("name", &self.name, &other.name)
            .optional("strength", &self.strength, &other.strength)
            .optional("package_size", &self.package_size, &other.package_size)
            .optional("dosage_form_code", &self.dosage_form_code, &other.dosage_form_code)
            .optional("route_code", &self.route_code, &other.route_code)
            .optional("package_type_code", &self.package_type_code, &other.package_type_code)
            .optional("holder_code", &self.holder_code, &other.holder_code)
            .optional("holder_country", &self.holder_country, &other.holder_country)
            .optional("atc_code", &self.atc_code, &other.atc_code)
            .optional("ddd_amount", &self.ddd_amount, &other.ddd_amount)
            .optional("ddd_unit", &self.ddd_unit, &other.ddd_unit)
            .optional(
                "registration_status",
                &self.registration_status,
                &other.registration_status,
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn country(code: &str, name: &str) -> Country {
        Country {
            identity: EntityIdentity::default(),
            code: code.to_string(),
            name: name.to_string(),
            name_en: None,
            edqm_code: None,
        }
    }

    #[test]
    fn test_diff_ignores_identity_fields() {
        let mut old = country("CZ", "Česko");
        old.identity.id = Some(7);
        old.identity.first_seen = NaiveDate::from_ymd_opt(2020, 1, 1);
        old.identity.missing_since = NaiveDate::from_ymd_opt(2021, 1, 1);
        let new = country("CZ", "Česko");

        assert!(old.diff_business_attributes(&new).is_empty());
    }

    #[test]
    fn test_with_identity_from_keeps_id_and_first_seen() {
        let mut previous = country("CZ", "Česko");
        previous.identity.id = Some(42);
        previous.identity.first_seen = NaiveDate::from_ymd_opt(2019, 5, 1);
        previous.identity.missing_since = NaiveDate::from_ymd_opt(2020, 1, 1);

        let incoming = country("CZ", "Česká republika");
        let merged = incoming.with_identity_from(&previous);

        assert_eq!(merged.identity.id, Some(42));
        assert_eq!(merged.identity.first_seen, NaiveDate::from_ymd_opt(2019, 5, 1));
        assert_eq!(merged.identity.missing_since, None);
        assert_eq!(merged.name, "Česká republika");
    }

    #[test]
    fn test_mark_missing_sets_only_missing_since() {
        let mut previous = country("SK", "Slovensko");
        previous.identity.id = Some(3);
        let as_of = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();

        let missing = previous.mark_missing(as_of);

        assert_eq!(missing.identity.missing_since, Some(as_of));
        assert_eq!(missing.identity.id, Some(3));
        assert_eq!(missing.name, previous.name);
    }

    #[test]
    fn test_organisation_composite_key() {
        let org = Organisation {
            identity: EntityIdentity::default(),
            code: "ZENT".to_string(),
            country_code: "CZ".to_string(),
            name: "Zentiva".to_string(),
            is_manufacturer: true,
            is_holder: true,
        };
        assert_eq!(org.business_key(), BusinessKey::composite(["ZENT", "CZ"]));
    }
}
