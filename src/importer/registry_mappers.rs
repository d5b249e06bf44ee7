// ==========================================
// 药品登记数据同步系统 - 登记参考表行映射器
// ==========================================
// 职责: 每张登记表一个映射器 + 列别名声明
// 说明: 别名第一项为当前发布格式的列名，其余为历史发布中出现过的列名
// ==========================================

use crate::domain::registry::{
    AdministrationRoute, Country, DosageForm, MedicinalProduct, Organisation, PackageType,
};
use crate::domain::versioned::{BusinessKey, EntityIdentity};
use crate::importer::column_resolver::ColumnSpec;
use crate::importer::csv_row::{normalize_product_code, CsvRow, FieldResult};
use crate::importer::row_mapper::{check_reference, ReferenceKeys, RowMapper};

// ==========================================
// 国家
// ==========================================
#[derive(Debug, Default)]
pub struct CountryMapper;

impl RowMapper<Country> for CountryMapper {
    fn column_specs(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::required("code", &["ZEM", "KOD", "KOD_ZEME"]),
            ColumnSpec::required("name", &["NAZEV", "NAZ"]),
            ColumnSpec::optional("name_en", &["NAZEV_EN", "NAZ_EN"]),
            ColumnSpec::optional("edqm_code", &["KOD_EDQM", "EDQM"]),
        ]
    }

    fn map_row(&self, row: &CsvRow<'_>) -> FieldResult<Country> {
        Ok(Country {
            identity: EntityIdentity::default(),
            code: row.required_string("code")?,
            name: row.required_string("name")?,
            name_en: row.optional_string("name_en"),
            edqm_code: row.optional_string("edqm_code"),
        })
    }
}

// ==========================================
// 剂型
// ==========================================
#[derive(Debug, Default)]
pub struct DosageFormMapper;

impl RowMapper<DosageForm> for DosageFormMapper {
    fn column_specs(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::required("code", &["FORMA", "KOD"]),
            ColumnSpec::required("name", &["NAZEV", "NAZ"]),
            ColumnSpec::optional("name_en", &["NAZEV_EN", "NAZ_EN"]),
            ColumnSpec::optional("name_lat", &["NAZEV_LAT", "NAZ_LAT"]),
        ]
    }

    fn map_row(&self, row: &CsvRow<'_>) -> FieldResult<DosageForm> {
        Ok(DosageForm {
            identity: EntityIdentity::default(),
            code: row.required_string("code")?,
            name: row.required_string("name")?,
            name_en: row.optional_string("name_en"),
            name_lat: row.optional_string("name_lat"),
        })
    }
}

// ==========================================
// 给药途径
// ==========================================
#[derive(Debug, Default)]
pub struct RouteMapper;

impl RowMapper<AdministrationRoute> for RouteMapper {
    fn column_specs(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::required("code", &["CESTA", "KOD"]),
            ColumnSpec::required("name", &["NAZEV", "NAZ"]),
            ColumnSpec::optional("name_en", &["NAZEV_EN", "NAZ_EN"]),
            ColumnSpec::optional("name_lat", &["NAZEV_LAT", "NAZ_LAT"]),
        ]
    }

    fn map_row(&self, row: &CsvRow<'_>) -> FieldResult<AdministrationRoute> {
        Ok(AdministrationRoute {
            identity: EntityIdentity::default(),
            code: row.required_string("code")?,
            name: row.required_string("name")?,
            name_en: row.optional_string("name_en"),
            name_lat: row.optional_string("name_lat"),
        })
    }
}

// ==========================================
// 包装类型
// ==========================================
#[derive(Debug, Default)]
pub struct PackageTypeMapper;

impl RowMapper<PackageType> for PackageTypeMapper {
    fn column_specs(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::required("code", &["OBAL", "KOD"]),
            ColumnSpec::required("name", &["NAZEV", "NAZ"]),
            ColumnSpec::optional("name_en", &["NAZEV_EN", "NAZ_EN"]),
        ]
    }

    fn map_row(&self, row: &CsvRow<'_>) -> FieldResult<PackageType> {
        Ok(PackageType {
            identity: EntityIdentity::default(),
            code: row.required_string("code")?,
            name: row.required_string("name")?,
            name_en: row.optional_string("name_en"),
        })
    }
}

// ==========================================
// 组织（生产商 / 持证商）
// ==========================================
// 外键: country_code → 国家表
#[derive(Debug, Default)]
pub struct OrganisationMapper {
    countries: Option<ReferenceKeys>,
}

impl OrganisationMapper {
    pub fn new(countries: Option<ReferenceKeys>) -> Self {
        Self { countries }
    }
}

impl RowMapper<Organisation> for OrganisationMapper {
    fn column_specs(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::required("code", &["ZKR_ORG", "KOD"]),
            ColumnSpec::required("country", &["ZEM", "KOD_ZEME"]),
            ColumnSpec::required("name", &["NAZEV", "NAZ"]),
            ColumnSpec::optional("manufacturer", &["VYROBCE"]),
            ColumnSpec::optional("holder", &["DRZITEL"]),
        ]
    }

    fn map_row(&self, row: &CsvRow<'_>) -> FieldResult<Organisation> {
        let code = row.required_string("code")?;
        let country_code = row.required_string("country")?;
        check_reference(
            self.countries.as_ref(),
            "country",
            &BusinessKey::single(&country_code),
        )?;

        Ok(Organisation {
            identity: EntityIdentity::default(),
            code,
            country_code,
            name: row.required_string("name")?,
            is_manufacturer: row.flag("manufacturer")?,
            is_holder: row.flag("holder")?,
        })
    }
}

// ==========================================
// 药品
// ==========================================
// 外键: dosage_form_code → 剂型表；(holder_code, holder_country) → 组织表
#[derive(Debug, Default)]
pub struct ProductMapper {
    dosage_forms: Option<ReferenceKeys>,
    organisations: Option<ReferenceKeys>,
}

impl ProductMapper {
    pub fn new(dosage_forms: Option<ReferenceKeys>, organisations: Option<ReferenceKeys>) -> Self {
        Self {
            dosage_forms,
            organisations,
        }
    }
}

impl RowMapper<MedicinalProduct> for ProductMapper {
    fn column_specs(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::required("code", &["KOD_SUKL", "KOD"]),
            ColumnSpec::required("name", &["NAZEV", "NAZ"]),
            ColumnSpec::optional("strength", &["SILA"]),
            ColumnSpec::optional("package_size", &["BALENI"]),
            ColumnSpec::optional("dosage_form", &["FORMA"]),
            ColumnSpec::optional("route", &["CESTA"]),
            ColumnSpec::optional("package_type", &["OBAL"]),
            ColumnSpec::optional("holder", &["DRZ", "DRZITEL"]),
            ColumnSpec::optional("holder_country", &["ZEMDRZ", "ZEM_DRZ"]),
            ColumnSpec::optional("atc", &["ATC_WHO", "ATC"]),
            ColumnSpec::optional("ddd_amount", &["DDDAMNT_WHO", "DDD"]),
            ColumnSpec::optional("ddd_unit", &["DDDUN_WHO", "DDD_JEDNOTKA"]),
            ColumnSpec::optional("registration_status", &["REG", "STAV_REG"]),
        ]
    }

    fn map_row(&self, row: &CsvRow<'_>) -> FieldResult<MedicinalProduct> {
        let code = normalize_product_code(&row.required_string("code")?);
        let name = row.required_string("name")?;

        let dosage_form_code = row.optional_string("dosage_form");
        if let Some(form) = &dosage_form_code {
            check_reference(
                self.dosage_forms.as_ref(),
                "dosage_form",
                &BusinessKey::single(form),
            )?;
        }

        let holder_code = row.optional_string("holder");
        let holder_country = row.optional_string("holder_country");
        if let (Some(holder), Some(country)) = (&holder_code, &holder_country) {
            check_reference(
                self.organisations.as_ref(),
                "holder",
                &BusinessKey::composite([holder.as_str(), country.as_str()]),
            )?;
        }

        Ok(MedicinalProduct {
            identity: EntityIdentity::default(),
            code,
            name,
            strength: row.optional_string("strength"),
            package_size: row.optional_string("package_size"),
            dosage_form_code,
            route_code: row.optional_string("route"),
            package_type_code: row.optional_string("package_type"),
            holder_code,
            holder_country,
            atc_code: row.optional_string("atc"),
            ddd_amount: row.decimal("ddd_amount")?,
            ddd_unit: row.optional_string("ddd_unit"),
            registration_status: row.optional_string("registration_status"),
        })
    }
}
