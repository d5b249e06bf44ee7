// ==========================================
// 药品登记数据同步系统 - 发放数据行映射器
// ==========================================
// 职责: 月度发放明细 → DispensingRecord
// 外键: product_code → 药品表（未同步的编码记为 UNKNOWN_REFERENCE）
// ==========================================

use crate::domain::movement::DispensingRecord;
use crate::domain::versioned::BusinessKey;
use crate::importer::column_resolver::ColumnSpec;
use crate::importer::csv_row::{normalize_product_code, CsvRow, FieldResult};
use crate::importer::row_mapper::{check_reference, ReferenceKeys, RowMapper};

#[derive(Debug, Default)]
pub struct DispensingMapper {
    products: Option<ReferenceKeys>,
}

impl DispensingMapper {
    pub fn new(products: Option<ReferenceKeys>) -> Self {
        Self { products }
    }
}

impl RowMapper<DispensingRecord> for DispensingMapper {
    fn column_specs(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::required("period", &["OBDOBI", "ROK_MESIC"]),
            ColumnSpec::required("product_code", &["KOD_SUKL", "KOD"]),
            ColumnSpec::required("region", &["KRAJ", "KOD_KRAJE", "REGION"]),
            ColumnSpec::required("quantity", &["POCET_BALENI", "MNOZSTVI"]),
            ColumnSpec::optional("amount", &["CENA", "CENA_CELKEM"]),
        ]
    }

    fn map_row(&self, row: &CsvRow<'_>) -> FieldResult<DispensingRecord> {
        let period = row.required_year_month("period")?;
        let product_code = normalize_product_code(&row.required_string("product_code")?);
        let region_code = row.required_string("region")?.to_uppercase();
        let quantity = row.required_decimal("quantity")?;
        let amount = row.decimal("amount")?;

        check_reference(
            self.products.as_ref(),
            "product_code",
            &BusinessKey::single(&product_code),
        )?;

        Ok(DispensingRecord {
            period,
            product_code,
            region_code,
            quantity,
            amount,
        })
    }
}
