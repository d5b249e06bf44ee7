// ==========================================
// 药品登记数据同步系统 - 有效期解析器
// ==========================================
// 职责: 确定快照的权威 validFrom
// 规则:
//   - 周期早于切换月: validFrom = 周期首日
//   - 切换月及以后: 包内必须含有效期文件，取首个数据行的首列日期
// 红线: 切换月后缺少有效期文件 → 文件级错误，该单元整体不处理
// ==========================================

use crate::domain::types::YearMonth;
use crate::importer::archive::SnapshotBundle;
use crate::importer::csv_row::parse_registry_date;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::text_decoder::{DecodedLines, SourceEncoding};
use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct ValidityPeriodResolver {
    cutover: YearMonth,
    file_name: String,
    encoding: SourceEncoding,
}

impl ValidityPeriodResolver {
    pub fn new(cutover: YearMonth, file_name: impl Into<String>, encoding: SourceEncoding) -> Self {
        Self {
            cutover,
            file_name: file_name.into(),
            encoding,
        }
    }

    pub fn cutover(&self) -> YearMonth {
        self.cutover
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// 该周期是否要求有效期文件
    pub fn requires_validity_file(&self, period: YearMonth) -> bool {
        period >= self.cutover
    }

    /// 解析 validFrom
    ///
    /// # 参数
    /// - period: 快照名义周期
    /// - validity_file: 有效期文件内容（切换月前忽略）
    pub fn resolve(&self, period: YearMonth, validity_file: Option<&[u8]>) -> ImportResult<NaiveDate> {
        if !self.requires_validity_file(period) {
            return Ok(period.first_day());
        }

        let bytes = validity_file.ok_or_else(|| ImportError::MissingValidityFile {
            period,
            file_name: self.file_name.clone(),
        })?;
        let valid_from = self.read_first_date(bytes)?;

        if YearMonth::from_date(valid_from) != period {
            tracing::warn!(%period, %valid_from, "有效期日期不在快照名义周期内，以有效期文件为准");
        }
        Ok(valid_from)
    }

    /// 从快照包中查找有效期文件后解析
    pub fn resolve_from_bundle(
        &self,
        period: YearMonth,
        bundle: &SnapshotBundle,
    ) -> ImportResult<NaiveDate> {
        self.resolve(period, bundle.file(&self.file_name))
    }

    /// 首个数据行的首列；首行若本身就是日期则视为无表头
    fn read_first_date(&self, bytes: &[u8]) -> ImportResult<NaiveDate> {
        let mut lines = DecodedLines::new(bytes, self.encoding);
        let mut seen_header = false;

        while let Some(line) = lines.next_line()? {
            let first_cell = line
                .split([';', ','])
                .next()
                .unwrap_or("")
                .trim()
                .trim_matches('"')
                .trim();
            if first_cell.is_empty() {
                continue;
            }

            match parse_registry_date(first_cell) {
                Some(date) => return Ok(date),
                None if !seen_header => seen_header = true,
                None => return Err(ImportError::InvalidValidityDate(first_cell.to_string())),
            }
        }

        Err(ImportError::EmptyValidityFile {
            file_name: self.file_name.clone(),
        })
    }
}
