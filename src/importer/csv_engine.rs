// ==========================================
// 药品登记数据同步系统 - CSV 导入引擎
// ==========================================
// 职责: 表头解析 → 逐行切分 → 行映射 → 失败登记
// 形式: 完整物化 (import) / 流式 (import_stream)
// 红线: 单行失败不中断导入；空行在计数前跳过；原始行逐字保留
// ==========================================

use crate::domain::types::FailureReason;
use crate::importer::column_resolver::{resolve_columns, ColumnSpec, ResolvedColumns};
use crate::importer::csv_row::{CsvRow, RowMappingResult};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::import_result::{DataImportResult, ImportStats, RowFailure};
use crate::importer::row_mapper::RowMapper;
use crate::importer::text_decoder::{DecodedLines, SourceEncoding};
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read};
use std::marker::PhantomData;

// ==========================================
// CsvOptions - 单次导入的格式参数
// ==========================================
// 分隔符与编码按数据集固定配置，不做嗅探
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvOptions {
    pub label: String, // 数据集名称（日志与错误信息用）
    pub separator: u8,
    pub encoding: SourceEncoding,
}

impl CsvOptions {
    pub fn new(label: impl Into<String>, separator: u8, encoding: SourceEncoding) -> Self {
        Self {
            label: label.into(),
            separator,
            encoding,
        }
    }
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self::new("csv", b';', SourceEncoding::Utf8)
    }
}

// ==========================================
// CsvImportEngine
// ==========================================
pub struct CsvImportEngine;

impl CsvImportEngine {
    /// 完整物化导入
    ///
    /// # 返回
    /// - Ok(DataImportResult): successes + failures == total_rows
    /// - Err: 文件级错误（空文件、必需列缺失、读取失败）
    pub fn import<T, M, R>(
        source: R,
        specs: &[ColumnSpec],
        mapper: &M,
        options: &CsvOptions,
    ) -> ImportResult<DataImportResult<T>>
    where
        M: RowMapper<T> + ?Sized,
        R: Read,
    {
        let mut rows = RowReader::open(BufReader::new(source), specs, options)?;
        let mut result = DataImportResult {
            successes: Vec::new(),
            failures: Vec::new(),
            total_rows: 0,
        };

        while let Some((row_number, mapped)) = rows.next_row(mapper)? {
            result.total_rows += 1;
            match mapped {
                RowMappingResult::Success(record) => result.successes.push(record),
                RowMappingResult::Failure {
                    reason,
                    column,
                    message,
                    raw_line,
                } => {
                    log_row_failure(&options.label, row_number, reason, column.as_deref(), &raw_line);
                    result.failures.push(RowFailure {
                        row_number,
                        reason,
                        column,
                        message,
                        raw_line,
                    });
                }
            }
        }

        result.stats().log_summary(&options.label);
        Ok(result)
    }

    /// 流式导入
    ///
    /// 成功记录逐条产出；失败只累加到 stats，不留存
    /// 表头错误在此立即返回，读取中途的 I/O 错误作为迭代项返回后结束
    pub fn import_stream<'a, T, M, R>(
        reader: R,
        specs: &[ColumnSpec],
        mapper: &'a M,
        options: &CsvOptions,
        stats: &'a mut ImportStats,
    ) -> ImportResult<CsvRowStream<'a, R, M, T>>
    where
        M: RowMapper<T> + ?Sized,
        R: BufRead,
    {
        let rows = RowReader::open(reader, specs, options)?;
        Ok(CsvRowStream {
            rows,
            mapper,
            stats,
            label: options.label.clone(),
            finished: false,
            _marker: PhantomData,
        })
    }
}

impl CsvImportEngine {
    /// 仅校验表头（不读数据行）
    ///
    /// # 错误
    /// - 与 import 相同的文件级错误：空文件、必需列缺失、编码或切分失败
    pub fn check_header<R>(
        reader: R,
        specs: &[ColumnSpec],
        options: &CsvOptions,
    ) -> ImportResult<ResolvedColumns>
    where
        R: BufRead,
    {
        RowReader::open(reader, specs, options).map(|rows| rows.columns)
    }
}

fn log_row_failure(
    label: &str,
    row_number: usize,
    reason: FailureReason,
    column: Option<&str>,
    raw_line: &str,
) {
    tracing::debug!(
        dataset = %label,
        row = row_number,
        reason = %reason,
        column = column.unwrap_or("-"),
        raw_line = %raw_line,
        "行映射失败"
    );
}

// ==========================================
// CsvRowStream - 流式导入迭代器
// ==========================================
pub struct CsvRowStream<'a, R: BufRead, M: ?Sized, T> {
    rows: RowReader<R>,
    mapper: &'a M,
    stats: &'a mut ImportStats,
    label: String,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, R, M, T> Iterator for CsvRowStream<'a, R, M, T>
where
    R: BufRead,
    M: RowMapper<T> + ?Sized,
{
    type Item = ImportResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.rows.next_row(self.mapper) {
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
                Ok(None) => {
                    self.finished = true;
                    self.stats.log_summary(&self.label);
                    return None;
                }
                Ok(Some((_, RowMappingResult::Success(record)))) => {
                    self.stats.record_success();
                    return Some(Ok(record));
                }
                Ok(Some((row_number, RowMappingResult::Failure { reason, column, raw_line, .. }))) => {
                    log_row_failure(&self.label, row_number, reason, column.as_deref(), &raw_line);
                    self.stats.record_failure(reason, column.as_deref());
                }
            }
        }
    }
}

// ==========================================
// RowReader - 行读取与切分（两种导入形式共用）
// ==========================================
struct RowReader<R: BufRead> {
    lines: DecodedLines<R>,
    columns: ResolvedColumns,
    separator: u8,
    row_number: usize,
}

impl<R: BufRead> RowReader<R> {
    /// 读取首个非空行作为表头并解析列位置
    fn open(reader: R, specs: &[ColumnSpec], options: &CsvOptions) -> ImportResult<Self> {
        let mut lines = DecodedLines::new(reader, options.encoding);

        let header_line = loop {
            match lines.next_line()? {
                None => return Err(ImportError::EmptyFile(options.label.clone())),
                Some(line) if is_blank(&line, options.separator) => continue,
                Some(line) => break line,
            }
        };
        let header = split_line(&header_line, options.separator)?;
        let columns = resolve_columns(&header, specs)?;

        tracing::debug!(
            dataset = %options.label,
            columns = header.len(),
            absent = ?columns.absent_fields(),
            "表头解析完成"
        );

        Ok(Self {
            lines,
            columns,
            separator: options.separator,
            row_number: 0,
        })
    }

    /// 读取下一数据行并映射（跳过空行）
    fn next_row<T, M>(&mut self, mapper: &M) -> ImportResult<Option<(usize, RowMappingResult<T>)>>
    where
        M: RowMapper<T> + ?Sized,
    {
        loop {
            let line = match self.lines.next_line()? {
                Some(line) => line,
                None => return Ok(None),
            };
            if is_blank(&line, self.separator) {
                continue;
            }

            self.row_number += 1;
            let mapped = match split_line(&line, self.separator) {
                Ok(values) => {
                    let row = CsvRow::new(&self.columns, values, &line, self.row_number);
                    mapper.map(&row)
                }
                Err(err) => RowMappingResult::Failure {
                    reason: FailureReason::ParseError,
                    column: None,
                    message: err.to_string(),
                    raw_line: line.clone(),
                },
            };
            return Ok(Some((self.row_number, mapped)));
        }
    }
}

/// 空行: 只含空白、分隔符或引号
fn is_blank(line: &str, separator: u8) -> bool {
    line.chars()
        .all(|c| c.is_whitespace() || c == '"' || c == char::from(separator))
}

/// 按分隔符切分单行（支持引号包裹的字段）
fn split_line(line: &str, separator: u8) -> ImportResult<Vec<String>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(separator)
        .from_reader(line.as_bytes());

    let mut record = StringRecord::new();
    reader.read_record(&mut record)?;
    Ok(record.iter().map(str::to_string).collect())
}
