// ==========================================
// 药品登记数据同步系统 - 导入结果与统计
// ==========================================
// 职责: 行级失败登记 + 按原因 / 原因+列 的分组汇总
// 红线: successes + failures == total_rows，任何行级失败不得从汇总中丢失
// ==========================================

use crate::domain::types::FailureReason;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// RowFailure - 行级失败记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row_number: usize,
    pub reason: FailureReason,
    pub column: Option<String>,
    pub message: String,
    pub raw_line: String, // 原始行，逐字保留
}

// ==========================================
// DataImportResult - 完整物化的导入结果
// ==========================================
#[derive(Debug, Clone)]
pub struct DataImportResult<T> {
    pub successes: Vec<T>,
    pub failures: Vec<RowFailure>,
    pub total_rows: usize,
}

impl<T> DataImportResult<T> {
    /// 按失败原因分组计数
    pub fn failures_by_reason(&self) -> BTreeMap<FailureReason, usize> {
        let mut groups = BTreeMap::new();
        for failure in &self.failures {
            *groups.entry(failure.reason).or_insert(0) += 1;
        }
        groups
    }

    /// 按 (失败原因, 列) 分组计数
    pub fn failures_by_reason_and_column(&self) -> BTreeMap<(FailureReason, Option<String>), usize> {
        let mut groups = BTreeMap::new();
        for failure in &self.failures {
            *groups
                .entry((failure.reason, failure.column.clone()))
                .or_insert(0) += 1;
        }
        groups
    }

    /// 转换为与流式导入相同口径的统计
    pub fn stats(&self) -> ImportStats {
        let mut stats = ImportStats::default();
        for _ in &self.successes {
            stats.record_success();
        }
        for failure in &self.failures {
            stats.record_failure(failure.reason, failure.column.as_deref());
        }
        stats
    }
}

// ==========================================
// ImportStats - 流式导入统计
// ==========================================
// 失败只计数不留存，内存占用与行数无关
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    pub total_rows: usize,
    pub successes: usize,
    pub failures_by_reason: BTreeMap<FailureReason, usize>,
    pub failures_by_reason_and_column: BTreeMap<String, usize>, // 键: "原因/列"
}

impl ImportStats {
    pub fn record_success(&mut self) {
        self.total_rows += 1;
        self.successes += 1;
    }

    pub fn record_failure(&mut self, reason: FailureReason, column: Option<&str>) {
        self.total_rows += 1;
        *self.failures_by_reason.entry(reason).or_insert(0) += 1;
        let key = format!("{}/{}", reason, column.unwrap_or("-"));
        *self.failures_by_reason_and_column.entry(key).or_insert(0) += 1;
    }

    pub fn failures(&self) -> usize {
        // 反序列化的统计可能不一致
        self.total_rows.saturating_sub(self.successes)
    }

    /// 输出汇总日志（有失败时为 warn）
    pub fn log_summary(&self, dataset: &str) {
        if self.failures() == 0 {
            tracing::info!(
                dataset = %dataset,
                success = self.successes,
                total = self.total_rows,
                "CSV 导入完成"
            );
        } else {
            tracing::warn!(
                dataset = %dataset,
                success = self.successes,
                total = self.total_rows,
                by_reason = ?self.failures_by_reason,
                by_reason_and_column = ?self.failures_by_reason_and_column,
                "CSV 导入完成（存在行级失败）"
            );
        }
    }
}
