// ==========================================
// 药品登记数据同步系统 - 地区重复行合并
// ==========================================
// 职责: 行映射之后、按键消费之前，合并 (周期, 药品, 地区) 相同的发放行
// 说明: 源文件中首都地区代码按区县拆分后仍以同一代码出现多次，需求和
// 红线: 合并结果保持首次出现顺序；合计数量与金额不丢失
// ==========================================

use crate::domain::movement::DispensingRecord;
use crate::domain::types::YearMonth;
use std::collections::{HashMap, HashSet};

/// 默认允许重复出现的地区代码（首都）
pub const DEFAULT_REPEATING_REGIONS: &[&str] = &["PHA"];

// ==========================================
// MergeOutcome - 合并结果
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub records: Vec<DispensingRecord>,
    pub folded_rows: usize,            // 被并入前一行的行数
    pub unexpected_duplicates: usize, // 非预期地区出现的重复行
}

// ==========================================
// RegionalDuplicateMerge
// ==========================================
#[derive(Debug, Clone)]
pub struct RegionalDuplicateMerge {
    repeating_regions: HashSet<String>,
}

impl Default for RegionalDuplicateMerge {
    fn default() -> Self {
        Self::new(DEFAULT_REPEATING_REGIONS.iter().copied())
    }
}

impl RegionalDuplicateMerge {
    pub fn new<I, S>(repeating_regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            repeating_regions: repeating_regions
                .into_iter()
                .map(|r| r.as_ref().trim().to_uppercase())
                .collect(),
        }
    }

    /// 合并重复行
    ///
    /// 所有重复键都会求和；不在预期地区集合内的重复额外计数并告警
    pub fn merge(&self, records: Vec<DispensingRecord>) -> MergeOutcome {
        let mut outcome = MergeOutcome {
            records: Vec::with_capacity(records.len()),
            ..Default::default()
        };
        let mut index: HashMap<(YearMonth, String, String), usize> = HashMap::new();

        for record in records {
            let key = record.aggregation_key();
            match index.get(&key) {
                Some(&pos) => {
                    let target = &mut outcome.records[pos];
                    target.quantity += record.quantity;
                    target.amount = match (target.amount, record.amount) {
                        (None, None) => None,
                        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
                    };
                    outcome.folded_rows += 1;

                    if !self.repeating_regions.contains(&record.region_code) {
                        outcome.unexpected_duplicates += 1;
                        tracing::warn!(
                            period = %record.period,
                            product = %record.product_code,
                            region = %record.region_code,
                            "非预期地区出现重复行，已合并"
                        );
                    }
                }
                None => {
                    index.insert(key, outcome.records.len());
                    outcome.records.push(record);
                }
            }
        }

        tracing::debug!(
            folded = outcome.folded_rows,
            unexpected = outcome.unexpected_duplicates,
            remaining = outcome.records.len(),
            "地区重复行合并完成"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(product: &str, region: &str, quantity: f64, amount: Option<f64>) -> DispensingRecord {
        DispensingRecord {
            period: YearMonth::new(2024, 3).unwrap(),
            product_code: product.to_string(),
            region_code: region.to_string(),
            quantity,
            amount,
        }
    }

    #[test]
    fn test_metropolitan_rows_summed_in_first_position() {
        let outcome = RegionalDuplicateMerge::default().merge(vec![
            record("0000001", "PHA", 2.0, Some(10.0)),
            record("0000001", "JHM", 1.0, None),
            record("0000001", "PHA", 3.0, None),
            record("0000001", "PHA", 1.5, Some(5.0)),
        ]);

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.folded_rows, 2);
        assert_eq!(outcome.unexpected_duplicates, 0);
        assert_eq!(outcome.records[0].region_code, "PHA");
        assert_eq!(outcome.records[0].quantity, 6.5);
        assert_eq!(outcome.records[0].amount, Some(15.0));
        assert_eq!(outcome.records[1].amount, None);
    }

    #[test]
    fn test_unexpected_region_duplicate_counted() {
        let outcome = RegionalDuplicateMerge::new(["pha"]).merge(vec![
            record("0000001", "JHM", 1.0, None),
            record("0000001", "JHM", 1.0, None),
        ]);

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].quantity, 2.0);
        assert_eq!(outcome.unexpected_duplicates, 1);
    }
}
