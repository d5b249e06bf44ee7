// ==========================================
// 药品登记数据同步系统 - 流转交易数据
// ==========================================
// 职责: 追加型月度流转数据集（按地区的药品发放量）
// 红线: 非版本化数据，不参与快照对账
// ==========================================

use crate::domain::types::YearMonth;
use serde::{Deserialize, Serialize};

// ==========================================
// DispensingRecord - 药房发放记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispensingRecord {
    pub period: YearMonth,      // 统计周期（源格式 yyyy.mm）
    pub product_code: String,   // 药品编码（已补齐前导零）
    pub region_code: String,    // 地区代码
    pub quantity: f64,          // 发放包装数
    pub amount: Option<f64>,    // 金额
}

impl DispensingRecord {
    /// 聚合键: (周期, 药品, 地区)
    pub fn aggregation_key(&self) -> (YearMonth, String, String) {
        (self.period, self.product_code.clone(), self.region_code.clone())
    }
}
