// ==========================================
// 药品登记数据同步系统 - 发放数据仓储
// ==========================================
// 职责: dispensing_record 表读写（按周期整体替换）
// 红线: 同一周期重复导入结果一致；替换在单个事务内完成
// ==========================================

use crate::domain::movement::DispensingRecord;
use crate::domain::types::YearMonth;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

// ==========================================
// DispensingRepository Trait
// ==========================================
// 实现者: SqliteDispensingRepository, MemoryDispensingRepository
pub trait DispensingRepository: Send + Sync {
    /// 以本次导入结果整体替换该周期数据
    fn replace_period(&self, period: YearMonth, records: &[DispensingRecord]) -> RepositoryResult<usize>;

    fn find_by_period(&self, period: YearMonth) -> RepositoryResult<Vec<DispensingRecord>>;
}

// ==========================================
// SqliteDispensingRepository
// ==========================================
pub struct SqliteDispensingRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDispensingRepository {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

impl DispensingRepository for SqliteDispensingRepository {
    fn replace_period(&self, period: YearMonth, records: &[DispensingRecord]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM dispensing_record WHERE period = ?1",
            params![period.to_string()],
        )?;

        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO dispensing_record (period, product_code, region_code, quantity, amount)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for record in records {
                stmt.execute(params![
                    record.period.to_string(),
                    record.product_code,
                    record.region_code,
                    record.quantity,
                    record.amount,
                ])?;
                count += 1;
            }
        }

        tx.commit()?;
        Ok(count)
    }

    fn find_by_period(&self, period: YearMonth) -> RepositoryResult<Vec<DispensingRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT product_code, region_code, quantity, amount
            FROM dispensing_record
            WHERE period = ?1
            ORDER BY product_code, region_code
            "#,
        )?;

        let records = stmt
            .query_map(params![period.to_string()], |row| {
                Ok(DispensingRecord {
                    period,
                    product_code: row.get(0)?,
                    region_code: row.get(1)?,
                    quantity: row.get(2)?,
                    amount: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }
}

// ==========================================
// MemoryDispensingRepository
// ==========================================
#[derive(Debug, Default)]
pub struct MemoryDispensingRepository {
    periods: Mutex<BTreeMap<YearMonth, Vec<DispensingRecord>>>,
}

impl MemoryDispensingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DispensingRepository for MemoryDispensingRepository {
    fn replace_period(&self, period: YearMonth, records: &[DispensingRecord]) -> RepositoryResult<usize> {
        self.periods
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?
            .insert(period, records.to_vec());
        Ok(records.len())
    }

    fn find_by_period(&self, period: YearMonth) -> RepositoryResult<Vec<DispensingRecord>> {
        Ok(self
            .periods
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?
            .get(&period)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    #[test]
    fn test_replace_period_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let repo = SqliteDispensingRepository::from_connection(Arc::new(Mutex::new(conn)));
        let period = YearMonth::new(2024, 3).unwrap();
        let records = vec![DispensingRecord {
            period,
            product_code: "0000001".to_string(),
            region_code: "PHA".to_string(),
            quantity: 3.5,
            amount: Some(120.0),
        }];

        repo.replace_period(period, &records).unwrap();
        repo.replace_period(period, &records).unwrap();

        assert_eq!(repo.find_by_period(period).unwrap(), records);
    }
}
