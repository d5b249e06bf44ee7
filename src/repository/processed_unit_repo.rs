// ==========================================
// 药品登记数据同步系统 - 处理单元台账
// ==========================================
// 职责: 记录已完整处理的 (数据集, 周期) 单元
// 红线: 单元内所有表提交成功后才登记；未登记的单元下次整体重试
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::types::YearMonth;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

// ==========================================
// ProcessedUnitLedger Trait
// ==========================================
// 实现者: SqliteProcessedUnitLedger, MemoryProcessedUnitLedger
pub trait ProcessedUnitLedger: Send + Sync {
    fn is_processed(&self, dataset: &str, period: YearMonth) -> RepositoryResult<bool>;

    fn mark_processed(
        &self,
        dataset: &str,
        period: YearMonth,
        valid_from: Option<NaiveDate>,
        run_id: &str,
    ) -> RepositoryResult<()>;
}

// ==========================================
// SqliteProcessedUnitLedger
// ==========================================
pub struct SqliteProcessedUnitLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProcessedUnitLedger {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        init_schema(&conn)?;
        Ok(Self::from_connection(Arc::new(Mutex::new(conn))))
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

impl ProcessedUnitLedger for SqliteProcessedUnitLedger {
    fn is_processed(&self, dataset: &str, period: YearMonth) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM processed_unit WHERE dataset = ?1 AND period = ?2",
                params![dataset, period.to_string()],
                |_row| Ok(true),
            )
            .optional()?;
        Ok(found.unwrap_or(false))
    }

    fn mark_processed(
        &self,
        dataset: &str,
        period: YearMonth,
        valid_from: Option<NaiveDate>,
        run_id: &str,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO processed_unit (dataset, period, valid_from, run_id, processed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                dataset,
                period.to_string(),
                valid_from.map(|d| d.format("%Y-%m-%d").to_string()),
                run_id,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

// ==========================================
// MemoryProcessedUnitLedger
// ==========================================
#[derive(Debug, Default)]
pub struct MemoryProcessedUnitLedger {
    units: Mutex<HashSet<(String, YearMonth)>>,
}

impl MemoryProcessedUnitLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessedUnitLedger for MemoryProcessedUnitLedger {
    fn is_processed(&self, dataset: &str, period: YearMonth) -> RepositoryResult<bool> {
        let units = self
            .units
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Ok(units.contains(&(dataset.to_string(), period)))
    }

    fn mark_processed(
        &self,
        dataset: &str,
        period: YearMonth,
        _valid_from: Option<NaiveDate>,
        _run_id: &str,
    ) -> RepositoryResult<()> {
        self.units
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?
            .insert((dataset.to_string(), period));
        Ok(())
    }
}
