// ==========================================
// 药品登记数据同步系统 - 处理单元作用域
// ==========================================
// 职责: 让一个 (数据集, 周期) 单元内各表的写入整体提交或整体回滚
// 实现: SQLite 用共享连接上的具名保存点；内存仓储用检查点快照
// 红线: 同一连接上同一时刻只允许一个单元作用域
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

const UNIT_SAVEPOINT: &str = "registry_unit";

// ==========================================
// UnitScope Trait
// ==========================================
// 实现者: SqliteUnitScope, MemoryUnitScope
pub trait UnitScope: Send + Sync {
    fn begin(&self) -> RepositoryResult<()>;

    fn commit(&self) -> RepositoryResult<()>;

    fn rollback(&self) -> RepositoryResult<()>;
}

// ==========================================
// SqliteUnitScope
// ==========================================
pub struct SqliteUnitScope {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUnitScope {
    /// 必须与各仓储共享同一连接
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn execute(&self, sql: &str) -> RepositoryResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

impl UnitScope for SqliteUnitScope {
    fn begin(&self) -> RepositoryResult<()> {
        self.execute(&format!("SAVEPOINT {}", UNIT_SAVEPOINT))
    }

    fn commit(&self) -> RepositoryResult<()> {
        self.execute(&format!("RELEASE {}", UNIT_SAVEPOINT))
    }

    fn rollback(&self) -> RepositoryResult<()> {
        self.execute(&format!(
            "ROLLBACK TO {sp}; RELEASE {sp}",
            sp = UNIT_SAVEPOINT
        ))
    }
}

// ==========================================
// Checkpoint Trait - 可整体回退的内存存储
// ==========================================
pub trait Checkpoint: Send + Sync {
    /// 记录当前状态
    fn checkpoint(&self) -> RepositoryResult<()>;

    /// 丢弃检查点，保留当前状态
    fn release_checkpoint(&self) -> RepositoryResult<()>;

    /// 回退到检查点
    fn restore_checkpoint(&self) -> RepositoryResult<()>;
}

// ==========================================
// MemoryUnitScope
// ==========================================
#[derive(Default)]
pub struct MemoryUnitScope {
    participants: Vec<Arc<dyn Checkpoint>>,
}

impl MemoryUnitScope {
    pub fn new(participants: Vec<Arc<dyn Checkpoint>>) -> Self {
        Self { participants }
    }
}

impl UnitScope for MemoryUnitScope {
    fn begin(&self) -> RepositoryResult<()> {
        self.participants.iter().try_for_each(|p| p.checkpoint())
    }

    fn commit(&self) -> RepositoryResult<()> {
        self.participants.iter().try_for_each(|p| p.release_checkpoint())
    }

    fn rollback(&self) -> RepositoryResult<()> {
        self.participants.iter().try_for_each(|p| p.restore_checkpoint())
    }
}
