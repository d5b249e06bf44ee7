// ==========================================
// 药品登记数据同步系统 - SQLite 版本化仓储
// ==========================================
// 职责: registry_record / attribute_change_log / temporary_absence 表的读写
// 存储: 所有实体类型共用一张表，业务属性以 JSON 存于 payload
// 红线: Repository 不含业务逻辑；save_all 在单个保存点内完成
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::audit::{AttributeChangeLogEntry, TemporaryAbsenceRecord};
use crate::domain::change_set::ChangeSet;
use crate::domain::types::EntityType;
use crate::domain::versioned::{BusinessKey, EntityIdentity, VersionedEntity};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::versioned_repo::VersionedRepository;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

const DATE_FORMAT: &str = "%Y-%m-%d";

// ==========================================
// SqliteVersionedRepository<T>
// ==========================================
pub struct SqliteVersionedRepository<T> {
    conn: Arc<Mutex<Connection>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SqliteVersionedRepository<T>
where
    T: VersionedEntity + Serialize + DeserializeOwned,
{
    /// 打开数据库文件并建库（幂等）
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        init_schema(&conn)?;
        Ok(Self::from_connection(Arc::new(Mutex::new(conn))))
    }

    /// 从已有连接创建仓储实例（多张表共享同一连接）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            _marker: PhantomData,
        }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按业务键查询（含已软删除记录）
    pub fn find_by_business_key(&self, key: &BusinessKey) -> RepositoryResult<Option<T>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT id, first_seen, valid_from, missing_since, payload
                FROM registry_record
                WHERE entity_type = ?1 AND business_key = ?2
                "#,
                params![T::ENTITY_TYPE.to_db_str(), key.to_db_string()],
                read_raw_row,
            )
            .optional()?;

        row.map(decode_record::<T>).transpose()
    }

    fn insert_record(tx: &Connection, record: &T, valid_from: NaiveDate) -> RepositoryResult<i64> {
        let payload = serde_json::to_string(record)?;
        tx.execute(
            r#"
            INSERT INTO registry_record (
                entity_type, business_key, first_seen, valid_from, missing_since, payload
            ) VALUES (?1, ?2, ?3, ?3, NULL, ?4)
            "#,
            params![
                T::ENTITY_TYPE.to_db_str(),
                record.business_key().to_db_string(),
                valid_from.format(DATE_FORMAT).to_string(),
                payload,
            ],
        )?;
        Ok(tx.last_insert_rowid())
    }

    /// 更新业务属性并清除 missing_since（更新与重新激活共用）
    fn update_record(tx: &Connection, record: &T, valid_from: NaiveDate) -> RepositoryResult<()> {
        let id = require_id(record)?;
        let payload = serde_json::to_string(record)?;
        let affected = tx.execute(
            r#"
            UPDATE registry_record
            SET valid_from = ?1, missing_since = NULL, payload = ?2, updated_at = datetime('now')
            WHERE id = ?3 AND entity_type = ?4
            "#,
            params![
                valid_from.format(DATE_FORMAT).to_string(),
                payload,
                id,
                T::ENTITY_TYPE.to_db_str(),
            ],
        )?;
        ensure_affected(affected, id)
    }

    fn mark_record_missing(tx: &Connection, record: &T) -> RepositoryResult<()> {
        let id = require_id(record)?;
        let missing_since = record.identity().missing_since.ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "missing_since".to_string(),
                message: format!("软删除记录 id={} 未设置 missing_since", id),
            }
        })?;
        let affected = tx.execute(
            r#"
            UPDATE registry_record
            SET missing_since = ?1, updated_at = datetime('now')
            WHERE id = ?2 AND entity_type = ?3
            "#,
            params![
                missing_since.format(DATE_FORMAT).to_string(),
                id,
                T::ENTITY_TYPE.to_db_str(),
            ],
        )?;
        ensure_affected(affected, id)
    }
}

impl<T> VersionedRepository<T> for SqliteVersionedRepository<T>
where
    T: VersionedEntity + Serialize + DeserializeOwned,
{
    fn find_all(&self) -> RepositoryResult<Vec<T>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, first_seen, valid_from, missing_since, payload
            FROM registry_record
            WHERE entity_type = ?1
            ORDER BY id
            "#,
        )?;

        let rows = stmt
            .query_map(params![T::ENTITY_TYPE.to_db_str()], read_raw_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(decode_record::<T>).collect()
    }

    fn save_all(&self, change_set: &ChangeSet<T>) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        // 保存点: 独立调用时自成事务；处于单元作用域内时随单元整体提交或回滚
        let tx = conn.savepoint()?;
        let valid_from = change_set.valid_from;
        let mut count = 0;

        for record in &change_set.inserts {
            Self::insert_record(&tx, record, valid_from)?;
            count += 1;
        }
        for record in change_set.updates.iter().chain(&change_set.reactivations) {
            Self::update_record(&tx, record, valid_from)?;
            count += 1;
        }
        for record in &change_set.newly_missing {
            Self::mark_record_missing(&tx, record)?;
            count += 1;
        }

        for entry in &change_set.change_log {
            tx.execute(
                r#"
                INSERT INTO attribute_change_log (
                    entity_type, record_id, attribute, old_value, new_value, observed_as_of
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    entry.entity_type.to_db_str(),
                    entry.record_id,
                    entry.attribute,
                    entry.old_value,
                    entry.new_value,
                    entry.observed_as_of.format(DATE_FORMAT).to_string(),
                ],
            )?;
        }
        for absence in &change_set.absences {
            tx.execute(
                r#"
                INSERT INTO temporary_absence (entity_type, record_id, missing_from, missing_to)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    absence.entity_type.to_db_str(),
                    absence.record_id,
                    absence.missing_from.format(DATE_FORMAT).to_string(),
                    absence.missing_to.format(DATE_FORMAT).to_string(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(count)
    }

    fn change_log_for(&self, record_id: i64) -> RepositoryResult<Vec<AttributeChangeLogEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT entity_type, record_id, attribute, old_value, new_value, observed_as_of
            FROM attribute_change_log
            WHERE entity_type = ?1 AND record_id = ?2
            ORDER BY log_id
            "#,
        )?;

        let rows = stmt
            .query_map(params![T::ENTITY_TYPE.to_db_str(), record_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(entity_type, record_id, attribute, old_value, new_value, as_of)| {
                Ok(AttributeChangeLogEntry {
                    entity_type: parse_entity_type(&entity_type)?,
                    record_id,
                    attribute,
                    old_value,
                    new_value,
                    observed_as_of: parse_date("observed_as_of", &as_of)?,
                })
            })
            .collect()
    }

    fn absences_for(&self, record_id: i64) -> RepositoryResult<Vec<TemporaryAbsenceRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT entity_type, record_id, missing_from, missing_to
            FROM temporary_absence
            WHERE entity_type = ?1 AND record_id = ?2
            ORDER BY absence_id
            "#,
        )?;

        let rows = stmt
            .query_map(params![T::ENTITY_TYPE.to_db_str(), record_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(entity_type, record_id, from, to)| {
                Ok(TemporaryAbsenceRecord {
                    entity_type: parse_entity_type(&entity_type)?,
                    record_id,
                    missing_from: parse_date("missing_from", &from)?,
                    missing_to: parse_date("missing_to", &to)?,
                })
            })
            .collect()
    }
}

// ==========================================
// 行解码工具
// ==========================================

struct RawRow {
    id: i64,
    first_seen: String,
    valid_from: String,
    missing_since: Option<String>,
    payload: String,
}

fn read_raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        first_seen: row.get(1)?,
        valid_from: row.get(2)?,
        missing_since: row.get(3)?,
        payload: row.get(4)?,
    })
}

fn decode_record<T: VersionedEntity + DeserializeOwned>(raw: RawRow) -> RepositoryResult<T> {
    let mut record: T = serde_json::from_str(&raw.payload)?;
    *record.identity_mut() = EntityIdentity {
        id: Some(raw.id),
        first_seen: Some(parse_date("first_seen", &raw.first_seen)?),
        valid_from: Some(parse_date("valid_from", &raw.valid_from)?),
        missing_since: raw
            .missing_since
            .as_deref()
            .map(|d| parse_date("missing_since", d))
            .transpose()?,
    };
    Ok(record)
}

fn parse_date(field: &str, raw: &str) -> RepositoryResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| RepositoryError::FieldValueError {
        field: field.to_string(),
        message: format!("{}: {}", raw, e),
    })
}

fn parse_entity_type(raw: &str) -> RepositoryResult<EntityType> {
    EntityType::from_db_str(raw).ok_or_else(|| RepositoryError::FieldValueError {
        field: "entity_type".to_string(),
        message: raw.to_string(),
    })
}

fn require_id<T: VersionedEntity>(record: &T) -> RepositoryResult<i64> {
    record
        .identity()
        .id
        .ok_or_else(|| RepositoryError::FieldValueError {
            field: "id".to_string(),
            message: format!("{} 记录缺少存储 id: {}", T::ENTITY_TYPE, record.business_key()),
        })
}

fn ensure_affected(affected: usize, id: i64) -> RepositoryResult<()> {
    if affected == 1 {
        Ok(())
    } else {
        Err(RepositoryError::NotFound {
            entity: "registry_record".to_string(),
            id: id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry::Country;

    fn repo() -> SqliteVersionedRepository<Country> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        SqliteVersionedRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn country(code: &str, name: &str) -> Country {
        Country {
            identity: EntityIdentity::default(),
            code: code.to_string(),
            name: name.to_string(),
            name_en: Some(format!("{} (en)", name)),
            edqm_code: None,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_insert_then_find_all_restores_identity() {
        let repo = repo();
        let mut change_set = ChangeSet::new(date(2024, 1, 1));
        change_set.inserts.push(country("CZ", "Cesko"));
        change_set.inserts.push(country("SK", "Slovensko"));

        assert_eq!(repo.save_all(&change_set).unwrap(), 2);

        let stored = repo.find_all().unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].identity.id.is_some());
        assert_eq!(stored[0].identity.first_seen, Some(date(2024, 1, 1)));
        assert_eq!(stored[0].identity.missing_since, None);
        assert_eq!(stored[0].name_en.as_deref(), Some("Cesko (en)"));

        let sk = repo.find_by_business_key(&BusinessKey::single("SK")).unwrap().unwrap();
        assert_eq!(sk.name, "Slovensko");
    }

    #[test]
    fn test_failed_save_rolls_back_everything() {
        let repo = repo();
        let mut first = ChangeSet::new(date(2024, 1, 1));
        first.inserts.push(country("CZ", "Cesko"));
        repo.save_all(&first).unwrap();

        // 第二个插入违反唯一约束，整批回滚
        let mut second = ChangeSet::new(date(2024, 2, 1));
        second.inserts.push(country("AT", "Rakousko"));
        second.inserts.push(country("CZ", "Cesko"));

        let err = repo.save_all(&second).unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));
        assert_eq!(repo.find_all().unwrap().len(), 1);
    }

    #[test]
    fn test_update_without_id_is_rejected() {
        let repo = repo();
        let mut change_set = ChangeSet::new(date(2024, 1, 1));
        change_set.updates.push(country("CZ", "Cesko"));

        let err = repo.save_all(&change_set).unwrap_err();
        assert!(matches!(err, RepositoryError::FieldValueError { .. }));
    }
}
