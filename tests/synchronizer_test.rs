// ==========================================
// 药品登记数据同步系统 - 实体同步器集成测试
// ==========================================
// 覆盖: 新增 / 更新 / 软删除 / 重新出现 / 幂等 / 原子性
// 每个场景分别在内存仓储和 SQLite 仓储上执行
// ==========================================

mod test_helpers;

use registry_sync::domain::{BusinessKey, Country, EntityType, TemporaryAbsenceRecord};
use registry_sync::engine::{EntitySynchronizer, ReferenceDataCache, SyncError};
use registry_sync::repository::{
    InMemoryRepository, RepositoryError, SqliteVersionedRepository, VersionedRepository,
};
use std::sync::Arc;
use test_helpers::{country, date, shared_connection};

type CountryRepo = dyn VersionedRepository<Country>;

fn find(repo: &CountryRepo, code: &str) -> Country {
    repo.find_all()
        .unwrap()
        .into_iter()
        .find(|c| c.code == code)
        .unwrap_or_else(|| panic!("未找到 {}", code))
}

fn with_backends(scenario: impl Fn(&CountryRepo)) {
    registry_sync::logging::init_test();

    let memory = InMemoryRepository::<Country>::new();
    scenario(&memory);

    let (_temp_file, db_path) = test_helpers::create_test_db().unwrap();
    let sqlite = SqliteVersionedRepository::<Country>::from_connection(shared_connection(&db_path));
    scenario(&sqlite);
}

// ==========================================
// 新增
// ==========================================
#[test]
fn test_insert_sets_first_seen() {
    with_backends(|repo| {
        let sync = EntitySynchronizer::new();
        let report = sync
            .synchronize(repo, vec![country("CZ", "Česko")], date(2024, 1, 1))
            .unwrap();

        assert_eq!(report.inserted, 1);
        let stored = find(repo, "CZ");
        assert!(stored.identity.id.is_some());
        assert_eq!(stored.identity.first_seen, Some(date(2024, 1, 1)));
        assert_eq!(stored.identity.missing_since, None);
    });
}

// ==========================================
// 更新
// ==========================================
#[test]
fn test_update_keeps_identity_and_logs_one_change() {
    with_backends(|repo| {
        let sync = EntitySynchronizer::new();
        let mut original = country("CZ", "Česko");
        original.name_en = Some("Czechia".to_string());
        sync.synchronize(repo, vec![original.clone()], date(2024, 1, 1))
            .unwrap();
        let before = find(repo, "CZ");

        let mut renamed = original;
        renamed.name = "Česká republika".to_string();
        let report = sync
            .synchronize(repo, vec![renamed], date(2024, 2, 1))
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.attribute_changes, 1);

        let after = find(repo, "CZ");
        assert_eq!(after.identity.id, before.identity.id);
        assert_eq!(after.identity.first_seen, Some(date(2024, 1, 1)));
        assert_eq!(after.identity.valid_from, Some(date(2024, 2, 1)));
        assert_eq!(after.name, "Česká republika");
        assert_eq!(after.name_en.as_deref(), Some("Czechia"));

        let id = after.identity.id.unwrap();
        let log = repo.change_log_for(id).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].attribute, "name");
        assert_eq!(log[0].old_value.as_deref(), Some("Česko"));
        assert_eq!(log[0].new_value.as_deref(), Some("Česká republika"));
        assert_eq!(log[0].observed_as_of, date(2024, 2, 1));
    });
}

// ==========================================
// 软删除
// ==========================================
#[test]
fn test_missing_record_is_soft_deleted() {
    with_backends(|repo| {
        let sync = EntitySynchronizer::new();
        sync.synchronize(
            repo,
            vec![country("CZ", "Česko"), country("SK", "Slovensko")],
            date(2024, 1, 1),
        )
        .unwrap();
        let before = find(repo, "SK");

        let report = sync
            .synchronize(repo, vec![country("CZ", "Česko")], date(2024, 2, 1))
            .unwrap();

        assert_eq!(report.newly_missing, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(repo.find_all().unwrap().len(), 2);

        let after = find(repo, "SK");
        assert_eq!(after.identity.missing_since, Some(date(2024, 2, 1)));
        assert_eq!(after.identity.id, before.identity.id);
        assert_eq!(after.identity.first_seen, before.identity.first_seen);
        assert_eq!(after.name, before.name);

        // 再次缺失不会重复软删除
        let report = sync
            .synchronize(repo, vec![country("CZ", "Česko")], date(2024, 3, 1))
            .unwrap();
        assert_eq!(report.total_mutations(), 0);
        assert_eq!(find(repo, "SK").identity.missing_since, Some(date(2024, 2, 1)));
    });
}

// ==========================================
// 重新出现
// ==========================================
#[test]
fn test_reactivation_closes_absence() {
    with_backends(|repo| {
        let sync = EntitySynchronizer::new();
        sync.synchronize(repo, vec![country("SK", "Slovensko")], date(2024, 1, 1))
            .unwrap();
        sync.synchronize(repo, Vec::new(), date(2024, 2, 1)).unwrap();
        let missing = find(repo, "SK");

        let report = sync
            .synchronize(repo, vec![country("SK", "Slovensko")], date(2024, 5, 1))
            .unwrap();

        assert_eq!(report.reactivated, 1);
        assert_eq!(report.absences_closed, 1);
        assert_eq!(report.attribute_changes, 0);

        let back = find(repo, "SK");
        assert_eq!(back.identity.id, missing.identity.id);
        assert_eq!(back.identity.first_seen, Some(date(2024, 1, 1)));
        assert_eq!(back.identity.missing_since, None);

        let id = back.identity.id.unwrap();
        assert_eq!(
            repo.absences_for(id).unwrap(),
            vec![TemporaryAbsenceRecord {
                entity_type: EntityType::Country,
                record_id: id,
                missing_from: date(2024, 2, 1),
                missing_to: date(2024, 4, 30),
            }]
        );
    });
}

// ==========================================
// 幂等
// ==========================================
#[test]
fn test_same_snapshot_twice_is_idempotent() {
    with_backends(|repo| {
        let sync = EntitySynchronizer::new();
        let snapshot = || vec![country("CZ", "Česko"), country("SK", "Slovensko")];

        sync.synchronize(repo, snapshot(), date(2024, 1, 1)).unwrap();
        sync.synchronize(repo, vec![country("CZ", "Česko")], date(2024, 2, 1))
            .unwrap();
        sync.synchronize(repo, snapshot(), date(2024, 3, 1)).unwrap();
        let state_after_first = repo.find_all().unwrap();

        let report = sync.synchronize(repo, snapshot(), date(2024, 3, 1)).unwrap();

        assert_eq!(report.total_mutations(), 0);
        assert_eq!(report.attribute_changes, 0);
        assert_eq!(report.absences_closed, 0);
        assert_eq!(report.unchanged, 2);
        assert_eq!(repo.find_all().unwrap(), state_after_first);
    });
}

// ==========================================
// 快照内重复业务键
// ==========================================
#[test]
fn test_duplicate_keys_in_snapshot() {
    with_backends(|repo| {
        let sync = EntitySynchronizer::new();
        let report = sync
            .synchronize(
                repo,
                vec![country("CZ", "První"), country("CZ", "Druhý")],
                date(2024, 1, 1),
            )
            .unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicate_keys, 1);
        assert_eq!(find(repo, "CZ").name, "První");
    });
}

// ==========================================
// 原子性
// ==========================================
#[test]
fn test_failed_save_leaves_memory_state_untouched() {
    let repo = InMemoryRepository::<Country>::new();
    let sync = EntitySynchronizer::new();
    sync.synchronize(&repo, vec![country("CZ", "Česko")], date(2024, 1, 1))
        .unwrap();
    let before = repo.find_all().unwrap();

    repo.fail_next_save().unwrap();
    let err = sync
        .synchronize(
            &repo,
            vec![country("CZ", "Czechia"), country("PL", "Polsko")],
            date(2024, 2, 1),
        )
        .unwrap_err();

    assert!(matches!(err, SyncError::Repository(_)));
    assert_eq!(repo.find_all().unwrap(), before);
    assert!(repo.all_change_log().unwrap().is_empty());

    // 故障消除后重跑得到完整差异
    let report = sync
        .synchronize(
            &repo,
            vec![country("CZ", "Czechia"), country("PL", "Polsko")],
            date(2024, 2, 1),
        )
        .unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.updated, 1);
}

#[test]
fn test_sqlite_rolls_back_whole_change_set() {
    let (_temp_file, db_path) = test_helpers::create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    let repo = SqliteVersionedRepository::<Country>::from_connection(conn.clone());
    let sync = EntitySynchronizer::new();
    sync.synchronize(&repo, vec![country("CZ", "Česko")], date(2024, 1, 1))
        .unwrap();

    // 在 change set 提交前插入冲突行，使后续 insert 触发唯一约束
    let mut change_set = EntitySynchronizer::plan(
        repo.find_all().unwrap(),
        vec![country("CZ", "Czechia"), country("PL", "Polsko")],
        date(2024, 2, 1),
    )
    .unwrap();
    change_set.inserts.push(country("PL", "Polsko znovu"));

    let err = repo.save_all(&change_set).unwrap_err();
    assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));

    let stored = repo.find_all().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name, "Česko");
    assert!(repo
        .change_log_for(stored[0].identity.id.unwrap())
        .unwrap()
        .is_empty());
}

// ==========================================
// 缓存失效
// ==========================================
#[test]
fn test_cache_invalidated_only_after_commit() {
    let repo = Arc::new(InMemoryRepository::<Country>::new());
    let mut cache = ReferenceDataCache::new();
    cache.register::<Country, _>(Arc::clone(&repo));
    let cache = Arc::new(cache);
    let sync = EntitySynchronizer::with_cache(Arc::clone(&cache));

    sync.synchronize(&*repo, vec![country("CZ", "Česko")], date(2024, 1, 1))
        .unwrap();
    assert!(cache
        .keys(EntityType::Country)
        .unwrap()
        .contains(&BusinessKey::single("CZ")));

    // 失败的提交不失效缓存
    repo.fail_next_save().unwrap();
    let _ = sync.synchronize(&*repo, vec![country("SK", "Slovensko")], date(2024, 2, 1));
    assert!(cache.is_loaded(EntityType::Country).unwrap());

    sync.synchronize(&*repo, vec![country("SK", "Slovensko")], date(2024, 2, 1))
        .unwrap();
    assert!(!cache.is_loaded(EntityType::Country).unwrap());
    let keys = cache.keys(EntityType::Country).unwrap();
    assert!(keys.contains(&BusinessKey::single("SK")));
    // CZ 本期缺失，已软删除，不再可被引用
    assert!(!keys.contains(&BusinessKey::single("CZ")));
}

#[test]
fn test_soft_deleted_reference_becomes_resolvable_again_on_reactivation() {
    let repo = Arc::new(InMemoryRepository::<Country>::new());
    let mut cache = ReferenceDataCache::new();
    cache.register::<Country, _>(Arc::clone(&repo));
    let cache = Arc::new(cache);
    let sync = EntitySynchronizer::with_cache(Arc::clone(&cache));

    sync.synchronize(&*repo, vec![country("CZ", "Česko")], date(2024, 1, 1))
        .unwrap();
    sync.synchronize(&*repo, vec![country("SK", "Slovensko")], date(2024, 2, 1))
        .unwrap();
    assert!(!cache
        .keys(EntityType::Country)
        .unwrap()
        .contains(&BusinessKey::single("CZ")));

    sync.synchronize(
        &*repo,
        vec![country("CZ", "Česko"), country("SK", "Slovensko")],
        date(2024, 3, 1),
    )
    .unwrap();
    assert!(cache
        .keys(EntityType::Country)
        .unwrap()
        .contains(&BusinessKey::single("CZ")));
}
