// ==========================================
// 药品登记数据同步系统 - 快照同步端到端测试
// ==========================================
// 覆盖: 快照包 → 有效期解析 → 分表导入 → 同步 → 处理单元台账
// ==========================================

mod test_helpers;

use registry_sync::config::dataset_names;
use registry_sync::domain::{FailureReason, YearMonth};
use registry_sync::engine::{SnapshotSynchronizer, SyncError, UnitOutcome};
use registry_sync::importer::{ImportError, SnapshotBundle};
use registry_sync::repository::{DispensingRepository, VersionedRepository};
use std::sync::Arc;
use test_helpers::{build_zip, date, shared_connection, utf8_settings};

const COUNTRIES: &str = "ZEM;NAZEV\nCZ;Česko\nSK;Slovensko\n";
const FORMS: &str = "FORMA;NAZEV\nTBL;Tableta\nSIR;Sirup\n";
const ROUTES: &str = "CESTA;NAZEV\nPOR;Perorální podání\n";
const PACKAGES: &str = "OBAL;NAZEV\nBLI;Blistr\n";
const ORGANISATIONS: &str =
    "ZKR_ORG;ZEM;NAZEV;VYROBCE;DRZITEL\nZEN;CZ;Zentiva;A;A\nBAY;DE;Bayer;A;N\n";
const PRODUCTS: &str = "KOD_SUKL;NAZEV;FORMA;CESTA;DRZ;ZEMDRZ\n\
                        1234;Paralen;TBL;POR;ZEN;CZ\n\
                        1235;Ibalgin;GEL;POR;ZEN;CZ\n\
                        1236;Nurofen;SIR;POR;;\n";

fn ym(y: i32, m: u32) -> YearMonth {
    YearMonth::new(y, m).unwrap()
}

/// 平铺 ZIP 快照包的文件列表
fn registry_entries<'a>(validity: Option<&'a str>) -> Vec<(&'a str, &'a [u8])> {
    let mut entries: Vec<(&str, &[u8])> = vec![
        ("dlp_zeme.csv", COUNTRIES.as_bytes()),
        ("dlp_formy.csv", FORMS.as_bytes()),
        ("dlp_cesty.csv", ROUTES.as_bytes()),
        ("dlp_obaly.csv", PACKAGES.as_bytes()),
        ("dlp_organizace.csv", ORGANISATIONS.as_bytes()),
        ("dlp_lecivepripravky.csv", PRODUCTS.as_bytes()),
    ];
    if let Some(text) = validity {
        entries.push(("dlp_platnost.csv", text.as_bytes()));
    }
    entries
}

fn registry_zip(validity: Option<&str>) -> Vec<u8> {
    build_zip(&registry_entries(validity))
}

#[test]
fn test_registry_snapshot_on_sqlite() {
    registry_sync::logging::init_test();
    let (_temp_file, db_path) = test_helpers::create_test_db().unwrap();
    let sync = SnapshotSynchronizer::sqlite(shared_connection(&db_path), Arc::new(utf8_settings()));
    let period = ym(2024, 3);

    let outcome = sync
        .sync_registry_bytes(
            "dlp2024_03.zip",
            registry_zip(Some("PLATNOST_OD\n15.03.2024\n")),
            period,
        )
        .unwrap();

    let summary = outcome.completed().expect("首次执行应完成");
    assert_eq!(summary.valid_from, date(2024, 3, 15));
    assert_eq!(summary.tables.len(), 6);

    let countries = summary.table(dataset_names::COUNTRIES).unwrap();
    assert_eq!(countries.report.inserted, 2);

    // 国家 DE 不在国家表中
    let organisations = summary.table(dataset_names::ORGANISATIONS).unwrap();
    assert_eq!(organisations.import.successes, 1);
    assert_eq!(
        organisations.import.failures_by_reason.get(&FailureReason::UnknownReference),
        Some(&1)
    );

    // 剂型 GEL 不在剂型表中；持有人为空时不校验组织
    let products = summary.table(dataset_names::PRODUCTS).unwrap();
    assert_eq!(products.import.total_rows, 3);
    assert_eq!(products.import.successes, 2);
    assert_eq!(
        products
            .import
            .failures_by_reason_and_column
            .get("UNKNOWN_REFERENCE/dosage_form"),
        Some(&1)
    );
    assert_eq!(products.report.inserted, 2);

    let stored = sync.repositories().products.find_all().unwrap();
    let paralen = stored.iter().find(|p| p.code == "0001234").unwrap();
    assert_eq!(paralen.identity.first_seen, Some(date(2024, 3, 15)));
    assert_eq!(paralen.dosage_form_code.as_deref(), Some("TBL"));
}

#[test]
fn test_processed_unit_is_skipped() {
    let sync = SnapshotSynchronizer::in_memory(Arc::new(utf8_settings()));
    let bundle =
        SnapshotBundle::open("dlp.zip", registry_zip(Some("15.03.2024\n")), None).unwrap();

    let first = sync.sync_registry_snapshot(&bundle, ym(2024, 3)).unwrap();
    assert!(matches!(first, UnitOutcome::Completed(_)));

    let second = sync.sync_registry_snapshot(&bundle, ym(2024, 3)).unwrap();
    assert_eq!(second, UnitOutcome::AlreadyProcessed);
}

#[test]
fn test_missing_validity_file_after_cutover() {
    let sync = SnapshotSynchronizer::in_memory(Arc::new(utf8_settings()));
    let period = ym(2024, 3);

    let err = sync
        .sync_registry_bytes("dlp.zip", registry_zip(None), period)
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Import(ImportError::MissingValidityFile { .. })
    ));
    assert!(sync.repositories().countries.find_all().unwrap().is_empty());

    // 单元未登记，补齐文件后可重跑
    let outcome = sync
        .sync_registry_bytes("dlp.zip", registry_zip(Some("01.03.2024\n")), period)
        .unwrap();
    assert!(matches!(outcome, UnitOutcome::Completed(_)));
}

#[test]
fn test_pre_cutover_uses_first_day_of_month() {
    let sync = SnapshotSynchronizer::in_memory(Arc::new(utf8_settings()));

    let summary = sync
        .sync_registry_bytes("dlp.zip", registry_zip(None), ym(2020, 11))
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(summary.valid_from, date(2020, 11, 1));
}

#[test]
fn test_missing_table_file_fails_unit() {
    let sync = SnapshotSynchronizer::in_memory(Arc::new(utf8_settings()));
    let mut entries = registry_entries(Some("01.03.2024\n"));
    entries.retain(|(name, _)| *name != "dlp_obaly.csv");

    let err = sync
        .sync_registry_bytes("dlp.zip", build_zip(&entries), ym(2024, 3))
        .unwrap_err();

    assert!(matches!(err, SyncError::Import(ImportError::FileNotInBundle(_))));
    // 预检在任何写入之前失败
    assert!(sync.repositories().countries.find_all().unwrap().is_empty());
    assert!(sync.repositories().organisations.find_all().unwrap().is_empty());
}

#[test]
fn test_missing_products_file_leaves_no_table_committed() {
    let (_temp_file, db_path) = test_helpers::create_test_db().unwrap();
    let sync = SnapshotSynchronizer::sqlite(shared_connection(&db_path), Arc::new(utf8_settings()));
    let mut entries = registry_entries(Some("01.03.2024\n"));
    entries.retain(|(name, _)| *name != "dlp_lecivepripravky.csv");

    let err = sync
        .sync_registry_bytes("dlp.zip", build_zip(&entries), ym(2024, 3))
        .unwrap_err();

    assert!(matches!(err, SyncError::Import(ImportError::FileNotInBundle(_))));
    assert!(sync.repositories().countries.find_all().unwrap().is_empty());
}

#[test]
fn test_missing_column_in_last_table_leaves_no_table_committed() {
    let (_temp_file, db_path) = test_helpers::create_test_db().unwrap();
    let sync = SnapshotSynchronizer::sqlite(shared_connection(&db_path), Arc::new(utf8_settings()));
    let period = ym(2024, 3);
    let mut entries = registry_entries(Some("01.03.2024\n"));
    entries[5] = ("dlp_lecivepripravky.csv", "KOD_SUKL;POPIS\n1234;x\n".as_bytes());

    let err = sync
        .sync_registry_bytes("dlp.zip", build_zip(&entries), period)
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Import(ImportError::MissingRequiredColumn { ref field, .. }) if field == "name"
    ));
    let repos = sync.repositories();
    assert!(repos.countries.find_all().unwrap().is_empty());
    assert!(repos.organisations.find_all().unwrap().is_empty());

    // 单元未登记，修正文件后整体重跑
    let outcome = sync
        .sync_registry_bytes("dlp.zip", registry_zip(Some("01.03.2024\n")), period)
        .unwrap();
    assert!(matches!(outcome, UnitOutcome::Completed(_)));
    assert_eq!(repos.countries.find_all().unwrap().len(), 2);
}

#[test]
fn test_store_failure_in_last_table_rolls_back_whole_unit() {
    let (_temp_file, db_path) = test_helpers::create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    let sync = SnapshotSynchronizer::sqlite(conn.clone(), Arc::new(utf8_settings()));
    let period = ym(2024, 3);
    conn.lock()
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_products BEFORE INSERT ON registry_record
             WHEN NEW.entity_type = 'MEDICINAL_PRODUCT'
             BEGIN SELECT RAISE(ABORT, 'products rejected'); END;",
        )
        .unwrap();

    let err = sync
        .sync_registry_bytes("dlp.zip", registry_zip(Some("01.03.2024\n")), period)
        .unwrap_err();

    assert!(matches!(err, SyncError::Repository(_)));
    let repos = sync.repositories();
    assert!(repos.countries.find_all().unwrap().is_empty());
    assert!(repos.dosage_forms.find_all().unwrap().is_empty());
    assert!(repos.organisations.find_all().unwrap().is_empty());
    let processed: i64 = conn
        .lock()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM processed_unit", [], |r| r.get(0))
        .unwrap();
    assert_eq!(processed, 0);

    conn.lock()
        .unwrap()
        .execute_batch("DROP TRIGGER reject_products;")
        .unwrap();
    let summary = sync
        .sync_registry_bytes("dlp.zip", registry_zip(Some("01.03.2024\n")), period)
        .unwrap()
        .completed()
        .unwrap();
    // 回滚后参考缓存重新加载，组织表外键校验不受影响
    let organisations = summary.table(dataset_names::ORGANISATIONS).unwrap();
    assert_eq!(organisations.import.successes, 1);
    assert_eq!(repos.products.find_all().unwrap().len(), 2);
}

#[test]
fn test_soft_deleted_form_is_unknown_reference_in_same_unit() {
    let sync = SnapshotSynchronizer::in_memory(Arc::new(utf8_settings()));
    sync.sync_registry_bytes("m3.zip", registry_zip(Some("01.03.2024\n")), ym(2024, 3))
        .unwrap();

    // 4 月: 剂型 TBL 缺失，引用它的产品行不再可解析
    let mut april = registry_entries(Some("01.04.2024\n"));
    april[1] = ("dlp_formy.csv", "FORMA;NAZEV\nSIR;Sirup\n".as_bytes());
    let summary = sync
        .sync_registry_bytes("m4.zip", build_zip(&april), ym(2024, 4))
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(
        summary.table(dataset_names::DOSAGE_FORMS).unwrap().report.newly_missing,
        1
    );
    let products = summary.table(dataset_names::PRODUCTS).unwrap();
    assert_eq!(
        products
            .import
            .failures_by_reason_and_column
            .get("UNKNOWN_REFERENCE/dosage_form"),
        Some(&2)
    );
    assert_eq!(products.import.successes, 1);
}

#[test]
fn test_zip_of_zips_selects_month() {
    let sync = SnapshotSynchronizer::in_memory(Arc::new(utf8_settings()));
    let march = registry_zip(Some("01.03.2024\n"));
    let april = build_zip(&[("dlp_zeme.csv", b"ZEM;NAZEV\nAT;Rakousko\n".as_slice())]);
    let outer = build_zip(&[
        ("DLP202403.zip", march.as_slice()),
        ("DLP202404.zip", april.as_slice()),
    ]);

    let summary = sync
        .sync_registry_bytes("dlp_rok_2024.zip", outer, ym(2024, 3))
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(summary.valid_from, date(2024, 3, 1));
    let codes: Vec<String> = sync
        .repositories()
        .countries
        .find_all()
        .unwrap()
        .into_iter()
        .map(|c| c.code)
        .collect();
    assert!(codes.contains(&"CZ".to_string()));
    assert!(!codes.contains(&"AT".to_string()));
}

#[test]
fn test_next_month_soft_deletes_and_reactivates() {
    let sync = SnapshotSynchronizer::in_memory(Arc::new(utf8_settings()));
    sync.sync_registry_bytes("m3.zip", registry_zip(Some("01.03.2024\n")), ym(2024, 3))
        .unwrap();

    // 4 月: SK 缺失
    let mut april = registry_entries(Some("01.04.2024\n"));
    april[0] = ("dlp_zeme.csv", "ZEM;NAZEV\nCZ;Česko\n".as_bytes());
    let summary = sync
        .sync_registry_bytes("m4.zip", build_zip(&april), ym(2024, 4))
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(
        summary.table(dataset_names::COUNTRIES).unwrap().report.newly_missing,
        1
    );

    // 6 月: SK 重新出现，缺失区间 04-01..05-31
    let summary = sync
        .sync_registry_bytes("m6.zip", registry_zip(Some("01.06.2024\n")), ym(2024, 6))
        .unwrap()
        .completed()
        .unwrap();
    let report = &summary.table(dataset_names::COUNTRIES).unwrap().report;
    assert_eq!(report.reactivated, 1);
    assert_eq!(report.absences_closed, 1);

    let countries = &sync.repositories().countries;
    let sk = countries
        .find_all()
        .unwrap()
        .into_iter()
        .find(|c| c.code == "SK")
        .unwrap();
    let absences = countries.absences_for(sk.identity.id.unwrap()).unwrap();
    assert_eq!(absences.len(), 1);
    assert_eq!(absences[0].missing_from, date(2024, 4, 1));
    assert_eq!(absences[0].missing_to, date(2024, 5, 31));
}

// ==========================================
// 发放数据
// ==========================================
#[test]
fn test_dispensing_import_merges_capital_region() {
    registry_sync::logging::init_test();
    let (_temp_file, db_path) = test_helpers::create_test_db().unwrap();
    let sync = SnapshotSynchronizer::sqlite(shared_connection(&db_path), Arc::new(utf8_settings()));
    let period = ym(2024, 3);
    sync.sync_registry_bytes("dlp.zip", registry_zip(Some("01.03.2024\n")), period)
        .unwrap();

    let csv = "OBDOBI,KOD_SUKL,KRAJ,POCET_BALENI,CENA\n\
               2024.03,1234,PHA,10,100\n\
               2024.03,1234,PHA,5,50\n\
               2024.03,1234,JHM,2,20\n\
               2024.03,1234,JHM,1,10\n\
               2024.03,1236,STC,3,\n\
               2024.02,1234,PHA,7,70\n\
               2024.03,9999999,PHA,1,1\n";
    let bundle = SnapshotBundle::single_csv("lek13_2024_03.csv", csv.as_bytes().to_vec());

    let summary = sync
        .import_dispensing(&bundle, period)
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(summary.import.total_rows, 7);
    assert_eq!(
        summary.import.failures_by_reason.get(&FailureReason::UnknownReference),
        Some(&1)
    );
    assert_eq!(summary.foreign_period_rows, 1);
    assert_eq!(summary.folded_rows, 2);
    assert_eq!(summary.unexpected_duplicates, 1);
    assert_eq!(summary.stored, 3);

    let stored = sync.dispensing_repository().find_by_period(period).unwrap();
    let pha = stored
        .iter()
        .find(|r| r.product_code == "0001234" && r.region_code == "PHA")
        .unwrap();
    assert_eq!(pha.quantity, 15.0);
    assert_eq!(pha.amount, Some(150.0));

    let again = sync.import_dispensing(&bundle, period).unwrap();
    assert_eq!(again, UnitOutcome::AlreadyProcessed);
}

// ==========================================
// 并行
// ==========================================
#[tokio::test]
async fn test_parallel_sync_matches_sequential() {
    let sequential = SnapshotSynchronizer::in_memory(Arc::new(utf8_settings()));
    let parallel = Arc::new(SnapshotSynchronizer::in_memory(Arc::new(utf8_settings())));
    let bytes = registry_zip(Some("15.03.2024\n"));
    let period = ym(2024, 3);

    let expected = sequential
        .sync_registry_bytes("dlp.zip", bytes.clone(), period)
        .unwrap()
        .completed()
        .unwrap();

    let bundle = Arc::new(SnapshotBundle::open("dlp.zip", bytes, Some(period)).unwrap());
    let actual = Arc::clone(&parallel)
        .sync_registry_snapshot_parallel(Arc::clone(&bundle), period)
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(actual.valid_from, expected.valid_from);
    assert_eq!(actual.tables.len(), expected.tables.len());
    for table in &expected.tables {
        let other = actual.table(&table.dataset).unwrap();
        assert_eq!(other.import, table.import);
        assert_eq!(other.report, table.report);
    }

    let again = Arc::clone(&parallel)
        .sync_registry_snapshot_parallel(bundle, period)
        .await
        .unwrap();
    assert_eq!(again, UnitOutcome::AlreadyProcessed);
}

#[tokio::test]
async fn test_parallel_sync_rolls_back_on_header_error() {
    let sync = Arc::new(SnapshotSynchronizer::in_memory(Arc::new(utf8_settings())));
    let period = ym(2024, 3);
    let mut entries = registry_entries(Some("01.03.2024\n"));
    entries[4] = ("dlp_organizace.csv", "ZKR_ORG;NAZEV\nZEN;Zentiva\n".as_bytes());
    let bundle = Arc::new(SnapshotBundle::open("dlp.zip", build_zip(&entries), Some(period)).unwrap());

    let err = Arc::clone(&sync)
        .sync_registry_snapshot_parallel(bundle, period)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Import(ImportError::MissingRequiredColumn { .. })));
    assert!(sync.repositories().countries.find_all().unwrap().is_empty());
    assert!(sync.repositories().dosage_forms.find_all().unwrap().is_empty());
}
