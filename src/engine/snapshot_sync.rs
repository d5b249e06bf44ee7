// ==========================================
// 药品登记数据同步系统 - 快照同步编排器
// ==========================================
// 职责: 执行一个 (数据集, 周期) 处理单元
//   打开快照包 → 解析 valid_from → 预检全部文件与表头 → 开启单元作用域
//   → 按依赖顺序导入各表 → 同步 → 登记处理单元 → 整体提交
// 红线: 单元内任一表失败则全部表回滚、不登记，下次整体重试
// 红线: 同一张表不允许并发同步；仅无依赖关系的表可并行
// ==========================================

use crate::config::{dataset_names, ConfigError, ImportConfigReader};
use crate::domain::change_set::SyncReport;
use crate::domain::registry::{
    AdministrationRoute, Country, DosageForm, MedicinalProduct, Organisation, PackageType,
};
use crate::domain::types::{EntityType, YearMonth};
use crate::domain::versioned::VersionedEntity;
use crate::engine::error::{SyncError, SyncResult};
use crate::engine::reference_cache::ReferenceDataCache;
use crate::engine::synchronizer::EntitySynchronizer;
use crate::importer::{
    ColumnSpec, CountryMapper, CsvImportEngine, DispensingMapper, DosageFormMapper, ImportStats,
    OrganisationMapper, PackageTypeMapper, ProductMapper, RegionalDuplicateMerge, RouteMapper,
    RowMapper, SnapshotBundle, ValidityPeriodResolver,
};
use crate::repository::{
    Checkpoint, DispensingRepository, InMemoryRepository, MemoryDispensingRepository,
    MemoryProcessedUnitLedger, MemoryUnitScope, ProcessedUnitLedger, SqliteDispensingRepository,
    SqliteProcessedUnitLedger, SqliteUnitScope, SqliteVersionedRepository, UnitScope,
    VersionedRepository,
};
use chrono::NaiveDate;
use futures::future::join_all;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// 处理单元台账中的登记快照数据集名
pub const REGISTRY_UNIT: &str = "registry";

/// 登记表同步阶段：同一阶段内的表互不引用，可并行
pub const REGISTRY_STAGES: &[&[&str]] = &[
    &[
        dataset_names::COUNTRIES,
        dataset_names::DOSAGE_FORMS,
        dataset_names::ROUTES,
        dataset_names::PACKAGE_TYPES,
    ],
    &[dataset_names::ORGANISATIONS],
    &[dataset_names::PRODUCTS],
];

// ==========================================
// RegistryRepositories - 登记表仓储集合
// ==========================================
#[derive(Clone)]
pub struct RegistryRepositories {
    pub countries: Arc<dyn VersionedRepository<Country>>,
    pub dosage_forms: Arc<dyn VersionedRepository<DosageForm>>,
    pub routes: Arc<dyn VersionedRepository<AdministrationRoute>>,
    pub package_types: Arc<dyn VersionedRepository<PackageType>>,
    pub organisations: Arc<dyn VersionedRepository<Organisation>>,
    pub products: Arc<dyn VersionedRepository<MedicinalProduct>>,
    pub unit_scope: Arc<dyn UnitScope>, // 覆盖以上六张表
}

impl RegistryRepositories {
    /// 共享同一 SQLite 连接（调用方负责 init_schema）
    pub fn sqlite(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            countries: Arc::new(SqliteVersionedRepository::<Country>::from_connection(conn.clone())),
            dosage_forms: Arc::new(SqliteVersionedRepository::<DosageForm>::from_connection(conn.clone())),
            routes: Arc::new(SqliteVersionedRepository::<AdministrationRoute>::from_connection(conn.clone())),
            package_types: Arc::new(SqliteVersionedRepository::<PackageType>::from_connection(conn.clone())),
            organisations: Arc::new(SqliteVersionedRepository::<Organisation>::from_connection(conn.clone())),
            products: Arc::new(SqliteVersionedRepository::<MedicinalProduct>::from_connection(conn.clone())),
            unit_scope: Arc::new(SqliteUnitScope::from_connection(conn)),
        }
    }

    pub fn in_memory() -> Self {
        let countries = Arc::new(InMemoryRepository::<Country>::new());
        let dosage_forms = Arc::new(InMemoryRepository::<DosageForm>::new());
        let routes = Arc::new(InMemoryRepository::<AdministrationRoute>::new());
        let package_types = Arc::new(InMemoryRepository::<PackageType>::new());
        let organisations = Arc::new(InMemoryRepository::<Organisation>::new());
        let products = Arc::new(InMemoryRepository::<MedicinalProduct>::new());

        let participants: Vec<Arc<dyn Checkpoint>> = vec![
            countries.clone(),
            dosage_forms.clone(),
            routes.clone(),
            package_types.clone(),
            organisations.clone(),
            products.clone(),
        ];

        Self {
            countries,
            dosage_forms,
            routes,
            package_types,
            organisations,
            products,
            unit_scope: Arc::new(MemoryUnitScope::new(participants)),
        }
    }

    /// 为被外键引用的表注册参考缓存
    pub fn reference_cache(&self) -> ReferenceDataCache {
        let mut cache = ReferenceDataCache::new();
        cache.register::<Country, _>(Arc::clone(&self.countries));
        cache.register::<DosageForm, _>(Arc::clone(&self.dosage_forms));
        cache.register::<Organisation, _>(Arc::clone(&self.organisations));
        cache.register::<MedicinalProduct, _>(Arc::clone(&self.products));
        cache
    }
}

// ==========================================
// 处理结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnitOutcome<S> {
    AlreadyProcessed,
    Completed(S),
}

impl<S> UnitOutcome<S> {
    pub fn completed(self) -> Option<S> {
        match self {
            UnitOutcome::Completed(summary) => Some(summary),
            UnitOutcome::AlreadyProcessed => None,
        }
    }
}

/// 单张表的导入 + 同步结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSyncOutcome {
    pub dataset: String,
    pub import: ImportStats,
    pub report: SyncReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySyncSummary {
    pub run_id: String,
    pub period: YearMonth,
    pub valid_from: NaiveDate,
    pub tables: Vec<TableSyncOutcome>,
}

impl RegistrySyncSummary {
    pub fn table(&self, dataset: &str) -> Option<&TableSyncOutcome> {
        self.tables.iter().find(|t| t.dataset == dataset)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispensingImportSummary {
    pub run_id: String,
    pub period: YearMonth,
    pub import: ImportStats,
    pub foreign_period_rows: usize, // 周期与处理单元不符而丢弃的行
    pub folded_rows: usize,
    pub unexpected_duplicates: usize,
    pub stored: usize,
}

// ==========================================
// SnapshotSynchronizer - 处理单元编排器
// ==========================================
pub struct SnapshotSynchronizer<C>
where
    C: ImportConfigReader,
{
    repos: RegistryRepositories,
    ledger: Arc<dyn ProcessedUnitLedger>,
    dispensing: Arc<dyn DispensingRepository>,
    cache: Arc<ReferenceDataCache>,
    synchronizer: EntitySynchronizer,
    config: Arc<C>,
}

impl<C> SnapshotSynchronizer<C>
where
    C: ImportConfigReader,
{
    pub fn new(
        repos: RegistryRepositories,
        ledger: Arc<dyn ProcessedUnitLedger>,
        dispensing: Arc<dyn DispensingRepository>,
        config: Arc<C>,
    ) -> Self {
        let cache = Arc::new(repos.reference_cache());
        Self {
            synchronizer: EntitySynchronizer::with_cache(Arc::clone(&cache)),
            repos,
            ledger,
            dispensing,
            cache,
            config,
        }
    }

    /// 全部存储落在同一 SQLite 连接上
    pub fn sqlite(conn: Arc<Mutex<Connection>>, config: Arc<C>) -> Self {
        Self::new(
            RegistryRepositories::sqlite(conn.clone()),
            Arc::new(SqliteProcessedUnitLedger::from_connection(conn.clone())),
            Arc::new(SqliteDispensingRepository::from_connection(conn)),
            config,
        )
    }

    /// 内存存储（试运行 / 测试）
    pub fn in_memory(config: Arc<C>) -> Self {
        Self::new(
            RegistryRepositories::in_memory(),
            Arc::new(MemoryProcessedUnitLedger::new()),
            Arc::new(MemoryDispensingRepository::new()),
            config,
        )
    }

    pub fn repositories(&self) -> &RegistryRepositories {
        &self.repos
    }

    pub fn reference_cache(&self) -> &Arc<ReferenceDataCache> {
        &self.cache
    }

    pub fn dispensing_repository(&self) -> &Arc<dyn DispensingRepository> {
        &self.dispensing
    }

    /// 按配置解析快照的 valid_from
    pub fn resolve_valid_from(
        &self,
        bundle: &SnapshotBundle,
        period: YearMonth,
    ) -> SyncResult<NaiveDate> {
        let resolver = ValidityPeriodResolver::new(
            self.config.validity_cutover()?,
            self.config.validity_file_name()?,
            self.config.validity_encoding()?,
        );
        Ok(resolver.resolve_from_bundle(period, bundle)?)
    }

    /// 同步一期登记快照（各表依次执行）
    ///
    /// # 返回
    /// - AlreadyProcessed: 该周期已登记，未做任何读取
    /// - Completed: 各表统计
    ///
    /// # 错误
    /// - 文件级错误（必需列缺失、数据文件或有效期文件缺失、压缩包损坏）：预检阶段发现，不写入任何表
    /// - 同步级错误：单元内已写入的各表整体回滚
    #[instrument(skip(self, bundle), fields(bundle = %bundle.name(), period = %period))]
    pub fn sync_registry_snapshot(
        &self,
        bundle: &SnapshotBundle,
        period: YearMonth,
    ) -> SyncResult<UnitOutcome<RegistrySyncSummary>> {
        if self.ledger.is_processed(REGISTRY_UNIT, period)? {
            info!("处理单元已完成，跳过");
            return Ok(UnitOutcome::AlreadyProcessed);
        }

        let run_id = Uuid::new_v4().to_string();
        let valid_from = self.resolve_valid_from(bundle, period)?;
        self.preflight_registry(bundle)?;
        info!(%run_id, %valid_from, "开始同步登记快照");

        self.begin_unit()?;
        let outcome = REGISTRY_STAGES
            .iter()
            .flat_map(|stage| stage.iter())
            .map(|dataset| self.sync_dataset(bundle, dataset, valid_from))
            .collect::<SyncResult<Vec<_>>>()
            .and_then(|tables| self.finish_registry_unit(run_id, period, valid_from, tables));
        self.close_unit(outcome)
    }

    /// 预检：全部登记表文件存在且表头含必需列
    ///
    /// 在任何写入之前执行，文件级错误不会留下部分提交的表
    pub fn preflight_registry(&self, bundle: &SnapshotBundle) -> SyncResult<()> {
        for dataset in REGISTRY_STAGES.iter().flat_map(|stage| stage.iter()) {
            let settings = self.config.dataset_settings(dataset)?;
            let options = settings.csv_options()?;
            let bytes = bundle.require(&settings.file_name)?;
            CsvImportEngine::check_header(bytes, &registry_column_specs(dataset)?, &options)?;
        }
        Ok(())
    }

    fn begin_unit(&self) -> SyncResult<()> {
        Ok(self.repos.unit_scope.begin()?)
    }

    /// 结束单元作用域：成功则整体提交，失败则整体回滚
    fn close_unit<T>(&self, outcome: SyncResult<T>) -> SyncResult<T> {
        let outcome = match outcome {
            Ok(value) => self.repos.unit_scope.commit().map(|_| value).map_err(SyncError::from),
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            if let Err(rollback_err) = self.repos.unit_scope.rollback() {
                error!(error = %rollback_err, "单元回滚失败");
            }
            // 缓存可能已加载回滚前的键
            if let Err(cache_err) = self.cache.invalidate_all() {
                error!(error = %cache_err, "参考缓存失效失败");
            }
            warn!(error = %e, "单元失败，已整体回滚");
        }
        outcome
    }

    /// 读取字节后同步（自动识别单 CSV / ZIP / ZIP-of-ZIPs）
    pub fn sync_registry_bytes(
        &self,
        name: &str,
        bytes: Vec<u8>,
        period: YearMonth,
    ) -> SyncResult<UnitOutcome<RegistrySyncSummary>> {
        let bundle = SnapshotBundle::open(name, bytes, Some(period))?;
        self.sync_registry_snapshot(&bundle, period)
    }

    /// 导入并同步快照包中的单张登记表
    pub fn sync_dataset(
        &self,
        bundle: &SnapshotBundle,
        dataset: &str,
        valid_from: NaiveDate,
    ) -> SyncResult<TableSyncOutcome> {
        match dataset {
            dataset_names::COUNTRIES => {
                self.sync_table(bundle, dataset, &CountryMapper, &*self.repos.countries, valid_from)
            }
            dataset_names::DOSAGE_FORMS => self.sync_table(
                bundle,
                dataset,
                &DosageFormMapper,
                &*self.repos.dosage_forms,
                valid_from,
            ),
            dataset_names::ROUTES => {
                self.sync_table(bundle, dataset, &RouteMapper, &*self.repos.routes, valid_from)
            }
            dataset_names::PACKAGE_TYPES => self.sync_table(
                bundle,
                dataset,
                &PackageTypeMapper,
                &*self.repos.package_types,
                valid_from,
            ),
            dataset_names::ORGANISATIONS => {
                let mapper = OrganisationMapper::new(Some(self.cache.keys(EntityType::Country)?));
                self.sync_table(bundle, dataset, &mapper, &*self.repos.organisations, valid_from)
            }
            dataset_names::PRODUCTS => {
                let mapper = ProductMapper::new(
                    Some(self.cache.keys(EntityType::DosageForm)?),
                    Some(self.cache.keys(EntityType::Organisation)?),
                );
                self.sync_table(bundle, dataset, &mapper, &*self.repos.products, valid_from)
            }
            other => Err(ConfigError::UnknownDataset(other.to_string()).into()),
        }
    }

    fn sync_table<T, M>(
        &self,
        bundle: &SnapshotBundle,
        dataset: &str,
        mapper: &M,
        repo: &dyn VersionedRepository<T>,
        valid_from: NaiveDate,
    ) -> SyncResult<TableSyncOutcome>
    where
        T: VersionedEntity,
        M: RowMapper<T>,
    {
        let settings = self.config.dataset_settings(dataset)?;
        let options = settings.csv_options()?;
        let bytes = bundle.require(&settings.file_name)?;

        let imported = CsvImportEngine::import(bytes, &mapper.column_specs(), mapper, &options)?;
        let import = imported.stats();
        let report = self
            .synchronizer
            .synchronize(repo, imported.successes, valid_from)?;

        Ok(TableSyncOutcome {
            dataset: dataset.to_string(),
            import,
            report,
        })
    }

    fn finish_registry_unit(
        &self,
        run_id: String,
        period: YearMonth,
        valid_from: NaiveDate,
        tables: Vec<TableSyncOutcome>,
    ) -> SyncResult<UnitOutcome<RegistrySyncSummary>> {
        self.ledger
            .mark_processed(REGISTRY_UNIT, period, Some(valid_from), &run_id)?;

        info!(
            %run_id,
            %period,
            %valid_from,
            tables = tables.len(),
            mutations = tables.iter().map(|t| t.report.total_mutations()).sum::<usize>(),
            row_failures = tables.iter().map(|t| t.import.failures()).sum::<usize>(),
            "登记快照同步完成"
        );

        Ok(UnitOutcome::Completed(RegistrySyncSummary {
            run_id,
            period,
            valid_from,
            tables,
        }))
    }

    /// 导入一期发放数据：流式解析 → 地区重复行合并 → 按周期整体替换
    #[instrument(skip(self, bundle), fields(bundle = %bundle.name(), period = %period))]
    pub fn import_dispensing(
        &self,
        bundle: &SnapshotBundle,
        period: YearMonth,
    ) -> SyncResult<UnitOutcome<DispensingImportSummary>> {
        let dataset = dataset_names::DISPENSING;
        if self.ledger.is_processed(dataset, period)? {
            info!("处理单元已完成，跳过");
            return Ok(UnitOutcome::AlreadyProcessed);
        }

        let run_id = Uuid::new_v4().to_string();
        let settings = self.config.dataset_settings(dataset)?;
        let options = settings.csv_options()?;
        let bytes = dataset_bytes(bundle, &settings.file_name)?;

        let mapper = DispensingMapper::new(Some(self.cache.keys(EntityType::MedicinalProduct)?));
        let mut import = ImportStats::default();
        let mut records = Vec::new();
        let mut foreign_period_rows = 0;
        {
            let stream = CsvImportEngine::import_stream(
                bytes,
                &mapper.column_specs(),
                &mapper,
                &options,
                &mut import,
            )?;
            for record in stream {
                let record = record?;
                if record.period == period {
                    records.push(record);
                } else {
                    foreign_period_rows += 1;
                }
            }
        }
        if foreign_period_rows > 0 {
            warn!(foreign_period_rows, "文件含其他周期的行，已丢弃");
        }

        let merge = RegionalDuplicateMerge::new(self.config.repeating_regions()?);
        let merged = merge.merge(records);
        let stored = self.dispensing.replace_period(period, &merged.records)?;

        self.ledger.mark_processed(dataset, period, None, &run_id)?;
        info!(
            %run_id,
            stored,
            folded_rows = merged.folded_rows,
            unexpected_duplicates = merged.unexpected_duplicates,
            "发放数据导入完成"
        );

        Ok(UnitOutcome::Completed(DispensingImportSummary {
            run_id,
            period,
            import,
            foreign_period_rows,
            folded_rows: merged.folded_rows,
            unexpected_duplicates: merged.unexpected_duplicates,
            stored,
        }))
    }
}

impl<C> SnapshotSynchronizer<C>
where
    C: ImportConfigReader + 'static,
{
    /// 同步一期登记快照，同一阶段内的表并行执行
    #[instrument(skip(self, bundle), fields(bundle = %bundle.name(), period = %period))]
    pub async fn sync_registry_snapshot_parallel(
        self: Arc<Self>,
        bundle: Arc<SnapshotBundle>,
        period: YearMonth,
    ) -> SyncResult<UnitOutcome<RegistrySyncSummary>> {
        let this = Arc::clone(&self);
        if run_blocking(move || Ok(this.ledger.is_processed(REGISTRY_UNIT, period)?)).await? {
            info!("处理单元已完成，跳过");
            return Ok(UnitOutcome::AlreadyProcessed);
        }

        let run_id = Uuid::new_v4().to_string();
        let (this, source) = (Arc::clone(&self), Arc::clone(&bundle));
        let valid_from = run_blocking(move || {
            let valid_from = this.resolve_valid_from(&source, period)?;
            this.preflight_registry(&source)?;
            Ok(valid_from)
        })
        .await?;
        info!(%run_id, %valid_from, "开始并行同步登记快照");

        let this = Arc::clone(&self);
        run_blocking(move || this.begin_unit()).await?;

        let outcome = async {
            let mut tables = Vec::new();
            for stage in REGISTRY_STAGES {
                let jobs = stage.iter().map(|dataset| {
                    let (this, source) = (Arc::clone(&self), Arc::clone(&bundle));
                    let label = dataset.to_string();
                    let dataset = label.clone();
                    let job = move || this.sync_dataset(&source, &dataset, valid_from);
                    (label, job)
                });
                // 同一阶段的任务全部结束后才检查失败，回滚时无在途写入
                for (_, result) in run_parallel(jobs.collect()).await {
                    tables.push(result?);
                }
            }
            let this = Arc::clone(&self);
            run_blocking(move || this.finish_registry_unit(run_id, period, valid_from, tables)).await
        }
        .await;

        let this = Arc::clone(&self);
        run_blocking(move || this.close_unit(outcome)).await
    }
}

/// 在阻塞线程池上执行同步代码
async fn run_blocking<T, F>(job: F) -> SyncResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> SyncResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| SyncError::TaskJoin(e.to_string()))?
}

/// 并行执行互不依赖的处理单元
///
/// 每个任务在阻塞线程池上运行；结果顺序与输入一致，单个失败不影响其余任务
pub async fn run_parallel<T, F>(jobs: Vec<(String, F)>) -> Vec<(String, SyncResult<T>)>
where
    T: Send + 'static,
    F: FnOnce() -> SyncResult<T> + Send + 'static,
{
    let tasks = jobs.into_iter().map(|(label, job)| async move {
        let result = run_blocking(job).await;
        if let Err(e) = &result {
            tracing::error!(unit = %label, error = %e, "处理单元失败");
        }
        (label, result)
    });

    let results = join_all(tasks).await;
    info!(
        total = results.len(),
        failed = results.iter().filter(|(_, r)| r.is_err()).count(),
        "并行处理完成"
    );
    results
}

/// 登记表的列声明（预检用，外键集合不参与表头解析）
fn registry_column_specs(dataset: &str) -> SyncResult<Vec<ColumnSpec>> {
    let specs = match dataset {
        dataset_names::COUNTRIES => CountryMapper.column_specs(),
        dataset_names::DOSAGE_FORMS => DosageFormMapper.column_specs(),
        dataset_names::ROUTES => RouteMapper.column_specs(),
        dataset_names::PACKAGE_TYPES => PackageTypeMapper.column_specs(),
        dataset_names::ORGANISATIONS => OrganisationMapper::new(None).column_specs(),
        dataset_names::PRODUCTS => ProductMapper::new(None, None).column_specs(),
        other => return Err(ConfigError::UnknownDataset(other.to_string()).into()),
    };
    Ok(specs)
}

/// 按配置文件名取数据文件；单文件包直接使用其唯一文件
fn dataset_bytes<'a>(bundle: &'a SnapshotBundle, file_name: &str) -> SyncResult<&'a [u8]> {
    if let Some(bytes) = bundle.file(file_name) {
        return Ok(bytes);
    }
    match bundle.file_names().as_slice() {
        [only] => Ok(bundle.require(only)?),
        _ => Ok(bundle.require(file_name)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportSettings;

    fn settings() -> ImportSettings {
        let mut settings = ImportSettings::default();
        for dataset in settings.datasets.values_mut() {
            dataset.encoding = crate::importer::SourceEncoding::Utf8;
        }
        settings.validity_encoding = crate::importer::SourceEncoding::Utf8;
        settings
    }

    #[test]
    fn test_unknown_dataset_is_config_error() {
        let sync = SnapshotSynchronizer::in_memory(Arc::new(settings()));
        let bundle = SnapshotBundle::single_csv("x.csv", b"A\n1\n".to_vec());
        let err = sync
            .sync_dataset(&bundle, "nope", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(ConfigError::UnknownDataset(_))));
    }

    #[test]
    fn test_single_file_bundle_used_for_dispensing() {
        let bundle = SnapshotBundle::single_csv("export-2024-01.csv", b"x".to_vec());
        assert_eq!(dataset_bytes(&bundle, "vydeje.csv").unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_run_parallel_keeps_order_and_isolates_failures() {
        let jobs: Vec<(String, Box<dyn FnOnce() -> SyncResult<usize> + Send>)> = vec![
            ("a".to_string(), Box::new(|| Ok(1))),
            ("b".to_string(), Box::new(|| Err(SyncError::TaskJoin("boom".to_string())))),
            ("c".to_string(), Box::new(|| Ok(3))),
        ];

        let results = run_parallel(jobs).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "a");
        assert!(matches!(results[0].1, Ok(1)));
        assert!(results[1].1.is_err());
        assert!(matches!(results[2].1, Ok(3)));
    }
}
