// ==========================================
// 药品登记数据同步系统 - 导入层
// ==========================================
// 职责: 快照包读取、CSV 解析、行映射、有效期解析
// 支持: 单 CSV / ZIP / ZIP-of-ZIPs；UTF-8 / Windows-1250
// ==========================================

// 模块声明
pub mod archive;
pub mod column_resolver;
pub mod csv_engine;
pub mod csv_row;
pub mod dispensing_mapper;
pub mod error;
pub mod import_result;
pub mod regional_merge;
pub mod registry_mappers;
pub mod row_mapper;
pub mod text_decoder;
pub mod validity;

// 重导出核心类型
pub use archive::SnapshotBundle;
pub use column_resolver::{resolve_columns, ColumnSpec, ResolvedColumns};
pub use csv_engine::{CsvImportEngine, CsvOptions, CsvRowStream};
pub use csv_row::{CsvRow, FieldFailure, FieldResult, RowMappingResult};
pub use dispensing_mapper::DispensingMapper;
pub use error::{ImportError, ImportResult};
pub use import_result::{DataImportResult, ImportStats, RowFailure};
pub use regional_merge::{MergeOutcome, RegionalDuplicateMerge};
pub use registry_mappers::{
    CountryMapper, DosageFormMapper, OrganisationMapper, PackageTypeMapper, ProductMapper,
    RouteMapper,
};
pub use row_mapper::{ReferenceKeys, RowMapper};
pub use text_decoder::SourceEncoding;
pub use validity::ValidityPeriodResolver;
