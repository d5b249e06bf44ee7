// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、测试数据生成等功能
// ==========================================

#![allow(dead_code)]

use chrono::NaiveDate;
use registry_sync::config::ImportSettings;
use registry_sync::db::{init_schema, open_sqlite_connection};
use registry_sync::domain::{Country, EntityIdentity, MedicinalProduct};
use registry_sync::importer::SourceEncoding;
use rusqlite::Connection;
use std::error::Error;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是 UTF-8")?
        .to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开共享连接（同一数据库上的多个仓储共用）
pub fn shared_connection(db_path: &str) -> Arc<Mutex<Connection>> {
    let conn = open_sqlite_connection(db_path).expect("打开测试数据库失败");
    Arc::new(Mutex::new(conn))
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("无效日期")
}

pub fn country(code: &str, name: &str) -> Country {
    Country {
        identity: EntityIdentity::default(),
        code: code.to_string(),
        name: name.to_string(),
        name_en: None,
        edqm_code: None,
    }
}

pub fn product(code: &str, name: &str) -> MedicinalProduct {
    MedicinalProduct {
        identity: EntityIdentity::default(),
        code: code.to_string(),
        name: name.to_string(),
        strength: None,
        package_size: None,
        dosage_form_code: None,
        route_code: None,
        package_type_code: None,
        holder_code: None,
        holder_country: None,
        atc_code: None,
        ddd_amount: None,
        ddd_unit: None,
        registration_status: None,
    }
}

/// 全部数据集使用 UTF-8 的导入配置（测试夹具直接写字符串）
pub fn utf8_settings() -> ImportSettings {
    let mut settings = ImportSettings::default();
    for dataset in settings.datasets.values_mut() {
        dataset.encoding = SourceEncoding::Utf8;
    }
    settings.validity_encoding = SourceEncoding::Utf8;
    settings
}

/// 内存中构建 ZIP
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, bytes) in entries {
        writer.start_file(*name, options).expect("写入 ZIP 条目失败");
        writer.write_all(bytes).expect("写入 ZIP 内容失败");
    }
    writer.finish().expect("关闭 ZIP 失败").into_inner()
}
