// ==========================================
// 药品登记数据同步系统 - 快照包读取
// ==========================================
// 职责: 单个 CSV / 平铺 ZIP / 按月嵌套的 ZIP-of-ZIPs → 内存中的文件集合
// 说明: 包内文件按基本文件名（不区分大小写）查找，忽略目录层级
// 红线: 压缩包损坏、嵌套月度包缺失均为文件级错误
// ==========================================

use crate::domain::types::YearMonth;
use crate::importer::error::{ImportError, ImportResult};
use std::io::{Cursor, Read};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const EMPTY_ZIP_MAGIC: &[u8] = b"PK\x05\x06";
// 条目头声明的大小不可信，预分配上限 16 MiB
const MAX_ENTRY_PREALLOC: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
struct BundleFile {
    base_name: String, // 小写基本文件名
    bytes: Vec<u8>,
}

// ==========================================
// SnapshotBundle - 一个 (数据集, 周期) 的源文件集合
// ==========================================
#[derive(Debug, Clone)]
pub struct SnapshotBundle {
    name: String,
    files: Vec<BundleFile>,
}

impl SnapshotBundle {
    /// 打开快照包（按内容识别 ZIP，其余视为单个 CSV）
    ///
    /// # 参数
    /// - name: 源文件名（单 CSV 时即包内文件名）
    /// - bytes: 文件内容
    /// - period: 目标周期（ZIP-of-ZIPs 时用于选择月度包）
    pub fn open(name: &str, bytes: Vec<u8>, period: Option<YearMonth>) -> ImportResult<Self> {
        if !is_zip(&bytes) {
            return Ok(Self::single_csv(name, bytes));
        }

        let entries = read_zip_entries(&bytes)?;
        let (nested, flat): (Vec<BundleFile>, Vec<BundleFile>) = entries
            .into_iter()
            .partition(|f| f.base_name.ends_with(".zip"));

        if nested.is_empty() {
            tracing::debug!(bundle = %name, files = flat.len(), "平铺 ZIP 快照包");
            return Ok(Self {
                name: name.to_string(),
                files: flat,
            });
        }

        let period = period.ok_or_else(|| {
            ImportError::ArchiveError(format!("{} 为按月嵌套压缩包，必须指定周期", name))
        })?;
        let tokens = period_tokens(period);
        let inner = nested
            .into_iter()
            .find(|f| tokens.iter().any(|t| f.base_name.contains(t.as_str())))
            .ok_or(ImportError::NestedArchiveNotFound(period))?;

        tracing::debug!(bundle = %name, inner = %inner.base_name, %period, "选中月度嵌套包");
        let files = read_zip_entries(&inner.bytes)?
            .into_iter()
            .filter(|f| !f.base_name.ends_with(".zip"))
            .collect();

        Ok(Self {
            name: name.to_string(),
            files,
        })
    }

    /// 单个 CSV 文件构成的快照包
    pub fn single_csv(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            files: vec![BundleFile {
                base_name: base_name(name),
                bytes,
            }],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 按文件名查找（不区分大小写）
    pub fn file(&self, file_name: &str) -> Option<&[u8]> {
        let wanted = base_name(file_name);
        self.files
            .iter()
            .find(|f| f.base_name == wanted)
            .map(|f| f.bytes.as_slice())
    }

    /// 按文件名查找，缺失时为文件级错误
    pub fn require(&self, file_name: &str) -> ImportResult<&[u8]> {
        self.file(file_name)
            .ok_or_else(|| ImportError::FileNotInBundle(file_name.to_string()))
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.base_name.as_str()).collect()
    }
}

fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(EMPTY_ZIP_MAGIC)
}

/// 基本文件名（去目录，小写）
fn base_name(path: &str) -> String {
    path.rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(path)
        .trim()
        .to_lowercase()
}

/// 月度包文件名中可能出现的周期写法
fn period_tokens(period: YearMonth) -> Vec<String> {
    let (y, m) = (period.year(), period.month());
    vec![
        format!("{:04}{:02}", y, m),
        format!("{:04}_{:02}", y, m),
        format!("{:04}-{:02}", y, m),
        format!("{:04}.{:02}", y, m),
    ]
}

fn read_zip_entries(bytes: &[u8]) -> ImportResult<Vec<BundleFile>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut files = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let declared = usize::try_from(entry.size()).unwrap_or(MAX_ENTRY_PREALLOC);
        let mut content = Vec::with_capacity(declared.min(MAX_ENTRY_PREALLOC));
        entry
            .read_to_end(&mut content)
            .map_err(|e| ImportError::ArchiveError(format!("{}: {}", name, e)))?;
        files.push(BundleFile {
            base_name: base_name(&name),
            bytes: content,
        });
    }

    Ok(files)
}
