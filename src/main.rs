// ==========================================
// 药品登记数据同步系统 - 命令行入口
// ==========================================
// 职责: 对指定 SQLite 数据库执行单个 (数据集, 周期) 处理单元
// ==========================================

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use registry_sync::config::{ConfigManager, ImportConfigReader};
use registry_sync::db::{init_schema, open_sqlite_connection};
use registry_sync::engine::{SnapshotSynchronizer, UnitOutcome};
use registry_sync::importer::SnapshotBundle;
use registry_sync::{logging, YearMonth};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(
    name = "registry-sync",
    version,
    about = "药品登记快照对账与时态版本同步"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite 数据库路径（默认: 用户数据目录）
    #[arg(long = "db", value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// 日志输出格式
    #[arg(long = "log-format", value_enum, default_value = "pretty", global = true)]
    log_format: LogFormatArg,
}

#[derive(Subcommand)]
enum Command {
    /// 同步一期登记快照（单 CSV / ZIP / ZIP-of-ZIPs）
    Registry(UnitArgs),

    /// 导入一期发放数据
    Dispensing(UnitArgs),

    /// 查看或修改导入配置
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Parser)]
struct UnitArgs {
    /// 源文件路径
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// 周期（yyyy-mm / yyyy.mm / yyyymm）
    #[arg(long = "period", value_parser = parse_period)]
    period: YearMonth,

    /// 同一阶段内的表并行同步（仅 registry）
    #[arg(long = "parallel")]
    parallel: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// 输出生效的导入配置
    Show,

    /// 写入 config_kv 覆写项
    Set { key: String, value: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

fn parse_period(raw: &str) -> Result<YearMonth, String> {
    YearMonth::parse(raw).map_err(|e| e.to_string())
}

/// 默认数据库路径（REGISTRY_SYNC_DB_PATH 优先）
fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("REGISTRY_SYNC_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    match dirs::data_dir() {
        Some(data_dir) => {
            let dir = data_dir.join("registry-sync");
            if let Err(e) = std::fs::create_dir_all(&dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "无法创建数据目录，改用当前目录");
                return PathBuf::from("./registry_sync.db");
            }
            dir.join("registry_sync.db")
        }
        None => PathBuf::from("./registry_sync.db"),
    }
}

fn read_bundle(path: &Path, period: YearMonth) -> Result<SnapshotBundle> {
    let bytes = std::fs::read(path).with_context(|| format!("无法读取 {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(SnapshotBundle::open(&name, bytes, Some(period))?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.log_format {
        LogFormatArg::Pretty => logging::init(),
        LogFormatArg::Json => logging::init_json(),
    }

    let db_path = cli.db.unwrap_or_else(default_db_path);
    tracing::info!("{} v{}", registry_sync::APP_NAME, registry_sync::VERSION);
    tracing::info!(db = %db_path.display(), "使用数据库");

    let conn = open_sqlite_connection(&db_path.to_string_lossy())
        .with_context(|| format!("无法打开数据库 {}", db_path.display()))?;
    init_schema(&conn).context("数据库建表失败")?;
    let conn = Arc::new(Mutex::new(conn));
    let config = Arc::new(ConfigManager::from_connection(conn.clone())?);

    match cli.command {
        Command::Registry(args) => {
            let bundle = read_bundle(&args.file, args.period)?;
            let sync = SnapshotSynchronizer::sqlite(conn, config);
            let outcome = if args.parallel {
                Arc::new(sync)
                    .sync_registry_snapshot_parallel(Arc::new(bundle), args.period)
                    .await?
            } else {
                sync.sync_registry_snapshot(&bundle, args.period)?
            };
            print_outcome(&outcome)?;
        }
        Command::Dispensing(args) => {
            let bundle = read_bundle(&args.file, args.period)?;
            let sync = SnapshotSynchronizer::sqlite(conn, config);
            let outcome = sync.import_dispensing(&bundle, args.period)?;
            print_outcome(&outcome)?;
        }
        Command::Config { action } => match action {
            ConfigAction::Show => {
                let settings = config.load_import_settings()?;
                println!("{}", serde_json::to_string_pretty(&settings)?);
                for (key, value) in config.get_config_snapshot()? {
                    println!("{} = {}", key, value);
                }
            }
            ConfigAction::Set { key, value } => {
                config.set_checked_config_value(&key, &value)?;
                println!("{} = {}", key, value);
            }
        },
    }

    Ok(())
}

fn print_outcome<S: serde::Serialize>(outcome: &UnitOutcome<S>) -> Result<()> {
    match outcome {
        UnitOutcome::AlreadyProcessed => println!("该周期已处理，跳过"),
        UnitOutcome::Completed(summary) => {
            println!("{}", serde_json::to_string_pretty(summary)?)
        }
    }
    Ok(())
}
