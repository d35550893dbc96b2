//! Bucky 命令行入口
//!
//! 扫描模块清单，检查依赖并显示引导顺序。
//!
//! # 命令概览
//!
//! - `check` - 扫描清单并显示每个模块的依赖检查结果
//! - `order` - 显示模块的引导顺序
//! - `version` - 显示版本信息
//!
//! # 使用示例
//!
//! ```bash
//! # 检查 modules 目录下所有模块
//! bucky check "modules/*"
//!
//! # 使用配置文件中的 manifest_paths
//! bucky -c bucky.yaml order
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{debug, info};

use bucky_core::{App, CoreConfig, Logger, LoggerConfig, RunStatus};

/// Bucky - 模块内核
#[derive(Parser)]
#[command(name = "bucky")]
#[command(version, about = "模块清单扫描、依赖检查与引导顺序", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "bucky.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 扫描清单并检查依赖
    ///
    /// 显示每个模块的运行级别、运行状态和失败原因。
    Check {
        /// 清单匹配模式，逗号分隔（不指定则使用配置中的 manifest_paths）
        patterns: Option<String>,
    },

    /// 显示引导顺序
    ///
    /// 只列出依赖检查后处于 PENDING 的模块。
    Order {
        /// 清单匹配模式，逗号分隔
        patterns: Option<String>,
    },

    /// 查看版本信息
    Version,
}

/// 加载配置文件，不存在时使用默认配置
async fn load_config(path: &Path) -> Result<CoreConfig, Box<dyn std::error::Error>> {
    if path.exists() {
        info!("加载配置文件: {}", path.display());
        Ok(CoreConfig::from_file(path).await?)
    } else {
        debug!("配置文件不存在，使用默认配置: {}", path.display());
        Ok(CoreConfig::default())
    }
}

/// 创建应用并扫描清单
fn prepare(config: CoreConfig, patterns: Option<&str>) -> Result<App, Box<dyn std::error::Error>> {
    let mut app = App::new(config);
    let names = match patterns {
        Some(patterns) => app.load(patterns)?,
        None => app.load_configured()?,
    };
    info!(modules = names.len(), "清单加载完成");
    app.registry_mut().check_depends()?;
    Ok(app)
}

/// 打印依赖检查结果
fn print_check(app: &App) {
    println!();
    println!("{:<24} {:<10} {:<8} {:<10} 原因", "模块", "运行级别", "状态", "版本");
    println!("────────────────────────────────────────────────────────────────────");
    for module in app.registry().all() {
        let reason = module
            .fault
            .as_ref()
            .map(|f| format!("{} -> {} ({})", f.reason, f.dependency, f.action))
            .unwrap_or_default();
        println!(
            "{:<24} {:<10} {:<8} {:<10} {}",
            module.name,
            module.run_level.to_string(),
            module.run_status.to_string(),
            module.version.as_deref().unwrap_or("-"),
            reason
        );
    }
    println!();
}

/// 打印引导顺序
fn print_order(app: &App) {
    println!();
    let pending = app
        .registry()
        .all()
        .filter(|m| m.run_status == RunStatus::Pending);
    for (index, module) in pending.enumerate() {
        println!("{:>3}. {}", index + 1, module.name);
    }
    println!();
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Bucky Core - 模块内核");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", bucky_core::VERSION);
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Version) {
        print_version();
        return Ok(());
    }

    let config = load_config(&cli.config).await?;
    let mut logger_config = LoggerConfig::from_log_config(&config.logging);
    if let Some(level) = cli.log_level {
        logger_config.level = level;
    }
    let _guard = Logger::try_init(logger_config);

    match cli.command {
        Commands::Check { patterns } => {
            let app = prepare(config, patterns.as_deref())?;
            print_check(&app);
        }
        Commands::Order { patterns } => {
            let mut app = prepare(config, patterns.as_deref())?;
            app.registry_mut().sort_depends()?;
            print_order(&app);
        }
        Commands::Version => print_version(),
    }

    Ok(())
}
