//! 日志系统
//!
//! 基于 tracing 生态。控制台日志写到标准错误，避免和 CLI 输出的表格混在一起；
//! 配置了日志目录时额外写入按时间轮转的文件。两路输出都经过非阻塞写入器，
//! [`LogGuard`] 负责在退出前刷新。
//!
//! # 示例
//!
//! ```rust,no_run
//! use bucky_core::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! let config = LoggerConfig::builder()
//!     .level("debug")
//!     .log_dir("./logs")
//!     .rotation(RotationStrategy::Hourly)
//!     .build();
//!
//! let _guard = Logger::init(config).unwrap();
//! tracing::info!(module = "Blog", run_level = "REQUESTED", "模块已注册");
//! ```

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::core::config::LogConfig;
use crate::utils::{CoreError, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 日志文件轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 单个文件
    Never,
    /// 每小时
    Hourly,
    /// 每天
    #[default]
    Daily,
}

impl RotationStrategy {
    /// 解析配置中的轮转策略，无法识别时为 `Daily`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" | "none" => Self::Never,
            "hourly" | "hour" => Self::Hourly,
            _ => Self::Daily,
        }
    }

    fn rotation(self) -> Rotation {
        match self {
            Self::Never => Rotation::NEVER,
            Self::Hourly => Rotation::HOURLY,
            Self::Daily => Rotation::DAILY,
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Never => "never",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
        })
    }
}

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认级别，`RUST_LOG` 存在时以环境变量为准
    pub level: String,
    /// JSON 格式输出
    pub json_format: bool,
    /// 是否写控制台
    pub console_output: bool,
    /// 日志文件目录
    pub log_dir: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 文件轮转策略
    pub rotation: RotationStrategy,
    /// 追加的过滤指令，逗号分隔，例如 `bucky_core::module::dependency=trace`
    pub directives: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            log_dir: None,
            file_prefix: "bucky".to_string(),
            rotation: RotationStrategy::Daily,
            directives: None,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 从内核配置的 `logging` 段创建
    ///
    /// `file_output` 为 `false` 时忽略 `log_dir`。
    pub fn from_log_config(log: &LogConfig) -> Self {
        Self {
            level: log.level.clone(),
            json_format: log.json_format,
            log_dir: log.log_dir.clone().filter(|_| log.file_output),
            rotation: RotationStrategy::parse(&log.rotation),
            directives: log.filter.clone(),
            ..Self::default()
        }
    }

    fn max_level(&self) -> Level {
        self.level.trim().parse().unwrap_or(Level::INFO)
    }

    fn env_filter(&self) -> EnvFilter {
        let base = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.max_level().as_str()));

        // 无法解析的指令直接丢弃
        self.directives
            .iter()
            .flat_map(|d| d.split(','))
            .filter_map(|d| d.trim().parse::<Directive>().ok())
            .fold(base, EnvFilter::add_directive)
    }
}

/// [`LoggerConfig`] 构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 日志级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// JSON 格式
    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    /// 关闭控制台输出
    pub fn quiet(mut self) -> Self {
        self.config.console_output = false;
        self
    }

    /// 写入文件
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = Some(dir.into());
        self
    }

    /// 文件名前缀
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    /// 轮转策略
    pub fn rotation(mut self, rotation: RotationStrategy) -> Self {
        self.config.rotation = rotation;
        self
    }

    /// 过滤指令
    pub fn directives(mut self, directives: impl Into<String>) -> Self {
        self.config.directives = Some(directives.into());
        self
    }

    /// 构建
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

/// 日志守卫，丢弃时刷新挂起的日志
#[must_use = "守卫被丢弃后非阻塞写入器会停止"]
#[derive(Default)]
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// 日志系统
pub struct Logger;

impl Logger {
    /// 安装全局订阅者
    ///
    /// # Errors
    ///
    /// 已经初始化过，或者其他代码已经设置了全局订阅者时返回 `InitFailed`
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.get().is_some() {
            return Err(CoreError::InitFailed("日志系统已初始化".to_string()));
        }

        let mut guard = LogGuard::default();
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if config.console_output {
            let (writer, worker) = tracing_appender::non_blocking(std::io::stderr());
            guard._guards.push(worker);
            layers.push(Self::layer(&config, writer, true));
        }
        if let Some(dir) = &config.log_dir {
            let appender = RollingFileAppender::new(
                config.rotation.rotation(),
                dir,
                format!("{}.log", config.file_prefix),
            );
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard._guards.push(worker);
            layers.push(Self::layer(&config, writer, false));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(config.env_filter())
            .try_init()
            .map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        let _ = LOGGER_INITIALIZED.set(());
        Ok(guard)
    }

    /// 初始化日志系统，失败时返回空守卫
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }

    fn layer(config: &LoggerConfig, writer: NonBlocking, console: bool) -> BoxedLayer {
        let layer = fmt::layer().with_writer(writer).with_target(true);
        if config.json_format {
            layer.json().with_ansi(false).boxed()
        } else {
            layer.with_ansi(console).boxed()
        }
    }
}

/// 结构化日志字段名称
pub mod fields {
    /// 模块名称
    pub const MODULE: &str = "module";
    /// 依赖模块名称
    pub const DEPENDENCY: &str = "dependency";
    /// 运行级别
    pub const RUN_LEVEL: &str = "run_level";
    /// 运行状态
    pub const RUN_STATUS: &str = "run_status";
    /// 清单文件
    pub const MANIFEST: &str = "manifest";
    /// 引导回调
    pub const CALLBACK: &str = "callback";
    /// 耗时（毫秒）
    pub const DURATION_MS: &str = "duration_ms";
}
