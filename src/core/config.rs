//! 内核配置
//!
//! 定义内核的类型化配置结构和加载逻辑。运行时查询使用 [`ConfigStore`]，
//! 由 [`CoreConfig::into_store`] 生成。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::store::ConfigStore;
use crate::module::RunLevel;
use crate::utils::{CoreError, Result};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// 额外的过滤指令
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
            filter: None,
        }
    }
}

/// 单个模块的配置覆盖
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOverride {
    /// 覆盖清单中的运行级别
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_level: Option<RunLevel>,
}

/// 模块管理配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// 清单匹配模式列表（glob）
    #[serde(default)]
    pub manifest_paths: Vec<String>,

    /// 按模块名称的配置覆盖
    #[serde(default)]
    pub overrides: BTreeMap<String, ModuleOverride>,
}

/// Web 环境配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// 文档根目录，用于计算模块的 `base_src`
    #[serde(default)]
    pub doc_root: Option<PathBuf>,

    /// 主机名
    #[serde(default = "default_http_host")]
    pub http_host: String,

    /// 站点基础路径，例如 `/app`
    #[serde(default)]
    pub base_path: Option<String>,
}

fn default_http_host() -> String {
    "localhost".to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            doc_root: None,
            http_host: default_http_host(),
            base_path: None,
        }
    }
}

/// 内核配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块管理配置
    #[serde(default)]
    pub modules: ModuleConfig,

    /// Web 环境配置
    #[serde(default)]
    pub web: WebConfig,
}

impl CoreConfig {
    /// 创建配置构建器
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// 从文件加载配置（异步）
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，其余按 YAML 解析。
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;
        Self::from_content(path, &content)
    }

    /// 从文件加载配置（同步）
    pub fn from_file_sync(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;
        Self::from_content(path, &content)
    }

    fn from_content(path: PathBuf, content: &str) -> Result<Self> {
        let mut config: CoreConfig = if is_json(&path) {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str(content)?
        };

        config.config_path = Some(path);
        Ok(config)
    }

    /// 生成运行时配置存储
    ///
    /// 写入 `web/doc_root`、`web/http_host`、`web/base_path` 以及每个覆盖项的
    /// `modules/<name>/run_level`。
    pub fn into_store(self) -> ConfigStore {
        let store = ConfigStore::new();

        if let Some(doc_root) = &self.web.doc_root {
            store.set("web/doc_root", doc_root.to_string_lossy().into_owned());
        }
        store.set("web/http_host", self.web.http_host.clone());
        if let Some(base_path) = &self.web.base_path {
            store.set("web/base_path", base_path.clone());
        }

        for (name, entry) in &self.modules.overrides {
            if let Some(level) = entry.run_level {
                store.set(&format!("modules/{}/run_level", name), level.as_str());
            }
        }

        store.set("logging/level", self.logging.level.clone());
        store
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
        }
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 添加清单匹配模式
    pub fn manifest_path(mut self, pattern: impl Into<String>) -> Self {
        self.config.modules.manifest_paths.push(pattern.into());
        self
    }

    /// 设置模块运行级别覆盖
    pub fn run_level(mut self, module: impl Into<String>, level: RunLevel) -> Self {
        self.config
            .modules
            .overrides
            .entry(module.into())
            .or_default()
            .run_level = Some(level);
        self
    }

    /// 设置文档根目录
    pub fn doc_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.web.doc_root = Some(dir.into());
        self
    }

    /// 设置主机名
    pub fn http_host(mut self, host: impl Into<String>) -> Self {
        self.config.web.http_host = host.into();
        self
    }

    /// 设置站点基础路径
    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.config.web.base_path = Some(path.into());
        self
    }

    /// 构建配置
    pub fn build(self) -> CoreConfig {
        self.config
    }
}
