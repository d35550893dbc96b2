//! 模块内核错误类型定义
//!
//! 本模块定义了内核中使用的所有错误类型。
//!
//! 结构性错误（清单解析失败、重复注册、必需模块缺失、循环依赖）会中止整个引导流程；
//! 依赖边上的错误（缺失、禁用、版本不符、父模块失败）不在这里，它们记录在
//! [`crate::module::DependencyErrorKind`] 中，只会让相关模块进入 `ERROR` 状态。

use std::path::PathBuf;

use thiserror::Error;

/// 模块内核核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 清单错误 ====================

    /// 清单文件无法读取或解析
    #[error("清单文件解析失败: '{file}' - {reason}")]
    ManifestParse {
        /// 清单文件路径
        file: PathBuf,
        /// 失败原因
        reason: String,
    },

    /// 清单匹配模式无效
    #[error("清单匹配模式无效: {0}")]
    Glob(#[from] glob::PatternError),

    // ==================== 模块注册错误 ====================

    /// 模块重复注册（未声明 update）
    #[error("模块已注册: '{name}' ({location})")]
    DuplicateModule {
        /// 模块名称
        name: String,
        /// 已注册模块的引导文件位置
        location: String,
    },

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    // ==================== 依赖解析错误 ====================

    /// 配置中声明为 REQUIRED 的模块不存在
    #[error("模块为必需模块但未找到: '{0}'")]
    MissingRequiredModule(String),

    /// 循环依赖
    #[error("检测到循环依赖: {0}")]
    CircularDependency(String),

    // ==================== 引导错误 ====================

    /// 引导回调未在回调表中注册
    #[error("模块 '{module}' 的引导回调未注册: '{callback}'")]
    UnknownCallback {
        /// 模块名称
        module: String,
        /// 回调名称
        callback: String,
    },

    /// 引导文件不存在
    #[error("模块 '{module}' 的引导文件不存在: {path:?}")]
    BootstrapFileMissing {
        /// 模块名称
        module: String,
        /// 解析后的文件路径
        path: PathBuf,
    },

    /// 引导回调执行失败
    #[error("模块引导失败: '{module}' - {source}")]
    BootstrapFailed {
        /// 模块名称
        module: String,
        /// 回调返回的错误
        #[source]
        source: Box<CoreError>,
    },

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        /// 配置路径
        key: String,
        /// 失败原因
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 内核操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 清单错误 (MANIFEST-xxx)
    pub const MANIFEST_PARSE_FAILED: &str = "MANIFEST-001";
    pub const MANIFEST_PATTERN_INVALID: &str = "MANIFEST-002";

    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_DUPLICATE: &str = "MODULE-002";
    pub const MODULE_REQUIRED_MISSING: &str = "MODULE-003";
    pub const MODULE_CIRCULAR_DEPENDENCY: &str = "MODULE-005";

    // 引导错误 (BOOTSTRAP-xxx)
    pub const BOOTSTRAP_UNKNOWN_CALLBACK: &str = "BOOTSTRAP-001";
    pub const BOOTSTRAP_FILE_MISSING: &str = "BOOTSTRAP-002";
    pub const BOOTSTRAP_FAILED: &str = "BOOTSTRAP-003";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ManifestParse { .. } => error_code::MANIFEST_PARSE_FAILED,
            CoreError::Glob(_) => error_code::MANIFEST_PATTERN_INVALID,
            CoreError::DuplicateModule { .. } => error_code::MODULE_DUPLICATE,
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::MissingRequiredModule(_) => error_code::MODULE_REQUIRED_MISSING,
            CoreError::CircularDependency(_) => error_code::MODULE_CIRCULAR_DEPENDENCY,
            CoreError::UnknownCallback { .. } => error_code::BOOTSTRAP_UNKNOWN_CALLBACK,
            CoreError::BootstrapFileMissing { .. } => error_code::BOOTSTRAP_FILE_MISSING,
            CoreError::BootstrapFailed { .. } => error_code::BOOTSTRAP_FAILED,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            _ => "UNKNOWN",
        }
    }

    /// 是否为结构性错误（会中止整个引导流程）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::ManifestParse { .. }
                | CoreError::Glob(_)
                | CoreError::DuplicateModule { .. }
                | CoreError::MissingRequiredModule(_)
                | CoreError::CircularDependency(_)
                | CoreError::UnknownCallback { .. }
                | CoreError::BootstrapFileMissing { .. }
                | CoreError::BootstrapFailed { .. }
        )
    }

    /// 构造清单解析错误
    pub fn manifest(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        CoreError::ManifestParse {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::MissingRequiredModule("Core".to_string());
        assert!(err.to_string().contains("Core"));
    }

    #[test]
    fn test_error_code() {
        let err = CoreError::CircularDependency("a -> b -> a".to_string());
        assert_eq!(err.error_code(), error_code::MODULE_CIRCULAR_DEPENDENCY);

        let err = CoreError::manifest("/tmp/manifest.json", "空清单");
        assert_eq!(err.error_code(), error_code::MANIFEST_PARSE_FAILED);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(CoreError::MissingRequiredModule("x".into()).is_fatal());
        assert!(CoreError::DuplicateModule {
            name: "x".into(),
            location: "/x".into()
        }
        .is_fatal());
        assert!(!CoreError::ModuleNotFound("x".into()).is_fatal());
    }

    #[test]
    fn test_bootstrap_failed_keeps_source() {
        let inner = CoreError::Other(anyhow::anyhow!("数据库不可用"));
        let err = CoreError::BootstrapFailed {
            module: "Blog".to_string(),
            source: Box::new(inner),
        };
        let msg = err.to_string();
        assert!(msg.contains("Blog"));
        assert!(msg.contains("数据库不可用"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let core_err: CoreError = io_err.into();
        assert!(matches!(core_err, CoreError::Io(_)));
    }
}
