//! 模块元数据定义
//!
//! 定义清单文件 (manifest.json / manifest.yaml) 中的模块声明，以及注册后的
//! 模块描述符、依赖边和运行状态。

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use semver::Version;
use serde::{Deserialize, Serialize};

/// 运行级别
///
/// 决定模块在依赖检查后是否进入 `PENDING` 状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RunLevel {
    /// 禁用，依赖它的模块会失败
    #[serde(rename = "DISABLED", alias = "disabled")]
    Disabled,
    /// 按需加载，仅当被待加载模块依赖时才加载
    #[default]
    #[serde(rename = "ONDEMAND", alias = "ondemand")]
    OnDemand,
    /// 请求加载，依赖满足时加载
    #[serde(rename = "REQUESTED", alias = "requested")]
    Requested,
    /// 必需，缺失时引导失败
    #[serde(rename = "REQUIRED", alias = "required")]
    Required,
}

impl RunLevel {
    /// 配置和清单中使用的字符串形式
    pub fn as_str(&self) -> &'static str {
        match self {
            RunLevel::Disabled => "DISABLED",
            RunLevel::OnDemand => "ONDEMAND",
            RunLevel::Requested => "REQUESTED",
            RunLevel::Required => "REQUIRED",
        }
    }
}

impl fmt::Display for RunLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DISABLED" => Ok(RunLevel::Disabled),
            "ONDEMAND" => Ok(RunLevel::OnDemand),
            "REQUESTED" => Ok(RunLevel::Requested),
            "REQUIRED" => Ok(RunLevel::Required),
            other => Err(format!("未知的运行级别: {}", other)),
        }
    }
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    /// 已注册，未被选中加载
    #[default]
    Idle,
    /// 待引导
    Pending,
    /// 引导完成
    Loaded,
    /// 依赖失败，不会被引导
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Idle => "IDLE",
            RunStatus::Pending => "PENDING",
            RunStatus::Loaded => "LOADED",
            RunStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// 引导声明
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSpec {
    /// 回调名称，对应应用注册的引导回调表
    #[serde(default)]
    pub callback: String,

    /// 引导文件，相对于模块根目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl BootstrapSpec {
    /// 创建只有回调的引导声明
    pub fn callback(name: impl Into<String>) -> Self {
        Self {
            callback: name.into(),
            file: None,
        }
    }

    /// 设置引导文件
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// 按键合并：非空字段覆盖
    pub fn merge(&mut self, other: BootstrapSpec) {
        if !other.callback.is_empty() {
            self.callback = other.callback;
        }
        if other.file.is_some() {
            self.file = other.file;
        }
    }
}

/// 宽松解析版本号
///
/// 去掉前导 `v`，缺失的次版本号和修订号补 0，例如 `"1.2"` 解析为 `1.2.0`。
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    let (core, rest) = match trimmed.find(|c| c == '-' || c == '+') {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(rest);
    Version::parse(&padded).ok()
}

/// 依赖版本约束
///
/// `from` 和 `to` 均为闭区间边界，`exclude` 列出被排除的确切版本。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConstraint {
    /// 最低版本（含）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// 最高版本（含）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// 排除的版本
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl VersionConstraint {
    /// 是否没有任何约束
    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_none() && self.exclude.is_empty()
    }

    /// 检查目标模块版本是否满足约束
    ///
    /// 目标没有版本或版本无法解析时，任何 `from`/`to` 边界都判为不满足，
    /// 且不会命中 `exclude`。边界本身无法解析时约束同样不满足。
    pub fn matches(&self, target: Option<&str>) -> bool {
        let parsed = target.and_then(parse_version);

        if let Some(raw) = self.from.as_deref() {
            match (Self::bound(raw, "from"), &parsed) {
                (Some(from), Some(v)) if *v >= from => {}
                _ => return false,
            }
        }
        if let Some(raw) = self.to.as_deref() {
            match (Self::bound(raw, "to"), &parsed) {
                (Some(to), Some(v)) if *v <= to => {}
                _ => return false,
            }
        }
        if let Some(v) = &parsed {
            if self
                .exclude
                .iter()
                .filter_map(|e| parse_version(e))
                .any(|e| e == *v)
            {
                return false;
            }
        }
        true
    }

    fn bound(raw: &str, which: &str) -> Option<Version> {
        let version = parse_version(raw);
        if version.is_none() {
            tracing::warn!(bound = which, version = %raw, "版本约束无法解析");
        }
        version
    }
}

/// 清单中的依赖声明：模块名称或完整对象
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependSpec {
    /// 只有模块名称
    Name(String),
    /// 带版本约束和失败动作
    Detailed {
        /// 依赖模块名称
        name: String,
        /// 版本约束
        #[serde(default)]
        version: Option<VersionConstraint>,
        /// 依赖失败时记录到模块上的动作
        #[serde(default)]
        action: Option<String>,
    },
}

impl DependSpec {
    /// 依赖模块名称
    pub fn name(&self) -> &str {
        match self {
            DependSpec::Name(name) => name,
            DependSpec::Detailed { name, .. } => name,
        }
    }
}

impl From<&str> for DependSpec {
    fn from(name: &str) -> Self {
        DependSpec::Name(name.to_string())
    }
}

/// 依赖边错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyErrorKind {
    /// 目标模块不存在
    Missing,
    /// 目标模块被禁用
    Disabled,
    /// 目标模块版本不满足约束
    Version,
    /// 目标模块自身失败
    Parent,
}

impl fmt::Display for DependencyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DependencyErrorKind::Missing => "missing",
            DependencyErrorKind::Disabled => "disabled",
            DependencyErrorKind::Version => "version",
            DependencyErrorKind::Parent => "parent",
        };
        f.write_str(s)
    }
}

/// 依赖边上记录的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyError {
    /// 错误类型
    pub kind: DependencyErrorKind,
    /// 是否已传播到所属模块
    pub propagated: bool,
}

impl DependencyError {
    /// 创建未传播的错误
    pub fn new(kind: DependencyErrorKind) -> Self {
        Self {
            kind,
            propagated: false,
        }
    }
}

/// 规范化后的依赖边
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// 依赖模块名称
    pub name: String,
    /// 版本约束
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionConstraint>,
    /// 失败动作
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// 依赖检查结果，`None` 表示满足
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DependencyError>,
}

impl Dependency {
    /// 创建无约束的依赖
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            action: None,
            error: None,
        }
    }

    /// 依赖是否满足（未记录错误）
    pub fn is_satisfied(&self) -> bool {
        self.error.is_none()
    }
}

impl From<DependSpec> for Dependency {
    fn from(spec: DependSpec) -> Self {
        match spec {
            DependSpec::Name(name) => Dependency::new(name),
            DependSpec::Detailed {
                name,
                version,
                action,
            } => Self {
                name,
                version: version.filter(|v| !v.is_empty()),
                action,
                error: None,
            },
        }
    }
}

/// 模块故障来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    /// 模块自身的依赖失败
    Depends,
    /// 模块依赖的模块已失败
    Parent,
}

/// 模块处于 `ERROR` 的原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFault {
    /// 故障来源
    pub kind: FaultKind,
    /// 出问题的依赖
    pub dependency: String,
    /// 依赖边错误类型
    pub reason: DependencyErrorKind,
    /// 失败动作，默认 `"error"`
    pub action: String,
}

/// 清单中的模块声明
///
/// 所有字段都可选，未知字段保存在 `extra` 中。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleParams {
    /// 引导声明
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapSpec>,

    /// 模块版本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// 依赖列表
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<DependSpec>,

    /// URL 前缀
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_prefix: Option<String>,

    /// 模块根目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,

    /// 视图根目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_root_dir: Option<PathBuf>,

    /// 静态资源地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_src: Option<String>,

    /// 页面基础地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_href: Option<String>,

    /// 运行级别
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_level: Option<RunLevel>,

    /// 是否更新已注册的同名模块
    #[serde(default)]
    pub update: bool,

    /// 声明所在的清单文件，由扫描器填写
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_file: Option<PathBuf>,

    /// 其他字段
    #[serde(default, flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl ModuleParams {
    /// 创建带引导回调的声明
    pub fn new(callback: impl Into<String>) -> Self {
        Self {
            bootstrap: Some(BootstrapSpec::callback(callback)),
            ..Default::default()
        }
    }

    /// 设置版本
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// 添加依赖
    pub fn depends_on(mut self, dep: impl Into<DependSpec>) -> Self {
        self.depends.push(dep.into());
        self
    }

    /// 设置运行级别
    pub fn run_level(mut self, level: RunLevel) -> Self {
        self.run_level = Some(level);
        self
    }

    /// 设置 URL 前缀
    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = Some(prefix.into());
        self
    }

    /// 设置根目录
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(dir.into());
        self
    }

    /// 标记为更新已有模块
    pub fn update(mut self) -> Self {
        self.update = true;
        self
    }
}

/// 已注册的模块描述符
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// 模块名称
    pub name: String,
    /// 运行级别
    pub run_level: RunLevel,
    /// 运行状态
    pub run_status: RunStatus,
    /// 引导声明
    pub bootstrap: BootstrapSpec,
    /// 模块版本
    pub version: Option<String>,
    /// 模块根目录
    pub root_dir: PathBuf,
    /// 视图根目录
    pub view_root_dir: PathBuf,
    /// 静态资源地址
    pub base_src: String,
    /// 页面基础地址
    pub base_href: String,
    /// URL 前缀
    pub url_prefix: Option<String>,
    /// 声明所在的清单文件
    pub manifest_file: Option<PathBuf>,
    /// 依赖边
    pub depends: Vec<Dependency>,
    /// 满足的依赖（排序用）
    pub parents: BTreeSet<String>,
    /// 依赖本模块的模块（排序用）
    pub children: BTreeSet<String>,
    /// 失败原因
    pub fault: Option<ModuleFault>,
    /// 引导完成时间
    pub loaded_at: Option<DateTime<Utc>>,
    /// 其他字段
    pub extra: IndexMap<String, serde_json::Value>,
}

impl ModuleDescriptor {
    /// 是否等待引导
    pub fn is_pending(&self) -> bool {
        self.run_status == RunStatus::Pending && self.fault.is_none()
    }

    /// 标记为待引导，`ERROR` 和 `LOADED` 不受影响
    ///
    /// 返回状态是否发生变化。
    pub fn mark_pending(&mut self) -> bool {
        match self.run_status {
            RunStatus::Idle => {
                self.run_status = RunStatus::Pending;
                true
            }
            _ => false,
        }
    }

    /// 标记为失败
    pub fn mark_error(&mut self, fault: ModuleFault) {
        self.run_status = RunStatus::Error;
        self.fault = Some(fault);
    }

    /// 清除依赖检查派生的数据
    pub fn reset_links(&mut self) {
        self.parents.clear();
        self.children.clear();
        for dep in &mut self.depends {
            dep.error = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_level_serde() {
        let level: RunLevel = serde_json::from_str("\"REQUIRED\"").unwrap();
        assert_eq!(level, RunLevel::Required);
        let level: RunLevel = serde_json::from_str("\"ondemand\"").unwrap();
        assert_eq!(level, RunLevel::OnDemand);
        assert_eq!(serde_json::to_string(&RunLevel::Disabled).unwrap(), "\"DISABLED\"");
        assert_eq!(RunLevel::default(), RunLevel::OnDemand);
        assert_eq!("Requested".parse::<RunLevel>().unwrap(), RunLevel::Requested);
        assert!("sometimes".parse::<RunLevel>().is_err());
    }

    #[test]
    fn test_parse_version_lenient() {
        assert_eq!(parse_version("1"), Some(Version::new(1, 0, 0)));
        assert_eq!(parse_version("1.2"), Some(Version::new(1, 2, 0)));
        assert_eq!(parse_version("v2.0.1"), Some(Version::new(2, 0, 1)));
        assert_eq!(parse_version("1.2-beta").map(|v| v.pre.to_string()), Some("beta".to_string()));
        assert!(parse_version("abc").is_none());
        assert!(parse_version("").is_none());
        assert!(parse_version("1..2").is_none());
    }

    #[test]
    fn test_version_constraint_bounds() {
        let c = VersionConstraint {
            from: Some("1.0.0".into()),
            to: Some("2.0".into()),
            exclude: vec!["1.5.0".into()],
        };
        assert!(c.matches(Some("1.0.0")));
        assert!(c.matches(Some("2.0.0")));
        assert!(c.matches(Some("1.4")));
        assert!(!c.matches(Some("0.9.0")));
        assert!(!c.matches(Some("2.0.1")));
        assert!(!c.matches(Some("1.5.0")));
    }

    #[test]
    fn test_version_constraint_unversioned_target() {
        let bounded = VersionConstraint {
            from: Some("1.0.0".into()),
            ..Default::default()
        };
        assert!(!bounded.matches(None));
        assert!(!bounded.matches(Some("garbage")));

        let exclude_only = VersionConstraint {
            exclude: vec!["1.0.0".into()],
            ..Default::default()
        };
        assert!(exclude_only.matches(None));
    }

    #[test]
    fn test_version_constraint_unparsable_bound() {
        let from = VersionConstraint {
            from: Some("latest".into()),
            ..Default::default()
        };
        assert!(!from.matches(Some("1.0.0")));

        let to = VersionConstraint {
            to: Some("next".into()),
            ..Default::default()
        };
        assert!(!to.matches(Some("1.0.0")));
    }

    #[test]
    fn test_depend_spec_forms() {
        let specs: Vec<DependSpec> = serde_json::from_str(
            r#"["Core", {"name": "Auth", "version": {"from": "1.0"}, "action": "disable"}]"#,
        )
        .unwrap();
        assert_eq!(specs[0].name(), "Core");
        assert_eq!(specs[1].name(), "Auth");

        let dep: Dependency = specs[1].clone().into();
        assert_eq!(dep.action.as_deref(), Some("disable"));
        assert_eq!(dep.version.unwrap().from.as_deref(), Some("1.0"));
        assert!(dep.error.is_none());
    }

    #[test]
    fn test_bootstrap_merge() {
        let mut spec = BootstrapSpec::callback("core_init").with_file("init.rs");
        spec.merge(BootstrapSpec::callback("core_init_v2"));
        assert_eq!(spec.callback, "core_init_v2");
        assert_eq!(spec.file.as_deref(), Some("init.rs"));
    }

    #[test]
    fn test_module_params_extra_fields() {
        let params: ModuleParams = serde_json::from_value(serde_json::json!({
            "bootstrap": {"callback": "blog_init"},
            "run_level": "REQUESTED",
            "description": "博客"
        }))
        .unwrap();
        assert_eq!(params.run_level, Some(RunLevel::Requested));
        assert_eq!(params.extra["description"], "博客");
        assert!(!params.update);
    }
}
