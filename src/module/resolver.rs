//! 模块参数解析
//!
//! 把清单中的原始声明补全为 [`ModuleDescriptor`]：根目录、视图目录、
//! 静态资源地址、页面基础地址和运行级别。

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use crate::core::store::ConfigStore;
use crate::module::metadata::{ModuleDescriptor, ModuleParams, RunLevel, RunStatus};

/// 请求环境快照
///
/// 首次使用时从配置读取，之后保持不变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// 文档根目录
    pub doc_root: PathBuf,
    /// 主机名
    pub http_host: String,
    /// 站点基础地址，形如 `//host/base`
    pub base_href: String,
}

impl Environment {
    /// 从配置读取 `web/doc_root`、`web/http_host`、`web/base_path`
    pub fn from_config(config: &ConfigStore) -> Self {
        let doc_root = config
            .get_as::<String>("web/doc_root")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let doc_root = doc_root.canonicalize().unwrap_or(doc_root);

        let http_host = config
            .get_as::<String>("web/http_host")
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string());

        let base_path = config
            .get_as::<String>("web/base_path")
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .map(|p| format!("/{}", p))
            .unwrap_or_default();

        Self {
            base_href: format!("//{}{}", http_host, base_path),
            doc_root,
            http_host,
        }
    }

    /// 模块页面基础地址：`base_href` 加上 `/url_prefix`
    pub fn module_base_href(&self, url_prefix: Option<&str>) -> String {
        match url_prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{}/{}", self.base_href, prefix),
            None => self.base_href.clone(),
        }
    }

    /// 目录对应的静态资源地址
    fn src_for(&self, dir: &Path) -> String {
        let relative = dir.strip_prefix(&self.doc_root).unwrap_or(dir);
        let relative = path_to_url(relative);
        let url = if relative.is_empty() {
            format!("//{}", self.http_host)
        } else {
            format!("//{}/{}", self.http_host, relative)
        };
        url.trim_end_matches('/').to_string()
    }
}

/// 清单目录信息
#[derive(Debug, Clone)]
struct ManifestDir {
    root_dir: PathBuf,
    base_src: String,
}

/// 模块参数解析器
#[derive(Debug)]
pub struct ModuleParamResolver {
    config: ConfigStore,
    env: OnceLock<Environment>,
    manifests: HashMap<PathBuf, ManifestDir>,
}

impl ModuleParamResolver {
    /// 创建解析器
    pub fn new(config: ConfigStore) -> Self {
        Self {
            config,
            env: OnceLock::new(),
            manifests: HashMap::new(),
        }
    }

    /// 环境快照
    pub fn env(&self) -> &Environment {
        self.env.get_or_init(|| Environment::from_config(&self.config))
    }

    /// 补全模块声明
    ///
    /// 没有引导回调的声明被跳过并返回 `None`。
    pub fn resolve(&mut self, name: &str, params: ModuleParams) -> Option<ModuleDescriptor> {
        let bootstrap = match params.bootstrap {
            Some(ref b) if !b.callback.trim().is_empty() => b.clone(),
            _ => {
                tracing::warn!(module = %name, "模块缺少引导回调，已跳过");
                return None;
            }
        };

        let manifest = self.manifest_dir(params.manifest_file.as_deref());

        let root_dir = match params.root_dir {
            Some(ref dir) => normalize_path(&manifest.root_dir.join(dir)),
            None => manifest.root_dir.clone(),
        };
        let view_root_dir = match params.view_root_dir {
            Some(ref dir) => normalize_path(&root_dir.join(dir)),
            None => root_dir.clone(),
        };

        let base_src = match params.base_src {
            Some(src) => src,
            None => match root_dir.strip_prefix(&manifest.root_dir) {
                Ok(rest) if rest.as_os_str().is_empty() => manifest.base_src.clone(),
                Ok(rest) => normalize_url(&format!("{}/{}", manifest.base_src, path_to_url(rest))),
                Err(_) => self.env().src_for(&root_dir),
            },
        };

        let base_href = params
            .base_href
            .unwrap_or_else(|| self.env().module_base_href(params.url_prefix.as_deref()));

        let run_level = params
            .run_level
            .or_else(|| {
                self.config
                    .get_as::<RunLevel>(&format!("modules/{}/run_level", name))
            })
            .unwrap_or_default();

        Some(ModuleDescriptor {
            name: name.to_string(),
            run_level,
            run_status: RunStatus::Idle,
            bootstrap,
            version: params.version,
            root_dir,
            view_root_dir,
            base_src,
            base_href,
            url_prefix: params.url_prefix,
            manifest_file: params.manifest_file,
            depends: params.depends.into_iter().map(Into::into).collect(),
            parents: Default::default(),
            children: Default::default(),
            fault: None,
            loaded_at: None,
            extra: params.extra,
        })
    }

    fn manifest_dir(&mut self, manifest_file: Option<&Path>) -> ManifestDir {
        let key = manifest_file.map(Path::to_path_buf).unwrap_or_default();
        if let Some(cached) = self.manifests.get(&key) {
            return cached.clone();
        }

        let dir = manifest_file
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let root_dir = dir.canonicalize().unwrap_or_else(|_| normalize_path(&dir));
        let entry = ManifestDir {
            base_src: self.env().src_for(&root_dir),
            root_dir,
        };

        self.manifests.insert(key, entry.clone());
        entry
    }
}

/// 词法规范化路径，消去 `.` 和 `..`
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn path_to_url(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// 规范化 `//host/path` 形式的地址
fn normalize_url(url: &str) -> String {
    let (prefix, rest) = match url.strip_prefix("//") {
        Some(rest) => match rest.split_once('/') {
            Some((host, path)) => (format!("//{}", host), path),
            None => return url.trim_end_matches('/').to_string(),
        },
        None => (String::new(), url),
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        prefix
    } else {
        format!("{}/{}", prefix, segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::BootstrapSpec;
    use serde_json::json;

    fn store(doc_root: &Path) -> ConfigStore {
        ConfigStore::from_value(json!({
            "web": {
                "doc_root": doc_root.to_string_lossy(),
                "http_host": "example.com",
                "base_path": "/app/"
            }
        }))
    }

    #[test]
    fn test_environment_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::from_config(&store(dir.path()));
        assert_eq!(env.base_href, "//example.com/app");
        assert_eq!(env.module_base_href(Some("blog")), "//example.com/app/blog");
        assert_eq!(env.module_base_href(Some("")), "//example.com/app");
    }

    #[test]
    fn test_environment_defaults() {
        let env = Environment::from_config(&ConfigStore::new());
        assert_eq!(env.http_host, "localhost");
        assert_eq!(env.base_href, "//localhost");
    }

    #[test]
    fn test_base_href_without_base_path_ignores_doc_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::from_value(json!({
            "web": {
                "doc_root": dir.path().to_string_lossy(),
                "http_host": "example.com"
            }
        }));
        let env = Environment::from_config(&config);
        assert_eq!(env.base_href, "//example.com");
        assert_eq!(env.module_base_href(Some("/blog/")), "//example.com/blog");
    }

    #[test]
    fn test_resolve_defaults_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let module_dir = dir.path().join("modules").join("blog");
        std::fs::create_dir_all(module_dir.join("views")).unwrap();
        let manifest = module_dir.join("manifest.yaml");

        let mut resolver = ModuleParamResolver::new(store(dir.path()));
        let params = ModuleParams {
            manifest_file: Some(manifest),
            url_prefix: Some("blog".into()),
            view_root_dir: Some("views".into()),
            ..ModuleParams::new("blog_init")
        };

        let module = resolver.resolve("Blog", params).unwrap();
        let canonical = module_dir.canonicalize().unwrap();
        assert_eq!(module.root_dir, canonical);
        assert_eq!(module.view_root_dir, canonical.join("views"));
        assert_eq!(module.base_src, "//example.com/modules/blog");
        assert_eq!(module.base_href, "//example.com/app/blog");
        assert_eq!(module.run_level, RunLevel::OnDemand);
        assert_eq!(module.run_status, RunStatus::Idle);
    }

    #[test]
    fn test_resolve_relative_root_dir() {
        let dir = tempfile::tempdir().unwrap();
        let module_dir = dir.path().join("modules").join("blog");
        std::fs::create_dir_all(&module_dir).unwrap();

        let mut resolver = ModuleParamResolver::new(store(dir.path()));
        let params = ModuleParams {
            manifest_file: Some(module_dir.join("manifest.json")),
            root_dir: Some("./lib/../src".into()),
            ..ModuleParams::new("blog_init")
        };

        let module = resolver.resolve("Blog", params).unwrap();
        assert_eq!(module.root_dir, module_dir.canonicalize().unwrap().join("src"));
        assert_eq!(module.base_src, "//example.com/modules/blog/src");
    }

    #[test]
    fn test_resolve_run_level_from_config() {
        let config = ConfigStore::new();
        config.set("modules/Auth/run_level", "REQUESTED");
        let mut resolver = ModuleParamResolver::new(config);

        let auth = resolver.resolve("Auth", ModuleParams::new("auth_init")).unwrap();
        assert_eq!(auth.run_level, RunLevel::Requested);

        let explicit = resolver
            .resolve("Auth", ModuleParams::new("auth_init").run_level(RunLevel::Disabled))
            .unwrap();
        assert_eq!(explicit.run_level, RunLevel::Disabled);
    }

    #[test]
    fn test_resolve_without_callback_is_skipped() {
        let mut resolver = ModuleParamResolver::new(ConfigStore::new());
        assert!(resolver.resolve("Empty", ModuleParams::default()).is_none());

        let blank = ModuleParams {
            bootstrap: Some(BootstrapSpec::callback("  ")),
            ..Default::default()
        };
        assert!(resolver.resolve("Blank", blank).is_none());
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut resolver = ModuleParamResolver::new(ConfigStore::new());
        let params = ModuleParams::new("core_init").version("1.0.0").depends_on("Util");
        let a = resolver.resolve("Core", params.clone()).unwrap();
        let b = resolver.resolve("Core", params).unwrap();
        assert_eq!(a.root_dir, b.root_dir);
        assert_eq!(a.base_src, b.base_src);
        assert_eq!(a.depends, b.depends);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("//h/a/./b/../c/"), "//h/a/c");
        assert_eq!(normalize_url("//h/"), "//h");
        assert_eq!(normalize_url("//h"), "//h");
    }
}
