//! 模块注册表
//!
//! [`ModuleStore`] 按注册顺序保存模块描述符；[`ModuleRegistry`] 在其上提供
//! 清单扫描、依赖检查、排序、引导和当前模块查询。

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::core::store::ConfigStore;
use crate::module::bootstrap::BootstrapCallbacks;
use crate::module::context::ModuleContext;
use crate::module::metadata::{BootstrapSpec, ModuleDescriptor, ModuleParams, RunLevel};
use crate::module::resolver::{normalize_path, Environment, ModuleParamResolver};
use crate::module::scanner::ManifestScanner;
use crate::module::BootstrapContext;
use crate::router::event_bus::{EventBus, BEFORE_DISPATCH};
use crate::utils::{CoreError, Result};

/// 模块存储
///
/// 插入有序。排序前为注册顺序，`sort_depends` 之后为依赖顺序。
#[derive(Debug)]
pub struct ModuleStore {
    modules: IndexMap<String, ModuleDescriptor>,
    resolver: ModuleParamResolver,
}

impl ModuleStore {
    /// 创建空存储
    pub fn new(config: ConfigStore) -> Self {
        Self {
            modules: IndexMap::new(),
            resolver: ModuleParamResolver::new(config),
        }
    }

    /// 注册或更新模块
    ///
    /// # Returns
    ///
    /// 模块被插入或更新时返回 `true`，声明被解析器跳过时返回 `false`
    ///
    /// # Errors
    ///
    /// 模块已存在且未声明 `update` 时返回 `DuplicateModule`
    pub fn register(&mut self, name: &str, params: ModuleParams) -> Result<bool> {
        if let Some(existing) = self.modules.get_mut(name) {
            if !params.update {
                let location = match existing.bootstrap.file {
                    Some(ref file) => existing.root_dir.join(file),
                    None => existing.root_dir.clone(),
                };
                return Err(CoreError::DuplicateModule {
                    name: name.to_string(),
                    location: location.display().to_string(),
                });
            }

            tracing::debug!(module = %name, "更新模块");
            let env = self.resolver.env();
            merge_update(existing, params, env);
            return Ok(true);
        }

        match self.resolver.resolve(name, params) {
            Some(descriptor) => {
                tracing::debug!(
                    module = %name,
                    run_level = %descriptor.run_level,
                    "模块已注册"
                );
                self.modules.insert(name.to_string(), descriptor);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 获取模块
    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(name)
    }

    /// 获取可变模块
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModuleDescriptor> {
        self.modules.get_mut(name)
    }

    /// 是否包含模块
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// 按存储顺序遍历模块
    pub fn all(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.values()
    }

    pub(crate) fn all_mut(&mut self) -> impl Iterator<Item = &mut ModuleDescriptor> {
        self.modules.values_mut()
    }

    /// 按存储顺序的模块名称
    pub fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    /// 模块数量
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// 环境快照
    pub fn env(&self) -> &Environment {
        self.resolver.env()
    }

    /// 按给定顺序重排，未列出的模块保持原有相对顺序排在最后
    pub(crate) fn reorder(&mut self, order: &[String]) {
        let position: std::collections::HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let rank = |name: &str| position.get(name).copied().unwrap_or(usize::MAX);
        self.modules.sort_by(|a, _, b, _| rank(a).cmp(&rank(b)));
    }
}

/// 合并更新声明：列表追加、映射按键合并、标量覆盖
fn merge_update(module: &mut ModuleDescriptor, params: ModuleParams, env: &Environment) {
    module
        .depends
        .extend(params.depends.into_iter().map(Into::into));

    if let Some(bootstrap) = params.bootstrap {
        module.bootstrap.merge(bootstrap);
    }
    for (key, value) in params.extra {
        module.extra.insert(key, value);
    }

    if let Some(version) = params.version {
        module.version = Some(version);
    }
    if let Some(dir) = params.root_dir {
        module.root_dir = normalize_path(&module.root_dir.join(dir));
    }
    if let Some(dir) = params.view_root_dir {
        module.view_root_dir = normalize_path(&module.root_dir.join(dir));
    }
    if let Some(src) = params.base_src {
        module.base_src = src;
    }
    if let Some(level) = params.run_level {
        module.run_level = level;
    }
    if let Some(file) = params.manifest_file {
        module.manifest_file = Some(file);
    }
    if let Some(prefix) = params.url_prefix {
        module.base_href = env.module_base_href(Some(&prefix));
        module.url_prefix = Some(prefix);
    }
    if let Some(href) = params.base_href {
        module.base_href = href;
    }
}

/// 模块注册表
#[derive(Debug)]
pub struct ModuleRegistry {
    store: ModuleStore,
    config: ConfigStore,
    context: ModuleContext,
    inline: BootstrapCallbacks,
    url_prefixes: Arc<RwLock<IndexMap<String, String>>>,
}

impl ModuleRegistry {
    /// 创建注册表
    ///
    /// # Arguments
    ///
    /// * `config` - 运行时配置，提供运行级别覆盖和环境信息
    /// * `context` - 当前模块上下文栈
    pub fn new(config: ConfigStore, context: ModuleContext) -> Self {
        Self {
            store: ModuleStore::new(config.clone()),
            config,
            context,
            inline: BootstrapCallbacks::new(),
            url_prefixes: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    /// 模块存储
    pub fn store(&self) -> &ModuleStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut ModuleStore {
        &mut self.store
    }

    /// 运行时配置
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// 上下文栈
    pub fn context(&self) -> &ModuleContext {
        &self.context
    }

    pub(crate) fn inline_callbacks(&self) -> &BootstrapCallbacks {
        &self.inline
    }

    /// 注册模块
    ///
    /// # Errors
    ///
    /// 重复注册且未声明 `update` 时返回 `DuplicateModule`
    pub fn module(&mut self, name: &str, params: ModuleParams) -> Result<()> {
        if self.store.register(name, params)? {
            self.sync_url_prefix(name);
        }
        Ok(())
    }

    /// 注册内联模块，引导回调为闭包
    ///
    /// 运行级别按常规规则从配置读取。
    pub fn module_fn<F>(&mut self, name: &str, callback: F) -> Result<()>
    where
        F: Fn(&BootstrapContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let callback_name = format!("{}::inline", name);
        self.inline.register(callback_name.clone(), callback);
        self.module(
            name,
            ModuleParams {
                bootstrap: Some(BootstrapSpec::callback(callback_name)),
                ..Default::default()
            },
        )
    }

    /// 获取模块
    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.store.get(name)
    }

    /// 按存储顺序遍历模块
    pub fn all(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.store.all()
    }

    /// 扫描清单并注册其中的模块
    ///
    /// # Returns
    ///
    /// 注册或更新的模块名称，按清单中的顺序
    ///
    /// # Errors
    ///
    /// - 清单无法解析时返回 `ManifestParse`
    /// - 模块重复注册时返回 `DuplicateModule`
    pub fn scan(&mut self, pattern: &str) -> Result<Vec<String>> {
        let manifests = ManifestScanner::scan(pattern)?;
        self.register_manifests(manifests)
    }

    /// 异步读取清单后注册
    pub async fn scan_async(&mut self, pattern: &str) -> Result<Vec<String>> {
        let manifests = ManifestScanner::scan_async(pattern).await?;
        self.register_manifests(manifests)
    }

    fn register_manifests(
        &mut self,
        manifests: Vec<(std::path::PathBuf, crate::module::parser::Manifest)>,
    ) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for (path, manifest) in manifests {
            for (name, mut params) in manifest.modules {
                params.manifest_file = Some(path.clone());
                if self.store.register(&name, params)? {
                    self.sync_url_prefix(&name);
                    names.push(name);
                }
            }
        }
        tracing::info!(modules = names.len(), "清单扫描完成");
        Ok(names)
    }

    /// 设置模块运行级别
    ///
    /// `update_config` 为 `true` 时同时写入 `modules/<name>/run_level`，
    /// 否则下一次依赖检查时配置中的覆盖值仍会生效。
    ///
    /// # Errors
    ///
    /// 模块不存在时返回 `ModuleNotFound`
    pub fn set_run_level(&mut self, name: &str, level: RunLevel, update_config: bool) -> Result<()> {
        let module = self
            .store
            .get_mut(name)
            .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))?;
        module.run_level = level;
        if update_config {
            self.config
                .set(&format!("modules/{}/run_level", name), level.as_str());
        }
        Ok(())
    }

    /// 依赖检查
    pub fn check_depends(&mut self) -> Result<()> {
        crate::module::dependency::DependencyResolver::check(&mut self.store, &self.config)
    }

    /// 按依赖关系排序
    pub fn sort_depends(&mut self) -> Result<()> {
        crate::module::dependency::TopologicalSorter::sort(&mut self.store)
    }

    /// 栈顶模块
    pub fn current_module(&self) -> Option<&ModuleDescriptor> {
        self.context
            .current_module_name()
            .and_then(|name| self.store.get(&name))
    }

    /// 栈顶模块名称
    pub fn current_module_name(&self) -> Option<String> {
        self.context.current_module_name()
    }

    /// 压入模块
    pub fn push_module(&self, name: impl Into<String>) {
        self.context.push_module(name);
    }

    /// 弹出模块
    pub fn pop_module(&self) -> Option<String> {
        self.context.pop_module()
    }

    /// 订阅分发前事件，为每个带 URL 前缀的模块返回重定向
    pub fn subscribe_dispatch_hook(&self, events: &EventBus) -> String {
        let prefixes = Arc::clone(&self.url_prefixes);
        events.on(BEFORE_DISPATCH, move |_args| {
            let prefixes = prefixes.read().unwrap_or_else(|e| e.into_inner());
            Value::Array(prefixes.values().map(|p| redirect_for(p)).collect())
        })
    }

    /// 当前的重定向列表
    pub fn redirects(&self) -> Vec<Value> {
        self.url_prefixes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|p| redirect_for(p))
            .collect()
    }

    fn sync_url_prefix(&self, name: &str) {
        let prefix = self
            .store
            .get(name)
            .and_then(|m| m.url_prefix.as_deref())
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        let mut prefixes = self.url_prefixes.write().unwrap_or_else(|e| e.into_inner());
        match prefix {
            Some(prefix) => {
                prefixes.insert(name.to_string(), prefix);
            }
            None => {
                prefixes.shift_remove(name);
            }
        }
    }

    /// 导出存储内容，用于调试
    pub fn debug(&self) -> Value {
        let modules: serde_json::Map<String, Value> = self
            .store
            .all()
            .map(|m| {
                (
                    m.name.clone(),
                    json!({
                        "run_level": m.run_level,
                        "run_status": m.run_status,
                        "version": m.version,
                        "root_dir": m.root_dir.display().to_string(),
                        "base_src": m.base_src,
                        "base_href": m.base_href,
                        "depends": m.depends,
                        "parents": m.parents,
                        "children": m.children,
                        "fault": m.fault,
                        "loaded_at": m.loaded_at,
                    }),
                )
            })
            .collect();
        Value::Object(modules)
    }
}

fn redirect_for(prefix: &str) -> Value {
    json!({
        "route": format!("GET /{}", prefix),
        "target": format!("{}/", prefix),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::{DependSpec, RunStatus};
    use crate::module::ModuleContext;

    fn registry() -> ModuleRegistry {
        ModuleRegistry::new(ConfigStore::new(), ModuleContext::new())
    }

    #[test]
    fn test_register_and_get() {
        let mut reg = registry();
        reg.module("Core", ModuleParams::new("core_init").version("1.0.0"))
            .unwrap();
        reg.module("Auth", ModuleParams::new("auth_init").depends_on("Core"))
            .unwrap();

        assert_eq!(reg.store().names(), vec!["Core", "Auth"]);
        let core = reg.get("Core").unwrap();
        assert_eq!(core.version.as_deref(), Some("1.0.0"));
        assert_eq!(core.run_status, RunStatus::Idle);
        assert!(reg.get("Blog").is_none());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut reg = registry();
        reg.module("Core", ModuleParams::new("core_init")).unwrap();
        let err = reg.module("Core", ModuleParams::new("other")).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateModule { ref name, .. } if name == "Core"));
    }

    #[test]
    fn test_update_merges() {
        let mut reg = registry();
        reg.module(
            "Blog",
            ModuleParams::new("blog_init")
                .version("1.0.0")
                .depends_on("Core"),
        )
        .unwrap();

        let mut update = ModuleParams::default()
            .version("1.1.0")
            .depends_on("Auth")
            .url_prefix("blog")
            .update();
        update.extra.insert("title".into(), json!("博客"));
        reg.module("Blog", update).unwrap();

        let blog = reg.get("Blog").unwrap();
        assert_eq!(blog.version.as_deref(), Some("1.1.0"));
        let deps: Vec<&str> = blog.depends.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(deps, vec!["Core", "Auth"]);
        assert_eq!(blog.bootstrap.callback, "blog_init");
        assert_eq!(blog.base_href, "//localhost/blog");
        assert_eq!(blog.extra["title"], "博客");
    }

    #[test]
    fn test_module_without_callback_skipped() {
        let mut reg = registry();
        reg.module("Ghost", ModuleParams::default()).unwrap();
        assert!(reg.store().is_empty());
    }

    #[test]
    fn test_module_fn_registers_inline_callback() {
        let mut reg = registry();
        reg.module_fn("Inline", |_ctx| Ok(())).unwrap();

        let module = reg.get("Inline").unwrap();
        assert_eq!(module.bootstrap.callback, "Inline::inline");
        assert!(reg.inline_callbacks().contains("Inline::inline"));
    }

    #[test]
    fn test_set_run_level() {
        let mut reg = registry();
        reg.module("Blog", ModuleParams::new("blog_init")).unwrap();

        reg.set_run_level("Blog", RunLevel::Requested, false).unwrap();
        assert_eq!(reg.get("Blog").unwrap().run_level, RunLevel::Requested);
        assert!(reg.config().get("modules/Blog/run_level").is_none());

        reg.set_run_level("Blog", RunLevel::Disabled, true).unwrap();
        assert_eq!(
            reg.config().get_as::<RunLevel>("modules/Blog/run_level"),
            Some(RunLevel::Disabled)
        );

        let err = reg.set_run_level("Nope", RunLevel::Required, false).unwrap_err();
        assert!(matches!(err, CoreError::ModuleNotFound(_)));
    }

    #[test]
    fn test_current_module() {
        let mut reg = registry();
        reg.module("Core", ModuleParams::new("core_init")).unwrap();

        assert!(reg.current_module().is_none());
        reg.push_module("Core");
        assert_eq!(reg.current_module().map(|m| m.name.as_str()), Some("Core"));
        reg.push_module("Unknown");
        assert_eq!(reg.current_module_name().as_deref(), Some("Unknown"));
        assert!(reg.current_module().is_none());
        reg.pop_module();
        assert_eq!(reg.pop_module().as_deref(), Some("Core"));
    }

    #[test]
    fn test_dispatch_hook_redirects() {
        let mut reg = registry();
        reg.module("Core", ModuleParams::new("core_init")).unwrap();
        reg.module("Blog", ModuleParams::new("blog_init").url_prefix("/blog/"))
            .unwrap();

        let bus = EventBus::new(reg.context().clone());
        reg.subscribe_dispatch_hook(&bus);

        let results = bus.fire(BEFORE_DISPATCH, &Value::Null);
        assert_eq!(
            results,
            vec![json!([{"route": "GET /blog", "target": "blog/"}])]
        );

        // 更新前缀后钩子读取最新值
        reg.module("Core", ModuleParams::default().url_prefix("admin").update())
            .unwrap();
        assert_eq!(reg.redirects().len(), 2);
    }

    #[test]
    fn test_debug_dump() {
        let mut reg = registry();
        reg.module(
            "Auth",
            ModuleParams {
                depends: vec![DependSpec::Name("Core".into())],
                ..ModuleParams::new("auth_init")
            },
        )
        .unwrap();

        let dump = reg.debug();
        assert_eq!(dump["Auth"]["run_level"], "ONDEMAND");
        assert_eq!(dump["Auth"]["depends"][0]["name"], "Core");
    }

    #[test]
    fn test_reorder() {
        let mut store = ModuleStore::new(ConfigStore::new());
        for name in ["A", "B", "C"] {
            store.register(name, ModuleParams::new("cb")).unwrap();
        }
        store.reorder(&["C".to_string(), "A".to_string()]);
        assert_eq!(store.names(), vec!["C", "A", "B"]);
    }
}
