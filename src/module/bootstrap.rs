//! 模块引导
//!
//! 依赖检查和排序之后，按存储顺序逐个调用 `PENDING` 模块的引导回调。
//! 回调执行期间模块名称位于上下文栈顶。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::core::store::ConfigStore;
use crate::module::context::ModuleContext;
use crate::module::metadata::{ModuleDescriptor, RunStatus};
use crate::module::registry::ModuleRegistry;
use crate::router::event_bus::EventBus;
use crate::utils::{CoreError, Result};

/// 引导回调函数类型
pub type BootstrapFn = Arc<dyn Fn(&BootstrapContext<'_>) -> Result<()> + Send + Sync>;

/// 引导回调表：回调名称 -> 回调函数
#[derive(Clone, Default)]
pub struct BootstrapCallbacks {
    callbacks: HashMap<String, BootstrapFn>,
}

impl std::fmt::Debug for BootstrapCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.callbacks.keys().collect();
        names.sort();
        f.debug_struct("BootstrapCallbacks")
            .field("callbacks", &names)
            .finish()
    }
}

impl BootstrapCallbacks {
    /// 创建空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册回调，同名回调被替换
    pub fn register<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn(&BootstrapContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.insert(name.into(), Arc::new(callback));
    }

    /// 查找回调
    pub fn get(&self, name: &str) -> Option<&BootstrapFn> {
        self.callbacks.get(name)
    }

    /// 是否包含回调
    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    /// 回调数量
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

/// 引导回调可见的上下文
pub struct BootstrapContext<'a> {
    /// 正在引导的模块
    pub module: &'a ModuleDescriptor,
    /// 解析后的引导文件
    pub file: Option<PathBuf>,
    /// 运行时配置
    pub config: &'a ConfigStore,
    /// 事件总线
    pub events: &'a EventBus,
    /// 上下文栈
    pub context: &'a ModuleContext,
}

impl BootstrapContext<'_> {
    /// 模块名称
    pub fn name(&self) -> &str {
        &self.module.name
    }
}

/// 引导所需的外部协作者
#[derive(Debug, Clone, Copy)]
pub struct BootstrapEnv<'a> {
    /// 应用注册的回调
    pub callbacks: &'a BootstrapCallbacks,
    /// 事件总线
    pub events: &'a EventBus,
}

impl ModuleRegistry {
    /// 引导所有待加载模块
    ///
    /// 依次执行依赖检查、排序，然后按顺序调用引导回调。非 `PENDING` 模块被跳过。
    ///
    /// # Returns
    ///
    /// 按引导顺序排列的模块名称
    ///
    /// # Errors
    ///
    /// - 依赖检查或排序的致命错误
    /// - 引导文件不存在时返回 `BootstrapFileMissing`
    /// - 回调未注册时返回 `UnknownCallback`
    /// - 回调失败时返回 `BootstrapFailed`，之前已引导的模块不会回滚
    pub fn bootstrap(&mut self, env: &BootstrapEnv<'_>) -> Result<Vec<String>> {
        self.check_depends()?;
        self.sort_depends()?;

        let pending: Vec<String> = self
            .all()
            .filter(|m| m.is_pending())
            .map(|m| m.name.clone())
            .collect();

        let mut loaded = Vec::with_capacity(pending.len());
        for name in pending {
            self.bootstrap_module(&name, env)?;
            loaded.push(name);
        }

        tracing::info!(modules = loaded.len(), "模块引导完成");
        Ok(loaded)
    }

    fn bootstrap_module(&mut self, name: &str, env: &BootstrapEnv<'_>) -> Result<()> {
        let module = self
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))?;

        let _scope = self.context().scope(name);
        let started = Instant::now();
        tracing::debug!(module = %name, "开始引导模块");

        let file = match module.bootstrap.file {
            Some(ref file) => {
                let path = module.root_dir.join(file);
                if !path.is_file() {
                    return Err(CoreError::BootstrapFileMissing {
                        module: name.to_string(),
                        path,
                    });
                }
                Some(path)
            }
            None => None,
        };

        let callback = env
            .callbacks
            .get(&module.bootstrap.callback)
            .or_else(|| self.inline_callbacks().get(&module.bootstrap.callback))
            .cloned()
            .ok_or_else(|| CoreError::UnknownCallback {
                module: name.to_string(),
                callback: module.bootstrap.callback.clone(),
            })?;

        let ctx = BootstrapContext {
            module: &module,
            file,
            config: self.config(),
            events: env.events,
            context: self.context(),
        };
        callback(&ctx).map_err(|e| CoreError::BootstrapFailed {
            module: name.to_string(),
            source: Box::new(e),
        })?;

        if let Some(stored) = self.store_mut().get_mut(name) {
            stored.run_status = RunStatus::Loaded;
            stored.loaded_at = Some(Utc::now());
        }

        tracing::debug!(
            module = %name,
            duration_ms = started.elapsed().as_millis() as u64,
            "模块引导完成"
        );
        Ok(())
    }
}
