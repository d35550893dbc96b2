//! 应用容器
//!
//! 持有配置存储、模块注册表、引导回调表、事件总线和上下文栈，
//! 把扫描、引导和分发前事件串联起来。
//!
//! # 示例
//!
//! ```rust,no_run
//! use bucky_core::{App, CoreConfig};
//!
//! let mut app = App::new(CoreConfig::default());
//! app.callback("core_init", |ctx| {
//!     tracing::info!(module = %ctx.name(), "核心模块已初始化");
//!     Ok(())
//! });
//! app.load("modules/*, plugins/*/manifest.yaml").unwrap();
//! let report = app.run().unwrap();
//! println!("{:?}", report.bootstrapped);
//! ```

use serde::Serialize;
use serde_json::Value;

use crate::core::config::CoreConfig;
use crate::core::store::ConfigStore;
use crate::module::{
    BootstrapCallbacks, BootstrapContext, BootstrapEnv, ModuleContext, ModuleRegistry, RunStatus,
};
use crate::router::event_bus::{EventBus, BEFORE_DISPATCH};
use crate::utils::Result;

/// 一次引导的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// 按顺序引导的模块
    pub bootstrapped: Vec<String>,
    /// 因依赖失败被跳过的模块
    pub failed: Vec<String>,
    /// 分发前事件返回的重定向
    pub redirects: Vec<Value>,
}

/// 应用容器
#[derive(Debug)]
pub struct App {
    settings: CoreConfig,
    config: ConfigStore,
    registry: ModuleRegistry,
    callbacks: BootstrapCallbacks,
    events: EventBus,
    context: ModuleContext,
}

impl App {
    /// 创建应用，注册表订阅分发前事件
    pub fn new(settings: CoreConfig) -> Self {
        let context = ModuleContext::new();
        let config = settings.clone().into_store();
        let registry = ModuleRegistry::new(config.clone(), context.clone());
        let events = EventBus::new(context.clone());
        registry.subscribe_dispatch_hook(&events);

        Self {
            settings,
            config,
            registry,
            callbacks: BootstrapCallbacks::new(),
            events,
            context,
        }
    }

    /// 注册引导回调
    pub fn callback<F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(&BootstrapContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.register(name, callback);
        self
    }

    /// 扫描逗号分隔的清单匹配模式
    ///
    /// # Returns
    ///
    /// 注册的模块名称
    pub fn load(&mut self, patterns: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for pattern in patterns.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            names.extend(self.registry.scan(pattern)?);
        }
        Ok(names)
    }

    /// 扫描配置中的 `modules.manifest_paths`
    pub fn load_configured(&mut self) -> Result<Vec<String>> {
        let patterns = self.settings.modules.manifest_paths.join(",");
        self.load(&patterns)
    }

    /// 引导所有待加载模块并触发分发前事件
    pub fn run(&mut self) -> Result<RunReport> {
        let env = BootstrapEnv {
            callbacks: &self.callbacks,
            events: &self.events,
        };
        let bootstrapped = self.registry.bootstrap(&env)?;

        let failed = self
            .registry
            .all()
            .filter(|m| m.run_status == RunStatus::Error)
            .map(|m| m.name.clone())
            .collect();

        let redirects = self
            .events
            .fire(BEFORE_DISPATCH, &Value::Null)
            .into_iter()
            .flat_map(|v| match v {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            })
            .collect();

        Ok(RunReport {
            bootstrapped,
            failed,
            redirects,
        })
    }

    /// 类型化配置
    pub fn settings(&self) -> &CoreConfig {
        &self.settings
    }

    /// 运行时配置
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// 模块注册表
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// 可变模块注册表
    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    /// 事件总线
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// 上下文栈
    pub fn context(&self) -> &ModuleContext {
        &self.context
    }
}
