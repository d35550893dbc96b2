//! # Bucky Core - 模块内核
//!
//! 应用由可插拔的模块组装而成。模块内核负责：
//!
//! - **清单扫描**: 按 glob 模式查找 manifest.json / manifest.yaml 并注册模块
//! - **参数解析**: 补全模块根目录、资源地址和运行级别
//! - **依赖检查**: 校验依赖的存在、启用状态和版本，把失败传播给依赖方
//! - **拓扑排序**: 保证依赖先于依赖方引导，检测循环依赖
//! - **模块引导**: 按顺序调用引导回调，并维护当前模块上下文栈
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use bucky_core::{App, CoreConfig, RunLevel};
//!
//! fn main() -> bucky_core::Result<()> {
//!     let config = CoreConfig::builder()
//!         .manifest_path("modules/*")
//!         .run_level("Core", RunLevel::Required)
//!         .build();
//!
//!     let mut app = App::new(config);
//!     app.callback("core_init", |ctx| {
//!         tracing::info!(module = %ctx.name(), "引导");
//!         Ok(())
//!     });
//!     app.load_configured()?;
//!
//!     let report = app.run()?;
//!     println!("已引导: {:?}", report.bootstrapped);
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 清单、注册表、依赖解析、排序和引导
//! - `router` - 事件总线
//! - `core` - 配置、配置存储和应用容器
//! - `utils` - 错误类型和日志系统

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod core;
pub mod module;
pub mod router;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    BootstrapCallbacks, BootstrapContext, BootstrapEnv, DependSpec, Dependency,
    DependencyErrorKind, FaultKind, ModuleContext, ModuleDescriptor, ModuleFault, ModuleParams,
    ModuleRegistry, RunLevel, RunStatus, VersionConstraint,
};
pub use router::{EventBus, BEFORE_DISPATCH};

pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, CoreError, Result};

pub use core::{App, ConfigStore, CoreConfig, CoreConfigBuilder, LogConfig, RunReport};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
