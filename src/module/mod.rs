//! 模块管理
//!
//! 包含模块系统的核心组件：
//! - 清单扫描与解析
//! - 模块参数解析与存储
//! - 依赖检查、失败传播与拓扑排序
//! - 模块引导与当前模块上下文栈

pub mod bootstrap;
pub mod context;
pub mod dependency;
pub mod metadata;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod scanner;

// 重导出常用类型
pub use bootstrap::{BootstrapCallbacks, BootstrapContext, BootstrapEnv, BootstrapFn};
pub use context::{ModuleContext, ModuleScope};
pub use dependency::{DependencyResolver, TopologicalSorter};
pub use metadata::{
    parse_version, BootstrapSpec, DependSpec, Dependency, DependencyError, DependencyErrorKind,
    FaultKind, ModuleDescriptor, ModuleFault, ModuleParams, RunLevel, RunStatus,
    VersionConstraint,
};
pub use parser::{Manifest, ManifestFormat, ModuleParser};
pub use registry::{ModuleRegistry, ModuleStore};
pub use resolver::{Environment, ModuleParamResolver};
pub use scanner::ManifestScanner;
