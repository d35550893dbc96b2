//! 核心模块
//!
//! 包含内核配置、运行时配置存储和应用容器。

pub mod app;
pub mod config;
pub mod store;

pub use app::{App, RunReport};
pub use config::{CoreConfig, CoreConfigBuilder, LogConfig, ModuleConfig, ModuleOverride, WebConfig};
pub use store::ConfigStore;
