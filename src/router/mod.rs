//! 事件分发
//!
//! 包含内核使用的同步事件总线，模块在引导时订阅生命周期事件。

pub mod event_bus;

// 重导出常用类型
pub use event_bus::{EventBus, EventCallback, BEFORE_DISPATCH};
