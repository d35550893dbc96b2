//! 事件总线
//!
//! 同步的发布-订阅机制。订阅按注册顺序调用，`fire` 收集每个订阅者的返回值。
//!
//! 订阅时若上下文栈上有正在引导的模块，订阅归属于该模块，可通过
//! [`EventBus::subscribers_of`] 查询。
//!
//! # 使用示例
//!
//! ```
//! use bucky_core::router::EventBus;
//! use bucky_core::module::ModuleContext;
//! use serde_json::json;
//!
//! let bus = EventBus::new(ModuleContext::new());
//! bus.on("front_controller.dispatch.before", |_args| json!("redirect"));
//!
//! let results = bus.fire("front_controller.dispatch.before", &json!({}));
//! assert_eq!(results, vec![json!("redirect")]);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, trace};

use crate::module::context::ModuleContext;

/// 前端控制器分发前事件
pub const BEFORE_DISPATCH: &str = "front_controller.dispatch.before";

/// 事件回调函数类型
pub type EventCallback = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

#[derive(Clone)]
struct SubscriptionEntry {
    subscription_id: String,
    /// 订阅时的当前模块
    module: Option<String>,
    event_type: String,
    callback: EventCallback,
}

impl SubscriptionEntry {
    /// 匹配模式（支持 `*` 和 `prefix.*`）
    fn matches_pattern(pattern: &str, value: &str) -> bool {
        if pattern == "*" {
            return true;
        }

        if let Some(prefix) = pattern.strip_suffix(".*") {
            return value.len() > prefix.len() + 1
                && value.starts_with(prefix)
                && value.as_bytes()[prefix.len()] == b'.';
        }

        pattern == value
    }
}

/// 事件总线
#[derive(Clone)]
pub struct EventBus {
    subscriptions: Arc<RwLock<Vec<SubscriptionEntry>>>,
    next_id: Arc<AtomicU64>,
    context: ModuleContext,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl EventBus {
    /// 创建事件总线，订阅归属从 `context` 读取
    pub fn new(context: ModuleContext) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            context,
        }
    }

    /// 订阅事件
    ///
    /// # Arguments
    ///
    /// * `event_type` - 事件类型，支持 `*` 和 `prefix.*`
    /// * `callback` - 回调函数，返回值会出现在 `fire` 的结果中
    ///
    /// # Returns
    ///
    /// 订阅 ID，用于取消订阅
    pub fn on<F>(&self, event_type: impl Into<String>, callback: F) -> String
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let subscription_id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let module = self.context.current_module_name();

        debug!(
            subscription_id = %subscription_id,
            event_type = %event_type,
            module = ?module,
            "事件订阅成功"
        );

        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(SubscriptionEntry {
                subscription_id: subscription_id.clone(),
                module,
                event_type,
                callback: Arc::new(callback),
            });

        subscription_id
    }

    /// 取消订阅，订阅不存在时返回 `false`
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut subscriptions = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        let before = subscriptions.len();
        subscriptions.retain(|s| s.subscription_id != subscription_id);
        before != subscriptions.len()
    }

    /// 发布事件并收集所有订阅者的返回值
    ///
    /// 回调在锁外调用，回调内部可以继续订阅。
    pub fn fire(&self, event_type: &str, args: &Value) -> Vec<Value> {
        let matched: Vec<SubscriptionEntry> = self
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| SubscriptionEntry::matches_pattern(&s.event_type, event_type))
            .cloned()
            .collect();

        trace!(event_type = %event_type, subscribers = matched.len(), "发布事件");

        matched.iter().map(|s| (s.callback)(args)).collect()
    }

    /// 当前订阅总数
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// 是否有订阅者匹配该事件
    pub fn has_subscribers(&self, event_type: &str) -> bool {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|s| SubscriptionEntry::matches_pattern(&s.event_type, event_type))
    }

    /// 订阅了该事件类型的模块，按订阅顺序
    pub fn subscribers_of(&self, event_type: &str) -> Vec<String> {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.event_type == event_type)
            .filter_map(|s| s.module.clone())
            .collect()
    }
}
