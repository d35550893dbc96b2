//! 当前模块上下文栈
//!
//! 引导期间记录正在初始化的模块。克隆得到的句柄共享同一个栈，
//! 引导回调可以压入嵌套作用域。

use std::sync::{Arc, RwLock};

/// 模块上下文栈
#[derive(Debug, Clone, Default)]
pub struct ModuleContext {
    stack: Arc<RwLock<Vec<String>>>,
}

impl ModuleContext {
    /// 创建空栈
    pub fn new() -> Self {
        Self::default()
    }

    /// 压入模块名称
    pub fn push_module(&self, name: impl Into<String>) {
        let name = name.into();
        tracing::trace!(module = %name, "进入模块上下文");
        self.stack
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(name);
    }

    /// 弹出栈顶模块名称，栈为空时返回 `None`
    pub fn pop_module(&self) -> Option<String> {
        let name = self
            .stack
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .pop();
        if let Some(ref name) = name {
            tracing::trace!(module = %name, "离开模块上下文");
        }
        name
    }

    /// 栈顶模块名称
    pub fn current_module_name(&self) -> Option<String> {
        self.stack
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    /// 栈深度
    pub fn depth(&self) -> usize {
        self.stack.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 压入模块并返回作用域守卫，守卫丢弃时自动弹出
    pub fn scope(&self, name: impl Into<String>) -> ModuleScope {
        self.push_module(name);
        ModuleScope {
            context: self.clone(),
        }
    }
}

/// 模块作用域守卫
#[derive(Debug)]
#[must_use = "守卫丢弃时会立即弹出模块"]
pub struct ModuleScope {
    context: ModuleContext,
}

impl Drop for ModuleScope {
    fn drop(&mut self) {
        self.context.pop_module();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let ctx = ModuleContext::new();
        assert_eq!(ctx.current_module_name(), None);

        ctx.push_module("X");
        ctx.push_module("Y");
        assert_eq!(ctx.current_module_name().as_deref(), Some("Y"));
        assert_eq!(ctx.depth(), 2);

        assert_eq!(ctx.pop_module().as_deref(), Some("Y"));
        assert_eq!(ctx.current_module_name().as_deref(), Some("X"));
        assert_eq!(ctx.pop_module().as_deref(), Some("X"));
        assert_eq!(ctx.pop_module(), None);
    }

    #[test]
    fn test_scope_guard_pops() {
        let ctx = ModuleContext::new();
        {
            let _outer = ctx.scope("Core");
            {
                let _inner = ctx.scope("Auth");
                assert_eq!(ctx.current_module_name().as_deref(), Some("Auth"));
            }
            assert_eq!(ctx.current_module_name().as_deref(), Some("Core"));
        }
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_scope_pops_on_error_path() {
        fn failing(ctx: &ModuleContext) -> Result<(), String> {
            let _scope = ctx.scope("Blog");
            Err("失败".to_string())
        }

        let ctx = ModuleContext::new();
        assert!(failing(&ctx).is_err());
        assert_eq!(ctx.current_module_name(), None);
    }

    #[test]
    fn test_clones_share_stack() {
        let ctx = ModuleContext::new();
        let handle = ctx.clone();
        handle.push_module("Core");
        assert_eq!(ctx.current_module_name().as_deref(), Some("Core"));
    }
}
