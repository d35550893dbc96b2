//! 模块依赖管理
//!
//! # 主要组件
//!
//! - [`DependencyResolver`] - 检查每条依赖边（存在、启用、版本），决定哪些模块
//!   进入 `PENDING`，并把失败沿依赖方向传播
//! - [`TopologicalSorter`] - Kahn 算法排序，保证依赖先于依赖方
//!
//! 依赖边上的错误不会作为 `Err` 返回，只会让模块进入 `ERROR` 并被引导跳过。
//! 只有配置中声明为必需但不存在的模块和循环依赖是致命错误。

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, error, warn};

use crate::core::store::ConfigStore;
use crate::module::metadata::{
    DependencyError, DependencyErrorKind, FaultKind, ModuleFault, RunLevel, RunStatus,
};
use crate::module::registry::ModuleStore;
use crate::utils::{CoreError, Result};

/// 失败动作默认值
const DEFAULT_ACTION: &str = "error";

/// 依赖解析器
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// 检查整个存储的依赖
    ///
    /// # Arguments
    ///
    /// * `store` - 模块存储
    /// * `config` - 提供 `modules/<name>/run_level` 覆盖
    ///
    /// # Errors
    ///
    /// 配置中为 `REQUIRED` 的模块不存在时返回 `MissingRequiredModule`
    pub fn check(store: &mut ModuleStore, config: &ConfigStore) -> Result<()> {
        for module in store.all_mut() {
            module.reset_links();
        }

        Self::apply_config_levels(store, config)?;

        let names = store.names();
        for name in &names {
            Self::link_module(store, name);
        }

        // 失败传播和待加载扩散交替进行直到稳定
        let mut visited = HashSet::new();
        loop {
            let mut changed = false;
            for name in &names {
                changed |= Self::propagate_errors(store, name, &mut visited);
            }
            for name in &names {
                changed |= Self::sweep_pending(store, name);
            }
            if !changed {
                break;
            }
        }

        for module in store.all() {
            if module.run_level == RunLevel::Required && module.run_status == RunStatus::Error {
                error!(
                    module = %module.name,
                    fault = ?module.fault,
                    "必需模块依赖失败"
                );
            }
        }

        debug!(
            modules = names.len(),
            pending = store.all().filter(|m| m.run_status == RunStatus::Pending).count(),
            "依赖检查完成"
        );
        Ok(())
    }

    fn apply_config_levels(store: &mut ModuleStore, config: &ConfigStore) -> Result<()> {
        for name in config.keys("modules") {
            let Some(level) = config.get_as::<RunLevel>(&format!("modules/{}/run_level", name))
            else {
                continue;
            };

            match store.get_mut(&name) {
                Some(module) => module.run_level = level,
                None if level == RunLevel::Required => {
                    return Err(CoreError::MissingRequiredModule(name));
                }
                None => {
                    debug!(module = %name, run_level = %level, "配置的模块未注册，忽略");
                }
            }
        }
        Ok(())
    }

    /// 检查单个模块的依赖边并建立父子关系
    fn link_module(store: &mut ModuleStore, name: &str) {
        let Some(module) = store.get_mut(name) else {
            return;
        };
        let level = module.run_level;
        if level == RunLevel::Required {
            module.mark_pending();
        }
        let depends = module.depends.clone();

        let mut all_met = true;
        for (index, dep) in depends.iter().enumerate() {
            let failure = match store.get(&dep.name) {
                None => Some(DependencyErrorKind::Missing),
                Some(target) if target.run_level == RunLevel::Disabled => {
                    Some(DependencyErrorKind::Disabled)
                }
                // 之前的检查中已失败的目标，状态不会恢复
                Some(target) if target.run_status == RunStatus::Error => {
                    Some(DependencyErrorKind::Parent)
                }
                Some(target) => match &dep.version {
                    Some(constraint) if !constraint.matches(target.version.as_deref()) => {
                        Some(DependencyErrorKind::Version)
                    }
                    _ => None,
                },
            };

            if let Some(kind) = failure {
                all_met = false;
                if let Some(module) = store.get_mut(name) {
                    module.depends[index].error = Some(DependencyError::new(kind));
                }
                continue;
            }

            let pending = match store.get_mut(name) {
                Some(module) => {
                    module.parents.insert(dep.name.clone());
                    module.run_status == RunStatus::Pending
                }
                None => false,
            };
            if let Some(target) = store.get_mut(&dep.name) {
                target.children.insert(name.to_string());
                if pending {
                    target.mark_pending();
                }
            }
        }

        if all_met && level == RunLevel::Requested {
            if let Some(module) = store.get_mut(name) {
                module.mark_pending();
            }
        }
    }

    /// 传播模块上尚未传播的依赖错误，返回是否有变化
    fn propagate_errors(
        store: &mut ModuleStore,
        name: &str,
        visited: &mut HashSet<String>,
    ) -> bool {
        let unpropagated: Vec<usize> = match store.get(name) {
            Some(module) => module
                .depends
                .iter()
                .enumerate()
                .filter(|(_, d)| matches!(d.error, Some(e) if !e.propagated))
                .map(|(i, _)| i)
                .collect(),
            None => return false,
        };

        for &index in &unpropagated {
            Self::fail(store, name, index, visited);
        }
        !unpropagated.is_empty()
    }

    /// 让 `name` 因第 `index` 条依赖失败，并沿依赖方向传递
    fn fail(store: &mut ModuleStore, name: &str, index: usize, visited: &mut HashSet<String>) {
        let Some(module) = store.get_mut(name) else {
            return;
        };
        let Some(dep) = module.depends.get_mut(index) else {
            return;
        };
        let Some(edge_error) = dep.error.as_mut() else {
            return;
        };
        edge_error.propagated = true;

        let reason = edge_error.kind;
        let fault = ModuleFault {
            kind: if reason == DependencyErrorKind::Parent {
                FaultKind::Parent
            } else {
                FaultKind::Depends
            },
            dependency: dep.name.clone(),
            reason,
            action: dep
                .action
                .clone()
                .unwrap_or_else(|| DEFAULT_ACTION.to_string()),
        };

        if module.fault.is_none() {
            warn!(
                module = %name,
                dependency = %fault.dependency,
                reason = %fault.reason,
                action = %fault.action,
                "模块依赖失败"
            );
            module.mark_error(fault);
        } else {
            module.run_status = RunStatus::Error;
        }

        if !visited.insert(name.to_string()) {
            return;
        }

        // 依赖本模块且边仍满足的模块
        let dependents: Vec<(String, usize)> = store
            .all()
            .flat_map(|m| {
                m.depends
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| d.name == name && d.is_satisfied())
                    .map(|(i, _)| (m.name.clone(), i))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (dependent, dep_index) in dependents {
            if let Some(module) = store.get_mut(&dependent) {
                module.depends[dep_index].error =
                    Some(DependencyError::new(DependencyErrorKind::Parent));
            }
            Self::fail(store, &dependent, dep_index, visited);
        }
    }

    /// 待加载模块的满足依赖也进入待加载，返回是否有变化
    fn sweep_pending(store: &mut ModuleStore, name: &str) -> bool {
        let targets: Vec<String> = match store.get(name) {
            Some(module) if module.run_status == RunStatus::Pending => module
                .depends
                .iter()
                .filter(|d| d.is_satisfied())
                .map(|d| d.name.clone())
                .collect(),
            _ => return false,
        };

        let mut changed = false;
        for target in targets {
            if let Some(module) = store.get_mut(&target) {
                changed |= module.mark_pending();
            }
        }
        changed
    }
}

/// 拓扑排序器
#[derive(Debug, Clone, Copy, Default)]
pub struct TopologicalSorter;

impl TopologicalSorter {
    /// 计算依赖顺序
    ///
    /// 使用 `parents`/`children` 的副本执行 Kahn 算法：无父模块按存储顺序入栈，
    /// 后进先出弹出，子模块逆序访问。
    ///
    /// # Errors
    ///
    /// 存在循环依赖时返回 `CircularDependency`，列出无法排序的模块
    pub fn order(store: &ModuleStore) -> Result<Vec<String>> {
        let names = store.names();
        let mut parents: HashMap<&str, BTreeSet<&str>> = store
            .all()
            .map(|m| {
                (
                    m.name.as_str(),
                    m.parents.iter().map(String::as_str).collect(),
                )
            })
            .collect();
        let children: HashMap<&str, Vec<&str>> = store
            .all()
            .map(|m| {
                (
                    m.name.as_str(),
                    m.children.iter().map(String::as_str).collect(),
                )
            })
            .collect();

        let mut worklist: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|n| parents.get(n).map_or(true, BTreeSet::is_empty))
            .collect();
        let mut sorted: Vec<String> = Vec::with_capacity(names.len());

        while let Some(node) = worklist.pop() {
            sorted.push(node.to_string());
            let Some(node_children) = children.get(node) else {
                continue;
            };
            for &child in node_children.iter().rev() {
                if let Some(remaining) = parents.get_mut(child) {
                    remaining.remove(node);
                    if remaining.is_empty() {
                        worklist.push(child);
                    }
                }
            }
        }

        if sorted.len() < names.len() {
            let done: HashSet<&str> = sorted.iter().map(String::as_str).collect();
            let remaining: Vec<&str> = names
                .iter()
                .map(String::as_str)
                .filter(|n| !done.contains(n))
                .collect();
            return Err(CoreError::CircularDependency(remaining.join(", ")));
        }

        Ok(sorted)
    }

    /// 按依赖顺序重排存储，失败时存储保持不变
    pub fn sort(store: &mut ModuleStore) -> Result<()> {
        let order = Self::order(store)?;
        debug!(order = ?order, "模块排序完成");
        store.reorder(&order);
        Ok(())
    }
}
