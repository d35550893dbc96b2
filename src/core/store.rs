//! 运行时配置存储
//!
//! 以 `serde_json::Value` 树保存配置，使用斜杠路径访问，例如
//! `modules/Blog/run_level`。克隆得到的句柄共享同一棵树。

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::utils::{CoreError, Result};

/// 运行时配置存储
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: Arc<RwLock<Value>>,
}

impl ConfigStore {
    /// 创建空的配置存储
    pub fn new() -> Self {
        Self {
            root: Arc::new(RwLock::new(Value::Object(Map::new()))),
        }
    }

    /// 从已有的值创建
    pub fn from_value(value: Value) -> Self {
        let store = Self::new();
        store.add(value);
        store
    }

    /// 读取路径上的值
    pub fn get(&self, path: &str) -> Option<Value> {
        let root = self.root.read().unwrap_or_else(|e| e.into_inner());
        let mut node = &*root;
        for key in segments(path) {
            node = node.as_object()?.get(key)?;
        }
        Some(node.clone())
    }

    /// 读取并反序列化路径上的值，类型不匹配时返回 `None`
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.get(path).and_then(|v| serde_json::from_value(v).ok())
    }

    /// 列出路径下的直接子键
    pub fn keys(&self, path: &str) -> Vec<String> {
        match self.get(path) {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// 写入路径上的值，中间节点不存在或不是对象时会被替换为对象
    pub fn set(&self, path: &str, value: impl Into<Value>) {
        let mut root = self.root.write().unwrap_or_else(|e| e.into_inner());
        let keys: Vec<&str> = segments(path).collect();
        set_in(&mut root, &keys, value.into());
    }

    /// 深度合并一棵配置树，对象逐键合并，其余值覆盖
    pub fn add(&self, value: Value) {
        let mut root = self.root.write().unwrap_or_else(|e| e.into_inner());
        merge(&mut root, value);
    }

    /// 从 JSON 或 YAML 文件合并配置
    ///
    /// # Errors
    ///
    /// 文件无法读取或解析时返回 `ConfigLoadFailed`
    pub fn add_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;

        let value: Value = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?,
            _ => serde_yaml::from_str(&content)
                .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?,
        };

        tracing::debug!(file = %path.display(), "配置文件已合并");
        self.add(value);
        Ok(())
    }

    /// 导出整棵配置树
    pub fn snapshot(&self) -> Value {
        self.root.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn set_in(node: &mut Value, keys: &[&str], value: Value) {
    let Some((key, rest)) = keys.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(key.to_string()).or_insert(Value::Null);
        set_in(child, rest, value);
    }
}

fn merge(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, v) in src {
                match dst.get_mut(&key) {
                    Some(existing) => merge(existing, v),
                    None => {
                        dst.insert(key, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get() {
        let store = ConfigStore::new();
        store.set("modules/Blog/run_level", "REQUESTED");

        assert_eq!(
            store.get("modules/Blog/run_level"),
            Some(json!("REQUESTED"))
        );
        assert_eq!(store.get("modules/Blog"), Some(json!({"run_level": "REQUESTED"})));
        assert!(store.get("modules/Auth/run_level").is_none());
        assert_eq!(store.keys("modules"), vec!["Blog".to_string()]);
    }

    #[test]
    fn test_set_replaces_scalar_parent() {
        let store = ConfigStore::new();
        store.set("web", "scalar");
        store.set("web/http_host", "example.com");
        assert_eq!(
            store.get_as::<String>("web/http_host").as_deref(),
            Some("example.com")
        );
    }

    #[test]
    fn test_add_deep_merge() {
        let store = ConfigStore::from_value(json!({
            "web": {"http_host": "localhost", "base_path": "/a"},
            "modules": {"Core": {"run_level": "REQUIRED"}}
        }));
        store.add(json!({
            "web": {"base_path": "/b"},
            "modules": {"Blog": {"run_level": "DISABLED"}}
        }));

        assert_eq!(store.get_as::<String>("web/http_host").as_deref(), Some("localhost"));
        assert_eq!(store.get_as::<String>("web/base_path").as_deref(), Some("/b"));
        assert_eq!(store.keys("modules").len(), 2);
    }

    #[test]
    fn test_get_as_type_mismatch() {
        let store = ConfigStore::from_value(json!({"a": {"b": "text"}}));
        assert!(store.get_as::<u32>("a/b").is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let store = ConfigStore::new();
        let handle = store.clone();
        handle.set("x", 1);
        assert_eq!(store.get("x"), Some(json!(1)));
    }

    #[test]
    fn test_add_file_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "modules:\n  Auth:\n    run_level: REQUIRED\n").unwrap();

        let store = ConfigStore::new();
        store.add_file(&path).unwrap();
        assert_eq!(
            store.get_as::<String>("modules/Auth/run_level").as_deref(),
            Some("REQUIRED")
        );
    }

    #[test]
    fn test_add_file_missing() {
        let store = ConfigStore::new();
        let err = store.add_file("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, CoreError::ConfigLoadFailed(_)));
    }
}
