//! 清单文件解析器
//!
//! 负责从 manifest.json / manifest.yaml 解析模块声明。所有失败都转换为
//! `ManifestParse` 错误并带上文件路径。

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::module::metadata::ModuleParams;
use crate::utils::{CoreError, Result};

/// 清单文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// JSON
    Json,
    /// YAML
    Yaml,
}

impl ManifestFormat {
    /// 根据扩展名判断格式，不支持的扩展名返回 `None`
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "json" => Some(ManifestFormat::Json),
            "yaml" | "yml" => Some(ManifestFormat::Yaml),
            _ => None,
        }
    }
}

/// 清单文件内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// 按声明顺序排列的模块
    #[serde(default)]
    pub modules: IndexMap<String, ModuleParams>,
}

/// 清单文件解析器
#[derive(Debug, Clone, Default)]
pub struct ModuleParser;

impl ModuleParser {
    /// 创建新的解析器实例
    pub fn new() -> Self {
        Self
    }

    /// 从文件解析清单（异步）
    ///
    /// # Arguments
    ///
    /// * `path` - 清单文件路径
    ///
    /// # Errors
    ///
    /// 文件无法读取、扩展名不受支持、内容无法解析或验证失败时返回 `ManifestParse`
    pub async fn parse_file(path: &Path) -> Result<Manifest> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::manifest(path, e.to_string()))?;
        Self::parse_for_path(path, &content)
    }

    /// 从文件同步解析清单
    pub fn parse_file_sync(path: &Path) -> Result<Manifest> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CoreError::manifest(path, e.to_string()))?;
        Self::parse_for_path(path, &content)
    }

    fn parse_for_path(path: &Path, content: &str) -> Result<Manifest> {
        let format = ManifestFormat::from_path(path)
            .ok_or_else(|| CoreError::manifest(path, "不支持的清单文件格式"))?;
        Self::parse_string(content, format, path)
    }

    /// 从字符串解析清单
    ///
    /// # Arguments
    ///
    /// * `content` - 清单内容
    /// * `format` - 内容格式
    /// * `file` - 清单文件路径，仅用于错误信息
    ///
    /// # Errors
    ///
    /// - 内容无法解析时返回 `ManifestParse`
    /// - `modules` 为空或验证失败时返回 `ManifestParse`
    pub fn parse_string(content: &str, format: ManifestFormat, file: &Path) -> Result<Manifest> {
        let manifest: Manifest = match format {
            ManifestFormat::Json => {
                serde_json::from_str(content).map_err(|e| CoreError::manifest(file, e.to_string()))?
            }
            ManifestFormat::Yaml => {
                serde_yaml::from_str(content).map_err(|e| CoreError::manifest(file, e.to_string()))?
            }
        };

        if manifest.modules.is_empty() {
            return Err(CoreError::manifest(file, "清单中没有模块声明"));
        }

        Self::validate(&manifest).map_err(|reason| CoreError::manifest(file, reason))?;
        Ok(manifest)
    }

    /// 验证清单内容
    ///
    /// 执行以下验证：
    /// - 模块名称非空，不含空白和路径分隔符
    /// - 声明了 `bootstrap` 时回调名称非空
    /// - 依赖名称非空
    ///
    /// 所有问题以 `; ` 连接后返回。
    pub fn validate(manifest: &Manifest) -> std::result::Result<(), String> {
        let mut errors: Vec<String> = Vec::new();

        for (name, params) in &manifest.modules {
            if name.is_empty() {
                errors.push("模块名称不能为空".to_string());
                continue;
            }
            if !Self::is_valid_module_name(name) {
                errors.push(format!(
                    "模块名称 '{}' 格式无效，不能包含空白或路径分隔符",
                    name
                ));
            }

            if let Some(bootstrap) = &params.bootstrap {
                if bootstrap.callback.trim().is_empty() {
                    errors.push(format!("模块 '{}' 的引导回调不能为空", name));
                }
            }

            for (index, dep) in params.depends.iter().enumerate() {
                if dep.name().trim().is_empty() {
                    errors.push(format!(
                        "模块 '{}' 的第 {} 个依赖名称不能为空",
                        name,
                        index + 1
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }

    // 名称会出现在配置路径 `modules/<name>/...` 中
    fn is_valid_module_name(name: &str) -> bool {
        !name
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::{DependSpec, RunLevel};
    use std::path::PathBuf;

    fn file() -> PathBuf {
        PathBuf::from("/srv/modules/blog/manifest.yaml")
    }

    #[test]
    fn test_parse_yaml_manifest() {
        let yaml = r#"
modules:
  Auth:
    version: "0.9.0"
    run_level: REQUESTED
    bootstrap:
      callback: auth_init
      file: bootstrap.rs
    depends: [Core]
  Blog:
    url_prefix: blog
    bootstrap: { callback: blog_init }
    depends:
      - name: Auth
        version: { from: "1.0.0" }
        action: disable
"#;

        let manifest = ModuleParser::parse_string(yaml, ManifestFormat::Yaml, &file()).unwrap();
        let names: Vec<&String> = manifest.modules.keys().collect();
        assert_eq!(names, vec!["Auth", "Blog"]);

        let auth = &manifest.modules["Auth"];
        assert_eq!(auth.version.as_deref(), Some("0.9.0"));
        assert_eq!(auth.run_level, Some(RunLevel::Requested));
        assert_eq!(auth.depends, vec![DependSpec::Name("Core".to_string())]);

        let blog = &manifest.modules["Blog"];
        assert_eq!(blog.url_prefix.as_deref(), Some("blog"));
        assert!(matches!(&blog.depends[0], DependSpec::Detailed { action: Some(a), .. } if a == "disable"));
    }

    #[test]
    fn test_parse_json_manifest() {
        let json = r#"{"modules": {"Core": {"bootstrap": {"callback": "core_init"}, "version": "1.0.0"}}}"#;
        let manifest = ModuleParser::parse_string(json, ManifestFormat::Json, &file()).unwrap();
        assert_eq!(manifest.modules.len(), 1);
        assert_eq!(manifest.modules["Core"].version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_empty_modules_rejected() {
        let err = ModuleParser::parse_string("modules: {}", ManifestFormat::Yaml, &file()).unwrap_err();
        assert!(matches!(err, CoreError::ManifestParse { .. }));
        assert!(err.to_string().contains("没有模块声明"));
    }

    #[test]
    fn test_malformed_content_rejected() {
        let err = ModuleParser::parse_string("{not json", ManifestFormat::Json, &file()).unwrap_err();
        match err {
            CoreError::ManifestParse { file: f, .. } => assert_eq!(f, file()),
            other => panic!("意外的错误: {:?}", other),
        }
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let yaml = r#"
modules:
  "bad name":
    bootstrap: { callback: "" }
    depends: [""]
"#;
        let err = ModuleParser::parse_string(yaml, ManifestFormat::Yaml, &file()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("格式无效"));
        assert!(msg.contains("引导回调不能为空"));
        assert!(msg.contains("依赖名称不能为空"));
    }

    #[test]
    fn test_dotted_and_namespaced_names_accepted() {
        let yaml = r#"
modules:
  blog.admin: {}
  "Vendor::Blog":
    depends: [blog.admin]
"#;
        let manifest = ModuleParser::parse_string(yaml, ManifestFormat::Yaml, &file()).unwrap();
        assert!(manifest.modules.contains_key("blog.admin"));
        assert!(manifest.modules.contains_key("Vendor::Blog"));

        for bad in ["\"bad name\"", "a/b", "\"tab\\tname\""] {
            let yaml = format!("modules:\n  {}: {{}}\n", bad);
            let err = ModuleParser::parse_string(&yaml, ManifestFormat::Yaml, &file()).unwrap_err();
            assert!(err.to_string().contains("格式无效"), "{}", bad);
        }
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ManifestFormat::from_path(Path::new("a/manifest.json")),
            Some(ManifestFormat::Json)
        );
        assert_eq!(
            ManifestFormat::from_path(Path::new("a/manifest.YML")),
            Some(ManifestFormat::Yaml)
        );
        assert_eq!(ManifestFormat::from_path(Path::new("a/manifest.php")), None);
        assert_eq!(ManifestFormat::from_path(Path::new("a/manifest")), None);
    }

    #[test]
    fn test_parse_file_sync_missing() {
        let err = ModuleParser::parse_file_sync(Path::new("/nonexistent/manifest.json")).unwrap_err();
        assert_eq!(err.error_code(), crate::utils::error_code::MANIFEST_PARSE_FAILED);
    }

    #[tokio::test]
    async fn test_parse_file_async() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        tokio::fs::write(&path, r#"{"modules": {"Core": {"bootstrap": {"callback": "core_init"}}}}"#)
            .await
            .unwrap();

        let manifest = ModuleParser::parse_file(&path).await.unwrap();
        assert!(manifest.modules.contains_key("Core"));
    }
}
