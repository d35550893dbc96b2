//! 清单扫描
//!
//! 按 glob 模式查找清单文件并解析。模式不以清单扩展名结尾时视为目录，
//! 自动追加 `/manifest.*`。

use std::path::PathBuf;

use crate::module::parser::{Manifest, ManifestFormat, ModuleParser};
use crate::utils::{CoreError, Result};

const MANIFEST_EXTENSIONS: [&str; 3] = [".json", ".yaml", ".yml"];

/// 清单扫描器
#[derive(Debug, Clone, Default)]
pub struct ManifestScanner;

impl ManifestScanner {
    /// 展开匹配模式
    ///
    /// `modules/*` 变为 `modules/*/manifest.*`，`a/manifest.json` 保持不变。
    pub fn expand_pattern(pattern: &str) -> String {
        let lower = pattern.to_lowercase();
        if MANIFEST_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            pattern.to_string()
        } else {
            format!("{}/manifest.*", pattern.trim_end_matches('/'))
        }
    }

    /// 查找匹配的清单文件
    ///
    /// 扩展名不受支持的文件被跳过。没有匹配时返回空列表。
    ///
    /// # Errors
    ///
    /// - 模式无效时返回 `Glob`
    /// - 匹配到的路径无法访问时返回 `ManifestParse`
    pub fn find(pattern: &str) -> Result<Vec<PathBuf>> {
        let expanded = Self::expand_pattern(pattern);
        let mut files = Vec::new();

        for entry in glob::glob(&expanded)? {
            let path = entry.map_err(|e| CoreError::manifest(e.path(), e.error().to_string()))?;
            if ManifestFormat::from_path(&path).is_none() {
                tracing::debug!(manifest = %path.display(), "跳过不支持的清单文件");
                continue;
            }
            files.push(path);
        }

        if files.is_empty() {
            tracing::debug!(pattern = %expanded, "没有匹配的清单文件");
        }
        Ok(files)
    }

    /// 查找并同步解析清单
    pub fn scan(pattern: &str) -> Result<Vec<(PathBuf, Manifest)>> {
        Self::find(pattern)?
            .into_iter()
            .map(|path| {
                let manifest = ModuleParser::parse_file_sync(&path)?;
                tracing::debug!(
                    manifest = %path.display(),
                    modules = manifest.modules.len(),
                    "清单已解析"
                );
                Ok((path, manifest))
            })
            .collect()
    }

    /// 查找并异步解析清单
    pub async fn scan_async(pattern: &str) -> Result<Vec<(PathBuf, Manifest)>> {
        let mut manifests = Vec::new();
        for path in Self::find(pattern)? {
            let manifest = ModuleParser::parse_file(&path).await?;
            manifests.push((path, manifest));
        }
        Ok(manifests)
    }
}
