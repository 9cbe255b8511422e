use crate::models::Generator;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 扫描得到的候选站点，尚未登记到注册表
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedSite {
    pub name: String,
    pub path: PathBuf,
    pub generator: Generator,
    pub suggested_port: u16,
}

const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", "vendor", "_site", "public", "dist"];

/// 按标记文件判断目录使用的生成器
///
/// Next.js 和 Astro 的配置文件最具体，先判断；Jekyll 需要 `_config.yml` 和 `Gemfile` 同时存在，
/// 单独的 `_config.yml` 太常见。
pub fn detect_generator(dir: &Path) -> Option<Generator> {
    let has = |name: &str| dir.join(name).is_file();

    if ["next.config.js", "next.config.mjs", "next.config.ts"]
        .iter()
        .any(|f| has(f))
    {
        return Some(Generator::NextJs);
    }
    if ["astro.config.mjs", "astro.config.ts", "astro.config.js"]
        .iter()
        .any(|f| has(f))
    {
        return Some(Generator::Astro);
    }
    if [
        ".eleventy.js",
        "eleventy.config.js",
        "eleventy.config.mjs",
        "eleventy.config.cjs",
    ]
    .iter()
    .any(|f| has(f))
    {
        return Some(Generator::Eleventy);
    }
    if ["hugo.toml", "hugo.yaml", "hugo.json"].iter().any(|f| has(f))
        || (has("config.toml") && dir.join("archetypes").is_dir())
    {
        return Some(Generator::Hugo);
    }
    if has("_config.yml") && has("Gemfile") {
        return Some(Generator::Jekyll);
    }
    None
}

pub struct ProjectScanner;

impl ProjectScanner {
    /// 递归扫描目录查找静态站点项目
    /// max_depth: 最大递归深度
    pub fn scan_directory(root_path: &Path, max_depth: usize) -> Vec<DetectedSite> {
        let mut sites = Vec::new();
        let skip_paths: RefCell<Vec<PathBuf>> = RefCell::new(Vec::new());

        for entry in WalkDir::new(root_path)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if !e.file_type().is_dir() {
                    return false;
                }
                let path = e.path();

                if e.depth() > 0 {
                    let name = e.file_name().to_string_lossy();
                    if SKIPPED_DIRS.contains(&name.as_ref()) {
                        return false;
                    }
                }

                // 跳过已识别项目的子目录
                !skip_paths
                    .borrow()
                    .iter()
                    .any(|skip| path.starts_with(skip) && path != skip.as_path())
            })
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let Some(generator) = detect_generator(path) else {
                continue;
            };

            skip_paths.borrow_mut().push(path.to_path_buf());
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string_lossy().to_string());
            sites.push(DetectedSite {
                name,
                path: path.to_path_buf(),
                generator,
                suggested_port: generator.default_port(),
            });
        }

        sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_detect_generator_markers() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        touch(&root.join("hugo-site/hugo.toml"));
        touch(&root.join("jekyll-site/_config.yml"));
        touch(&root.join("jekyll-site/Gemfile"));
        touch(&root.join("eleventy-site/eleventy.config.mjs"));
        touch(&root.join("next-site/next.config.js"));
        touch(&root.join("astro-site/astro.config.mjs"));
        touch(&root.join("plain/_config.yml"));

        assert_eq!(detect_generator(&root.join("hugo-site")), Some(Generator::Hugo));
        assert_eq!(detect_generator(&root.join("jekyll-site")), Some(Generator::Jekyll));
        assert_eq!(detect_generator(&root.join("eleventy-site")), Some(Generator::Eleventy));
        assert_eq!(detect_generator(&root.join("next-site")), Some(Generator::NextJs));
        assert_eq!(detect_generator(&root.join("astro-site")), Some(Generator::Astro));
        assert_eq!(detect_generator(&root.join("plain")), None);
    }

    #[test]
    fn test_scan_skips_nested_and_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        touch(&root.join("blog/hugo.toml"));
        // 已识别项目内部的站点不再单独列出
        touch(&root.join("blog/themes/demo/hugo.toml"));
        touch(&root.join("app/astro.config.mjs"));
        touch(&root.join("app/node_modules/pkg/next.config.js"));

        let sites = ProjectScanner::scan_directory(root, 5);
        let names: Vec<&str> = sites.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["app", "blog"]);

        let app = &sites[0];
        assert_eq!(app.generator, Generator::Astro);
        assert_eq!(app.suggested_port, 4321);
    }

    #[test]
    fn test_scan_respects_depth() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a/b/c/hugo.toml"));

        assert!(ProjectScanner::scan_directory(dir.path(), 2).is_empty());
        assert_eq!(ProjectScanner::scan_directory(dir.path(), 3).len(), 1);
    }
}
