use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub generator: Generator,
    pub port: u16,
    #[serde(default)]
    pub notes: String,
    /// 自定义启动命令模板，`{port}` 会被替换为项目端口
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub command: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_used: Option<DateTime<Utc>>,
}

/// 新建项目时由调用方提供的字段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub path: PathBuf,
    pub generator: Generator,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub command: Option<String>,
}

/// 部分更新：只有 `Some` 的字段会被写入
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub path: Option<PathBuf>,
    pub generator: Option<Generator>,
    pub port: Option<u16>,
    pub notes: Option<String>,
    /// `Some(None)` 清除自定义命令
    pub command: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Generator {
    Hugo,
    Jekyll,
    Eleventy,
    #[serde(rename = "nextjs", alias = "next")]
    NextJs,
    Astro,
}

impl Generator {
    pub const ALL: [Generator; 5] = [
        Generator::Hugo,
        Generator::Jekyll,
        Generator::Eleventy,
        Generator::NextJs,
        Generator::Astro,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Generator::Hugo => "Hugo",
            Generator::Jekyll => "Jekyll",
            Generator::Eleventy => "Eleventy",
            Generator::NextJs => "Next.js",
            Generator::Astro => "Astro",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Generator::Hugo => 1313,
            Generator::Jekyll => 4000,
            Generator::Eleventy => 8080,
            Generator::NextJs => 3000,
            Generator::Astro => 4321,
        }
    }

    /// 开发服务器命令模板，启动时替换 `{port}`
    pub fn command_template(&self) -> &'static str {
        match self {
            Generator::Hugo => "hugo server -p {port}",
            Generator::Jekyll => "bundle exec jekyll serve --port {port}",
            Generator::Eleventy => "npx @11ty/eleventy --serve --port={port}",
            Generator::NextJs => "npx next dev -p {port}",
            Generator::Astro => "npx astro dev --port {port}",
        }
    }

    /// 前端徽标使用的强调色
    pub fn accent(&self) -> &'static str {
        match self {
            Generator::Hugo => "purple",
            Generator::Jekyll => "red",
            Generator::Eleventy => "mint",
            Generator::NextJs => "blue",
            Generator::Astro => "orange",
        }
    }
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Generator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hugo" => Ok(Generator::Hugo),
            "jekyll" => Ok(Generator::Jekyll),
            "eleventy" | "11ty" => Ok(Generator::Eleventy),
            "next" | "nextjs" | "next.js" => Ok(Generator::NextJs),
            "astro" => Ok(Generator::Astro),
            other => Err(format!("未知的生成器类型: {}", other)),
        }
    }
}

impl Project {
    pub fn new(new: NewProject) -> Self {
        let port = new.port.unwrap_or_else(|| new.generator.default_port());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            path: normalize_path(&new.path),
            generator: new.generator,
            port,
            notes: new.notes,
            command: new.command,
            created_at: Utc::now(),
            last_used: None,
        }
    }

    /// 渲染最终执行的命令行
    pub fn start_command(&self) -> String {
        let template = self
            .command
            .as_deref()
            .unwrap_or_else(|| self.generator.command_template());
        template.replace("{port}", &self.port.to_string())
    }

    pub fn url(&self) -> String {
        local_url(self.port)
    }

    pub fn apply(&mut self, update: ProjectUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(path) = update.path {
            self.path = normalize_path(&path);
        }
        if let Some(generator) = update.generator {
            self.generator = generator;
        }
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(notes) = update.notes {
            self.notes = notes;
        }
        if let Some(command) = update.command {
            self.command = command;
        }
    }
}

pub fn local_url(port: u16) -> String {
    format!("http://localhost:{}", port)
}

/// 词法规范化路径（不访问文件系统），用于重复路径判断
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
