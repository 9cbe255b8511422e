#![cfg(not(target_os = "windows"))]

use std::path::Path;
use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use tracing::{debug, warn};

/// 缓存用户 login shell 的 PATH (macOS/Linux)
///
/// 从桌面环境或 launchd 启动时继承的 PATH 往往不包含 hugo、bundle、npx 所在目录，
/// 子进程统一使用这里的值。
pub static USER_PATH: Lazy<String> = Lazy::new(|| {
    get_user_shell_path().unwrap_or_else(|e| {
        warn!(error = %e, "failed to resolve login shell PATH, falling back to process PATH");
        std::env::var("PATH").unwrap_or_default()
    })
});

fn default_shell() -> &'static str {
    if cfg!(target_os = "macos") {
        "/bin/zsh"
    } else {
        "/bin/sh"
    }
}

/// 从用户的 shell 获取完整的 PATH
fn get_user_shell_path() -> Result<String, String> {
    // 非交互式 login shell (只用 -l)，只读取 profile，避免交互式配置卡住
    let shell = std::env::var("SHELL").unwrap_or_else(|_| default_shell().to_string());

    let output = Command::new(&shell)
        .args(["-l", "-c", "echo $PATH"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    if let Ok(output) = output {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout)
                .lines()
                .last()
                .unwrap_or_default()
                .trim()
                .to_string();
            if !path.is_empty() && path.contains('/') {
                debug!(shell = %shell, "resolved PATH from login shell");
                return Ok(path);
            }
        }
    }

    // 拼接静态站点工具链常见的安装位置
    let home = dirs_next::home_dir().ok_or_else(|| "无法获取用户主目录".to_string())?;
    let home = home.to_string_lossy();
    let system_path = std::env::var("PATH").unwrap_or_default();

    let common_paths = vec![
        format!("{}/bin", home),
        format!("{}/.local/bin", home),
        // Go 安装的 hugo
        format!("{}/go/bin", home),
        // rbenv / rvm (jekyll)
        format!("{}/.rbenv/shims", home),
        format!("{}/.rvm/bin", home),
        // fnm / volta / pnpm (eleventy, next, astro)
        format!("{}/.fnm/current/bin", home),
        format!("{}/Library/Application Support/fnm/current/bin", home),
        format!("{}/.volta/bin", home),
        format!("{}/Library/pnpm", home),
        format!("{}/.local/share/pnpm", home),
        format!("{}/.npm-global/bin", home),
        // Homebrew (Apple Silicon & Intel)
        "/opt/homebrew/bin".to_string(),
        "/opt/homebrew/sbin".to_string(),
        "/usr/local/bin".to_string(),
        "/usr/local/sbin".to_string(),
        "/usr/bin".to_string(),
        "/bin".to_string(),
        "/usr/sbin".to_string(),
        "/sbin".to_string(),
    ];

    let mut paths: Vec<String> = common_paths
        .into_iter()
        .filter(|p| Path::new(p).exists())
        .collect();

    // nvm 的 node 版本目录需要逐个列出
    let nvm_dir = format!("{}/.nvm/versions/node", home);
    if let Ok(entries) = std::fs::read_dir(&nvm_dir) {
        for entry in entries.flatten() {
            let bin_path = entry.path().join("bin");
            if bin_path.exists() {
                paths.insert(0, bin_path.to_string_lossy().to_string());
            }
        }
    }

    for p in system_path.split(':') {
        if !p.is_empty() && !paths.iter().any(|existing| existing == p) {
            paths.push(p.to_string());
        }
    }

    debug!("built PATH from common tool locations");
    Ok(paths.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_path_contains_sh() {
        assert!(!USER_PATH.is_empty());
        let has_sh = USER_PATH
            .split(':')
            .any(|dir| Path::new(dir).join("sh").is_file());
        assert!(has_sh);
    }
}
