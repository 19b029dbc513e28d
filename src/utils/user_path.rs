#![cfg(not(target_os = "windows"))]

use std::path::Path;
use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use tracing::{debug, warn};

/// 用户登录 shell 里的 PATH
///
/// 从桌面启动的程序只拿到精简过的 PATH，python、node 等常用命令会找不到，
/// 所以子进程统一使用这里缓存的值。
pub static USER_PATH: Lazy<String> = Lazy::new(|| {
    get_user_shell_path().unwrap_or_else(|e| {
        warn!("failed to resolve user PATH ({}), using inherited PATH", e);
        std::env::var("PATH").unwrap_or_default()
    })
});

/// 常见的用户级安装目录，登录 shell 拿不到 PATH 时用来补全
fn common_dirs(home: &str) -> Vec<String> {
    vec![
        format!("{}/bin", home),
        format!("{}/.local/bin", home),
        format!("{}/.cargo/bin", home),
        format!("{}/.pyenv/shims", home),
        "/opt/homebrew/bin".to_string(),
        "/usr/local/bin".to_string(),
        "/usr/bin".to_string(),
        "/bin".to_string(),
        "/usr/sbin".to_string(),
        "/sbin".to_string(),
    ]
}

/// 先问非交互式 login shell（只用 -l，避免 .zshrc 里的交互逻辑），
/// 失败再拼接常见目录
fn get_user_shell_path() -> Result<String, String> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());

    let output = Command::new(&shell)
        .args(["-l", "-c", "echo $PATH"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    if let Ok(output) = output {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() && path.contains('/') {
                debug!(shell = %shell, "resolved PATH from login shell");
                return Ok(path);
            }
        }
    }

    let home = std::env::var("HOME").map_err(|e| format!("HOME not set: {}", e))?;
    let system_path = std::env::var("PATH").unwrap_or_default();
    let path = merge_path(common_dirs(&home), &system_path, |p| Path::new(p).exists());
    debug!("built PATH from common install dirs");
    Ok(path)
}

/// 保留存在的候选目录，再把系统 PATH 里没出现过的目录追加到末尾
fn merge_path(candidates: Vec<String>, system_path: &str, exists: impl Fn(&str) -> bool) -> String {
    let mut paths: Vec<String> = candidates.into_iter().filter(|p| exists(p)).collect();

    for p in system_path.split(':') {
        if !p.is_empty() && !paths.iter().any(|existing| existing == p) {
            paths.push(p.to_string());
        }
    }

    paths.join(":")
}
