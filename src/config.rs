use crate::models::SessionMode;
use crate::utils::ShellProfile;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const APP_DIR: &str = "cmdplus";
const SETTINGS_FILE: &str = "settings.json";

fn default_debounce_ms() -> u64 {
    500
}

/// 应用设置，保存在 `<config_dir>/cmdplus/settings.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// 启动时的会话模式
    pub mode: SessionMode,
    /// 初始工作目录，缺省为当前目录
    pub working_dir: Option<PathBuf>,
    /// 相同提交的去抖窗口
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// 替换默认 shell 程序
    pub shell: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::default(),
            working_dir: None,
            debounce_ms: default_debounce_ms(),
            shell: None,
        }
    }
}

impl AppConfig {
    pub fn config_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// 读取用户设置，文件不存在或损坏时使用默认值
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("no config directory available, using default settings");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "settings file not found, using defaults");
            return Self::default();
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), "failed to read settings: {}", e);
                return Self::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), "invalid settings file: {}", e);
            Self::default()
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("failed to create config dir: {}", e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize settings: {}", e))?;
        fs::write(path, json).map_err(|e| format!("failed to write settings: {}", e))
    }

    /// 配置的目录不存在时依次退回当前目录、用户主目录
    pub fn resolved_working_dir(&self) -> PathBuf {
        if let Some(dir) = &self.working_dir {
            if dir.is_dir() {
                return dir.clone();
            }
            warn!(dir = %dir.display(), "configured working directory missing");
        }

        std::env::current_dir()
            .ok()
            .or_else(dirs_next::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn shell_profile(&self) -> ShellProfile {
        match &self.shell {
            Some(program) => ShellProfile::platform_default().with_program(program.clone()),
            None => ShellProfile::platform_default(),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
