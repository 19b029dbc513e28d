use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 会话生命周期状态
///
/// `Idle -> Starting -> Running`，瞬时会话退出后经过 `Draining` 进入
/// `Terminated`；持久会话意外退出后回到 `Idle`，下次提交时自动重启。
/// `Terminated` 是终态。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Draining,
    Terminated,
}

impl SessionState {
    pub fn is_terminated(self) -> bool {
        self == SessionState::Terminated
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// 每条命令一个子进程
    #[default]
    Transient,
    /// 一个长期存活的 shell，多条命令复用
    Persistent,
}

/// 提供给前端的会话快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub mode: SessionMode,
    pub working_dir: PathBuf,
    pub state: SessionState,
    pub started_at: Option<DateTime<Utc>>,
}
