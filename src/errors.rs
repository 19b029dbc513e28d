use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

/// 会话层错误
///
/// 只有启动失败会真正返回给调用方；写入失败在会话内部通过一次重启恢复，
/// 终止失败只记录日志。
#[derive(Debug, Error)]
pub enum SessionError {
    /// 找不到 shell 或系统拒绝创建进程
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// 子进程 stdin 已关闭（进程已退出）
    #[error("failed to write to shell: {0}")]
    Write(#[source] std::io::Error),

    #[error("working directory does not exist: {}", .0.display())]
    InvalidDirectory(PathBuf),

    #[error("session already terminated")]
    Terminated,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        SessionError::Spawn {
            program: program.into(),
            source,
        }
    }
}
