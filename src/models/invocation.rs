use crate::utils::interpreter::{invokes_interpreter, rewrite_unbuffered};
use std::path::PathBuf;

/// 一次性命令调用，消费后即丢弃
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub command: String,
    pub working_dir: PathBuf,
    /// 命令以解释器开头，已改写为无缓冲模式
    pub unbuffered: bool,
}

impl CommandInvocation {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        let command = command.into();
        let unbuffered = invokes_interpreter(&command);
        let command = if unbuffered {
            rewrite_unbuffered(&command)
        } else {
            command
        };

        Self {
            command,
            working_dir: working_dir.into(),
            unbuffered,
        }
    }
}
