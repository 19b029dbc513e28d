use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputChannel {
    Normal,
    Error,
}

/// 一段已解码的输出，不保证是整行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputFragment {
    pub text: String,
    pub channel: OutputChannel,
}

impl OutputFragment {
    pub fn normal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            channel: OutputChannel::Normal,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            channel: OutputChannel::Error,
        }
    }
}

/// 会话推送给界面的事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminalEvent {
    Output(OutputFragment),
    /// 瞬时命令结束，信号终止时 `exit_code` 为空
    Finished { exit_code: Option<i32> },
}

impl TerminalEvent {
    /// 内联诊断信息，走 error 通道
    pub fn diagnostic(message: impl AsRef<str>) -> Self {
        TerminalEvent::Output(OutputFragment::error(format!(
            "[cmdplus] {}\n",
            message.as_ref()
        )))
    }
}
