//! cmd+ 终端前端的会话核心
//!
//! 瞬时模式下每条命令一个子进程；持久模式下所有命令写入同一个 shell。
//! 输出以 [`TerminalEvent`] 的形式推送到一个无界通道，由界面层转发。

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use errors::{Result, SessionError};
pub use models::{OutputChannel, OutputFragment, SessionInfo, SessionMode, SessionState, TerminalEvent};
pub use services::SessionController;
