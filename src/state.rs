use cmdplus::{AppConfig, SessionController, TerminalEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct AppState {
    pub controller: Arc<SessionController>,
}

impl AppState {
    /// 创建会话控制器，并把它的事件转发到窗口
    pub fn new(window: tauri::Window, config: &AppConfig) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<TerminalEvent>();
        let controller = Arc::new(SessionController::from_config(config, tx));

        tauri::async_runtime::spawn(async move {
            while let Some(event) = rx.recv().await {
                let result = match &event {
                    TerminalEvent::Output(fragment) => window.emit("terminal_output", fragment),
                    TerminalEvent::Finished { exit_code } => window.emit("terminal_finished", exit_code),
                };
                if let Err(e) = result {
                    tracing::warn!("failed to emit terminal event: {}", e);
                }
            }
        });

        Self { controller }
    }
}
