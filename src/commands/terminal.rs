use cmdplus::{SessionInfo, SessionMode};
use crate::state::AppState;
use std::path::PathBuf;
use tauri::State;

#[tauri::command]
pub async fn submit_command(command: String, state: State<'_, AppState>) -> Result<(), String> {
    state.controller.submit(&command).await;
    Ok(())
}

/// 在记录的目录里重新运行历史命令
#[tauri::command]
pub async fn relaunch_command(
    command: String,
    working_dir: String,
    state: State<'_, AppState>,
) -> Result<(), String> {
    let dir = PathBuf::from(&working_dir);
    if !dir.is_dir() {
        return Err(format!("directory does not exist: {}", working_dir));
    }
    state.controller.relaunch(&command, &dir).await;
    Ok(())
}

#[tauri::command]
pub async fn interrupt_command(state: State<'_, AppState>) -> Result<(), String> {
    state.controller.interrupt().await;
    Ok(())
}

#[tauri::command]
pub async fn terminate_session(state: State<'_, AppState>) -> Result<(), String> {
    state.controller.terminate().await;
    Ok(())
}

#[tauri::command]
pub async fn switch_mode(mode: SessionMode, state: State<'_, AppState>) -> Result<SessionInfo, String> {
    state.controller.switch_mode(mode).await;
    Ok(state.controller.info().await)
}

#[tauri::command]
pub async fn get_session_info(state: State<'_, AppState>) -> Result<SessionInfo, String> {
    Ok(state.controller.info().await)
}
