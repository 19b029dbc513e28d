#![cfg_attr(
    all(not(debug_assertions), target_os = "windows"),
    windows_subsystem = "windows"
)]

mod commands;
mod state;

use cmdplus::{logging, AppConfig};
use state::AppState;
use tauri::Manager;

fn main() {
    logging::init();
    let config = AppConfig::load();
    tracing::info!(mode = ?config.mode, "starting cmd+");

    tauri::Builder::default()
        .setup(move |app| {
            let window = app
                .get_window("main")
                .ok_or("main window is missing from tauri.conf.json")?;
            let state = AppState::new(window.clone(), &config);

            let controller = state.controller.clone();
            tauri::async_runtime::spawn(async move {
                controller.start().await;
            });
            app.manage(state);

            // 关闭窗口时结束所有会话
            let app_handle = app.handle();
            window.on_window_event(move |event| {
                if let tauri::WindowEvent::CloseRequested { .. } = event {
                    let state = app_handle.state::<AppState>();
                    tauri::async_runtime::block_on(async {
                        state.controller.shutdown().await;
                    });
                }
            });

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::submit_command,
            commands::relaunch_command,
            commands::interrupt_command,
            commands::terminate_session,
            commands::switch_mode,
            commands::get_session_info,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
