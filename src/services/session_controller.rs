use crate::config::AppConfig;
use crate::models::{
    CommandInvocation, OutputFragment, SessionInfo, SessionMode, SessionState, TerminalEvent,
};
use crate::services::{PersistentSession, TransientSession};
use crate::utils::ShellProfile;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 同一入口短时间内的重复提交只算一次（防止输入事件重入导致的双击）
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn accept(&mut self, key: &str, now: Instant) -> bool {
        if let Some((last_key, at)) = &self.last {
            if last_key == key && now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }
        self.last = Some((key.to_string(), now));
        true
    }

    /// 用户换了上下文（切换模式、结束会话）后，下一次提交不算重复
    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl ControllerInner {
    fn reset_guards(&mut self) {
        self.submit_guard.reset();
        self.relaunch_guard.reset();
    }
}

/// 识别瞬时模式下的 `cd`，组合命令交给 shell 处理
fn parse_cd(text: &str) -> Option<&str> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("cd") {
        return Some("");
    }
    let rest = text
        .strip_prefix("cd ")
        .or_else(|| text.strip_prefix("CD "))
        .or_else(|| text.strip_prefix("cd\t"))?;
    if rest.contains("&&") || rest.contains(';') || rest.contains('|') {
        return None;
    }
    let rest = rest.trim();
    let rest = rest.strip_prefix("/d ").or_else(|| rest.strip_prefix("/D ")).unwrap_or(rest);
    Some(rest.trim().trim_matches(&['"', '\''][..]))
}

struct ControllerInner {
    mode: SessionMode,
    working_dir: PathBuf,
    transient: Option<Arc<TransientSession>>,
    persistent: Option<Arc<PersistentSession>>,
    submit_guard: Debouncer,
    relaunch_guard: Debouncer,
}

/// 界面与会话之间的调度
///
/// 同一时间只有一种模式的会话在运行；瞬时模式下新命令直接结束上一条（不排队）。
pub struct SessionController {
    profile: ShellProfile,
    events: UnboundedSender<TerminalEvent>,
    inner: Mutex<ControllerInner>,
}

impl SessionController {
    pub fn new(
        mode: SessionMode,
        working_dir: PathBuf,
        profile: ShellProfile,
        debounce: Duration,
        events: UnboundedSender<TerminalEvent>,
    ) -> Self {
        Self {
            profile,
            events,
            inner: Mutex::new(ControllerInner {
                mode,
                working_dir,
                transient: None,
                persistent: None,
                submit_guard: Debouncer::new(debounce),
                relaunch_guard: Debouncer::new(debounce),
            }),
        }
    }

    pub fn from_config(config: &AppConfig, events: UnboundedSender<TerminalEvent>) -> Self {
        Self::new(
            config.mode,
            config.resolved_working_dir(),
            config.shell_profile(),
            config.debounce(),
            events,
        )
    }

    pub async fn mode(&self) -> SessionMode {
        self.inner.lock().await.mode
    }

    pub async fn working_dir(&self) -> PathBuf {
        self.inner.lock().await.working_dir.clone()
    }

    pub async fn info(&self) -> SessionInfo {
        let inner = self.inner.lock().await;
        let (state, started_at) = match inner.mode {
            SessionMode::Transient => match &inner.transient {
                Some(session) => (session.state().await, Some(session.started_at())),
                None => (SessionState::Idle, None),
            },
            SessionMode::Persistent => match &inner.persistent {
                Some(session) => (session.state().await, session.started_at().await),
                None => (SessionState::Idle, None),
            },
        };

        SessionInfo {
            mode: inner.mode,
            working_dir: inner.working_dir.clone(),
            state,
            started_at,
        }
    }

    fn emit(&self, event: TerminalEvent) {
        let _ = self.events.send(event);
    }

    /// 提交一条命令
    pub async fn submit(&self, text: &str) {
        let text = text.trim_end_matches(['\r', '\n']);
        if text.trim().is_empty() {
            return;
        }

        let mut inner = self.inner.lock().await;
        if !inner.submit_guard.accept(text, Instant::now()) {
            debug!(command = %text, "duplicate submission dropped");
            return;
        }

        match inner.mode {
            SessionMode::Transient => {
                if let Some(target) = parse_cd(text) {
                    self.change_dir(&mut inner, target);
                    return;
                }
                self.stop_transient(&mut inner).await;
                let invocation = CommandInvocation::new(text, inner.working_dir.clone());
                self.start_transient(&mut inner, invocation).await;
            }
            SessionMode::Persistent => {
                let session = self.ensure_persistent(&mut inner);
                session.submit(text).await;
            }
        }
    }

    /// 在指定目录重新运行一条历史命令，先结束当前运行
    pub async fn relaunch(&self, command: &str, working_dir: &Path) {
        if command.trim().is_empty() {
            return;
        }

        let mut inner = self.inner.lock().await;
        let key = format!("{}\n{}", working_dir.display(), command);
        if !inner.relaunch_guard.accept(&key, Instant::now()) {
            debug!(command = %command, "duplicate relaunch dropped");
            return;
        }

        let invocation = CommandInvocation::new(command, working_dir);
        info!(command = %invocation.command, cwd = %working_dir.display(), "relaunching");

        match inner.mode {
            SessionMode::Transient => {
                self.stop_transient(&mut inner).await;
                self.start_transient(&mut inner, invocation).await;
            }
            SessionMode::Persistent => {
                self.stop_persistent(&mut inner).await;
                let session = self.ensure_persistent(&mut inner);
                let line = self.profile.cd_and_run(&invocation.working_dir, &invocation.command);
                session.submit(&line).await;
            }
        }
    }

    /// 持久模式只打断前台命令；瞬时模式没有 shell 可保留，直接结束
    pub async fn interrupt(&self) {
        let mut inner = self.inner.lock().await;
        match inner.mode {
            SessionMode::Transient => self.stop_transient(&mut inner).await,
            SessionMode::Persistent => {
                if let Some(session) = &inner.persistent {
                    session.interrupt().await;
                }
            }
        }
    }

    pub async fn terminate(&self) {
        let mut inner = self.inner.lock().await;
        match inner.mode {
            SessionMode::Transient => self.stop_transient(&mut inner).await,
            SessionMode::Persistent => self.stop_persistent(&mut inner).await,
        }
        inner.reset_guards();
    }

    /// 切换模式前先结束旧模式的会话，避免两边输出交错
    pub async fn switch_mode(&self, mode: SessionMode) {
        let mut inner = self.inner.lock().await;
        if inner.mode == mode {
            return;
        }

        match inner.mode {
            SessionMode::Transient => self.stop_transient(&mut inner).await,
            SessionMode::Persistent => self.stop_persistent(&mut inner).await,
        }
        inner.mode = mode;
        inner.reset_guards();
        info!(mode = ?mode, "session mode switched");

        if mode == SessionMode::Persistent {
            self.start_shell(&mut inner).await;
        }
    }

    /// 启动时调用：持久模式下提前拉起 shell
    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        if inner.mode == SessionMode::Persistent {
            self.start_shell(&mut inner).await;
        }
    }

    /// 窗口关闭时调用，结束所有会话
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        self.stop_transient(&mut inner).await;
        self.stop_persistent(&mut inner).await;
        info!("all sessions stopped");
    }

    fn change_dir(&self, inner: &mut ControllerInner, target: &str) {
        if target.is_empty() {
            let cwd = format!("{}\n", inner.working_dir.display());
            self.emit(TerminalEvent::Output(OutputFragment::normal(cwd)));
            self.emit(TerminalEvent::Finished { exit_code: Some(0) });
            return;
        }

        let candidate = inner.working_dir.join(target);
        match candidate.canonicalize() {
            Ok(dir) if dir.is_dir() => {
                debug!(cwd = %dir.display(), "working directory changed");
                inner.working_dir = dir;
                self.emit(TerminalEvent::Finished { exit_code: Some(0) });
            }
            _ => {
                self.emit(TerminalEvent::diagnostic(format!(
                    "cd: no such directory: {}",
                    target
                )));
                self.emit(TerminalEvent::Finished { exit_code: Some(1) });
            }
        }
    }

    async fn start_transient(&self, inner: &mut ControllerInner, invocation: CommandInvocation) {
        match TransientSession::run(invocation, &self.profile, self.events.clone()).await {
            Ok(session) => inner.transient = Some(session),
            Err(e) => {
                warn!("failed to run command: {}", e);
                self.emit(TerminalEvent::diagnostic(e.to_string()));
                self.emit(TerminalEvent::Finished { exit_code: None });
            }
        }
    }

    async fn stop_transient(&self, inner: &mut ControllerInner) {
        if let Some(session) = inner.transient.take() {
            session.terminate().await;
        }
    }

    async fn stop_persistent(&self, inner: &mut ControllerInner) {
        if let Some(session) = inner.persistent.take() {
            session.terminate().await;
        }
    }

    async fn start_shell(&self, inner: &mut ControllerInner) {
        let session = self.ensure_persistent(inner);
        if let Err(e) = session.start().await {
            warn!("failed to start shell: {}", e);
            self.emit(TerminalEvent::diagnostic(format!("failed to start shell: {}", e)));
        }
    }

    fn ensure_persistent(&self, inner: &mut ControllerInner) -> Arc<PersistentSession> {
        if let Some(session) = &inner.persistent {
            return session.clone();
        }
        let session = Arc::new(PersistentSession::new(
            inner.working_dir.clone(),
            self.profile.clone(),
            self.events.clone(),
        ));
        inner.persistent = Some(session.clone());
        session
    }
}
