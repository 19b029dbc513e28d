use crate::errors::{Result, SessionError};
use crate::models::{OutputChannel, SessionState, TerminalEvent};
use crate::services::output_reader::{OutputReader, ReadStrategy};
use crate::utils::{interrupt_foreground, kill_process_tree, ShellProfile};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// 正在运行的 shell 进程及其输出任务
struct LiveShell {
    child: Child,
    stdin: ChildStdin,
    pid: Option<u32>,
    cancel: CancellationToken,
    readers: Vec<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

impl LiveShell {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn write_line(&mut self, text: &str, line_ending: &str) -> std::io::Result<()> {
        self.stdin.write_all(text.as_bytes()).await?;
        self.stdin.write_all(line_ending.as_bytes()).await?;
        self.stdin.flush().await
    }

    /// 停止读取并结束进程树
    async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(pid) = self.pid {
            kill_process_tree(pid).await;
        }
        let _ = self.child.start_kill();
        let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait()).await;
        for reader in self.readers {
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, reader).await;
        }
    }
}

struct Inner {
    state: SessionState,
    shell: Option<LiveShell>,
}

impl Inner {
    fn is_live(&mut self) -> bool {
        self.shell.as_mut().map(LiveShell::is_alive).unwrap_or(false)
    }
}

/// 常驻 shell 会话，多条命令写入同一个进程
///
/// 进程意外退出后回到 `Idle`，下一次提交时重启一次；`terminate` 之后不再可用。
pub struct PersistentSession {
    session_id: String,
    working_dir: PathBuf,
    profile: ShellProfile,
    events: UnboundedSender<TerminalEvent>,
    spawn_count: AtomicUsize,
    inner: Mutex<Inner>,
}

impl PersistentSession {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        profile: ShellProfile,
        events: UnboundedSender<TerminalEvent>,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            working_dir: working_dir.into(),
            profile,
            events,
            spawn_count: AtomicUsize::new(0),
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                shell: None,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// 已经拉起过的 shell 进程数
    pub fn spawn_count(&self) -> usize {
        self.spawn_count.load(Ordering::SeqCst)
    }

    pub async fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.shell.as_ref().map(|s| s.started_at)
    }

    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.shell.as_ref().and_then(|s| s.pid)
    }

    /// 当前状态；进程已退出时报告 `Idle`
    pub async fn state(&self) -> SessionState {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Running && !inner.is_live() {
            inner.state = SessionState::Idle;
        }
        inner.state
    }

    /// 启动 shell；已在运行则直接复用
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await
    }

    async fn start_locked(&self, inner: &mut Inner) -> Result<()> {
        if inner.state.is_terminated() {
            return Err(SessionError::Terminated);
        }
        if inner.is_live() {
            return Ok(());
        }
        if let Some(dead) = inner.shell.take() {
            debug!(session_id = %self.session_id, "cleaning up exited shell");
            dead.shutdown().await;
        }

        inner.state = SessionState::Starting;
        match self.spawn_shell().await {
            Ok(shell) => {
                inner.shell = Some(shell);
                inner.state = SessionState::Running;
                Ok(())
            }
            Err(e) => {
                inner.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    async fn spawn_shell(&self) -> Result<LiveShell> {
        if !self.working_dir.is_dir() {
            return Err(SessionError::InvalidDirectory(self.working_dir.clone()));
        }

        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        let mut child = self
            .profile
            .session_command(&self.working_dir)
            .spawn()
            .map_err(|e| SessionError::spawn(&self.profile.program, e))?;

        let pid = child.id();
        info!(
            session_id = %self.session_id,
            pid = ?pid,
            cwd = %self.working_dir.display(),
            "shell started"
        );

        let stdin = child.stdin.take().ok_or_else(|| {
            SessionError::spawn(
                &self.profile.program,
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin not captured"),
            )
        })?;

        let cancel = CancellationToken::new();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(
                OutputReader::new(
                    OutputChannel::Normal,
                    ReadStrategy::Chunks,
                    self.events.clone(),
                    cancel.clone(),
                )
                .strip_banner()
                .spawn(stdout),
            );
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(
                OutputReader::new(
                    OutputChannel::Error,
                    ReadStrategy::Chunks,
                    self.events.clone(),
                    cancel.clone(),
                )
                .spawn(stderr),
            );
        }

        let mut shell = LiveShell {
            child,
            stdin,
            pid,
            cancel,
            readers,
            started_at: Utc::now(),
        };

        if let Some(script) = &self.profile.setup_script {
            let written = match shell.stdin.write_all(script.as_bytes()).await {
                Ok(()) => shell.stdin.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                shell.shutdown().await;
                return Err(SessionError::Write(e));
            }
        }

        Ok(shell)
    }

    fn diagnostic(&self, message: String) {
        warn!(session_id = %self.session_id, "{}", message);
        let _ = self.events.send(TerminalEvent::diagnostic(message));
    }

    /// 写入一条命令
    ///
    /// shell 已退出时先重启；每次调用最多重启一次，重启失败只输出一条诊断信息。
    pub async fn submit(&self, text: &str) {
        let mut inner = self.inner.lock().await;
        if inner.state.is_terminated() {
            debug!(session_id = %self.session_id, "submit on terminated session ignored");
            return;
        }

        let mut restarted = false;
        if !inner.is_live() {
            if inner.shell.is_some() {
                info!(session_id = %self.session_id, "shell exited, restarting");
            }
            if let Err(e) = self.start_locked(&mut inner).await {
                self.diagnostic(format!("failed to start shell: {}", e));
                return;
            }
            restarted = true;
        }

        let write = match inner.shell.as_mut() {
            Some(shell) => shell.write_line(text, self.profile.line_ending).await,
            None => return,
        };
        let err = match write {
            Ok(()) => return,
            Err(e) => SessionError::Write(e),
        };

        if restarted {
            self.diagnostic(format!("command not delivered: {}", err));
            return;
        }

        // 进程在检查之后才退出：写入失败，重启一次再试
        warn!(session_id = %self.session_id, "{}; restarting shell", err);
        if let Some(dead) = inner.shell.take() {
            dead.shutdown().await;
        }
        inner.state = SessionState::Idle;
        if let Err(e) = self.start_locked(&mut inner).await {
            self.diagnostic(format!("failed to start shell: {}", e));
            return;
        }
        let retry = match inner.shell.as_mut() {
            Some(shell) => shell.write_line(text, self.profile.line_ending).await,
            None => return,
        };
        if let Err(e) = retry {
            self.diagnostic(format!("command not delivered: {}", SessionError::Write(e)));
        }
    }

    /// 中断前台命令，shell 保持运行
    pub async fn interrupt(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.is_live() {
            debug!(session_id = %self.session_id, "interrupt with no running shell ignored");
            return;
        }
        if let Some(pid) = inner.shell.as_ref().and_then(|s| s.pid) {
            match interrupt_foreground(pid).await {
                Ok(()) => debug!(session_id = %self.session_id, pid, "interrupt sent"),
                Err(e) => self.diagnostic(format!("failed to interrupt command: {}", e)),
            }
        }
    }

    /// 结束 shell 及其所有子进程，可重复调用
    pub async fn terminate(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state.is_terminated() {
            return;
        }
        inner.state = SessionState::Terminated;
        if let Some(shell) = inner.shell.take() {
            shell.shutdown().await;
        }
        info!(session_id = %self.session_id, "shell terminated");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::OutputFragment;
    use tokio::sync::mpsc;

    fn session(dir: &Path) -> (PersistentSession, mpsc::UnboundedReceiver<TerminalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            PersistentSession::new(dir, ShellProfile::platform_default(), tx),
            rx,
        )
    }

    /// 收集输出直到出现 `needle` 或超时
    async fn wait_for(rx: &mut mpsc::UnboundedReceiver<TerminalEvent>, needle: &str) -> String {
        let mut seen = String::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !seen.contains(needle) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(TerminalEvent::Output(OutputFragment { text, .. }))) => seen.push_str(&text),
                Ok(Some(_)) => {}
                _ => panic!("did not see {:?}, got {:?}", needle, seen),
            }
        }
        seen
    }

    async fn wait_until_dead(session: &PersistentSession) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while session.state().await != SessionState::Idle {
            assert!(tokio::time::Instant::now() < deadline, "shell did not exit");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn commands_share_one_shell() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let (session, mut rx) = session(dir.path());

        session.start().await.unwrap();
        assert_eq!(session.state().await, SessionState::Running);

        session.submit("cd subdir").await;
        session.submit("pwd").await;
        let output = wait_for(&mut rx, "subdir").await;
        assert!(!output.contains('>'), "banner leaked: {:?}", output);
        assert_eq!(session.spawn_count(), 1);

        session.terminate().await;
    }

    #[tokio::test]
    async fn submit_starts_idle_session() {
        let dir = tempfile::tempdir().unwrap();
        let (session, mut rx) = session(dir.path());

        session.submit("echo first").await;
        wait_for(&mut rx, "first").await;
        assert_eq!(session.spawn_count(), 1);

        session.terminate().await;
    }

    #[tokio::test]
    async fn exited_shell_is_restarted_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let (session, mut rx) = session(dir.path());
        session.start().await.unwrap();

        session.submit("exit").await;
        wait_until_dead(&session).await;

        session.submit("echo revived").await;
        wait_for(&mut rx, "revived").await;
        assert_eq!(session.spawn_count(), 2);
        assert_eq!(session.state().await, SessionState::Running);

        session.terminate().await;
    }

    #[tokio::test]
    async fn external_kill_triggers_single_respawn() {
        let dir = tempfile::tempdir().unwrap();
        let (session, mut rx) = session(dir.path());
        session.start().await.unwrap();

        let pid = session.pid().await.unwrap();
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        wait_until_dead(&session).await;

        session.submit("echo back").await;
        wait_for(&mut rx, "back").await;
        assert_eq!(session.spawn_count(), 2);

        session.terminate().await;
    }

    #[tokio::test]
    async fn failed_restart_emits_one_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let profile = ShellProfile::platform_default().with_program("/definitely/not/a/shell");
        let session = PersistentSession::new(dir.path(), profile, tx);

        session.submit("echo never").await;
        assert_eq!(session.spawn_count(), 1);
        assert_eq!(session.state().await, SessionState::Idle);

        let event = rx.try_recv().unwrap();
        match event {
            TerminalEvent::Output(fragment) => {
                assert_eq!(fragment.channel, OutputChannel::Error);
                assert!(fragment.text.contains("failed to start shell"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());

        // 下一次提交同样只尝试一次
        session.submit("echo again").await;
        assert_eq!(session.spawn_count(), 2);
    }

    #[tokio::test]
    async fn interrupt_stops_foreground_command_only() {
        let dir = tempfile::tempdir().unwrap();
        let (session, mut rx) = session(dir.path());
        session.start().await.unwrap();

        session.submit("echo sleeping; sleep 30; echo woke").await;
        wait_for(&mut rx, "sleeping").await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        session.interrupt().await;
        session.submit("echo alive").await;

        let started = tokio::time::Instant::now();
        wait_for(&mut rx, "alive").await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(session.state().await, SessionState::Running);
        assert_eq!(session.spawn_count(), 1);

        session.terminate().await;
    }

    #[tokio::test]
    async fn utf8_split_between_writes_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let (session, mut rx) = session(dir.path());
        session.start().await.unwrap();

        // "при" 的第一个字节单独写出，其余字节稍后再写
        session
            .submit(r"printf '\320'; sleep 0.2; printf '\277\321\200\320\270 done\n'")
            .await;
        let output = wait_for(&mut rx, "done").await;
        assert!(output.contains("при done"), "garbled output: {:?}", output);

        session.terminate().await;
    }

    #[tokio::test]
    async fn terminate_is_idempotent_and_absorbing() {
        let dir = tempfile::tempdir().unwrap();
        let (session, mut rx) = session(dir.path());
        session.start().await.unwrap();

        session.terminate().await;
        session.terminate().await;
        assert_eq!(session.state().await, SessionState::Terminated);

        session.submit("echo ignored").await;
        assert!(matches!(session.start().await, Err(SessionError::Terminated)));
        assert_eq!(session.spawn_count(), 1);

        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            if let TerminalEvent::Output(fragment) = event {
                assert!(!fragment.text.contains("ignored"));
            }
        }
    }
}
