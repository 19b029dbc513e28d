use crate::errors::{Result, SessionError};
use crate::models::{CommandInvocation, OutputChannel, SessionState, TerminalEvent};
use crate::services::output_reader::{OutputReader, ReadStrategy};
use crate::utils::{kill_process_group, kill_process_tree, ShellProfile};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 结束后等待输出任务收尾的最长时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// 进程退出后继续读取剩余输出的时间；后台子进程仍占着管道时到点放弃
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// 一条命令对应一个子进程，进程退出且输出读完后会话即结束
pub struct TransientSession {
    session_id: String,
    invocation: CommandInvocation,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    state: Arc<Mutex<SessionState>>,
    /// 进程已被回收，pid 不再属于它
    reaped: Arc<AtomicBool>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl TransientSession {
    /// 启动命令；stdout/stderr 各由一个按行读取的任务转发
    pub async fn run(
        invocation: CommandInvocation,
        profile: &ShellProfile,
        events: UnboundedSender<TerminalEvent>,
    ) -> Result<Arc<Self>> {
        if !invocation.working_dir.is_dir() {
            return Err(SessionError::InvalidDirectory(invocation.working_dir));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let state = Arc::new(Mutex::new(SessionState::Starting));

        let mut child = profile
            .one_shot_command(&invocation.command, &invocation.working_dir)
            .spawn()
            .map_err(|e| SessionError::spawn(&profile.program, e))?;

        let pid = child.id();
        info!(
            session_id = %session_id,
            pid = ?pid,
            command = %invocation.command,
            cwd = %invocation.working_dir.display(),
            "command started"
        );

        let cancel = CancellationToken::new();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(
                OutputReader::new(OutputChannel::Normal, ReadStrategy::Lines, events.clone(), cancel.clone())
                    .spawn(stdout),
            );
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(
                OutputReader::new(OutputChannel::Error, ReadStrategy::Lines, events.clone(), cancel.clone())
                    .spawn(stderr),
            );
        }

        *state.lock().await = SessionState::Running;

        let reaped = Arc::new(AtomicBool::new(false));
        let supervisor = tokio::spawn(supervise(
            session_id.clone(),
            child,
            readers,
            state.clone(),
            reaped.clone(),
            cancel.clone(),
            events,
        ));

        Ok(Arc::new(Self {
            session_id,
            invocation,
            pid,
            started_at: Utc::now(),
            state,
            reaped,
            cancel,
            supervisor: Mutex::new(Some(supervisor)),
        }))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn invocation(&self) -> &CommandInvocation {
        &self.invocation
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// 结束整个进程树，可重复调用
    ///
    /// 返回前会等待完成事件发出，保证它排在下一次运行的输出之前。
    pub async fn terminate(&self) {
        {
            let mut state = self.state.lock().await;
            if state.is_terminated() {
                debug!(session_id = %self.session_id, "terminate on finished command ignored");
                return;
            }
            *state = SessionState::Terminated;
        }

        self.cancel.cancel();
        if let Some(pid) = self.pid {
            if self.reaped.load(Ordering::SeqCst) {
                // 只剩留在进程组里的后台进程
                kill_process_group(pid);
            } else {
                kill_process_tree(pid).await;
            }
        }

        let supervisor = self.supervisor.lock().await.take();
        if let Some(handle) = supervisor {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!(session_id = %self.session_id, "command did not shut down in time");
            }
        }
        info!(session_id = %self.session_id, "command terminated");
    }
}

/// 等待进程退出，再等输出读完，最后发出完成事件
///
/// 后台子进程继承了管道时读不到 EOF；超过 `DRAIN_TIMEOUT` 就停止读取并结束整个进程组。
async fn supervise(
    session_id: String,
    mut child: Child,
    mut readers: Vec<JoinHandle<()>>,
    state: Arc<Mutex<SessionState>>,
    reaped: Arc<AtomicBool>,
    cancel: CancellationToken,
    events: UnboundedSender<TerminalEvent>,
) {
    let pid = child.id();
    let exit_code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(session_id = %session_id, "failed to wait for command: {}", e);
            None
        }
    };
    reaped.store(true, Ordering::SeqCst);

    {
        let mut state = state.lock().await;
        if !state.is_terminated() {
            *state = SessionState::Draining;
        }
    }

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        for reader in readers.iter_mut() {
            let _ = reader.await;
        }
    })
    .await
    .is_ok();

    if !drained {
        info!(session_id = %session_id, "output still open after exit, stopping leftover processes");
        cancel.cancel();
        if let Some(pid) = pid {
            kill_process_group(pid);
        }
        for reader in readers {
            if !reader.is_finished() {
                let _ = reader.await;
            }
        }
    }

    *state.lock().await = SessionState::Terminated;
    info!(session_id = %session_id, exit_code = ?exit_code, "command finished");
    let _ = events.send(TerminalEvent::Finished { exit_code });
}
