use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tracing::debug;

/// SIGTERM 之后给进程优雅退出的时间
const GRACE_PERIOD: Duration = Duration::from_millis(50);

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

#[cfg(not(target_os = "windows"))]
fn send_signal(target: libc::pid_t, signal: libc::c_int) -> std::io::Result<()> {
    let rc = unsafe { libc::kill(target, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    // 进程（组）已经不存在
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

#[cfg(not(target_os = "windows"))]
async fn get_child_pids(pid: u32) -> Vec<u32> {
    let output = TokioCommand::new("pgrep")
        .args(["-P", &pid.to_string()])
        .output()
        .await;

    match output {
        Ok(output) => String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// 收集所有后代进程（包括 setsid 脱离了进程组的）
#[cfg(not(target_os = "windows"))]
async fn collect_descendants(root: u32) -> Vec<u32> {
    let mut found = Vec::new();
    let mut queue = vec![root];

    while let Some(pid) = queue.pop() {
        for child in get_child_pids(pid).await {
            if !found.contains(&child) {
                found.push(child);
                queue.push(child);
            }
        }
    }

    found
}

#[cfg(not(target_os = "windows"))]
fn signal_tree(pid: u32, descendants: &[u32], signal: libc::c_int) {
    // 子进程以自身 pid 作为进程组 id 启动
    if let Err(e) = send_signal(-(pid as libc::pid_t), signal) {
        debug!(pid, signal, "signal to process group failed: {}", e);
    }
    for &child in descendants {
        if let Err(e) = send_signal(child as libc::pid_t, signal) {
            debug!(pid = child, signal, "signal to descendant failed: {}", e);
        }
    }
}

/// 结束整个进程树，失败只记录日志
pub async fn kill_process_tree(pid: u32) {
    #[cfg(target_os = "windows")]
    {
        let mut kill_command = TokioCommand::new("taskkill");
        kill_command.args(["/PID", &pid.to_string(), "/T", "/F"]);
        kill_command.creation_flags(CREATE_NO_WINDOW);

        if let Err(e) = kill_command.output().await {
            debug!(pid, "taskkill failed: {}", e);
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        // 先收集后代，父进程死后 pgrep -P 就查不到了
        let descendants = collect_descendants(pid).await;

        signal_tree(pid, &descendants, libc::SIGTERM);
        tokio::time::sleep(GRACE_PERIOD).await;
        signal_tree(pid, &descendants, libc::SIGKILL);
    }
}

/// 父进程已被回收后，清理仍留在它进程组里的后台进程
///
/// 组里还有成员时组 id 不会被复用；组已空则返回 ESRCH，按成功处理。
pub fn kill_process_group(pid: u32) {
    #[cfg(target_os = "windows")]
    {
        // 父进程退出后无法再按树查找
        debug!(pid, "no process group to clean up on windows");
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Err(e) = send_signal(-(pid as libc::pid_t), libc::SIGKILL) {
            debug!(pid, "failed to kill leftover process group: {}", e);
        }
    }
}

/// 列出直接子进程
#[cfg(target_os = "windows")]
fn windows_child_pids(pid: u32) -> std::io::Result<Vec<u32>> {
    use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };

    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
        if snapshot == INVALID_HANDLE_VALUE {
            return Err(std::io::Error::last_os_error());
        }

        let mut entry: PROCESSENTRY32W = std::mem::zeroed();
        entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;

        let mut children = Vec::new();
        let mut more = Process32FirstW(snapshot, &mut entry) != 0;
        while more {
            if entry.th32ParentProcessID == pid {
                children.push(entry.th32ProcessID);
            }
            more = Process32NextW(snapshot, &mut entry) != 0;
        }
        CloseHandle(snapshot);
        Ok(children)
    }
}

/// 中断 shell 的前台命令，shell 本身保留
///
/// unix 向进程组发 SIGINT，shell 用 trap 忽略。Windows 先尝试 Ctrl+Break；
/// 没有共享控制台时该调用必然失败，改为结束 shell 的所有子进程树。
pub async fn interrupt_foreground(pid: u32) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    {
        use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};

        let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) };
        if ok != 0 {
            return Ok(());
        }
        debug!(pid, "console ctrl event failed: {}", std::io::Error::last_os_error());

        for child in windows_child_pids(pid)? {
            kill_process_tree(child).await;
        }
        Ok(())
    }

    #[cfg(not(target_os = "windows"))]
    {
        send_signal(-(pid as libc::pid_t), libc::SIGINT)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;

    /// 僵尸进程视为已退出
    fn is_alive(pid: u32) -> bool {
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            return stat
                .rsplit(')')
                .next()
                .map(|rest| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false);
        }
        if std::path::Path::new("/proc/self").exists() {
            return false;
        }
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[tokio::test]
    async fn kills_group_including_grandchildren() {
        let mut child = TokioCommand::new("sh")
            .args(["-c", "sleep 30 & echo $!; wait"])
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        let mut stdout = child.stdout.take().unwrap();
        let mut buf = [0u8; 32];
        let n = tokio::io::AsyncReadExt::read(&mut stdout, &mut buf).await.unwrap();
        let grandchild: u32 = String::from_utf8_lossy(&buf[..n]).trim().parse().unwrap();
        assert!(is_alive(grandchild));

        kill_process_tree(pid).await;
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());

        // 孙进程的父进程已被回收，可能短暂成为僵尸，等它被 init 收走
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while is_alive(grandchild) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!is_alive(grandchild));
    }

    #[tokio::test]
    async fn killing_missing_process_is_silent() {
        let mut child = TokioCommand::new("true").process_group(0).spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();

        kill_process_tree(pid).await;
        kill_process_tree(pid).await;
    }

    #[tokio::test]
    async fn interrupt_reaches_group() {
        let mut child = TokioCommand::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        interrupt_foreground(pid).await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }
}
