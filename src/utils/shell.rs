use std::path::Path;
use std::process::Stdio;
use tokio::process::Command as TokioCommand;

#[cfg(not(target_os = "windows"))]
use crate::utils::USER_PATH;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;
#[cfg(target_os = "windows")]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;

/// 强制子进程使用 UTF-8 和无缓冲输出
const CHILD_ENV: &[(&str, &str)] = &[
    ("PYTHONUNBUFFERED", "1"),
    ("PYTHONIOENCODING", "utf-8"),
    ("PYTHONUTF8", "1"),
];

/// 平台相关的 shell 启动方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellProfile {
    pub program: String,
    /// 执行单条命令时放在命令前的参数（`-c` / `/C`）
    pub one_shot_args: Vec<String>,
    /// 启动常驻 shell 的参数
    pub session_args: Vec<String>,
    /// 常驻 shell 启动后写入 stdin 的初始化脚本
    pub setup_script: Option<String>,
    pub line_ending: &'static str,
}

impl ShellProfile {
    #[cfg(not(target_os = "windows"))]
    pub fn platform_default() -> Self {
        Self::posix_sh()
    }

    #[cfg(target_os = "windows")]
    pub fn platform_default() -> Self {
        Self::cmd()
    }

    pub fn posix_sh() -> Self {
        Self {
            program: "sh".to_string(),
            one_shot_args: vec!["-c".to_string()],
            session_args: vec!["-s".to_string()],
            // trap 让 Ctrl+C 只打断前台命令，shell 本身存活；
            // 之后打印 `<cwd>>` 作为就绪提示符
            setup_script: Some("trap ':' INT\nprintf '%s>' \"$PWD\"\n".to_string()),
            line_ending: "\n",
        }
    }

    pub fn cmd() -> Self {
        Self {
            program: "cmd".to_string(),
            one_shot_args: vec!["/C".to_string()],
            session_args: vec![
                "/Q".to_string(),
                "/K".to_string(),
                "chcp 65001 > nul".to_string(),
            ],
            // /Q 关闭回显后 cmd 不再打印提示符，手动输出一次 `<cwd>>`
            setup_script: Some("echo %CD%^>\r\n".to_string()),
            line_ending: "\r\n",
        }
    }

    /// 替换 shell 程序，参数保持平台默认
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// 在指定目录执行单条命令
    pub fn one_shot_command(&self, command: &str, working_dir: &Path) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.one_shot_args).arg(command);
        cmd.stdin(Stdio::null());
        self.prepare(&mut cmd, working_dir);
        cmd
    }

    /// 启动常驻 shell，命令通过 stdin 写入
    pub fn session_command(&self, working_dir: &Path) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.session_args);
        cmd.stdin(Stdio::piped());
        self.prepare(&mut cmd, working_dir);
        cmd
    }

    /// 切换目录后执行命令的组合写法
    pub fn cd_and_run(&self, dir: &Path, command: &str) -> String {
        let dir = dir.to_string_lossy();
        if cfg!(target_os = "windows") {
            format!("cd /d \"{}\" && {}", dir, command)
        } else {
            format!("cd '{}' && {}", dir.replace('\'', r"'\''"), command)
        }
    }

    fn prepare(&self, cmd: &mut TokioCommand, working_dir: &Path) {
        cmd.current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in CHILD_ENV {
            cmd.env(key, value);
        }

        #[cfg(target_os = "windows")]
        {
            cmd.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
        }

        #[cfg(not(target_os = "windows"))]
        {
            // 独立进程组，方便整组中断或结束
            cmd.process_group(0);
            cmd.env("PATH", &*USER_PATH);
        }
    }
}

impl Default for ShellProfile {
    fn default() -> Self {
        Self::platform_default()
    }
}
