/// 解释器默认块缓冲输出，需要强制无缓冲才能实时看到日志
const UNBUFFERED_FLAG: &str = "-u";

/// 取出命令的首个 token（支持双引号包裹的路径），返回 (token, 剩余部分)
fn split_leading_token(command: &str) -> (&str, &str) {
    if let Some(stripped) = command.strip_prefix('"') {
        if let Some(end) = stripped.find('"') {
            let split = end + 2;
            return (&command[..split], &command[split..]);
        }
        return (command, "");
    }

    match command.find(char::is_whitespace) {
        Some(idx) => (&command[..idx], &command[idx..]),
        None => (command, ""),
    }
}

/// 判断 token 是否为 Python 解释器（python、python3、python3.12、py，可带路径和 .exe）
pub fn is_python_interpreter(token: &str) -> bool {
    let token = token.trim_matches('"');
    let file_name = token
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(token)
        .to_ascii_lowercase();
    let name = file_name.strip_suffix(".exe").unwrap_or(&file_name);

    if name == "py" {
        return true;
    }

    match name.strip_prefix("python") {
        Some(version) => version.chars().all(|c| c.is_ascii_digit() || c == '.'),
        None => false,
    }
}

/// 解释器自身的选项（脚本名之前的 `-x` 参数）里是否已有无缓冲标记
fn has_unbuffered_flag(rest: &str) -> bool {
    rest.split_whitespace()
        .take_while(|arg| arg.starts_with('-'))
        .any(|arg| arg == UNBUFFERED_FLAG)
}

/// 命令是否以 Python 解释器开头
pub fn invokes_interpreter(command: &str) -> bool {
    let (token, _) = split_leading_token(command.trim_start());
    !token.is_empty() && is_python_interpreter(token)
}

/// 在解释器 token 后插入 `-u`，已存在则原样返回
pub fn rewrite_unbuffered(command: &str) -> String {
    let leading_ws = command.len() - command.trim_start().len();
    let (indent, body) = command.split_at(leading_ws);
    let (token, rest) = split_leading_token(body);

    if token.is_empty() || !is_python_interpreter(token) || has_unbuffered_flag(rest) {
        return command.to_string();
    }

    format!("{}{} {}{}", indent, token, UNBUFFERED_FLAG, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_flag_after_interpreter() {
        assert_eq!(rewrite_unbuffered("python app.py"), "python -u app.py");
        assert_eq!(rewrite_unbuffered("python3 -m http.server"), "python3 -u -m http.server");
        assert_eq!(rewrite_unbuffered("py script.py --verbose"), "py -u script.py --verbose");
    }

    #[test]
    fn handles_paths_and_quotes() {
        assert_eq!(
            rewrite_unbuffered(r"venv\Scripts\python.exe main.py"),
            r"venv\Scripts\python.exe -u main.py"
        );
        assert_eq!(
            rewrite_unbuffered(r#""C:\Program Files\Python312\python.exe" bot.py"#),
            r#""C:\Program Files\Python312\python.exe" -u bot.py"#
        );
        assert_eq!(
            rewrite_unbuffered("/usr/bin/python3.12 run.py"),
            "/usr/bin/python3.12 -u run.py"
        );
    }

    #[test]
    fn rewrite_is_idempotent() {
        let commands = [
            "python app.py",
            "python -u app.py",
            "python -X dev -u app.py",
            "  python3 worker.py",
            "python",
            "echo python",
            "node server.js",
            "",
        ];
        for command in commands {
            let once = rewrite_unbuffered(command);
            assert_eq!(rewrite_unbuffered(&once), once, "not idempotent for {:?}", command);
        }
    }

    #[test]
    fn leaves_other_commands_alone() {
        assert_eq!(rewrite_unbuffered("echo python app.py"), "echo python app.py");
        assert_eq!(rewrite_unbuffered("pythonista run"), "pythonista run");
        assert_eq!(rewrite_unbuffered("ls -la"), "ls -la");
        assert_eq!(rewrite_unbuffered("python -u app.py"), "python -u app.py");
    }

    #[test]
    fn script_arguments_named_u_do_not_count() {
        // 脚本自己的 -u 参数不是解释器选项
        assert_eq!(rewrite_unbuffered("python app.py -u"), "python -u app.py -u");
    }
}
