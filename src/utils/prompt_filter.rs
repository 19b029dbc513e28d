use once_cell::sync::Lazy;
use regex::Regex;

/// 提示符：`C:\path>` 或 `/path>`
static PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[A-Za-z]:\\|/)[^>\r\n]*>").expect("prompt pattern is valid")
});

/// 找不到提示符时最多缓存这么多字节，超过后原样放行
const MAX_PENDING: usize = 64 * 1024;

/// 丢弃 shell 启动时的横幅，直到第一个提示符为止（含提示符本身）
///
/// 只作用于启动后的第一段输出，之后的数据原样透传。
#[derive(Debug, Default)]
pub struct PromptFilter {
    pending: String,
    passthrough: bool,
}

impl PromptFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 输入一段文本，返回可以发给界面的部分
    pub fn feed(&mut self, text: &str) -> Option<String> {
        if self.passthrough {
            return non_empty(text.to_string());
        }

        self.pending.push_str(text);

        if let Some(found) = PROMPT.find(&self.pending) {
            let rest = self.pending[found.end()..].trim_start().to_string();
            self.pending.clear();
            self.passthrough = true;
            return non_empty(rest);
        }

        if self.pending.len() > MAX_PENDING {
            self.passthrough = true;
            return non_empty(std::mem::take(&mut self.pending));
        }

        None
    }

    /// 流结束时交出还没等到提示符的缓存内容
    pub fn finish(&mut self) -> Option<String> {
        self.passthrough = true;
        non_empty(std::mem::take(&mut self.pending))
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
