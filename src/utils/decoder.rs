use encoding_rs::{Encoding, IBM866, UTF_8, WINDOWS_1251};

/// 按顺序尝试的编码：UTF-8，然后是控制台常见的 cp866 / cp1251
fn candidates() -> [&'static Encoding; 3] {
    [UTF_8, IBM866, WINDOWS_1251]
}

fn try_decode(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        None
    } else {
        Some(text.into_owned())
    }
}

/// 把子进程输出的原始字节解码为文本，永远不会失败
///
/// 子进程的控制台代码页取决于系统语言和启动参数，无法事先确定，
/// 所以逐个尝试候选编码，全部失败时用 UTF-8 替换字符兜底。
pub fn decode(bytes: &[u8]) -> String {
    for encoding in candidates() {
        if let Some(text) = try_decode(bytes, encoding) {
            return text;
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// 分块读取时使用的解码器
///
/// 末尾被截断的 UTF-8 序列（最多 3 字节）留到下一块再解码，
/// 其余部分仍按 [`decode`] 的顺序尝试。
#[derive(Debug, Default)]
pub struct StreamDecoder {
    carry: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode_chunk(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(bytes);

        let keep = incomplete_utf8_tail(&buf);
        let split = buf.len() - keep;
        self.carry = buf.split_off(split);
        decode(&buf)
    }

    /// 流结束时交出剩下的字节
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.carry);
        decode(&rest)
    }
}

/// 前面都是合法 UTF-8、只有结尾缺字节时，返回缺字节序列的长度
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => 0,
        Err(e) if e.error_len().is_none() => bytes.len() - e.valid_up_to(),
        Err(_) => 0,
    }
}
