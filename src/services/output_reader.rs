//! 子进程输出读取
//!
//! 每个输出通道一个 tokio 任务，读到的字节立即解码并推送，不做合并。
//! 同一通道内保持顺序，stdout 与 stderr 之间不保证顺序。

use crate::models::{OutputChannel, OutputFragment, TerminalEvent};
use crate::utils::{decode, PromptFilter, StreamDecoder};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// 按行读取，适合一次性命令
    Lines,
    /// 有数据就读，适合没有换行的提示符和逐字符输出
    Chunks,
}

pub struct OutputReader {
    channel: OutputChannel,
    strategy: ReadStrategy,
    prompt_filter: Option<PromptFilter>,
    events: UnboundedSender<TerminalEvent>,
    cancel: CancellationToken,
}

impl OutputReader {
    pub fn new(
        channel: OutputChannel,
        strategy: ReadStrategy,
        events: UnboundedSender<TerminalEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            strategy,
            prompt_filter: None,
            events,
            cancel,
        }
    }

    /// 丢弃启动横幅，仅对 `Chunks` 生效
    pub fn strip_banner(mut self) -> Self {
        self.prompt_filter = Some(PromptFilter::new());
        self
    }

    pub fn spawn<R>(self, stream: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            match self.strategy {
                ReadStrategy::Lines => self.read_lines(stream).await,
                ReadStrategy::Chunks => self.read_chunks(stream).await,
            }
        })
    }

    /// 接收端已关闭时返回 false
    fn emit(&self, text: String) -> bool {
        if text.is_empty() {
            return true;
        }
        let fragment = OutputFragment {
            text,
            channel: self.channel,
        };
        self.events.send(TerminalEvent::Output(fragment)).is_ok()
    }

    async fn read_lines<R>(self, stream: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();

        loop {
            line.clear();
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                read = reader.read_until(b'\n', &mut line) => read,
            };

            match read {
                // 管道读到 EOF 说明所有写端都已关闭
                Ok(0) => break,
                Ok(_) => {
                    if !self.emit(decode(&line)) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(channel = ?self.channel, "output read failed: {}", e);
                    break;
                }
            }
        }

        debug!(channel = ?self.channel, "line reader finished");
    }

    async fn read_chunks<R>(mut self, mut stream: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut decoder = StreamDecoder::new();

        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                read = stream.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    let tail = decoder.finish();
                    let text = match self.prompt_filter.as_mut() {
                        Some(filter) => {
                            let mut rest = filter.feed(&tail).unwrap_or_default();
                            rest.push_str(&filter.finish().unwrap_or_default());
                            rest
                        }
                        None => tail,
                    };
                    self.emit(text);
                    break;
                }
                Ok(n) => {
                    let text = decoder.decode_chunk(&buf[..n]);
                    let text = match self.prompt_filter.as_mut() {
                        Some(filter) => filter.feed(&text),
                        None => Some(text),
                    };
                    if let Some(text) = text {
                        if !self.emit(text) {
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(channel = ?self.channel, "output read failed: {}", e);
                    break;
                }
            }
        }

        debug!(channel = ?self.channel, "chunk reader finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    fn texts(events: Vec<TerminalEvent>) -> Vec<String> {
        events
            .into_iter()
            .filter_map(|event| match event {
                TerminalEvent::Output(fragment) => Some(fragment.text),
                _ => None,
            })
            .collect()
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<TerminalEvent>) -> Vec<TerminalEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn lines_are_emitted_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream: &[u8] = b"one\ntwo\nthree";
        let handle = OutputReader::new(OutputChannel::Normal, ReadStrategy::Lines, tx, CancellationToken::new())
            .spawn(stream);
        handle.await.unwrap();

        assert_eq!(texts(drain(&mut rx).await), vec!["one\n", "two\n", "three"]);
    }

    #[tokio::test]
    async fn chunks_deliver_partial_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut writer, reader) = tokio::io::duplex(64);
        let handle = OutputReader::new(OutputChannel::Error, ReadStrategy::Chunks, tx, CancellationToken::new())
            .spawn(reader);

        writer.write_all(b"Password: ").await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            first,
            TerminalEvent::Output(OutputFragment::error("Password: "))
        );

        drop(writer);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn banner_is_stripped_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut writer, reader) = tokio::io::duplex(64);
        let handle = OutputReader::new(OutputChannel::Normal, ReadStrategy::Chunks, tx, CancellationToken::new())
            .strip_banner()
            .spawn(reader);

        writer.write_all(b"Welcome\n/home/dev>").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.write_all(b"/home/dev>done\n").await.unwrap();
        drop(writer);
        handle.await.unwrap();

        assert_eq!(texts(drain(&mut rx).await).concat(), "/home/dev>done\n");
    }

    #[tokio::test]
    async fn character_split_across_reads_stays_intact() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut writer, reader) = tokio::io::duplex(64);
        let handle = OutputReader::new(OutputChannel::Normal, ReadStrategy::Chunks, tx, CancellationToken::new())
            .spawn(reader);

        let bytes = "привет мир\n".as_bytes();
        writer.write_all(&bytes[..5]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.write_all(&bytes[5..]).await.unwrap();
        drop(writer);
        handle.await.unwrap();

        assert_eq!(texts(drain(&mut rx).await).concat(), "привет мир\n");
    }

    #[tokio::test]
    async fn cancellation_stops_reader() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_writer, reader) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let handle = OutputReader::new(OutputChannel::Normal, ReadStrategy::Lines, tx, cancel.clone())
            .spawn(reader);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reader should stop after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn undecodable_bytes_still_arrive() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream: &[u8] = &[0x8F, 0xE0, 0xA8, 0xA2, 0xA5, 0xE2, b'\n'];
        OutputReader::new(OutputChannel::Normal, ReadStrategy::Lines, tx, CancellationToken::new())
            .spawn(stream)
            .await
            .unwrap();

        assert_eq!(texts(drain(&mut rx).await), vec!["Привет\n"]);
    }
}
