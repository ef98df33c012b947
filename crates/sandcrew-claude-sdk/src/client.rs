//! Ready-to-use implementations of the `StreamHandler` trait.

use std::io::{self, Write};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::SdkError;
use crate::protocol::{StreamHandler, StreamLine};
use crate::truncate::{render_truncated, DEFAULT_TRUNCATE_CHARS};
use crate::types::ClaudeMessage;

/// A handler that echoes the agent's output to the operator in debug mode.
///
/// JSON lines are pretty-printed with long strings truncated; other lines are
/// written verbatim. With `debug` off nothing is written.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sandcrew_claude_sdk::EchoHandler;
///
/// let handler = Arc::new(EchoHandler::stdout(true));
/// // Use with ClaudeExecutor::execute
/// ```
pub struct EchoHandler {
    debug: bool,
    max_chars: usize,
    out: Mutex<Box<dyn Write + Send>>,
}

impl EchoHandler {
    /// Echo to the process's stdout.
    pub fn stdout(debug: bool) -> Self {
        Self::with_writer(debug, Box::new(io::stdout()))
    }

    /// Echo to an arbitrary writer.
    pub fn with_writer(debug: bool, out: Box<dyn Write + Send>) -> Self {
        Self {
            debug,
            max_chars: DEFAULT_TRUNCATE_CHARS,
            out: Mutex::new(out),
        }
    }

    /// Override the truncation length for string leaves.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    fn write_line(&self, text: &str) -> Result<(), SdkError> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| SdkError::Io(io::Error::other("echo writer poisoned")))?;
        writeln!(out, "{}", text)?;
        out.flush()?;
        Ok(())
    }
}

#[async_trait]
impl StreamHandler for EchoHandler {
    async fn on_message(&self, message: &ClaudeMessage, raw: &Value) -> Result<(), SdkError> {
        trace!(kind = message.kind(), "Echo handler received message");
        if !self.debug {
            return Ok(());
        }
        self.write_line(&render_truncated(raw, self.max_chars))
    }

    async fn on_text(&self, line: &str) -> Result<(), SdkError> {
        if !self.debug {
            return Ok(());
        }
        self.write_line(line)
    }
}

/// A handler that forwards every line to a channel.
///
/// Useful for UIs and tests that want to observe the stream as it happens.
pub struct ChannelHandler {
    line_tx: mpsc::UnboundedSender<StreamLine>,
}

impl ChannelHandler {
    /// Create a handler with a receiver for streamed lines.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { line_tx: tx }, rx)
    }
}

#[async_trait]
impl StreamHandler for ChannelHandler {
    async fn on_message(&self, message: &ClaudeMessage, raw: &Value) -> Result<(), SdkError> {
        self.line_tx
            .send(StreamLine::Message {
                message: message.clone(),
                raw: raw.clone(),
            })
            .map_err(|_| SdkError::ChannelClosed)
    }

    async fn on_text(&self, line: &str) -> Result<(), SdkError> {
        self.line_tx
            .send(StreamLine::Text(line.to_string()))
            .map_err(|_| SdkError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_echo_handler_debug_output() {
        let buf = SharedBuf::default();
        let handler = EchoHandler::with_writer(true, Box::new(buf.clone())).with_max_chars(3);

        let raw = json!({"type": "assistant", "text": "abcdef"});
        let msg = ClaudeMessage::Unknown(raw.clone());
        handler.on_message(&msg, &raw).await.unwrap();
        handler.on_text("plain line").await.unwrap();

        let out = buf.contents();
        assert!(out.contains("\"text\": \"abc… (truncated)\""));
        assert!(out.ends_with("plain line\n"));
    }

    #[tokio::test]
    async fn test_echo_handler_silent_without_debug() {
        let buf = SharedBuf::default();
        let handler = EchoHandler::with_writer(false, Box::new(buf.clone()));

        let raw = json!({"type": "system", "session_id": "abc"});
        let msg: ClaudeMessage = serde_json::from_value(raw.clone()).unwrap();
        handler.on_message(&msg, &raw).await.unwrap();
        handler.on_text("noise").await.unwrap();

        assert!(buf.contents().is_empty());
    }

    #[tokio::test]
    async fn test_channel_handler_forwards_lines() {
        let (handler, mut rx) = ChannelHandler::new();

        handler.on_text("hello").await.unwrap();
        let received = rx.try_recv().unwrap();
        assert!(matches!(received, StreamLine::Text(ref t) if t == "hello"));

        drop(rx);
        assert!(matches!(
            handler.on_text("again").await,
            Err(SdkError::ChannelClosed)
        ));
    }
}
