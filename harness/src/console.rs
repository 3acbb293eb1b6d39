//! Console streams of victim machines.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Line-oriented, non-seekable console output of a running machine.
pub type ConsoleStream = Box<dyn AsyncRead + Send + Unpin>;

/// Splits a console byte stream into text lines as they arrive.
///
/// Serial consoles emit CRLF and the occasional invalid UTF-8 byte during
/// early boot; lines are decoded lossily and keep their terminator so the
/// raw capture can be reproduced exactly.
pub struct ConsoleLines {
    reader: Option<BufReader<ConsoleStream>>,
    buf: Vec<u8>,
}

impl ConsoleLines {
    pub fn new(stream: ConsoleStream) -> Self {
        Self {
            reader: Some(BufReader::new(stream)),
            buf: Vec::with_capacity(256),
        }
    }

    /// Next line including its terminator, or `None` at end of stream.
    ///
    /// A final unterminated fragment is returned as a line of its own.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        self.buf.clear();
        let n = reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    /// Bytes of a line whose read was interrupted before its terminator
    /// arrived. Cleared by the next call to [`next_line`](Self::next_line).
    pub fn take_pending(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let pending = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(pending)
    }

    /// Drop the underlying stream, closing it.
    pub fn close(&mut self) {
        self.reader = None;
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }
}

/// Strip the line terminator (LF or CRLF) from a captured line.
pub fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// Remove control characters so a line can be logged safely.
pub fn printable(line: &str) -> String {
    trim_line_end(line)
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn splits_lines_as_they_arrive() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut lines = ConsoleLines::new(Box::new(rx));

        tx.write_all(b"booting...\r\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "booting...\r\n");

        tx.write_all(b"init ").await.unwrap();
        tx.write_all(b"done\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "init done\n");

        tx.write_all(b"tail").await.unwrap();
        drop(tx);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "tail");
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let stream: ConsoleStream = Box::new(&b"ok \xff\n"[..]);
        let mut lines = ConsoleLines::new(stream);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "ok \u{fffd}\n");
    }

    #[tokio::test]
    async fn close_releases_stream() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut lines = ConsoleLines::new(Box::new(rx));
        lines.close();
        assert!(lines.is_closed());
        assert!(lines.next_line().await.unwrap().is_none());
        assert!(tx.write_all(b"late\n").await.is_err());
    }

    #[tokio::test]
    async fn interrupted_read_keeps_partial_line() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut lines = ConsoleLines::new(Box::new(rx));
        tx.write_all(b"login: ").await.unwrap();

        let read = tokio::time::timeout(Duration::from_millis(50), lines.next_line()).await;
        assert!(read.is_err());
        assert_eq!(lines.take_pending().as_deref(), Some("login: "));
        assert_eq!(lines.take_pending(), None);
    }

    #[test]
    fn printable_filters_control_characters() {
        assert_eq!(printable("\x1b[0mkernel\x07 up\r\n"), "[0mkernel up");
        assert_eq!(trim_line_end("a\r\n"), "a");
    }
}
