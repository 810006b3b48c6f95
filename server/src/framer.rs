//! Bounded `\r\n` line reader.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

#[derive(Debug, Error)]
pub enum FramerError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// Reads one packet per line from any async reader.
///
/// Lines longer than `max_len` (terminator excluded) fail with
/// [`FramerError::LineTooLong`] before the whole line has been buffered.
pub struct LineFramer<R> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> LineFramer<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: Vec::with_capacity(256),
            max_len,
        }
    }

    /// Next non-empty line without its terminator, `None` on end of stream.
    pub async fn next_line(&mut self) -> Result<Option<String>, FramerError> {
        loop {
            self.buffer.clear();
            if !self.read_until_newline().await? {
                return Ok(None);
            }

            while matches!(self.buffer.last(), Some(b'\n') | Some(b'\r')) {
                self.buffer.pop();
            }
            if self.buffer.is_empty() {
                continue;
            }

            return Ok(Some(String::from_utf8_lossy(&self.buffer).into_owned()));
        }
    }

    /// Fills `buffer` up to and including the next `\n`. Returns false at end
    /// of stream; a trailing partial line is dropped.
    async fn read_until_newline(&mut self) -> Result<bool, FramerError> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(false);
            }

            let (chunk, found) = match available.iter().position(|b| *b == b'\n') {
                Some(pos) => (&available[..=pos], true),
                None => (available, false),
            };
            let consumed = chunk.len();
            self.buffer.extend_from_slice(chunk);
            self.reader.consume(consumed);

            // +2 leaves room for the terminator itself
            if self.buffer.len() > self.max_len + 2 {
                return Err(FramerError::LineTooLong(self.max_len));
            }
            if found {
                return Ok(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_reads_lines_across_chunks() {
        let mock = Builder::new()
            .read(b"#APCES2352:SERVER:2352:pw:1:9:16:")
            .read(b"Real Name\r\n%ZSHA_CTR:19950:7:300:5:31.19:121.33\r\n")
            .build();
        let mut framer = LineFramer::new(mock, 4096);

        assert_eq!(
            framer.next_line().await.unwrap().as_deref(),
            Some("#APCES2352:SERVER:2352:pw:1:9:16:Real Name")
        );
        assert_eq!(
            framer.next_line().await.unwrap().as_deref(),
            Some("%ZSHA_CTR:19950:7:300:5:31.19:121.33")
        );
        assert!(framer.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_skips_blank_lines_and_accepts_bare_newline() {
        let mock = Builder::new().read(b"\r\n\r\n$PICES2352:SERVER:1\n").build();
        let mut framer = LineFramer::new(mock, 4096);

        assert_eq!(
            framer.next_line().await.unwrap().as_deref(),
            Some("$PICES2352:SERVER:1")
        );
        assert!(framer.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let long = vec![b'A'; 200];
        let mock = Builder::new().read(&long).build();
        let mut framer = LineFramer::new(mock, 64);

        assert!(matches!(
            framer.next_line().await,
            Err(FramerError::LineTooLong(64))
        ));
    }

    #[tokio::test]
    async fn test_partial_line_at_eof_is_dropped() {
        let mock = Builder::new().read(b"#TMA:B:hello\r\n#TMA:B:unfinished").build();
        let mut framer = LineFramer::new(mock, 4096);

        assert_eq!(framer.next_line().await.unwrap().as_deref(), Some("#TMA:B:hello"));
        assert!(framer.next_line().await.unwrap().is_none());
    }
}
