//! Framed, line-oriented channel endpoints.
//!
//! A [`ChannelReader`] pulls whole messages off any [`AsyncBufRead`]; a
//! [`ChannelWriter`] pushes them into any [`AsyncWrite`] and flushes after
//! every message so the consumer on the far end of a pipe sees it at once.
//!
//! Endpoints are opened from paths with [`open_reader`] / [`open_writer`].
//! A path of `-` maps to the process's stdin / stdout; anything else must
//! already exist (typically a FIFO created with `mkfifo`).  Opening a FIFO
//! waits until the peer opens the other end.
//!
//! # End of stream
//!
//! EOF on a reader is reported as [`TritonError::ChannelClosed`], including
//! EOF in the middle of a multi-line observation message.

use std::pin::Pin;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};
use triton_estimation::{Matrix, Observation};
use triton_types::TritonError;

use crate::wire::{self, Command};

/// Path that selects stdin / stdout instead of a file.
pub const STDIO_PATH: &str = "-";

/// Reader half returned by [`open_reader`].
pub type DynReader = Pin<Box<dyn AsyncBufRead + Send>>;
/// Writer half returned by [`open_writer`].
pub type DynWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// All records of one observation message, each decoded independently.
///
/// A malformed record does not disturb its siblings: every declared line is
/// consumed before decoding, so the stream stays aligned on the next count
/// line.
#[derive(Debug)]
pub struct ObservationFrame {
    records: Vec<Result<Observation, TritonError>>,
}

impl ObservationFrame {
    /// The per-record decode results, in arrival order.  A `0` count line
    /// yields a single [`Observation::NotSeen`].
    pub fn records(&self) -> &[Result<Observation, TritonError>] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Result<Observation, TritonError>> {
        self.records
    }

    /// `true` for a `0` ("not seen") message.
    pub fn is_not_seen(&self) -> bool {
        matches!(self.records.as_slice(), [Ok(Observation::NotSeen)])
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reader
// ────────────────────────────────────────────────────────────────────────────

/// Message-level reader over a buffered byte stream.
pub struct ChannelReader<R> {
    name: String,
    inner: R,
    buf: Vec<u8>,
    lines_read: u64,
}

impl<R> ChannelReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Wrap `inner`.  `name` only appears in logs and errors.
    pub fn new(name: impl Into<String>, inner: R) -> Self {
        Self {
            name: name.into(),
            inner,
            buf: Vec::new(),
            lines_read: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of non-blank lines consumed so far.
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Next non-blank line with its terminator stripped.
    ///
    /// A line that is not valid UTF-8 is consumed and reported as
    /// [`TritonError::CorruptData`]; the stream stays on the following line.
    pub async fn read_line(&mut self) -> Result<String, TritonError> {
        loop {
            self.buf.clear();
            let n = self.inner.read_until(b'\n', &mut self.buf).await?;
            if n == 0 {
                debug!(channel = %self.name, "end of stream");
                return Err(TritonError::ChannelClosed(self.name.clone()));
            }
            let line = match std::str::from_utf8(&self.buf) {
                Ok(text) => text.trim(),
                Err(e) => {
                    self.lines_read += 1;
                    return Err(TritonError::CorruptData(format!(
                        "{}: line {} is not valid UTF-8: {e}",
                        self.name, self.lines_read
                    )));
                }
            };
            if line.is_empty() {
                continue;
            }
            self.lines_read += 1;
            trace!(channel = %self.name, line, "read");
            return Ok(line.to_string());
        }
    }

    /// Like [`read_line`](Self::read_line), but a corrupt line is handed back
    /// as a value so the caller can keep framing the message.
    async fn read_record_line(&mut self) -> Result<Result<String, TritonError>, TritonError> {
        match self.read_line().await {
            Ok(line) => Ok(Ok(line)),
            Err(e @ TritonError::CorruptData(_)) => Ok(Err(e)),
            Err(e) => Err(e),
        }
    }

    /// Read one complete observation message.
    ///
    /// Returns `Err` only when the count line itself is unusable
    /// ([`TritonError::CorruptData`]) or the stream ends.  A count above
    /// [`MAX_RECORDS_PER_MESSAGE`](wire::MAX_RECORDS_PER_MESSAGE) is rejected
    /// after its declared lines have been drained.  Per-record problems,
    /// including undecodable bytes, are reported inside the frame.
    pub async fn read_observations(&mut self) -> Result<ObservationFrame, TritonError> {
        let count = wire::decode_count(&self.read_line().await?)?;
        if count == 0 {
            return Ok(ObservationFrame {
                records: vec![Ok(Observation::NotSeen)],
            });
        }
        if count > wire::MAX_RECORDS_PER_MESSAGE {
            for _ in 0..count.saturating_mul(2) {
                self.read_record_line().await?;
            }
            return Err(TritonError::CorruptData(format!(
                "{}: record count {count} exceeds {}",
                self.name,
                wire::MAX_RECORDS_PER_MESSAGE
            )));
        }

        let mut raw = Vec::with_capacity(count);
        for _ in 0..count {
            let index_line = self.read_record_line().await?;
            let reading_line = self.read_record_line().await?;
            raw.push((index_line, reading_line));
        }

        let records = raw
            .into_iter()
            .map(|(index_line, reading_line)| {
                wire::decode_record(&index_line?, &reading_line?)
            })
            .collect();
        Ok(ObservationFrame { records })
    }

    /// Read one fused-state line.
    pub async fn read_fused_state(&mut self) -> Result<Matrix, TritonError> {
        wire::decode_fused_state(&self.read_line().await?)
    }

    /// Read one command line.
    pub async fn read_command(&mut self) -> Result<Command, TritonError> {
        Command::new(self.read_line().await?)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Writer
// ────────────────────────────────────────────────────────────────────────────

/// Message-level writer that flushes after every message.
pub struct ChannelWriter<W> {
    name: String,
    inner: W,
    messages_written: u64,
}

impl<W> ChannelWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(name: impl Into<String>, inner: W) -> Self {
        Self {
            name: name.into(),
            inner,
            messages_written: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages_written(&self) -> u64 {
        self.messages_written
    }

    /// Write `text` verbatim (a trailing newline is added when missing) and
    /// flush.
    pub async fn write_message(&mut self, text: &str) -> Result<(), TritonError> {
        self.inner.write_all(text.as_bytes()).await?;
        if !text.ends_with('\n') {
            self.inner.write_all(b"\n").await?;
        }
        self.inner.flush().await?;
        self.messages_written += 1;
        trace!(channel = %self.name, bytes = text.len(), "wrote message");
        Ok(())
    }

    /// Publish a fused-state vector as one line.
    pub async fn publish_fused_state(&mut self, state: &Matrix) -> Result<(), TritonError> {
        let line = wire::encode_fused_state(state)?;
        self.write_message(&line).await
    }

    pub async fn send_command(&mut self, command: &Command) -> Result<(), TritonError> {
        self.write_message(command.as_str()).await
    }

    /// Send one observation message made of `observations`.
    pub async fn send_observations(
        &mut self,
        observations: &[Observation],
    ) -> Result<(), TritonError> {
        let text = wire::encode_observations(observations);
        self.write_message(&text).await
    }

    /// Flush and close the underlying stream.
    pub async fn shutdown(&mut self) -> Result<(), TritonError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Opening endpoints
// ────────────────────────────────────────────────────────────────────────────

/// Open `path` for reading.  Blocks (asynchronously) until a FIFO has a
/// writer.
pub async fn open_reader(path: &str) -> Result<ChannelReader<DynReader>, TritonError> {
    let inner: DynReader = if path == STDIO_PATH {
        Box::pin(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(path).await?;
        Box::pin(BufReader::new(file))
    };
    debug!(path, "opened reader");
    Ok(ChannelReader::new(path, inner))
}

/// Open an existing `path` for writing.  Blocks (asynchronously) until a
/// FIFO has a reader.
pub async fn open_writer(path: &str) -> Result<ChannelWriter<DynWriter>, TritonError> {
    let inner: DynWriter = if path == STDIO_PATH {
        Box::pin(tokio::io::stdout())
    } else {
        let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
        Box::pin(file)
    };
    debug!(path, "opened writer");
    Ok(ChannelWriter::new(path, inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use triton_estimation::{Assignment, Readings};
    use triton_types::{STATE_LEN, StateIndex};

    fn pair() -> (
        ChannelWriter<tokio::io::DuplexStream>,
        ChannelReader<BufReader<tokio::io::DuplexStream>>,
    ) {
        let (a, b) = tokio::io::duplex(4096);
        (
            ChannelWriter::new("test-out", a),
            ChannelReader::new("test-in", BufReader::new(b)),
        )
    }

    #[tokio::test]
    async fn observation_message_round_trip() {
        let (mut tx, mut rx) = pair();
        let obs = Observation::unambiguous(
            Assignment::BearingRange {
                x: StateIndex::PvcX,
                y: StateIndex::PvcY,
            },
            Readings::new(0.125, 0.0, 4.0),
        );
        tx.send_observations(std::slice::from_ref(&obs)).await.unwrap();

        let frame = rx.read_observations().await.unwrap();
        assert!(!frame.is_not_seen());
        let records = frame.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap(), &obs);
        assert_eq!(tx.messages_written(), 1);
    }

    #[tokio::test]
    async fn zero_count_is_not_seen() {
        let (mut tx, mut rx) = pair();
        tx.write_message("0").await.unwrap();
        assert!(rx.read_observations().await.unwrap().is_not_seen());
    }

    #[tokio::test]
    async fn malformed_record_does_not_desync_stream() {
        let (mut tx, mut rx) = pair();
        tx.write_message("2\n12 13 -9\n0 0 1\n12 13 -2\n0 0 3\n")
            .await
            .unwrap();
        tx.write_message("0").await.unwrap();

        let records = rx.read_observations().await.unwrap().into_records();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            records[0],
            Err(TritonError::UnsupportedObservationType(-9))
        ));
        assert!(records[1].is_ok());

        // Next message is still framed correctly.
        assert!(rx.read_observations().await.unwrap().is_not_seen());
    }

    #[tokio::test]
    async fn bad_count_line_is_corrupt_data() {
        let (mut tx, mut rx) = pair();
        tx.write_message("many").await.unwrap();
        tx.write_message("0").await.unwrap();
        assert!(matches!(
            rx.read_observations().await,
            Err(TritonError::CorruptData(_))
        ));
        assert!(rx.read_observations().await.unwrap().is_not_seen());
    }

    #[tokio::test]
    async fn invalid_utf8_line_only_spoils_its_record() {
        let (a, b) = tokio::io::duplex(4096);
        let mut rx = ChannelReader::new("test-in", BufReader::new(b));
        let mut raw = a;
        raw.write_all(b"2\n1 1 -3\n\xff\xfe 1 0\n1 1 -3\n10 1 0\n0\n")
            .await
            .unwrap();

        let records = rx.read_observations().await.unwrap().into_records();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], Err(TritonError::CorruptData(_))));
        assert!(records[1].is_ok());
        assert!(rx.read_observations().await.unwrap().is_not_seen());
    }

    #[tokio::test]
    async fn invalid_utf8_count_line_is_corrupt_data() {
        let (a, b) = tokio::io::duplex(4096);
        let mut rx = ChannelReader::new("test-in", BufReader::new(b));
        let mut raw = a;
        raw.write_all(b"\xc3\n0\n").await.unwrap();

        assert!(matches!(
            rx.read_observations().await,
            Err(TritonError::CorruptData(_))
        ));
        assert!(rx.read_observations().await.unwrap().is_not_seen());
    }

    #[tokio::test]
    async fn oversized_message_is_drained_then_rejected() {
        let (mut tx, mut rx) = pair();
        let count = wire::MAX_RECORDS_PER_MESSAGE + 1;
        let mut text = format!("{count}\n");
        for _ in 0..count {
            text.push_str("1 1 -3\n10 1 0\n");
        }
        let writer = tokio::spawn(async move {
            tx.write_message(&text).await.unwrap();
            tx.write_message("0").await.unwrap();
        });

        assert!(matches!(
            rx.read_observations().await,
            Err(TritonError::CorruptData(_))
        ));
        assert!(rx.read_observations().await.unwrap().is_not_seen());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn eof_mid_message_is_channel_closed() {
        let (mut tx, mut rx) = pair();
        tx.write_message("1\n12 13 -2").await.unwrap();
        drop(tx);
        assert!(matches!(
            rx.read_observations().await,
            Err(TritonError::ChannelClosed(name)) if name == "test-in"
        ));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let (mut tx, mut rx) = pair();
        tx.write_message("\n\n  hello  \n").await.unwrap();
        assert_eq!(rx.read_line().await.unwrap(), "hello");
        assert_eq!(rx.lines_read(), 1);
    }

    #[tokio::test]
    async fn fused_state_and_command_lines() {
        let (mut tx, mut rx) = pair();
        let state = Matrix::column(&[2.5; STATE_LEN]);
        tx.publish_fused_state(&state).await.unwrap();
        tx.send_command(&Command::new("surface").unwrap())
            .await
            .unwrap();

        assert_eq!(rx.read_fused_state().await.unwrap(), state);
        assert_eq!(rx.read_command().await.unwrap().as_str(), "surface");
    }

    #[tokio::test]
    async fn open_reader_on_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.txt");
        tokio::fs::write(&path, "0\n1\n1 2 -1\n3 4 0\n").await.unwrap();

        let mut rx = open_reader(path.to_str().unwrap()).await.unwrap();
        assert!(rx.read_observations().await.unwrap().is_not_seen());
        let records = rx.read_observations().await.unwrap().into_records();
        assert!(records[0].is_ok());
        assert!(matches!(
            rx.read_observations().await,
            Err(TritonError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn open_writer_requires_existing_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            open_writer(missing.to_str().unwrap()).await,
            Err(TritonError::Io(_))
        ));

        let path = dir.path().join("state.txt");
        tokio::fs::write(&path, "").await.unwrap();
        let mut tx = open_writer(path.to_str().unwrap()).await.unwrap();
        tx.send_command(&Command::new("hold").unwrap()).await.unwrap();
        tx.shutdown().await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "hold\n");
    }
}
