//! Chunked streaming of a workload's captured stdout.
//!
//! A [`LogStream`] owns the open log file and a [`ChunkReader`] over it.
//! [`LogStream::pump`] reads one chunk, hands it to a [`ChunkSink`], and
//! only then reads the next, so a slow consumer throttles the reader. The
//! cancellation token is checked before every read; once it fires no
//! further chunks are produced and the file is closed.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use osd_common::error::{OsdError, Result};
use osd_common::types::{LogChunk, Namespace, WorkloadId};
use osd_runtime::client::RuntimeConnector;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Destination for log chunks.
pub trait ChunkSink {
    /// Delivers one chunk, blocking until the consumer accepts it.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer has gone away.
    fn send(&mut self, chunk: LogChunk) -> Result<()>;
}

impl ChunkSink for mpsc::Sender<LogChunk> {
    fn send(&mut self, chunk: LogChunk) -> Result<()> {
        self.blocking_send(chunk).map_err(|_| OsdError::Protocol {
            message: "log stream receiver closed".into(),
        })
    }
}

impl ChunkSink for Vec<LogChunk> {
    fn send(&mut self, chunk: LogChunk) -> Result<()> {
        self.push(chunk);
        Ok(())
    }
}

/// Iterator over fixed-size chunks of a reader that stops on cancellation.
///
/// Every chunk except the last is exactly `chunk_size` bytes.
#[derive(Debug)]
pub struct ChunkReader<R> {
    source: R,
    chunk_size: usize,
    cancel: CancellationToken,
    exhausted: bool,
}

impl<R: Read> ChunkReader<R> {
    /// Creates a reader yielding chunks of `chunk_size` bytes.
    ///
    /// Returns `None` if `chunk_size` is zero.
    pub fn new(source: R, chunk_size: usize, cancel: CancellationToken) -> Option<Self> {
        (chunk_size > 0).then_some(Self {
            source,
            chunk_size,
            cancel,
            exhausted: false,
        })
    }

    /// Returns whether iteration stopped because of cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = io::Result<LogChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted || self.cancel.is_cancelled() {
            return None;
        }
        let mut buf = vec![0u8; self.chunk_size];
        match fill(&mut self.source, &mut buf) {
            Ok(0) => {
                self.exhausted = true;
                None
            }
            Ok(n) => {
                if n < self.chunk_size {
                    self.exhausted = true;
                }
                buf.truncate(n);
                Some(Ok(LogChunk::new(buf)))
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

/// Reads until `buf` is full or the source hits EOF.
fn fill<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Totals reported once a stream ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Number of chunks delivered.
    pub chunks: usize,
    /// Number of bytes delivered.
    pub bytes: usize,
    /// Whether the stream ended because the caller cancelled.
    pub cancelled: bool,
}

/// An open log file ready to be streamed.
#[derive(Debug)]
pub struct LogStream<R = File> {
    path: PathBuf,
    chunks: ChunkReader<R>,
}

impl LogStream<File> {
    /// Resolves the stdout file of a workload's task and opens it.
    ///
    /// The runtime connection is released before this returns; only the
    /// file handle is held by the stream.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::NoLogSource`] if the task records no stdout file
    /// or no reader can be built, and [`OsdError::Io`] if the file cannot be
    /// opened.
    pub fn open(
        connector: &dyn RuntimeConnector,
        namespace: &Namespace,
        id: &WorkloadId,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let stdout = {
            let client = connector.connect(namespace)?;
            client.task_stdout(id)?
        };
        let path = stdout
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| OsdError::NoLogSource { id: id.to_string() })?;

        let file = File::open(&path).map_err(|e| OsdError::io(&path, e))?;
        tracing::debug!(namespace = %namespace, id = %id, path = %path.display(), "log file opened");
        Self::from_reader(path, file, chunk_size, cancel)
            .ok_or_else(|| OsdError::NoLogSource { id: id.to_string() })
    }
}

impl<R: Read> LogStream<R> {
    /// Wraps an already open reader.
    ///
    /// Returns `None` if `chunk_size` is zero.
    pub fn from_reader(
        path: impl Into<PathBuf>,
        reader: R,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> Option<Self> {
        ChunkReader::new(reader, chunk_size, cancel).map(|chunks| Self {
            path: path.into(),
            chunks,
        })
    }

    /// Streams chunks into `sink` until EOF, cancellation, or an error.
    ///
    /// Consumes the stream, so the underlying reader is closed when this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::Io`] on a read failure or the sink's error if
    /// delivery fails.
    pub fn pump(mut self, sink: &mut dyn ChunkSink) -> Result<StreamSummary> {
        let mut summary = StreamSummary::default();
        for chunk in self.chunks.by_ref() {
            let chunk = chunk.map_err(|e| OsdError::io(&self.path, e))?;
            summary.bytes += chunk.len();
            summary.chunks += 1;
            sink.send(chunk)?;
        }
        summary.cancelled = self.chunks.is_cancelled();
        tracing::debug!(
            path = %self.path.display(),
            chunks = summary.chunks,
            bytes = summary.bytes,
            cancelled = summary.cancelled,
            "log stream finished"
        );
        Ok(summary)
    }
}
