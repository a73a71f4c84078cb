//! Client side of the agent socket.

use std::path::PathBuf;

use osd_common::error::{OsdError, Result};
use osd_common::types::{LogChunk, Namespace, WorkloadId, WorkloadRecord};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::protocol::{self, Request, Response};

/// Handle for issuing requests to a running agent.
///
/// Every call opens a fresh connection.
#[derive(Debug, Clone)]
pub struct Client {
    socket: PathBuf,
}

impl Client {
    /// Creates a client for the agent listening on `socket`.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Lists workloads in a namespace.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::Connection`] if the agent is unreachable and
    /// [`OsdError::Remote`] if the agent reports a failure.
    pub async fn list_workloads(&self, namespace: Namespace) -> Result<Vec<WorkloadRecord>> {
        match self.call(&Request::ListWorkloads { namespace }).await? {
            Response::Workloads(workloads) => Ok(workloads),
            other => Err(unexpected("workloads", &other)),
        }
    }

    /// Sends SIGTERM to a workload's task.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::Remote`] if the agent reports a failure.
    pub async fn terminate(&self, namespace: Namespace, id: WorkloadId) -> Result<()> {
        self.call_ack(&Request::Terminate { namespace, id }).await
    }

    /// Runs the node reset workload and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::Remote`] if the agent reports a failure.
    pub async fn reset(&self) -> Result<()> {
        self.call_ack(&Request::Reset).await
    }

    /// Starts streaming a workload's stdout.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::Connection`] if the agent is unreachable. Errors
    /// opening the log are reported by the first [`LogReader::next_chunk`].
    pub async fn stream_log(&self, namespace: Namespace, id: WorkloadId) -> Result<LogReader> {
        let (reader, mut writer) = self.connect().await?;
        protocol::write_request(&mut writer, &Request::StreamLog { namespace, id }).await?;
        Ok(LogReader {
            reader,
            _writer: writer,
            done: false,
        })
    }

    async fn call_ack(&self, request: &Request) -> Result<()> {
        match self.call(request).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected("ack", &other)),
        }
    }

    async fn call(&self, request: &Request) -> Result<Response> {
        let (mut reader, mut writer) = self.connect().await?;
        protocol::write_request(&mut writer, request).await?;
        match protocol::read_response(&mut reader).await? {
            Response::Error(err) => Err(err.into()),
            response => Ok(response),
        }
    }

    async fn connect(&self) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|e| OsdError::Connection {
                endpoint: self.socket.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(stream.into_split())
    }
}

/// An open log stream.
///
/// Dropping the reader closes the connection, which cancels the stream on
/// the agent side.
#[derive(Debug)]
pub struct LogReader {
    reader: OwnedReadHalf,
    // Held open: closing the write half would read as a disconnect.
    _writer: OwnedWriteHalf,
    done: bool,
}

impl LogReader {
    /// Waits for the next chunk; `None` once the stream has ended.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::Remote`] if the agent ended the stream with an
    /// error, or a protocol error if the connection broke mid-stream.
    pub async fn next_chunk(&mut self) -> Result<Option<LogChunk>> {
        if self.done {
            return Ok(None);
        }
        let response = protocol::read_response(&mut self.reader).await;
        match response {
            Ok(Response::Chunk(chunk)) => Ok(Some(chunk)),
            Ok(Response::EndOfStream) => {
                self.done = true;
                Ok(None)
            }
            Ok(Response::Error(err)) => {
                self.done = true;
                Err(err.into())
            }
            Ok(other) => {
                self.done = true;
                Err(unexpected("log chunk", &other))
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }
}

fn unexpected(expected: &str, got: &Response) -> OsdError {
    OsdError::Protocol {
        message: format!("expected {expected} reply, got {got:?}"),
    }
}
