//! Unix socket server dispatching requests to an [`Agent`].

use std::path::{Path, PathBuf};

use osd_agent::Agent;
use osd_common::error::{OsdError, Result};
use osd_common::types::{Namespace, WorkloadId};
use tokio::io::AsyncReadExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::protocol::{self, Request, Response};

/// A bound agent socket.
pub struct Server {
    agent: Agent,
    listener: UnixListener,
    path: PathBuf,
}

impl Server {
    /// Binds the socket, replacing a stale socket file left by a previous run.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::Io`] if the parent directory cannot be created or
    /// the socket cannot be bound.
    pub fn bind(path: impl Into<PathBuf>, agent: Agent) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| OsdError::io(parent, e))?;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(OsdError::io(&path, e)),
        }
        let listener = UnixListener::bind(&path).map_err(|e| OsdError::io(&path, e))?;
        tracing::info!(path = %path.display(), "agent socket listening");
        Ok(Self {
            agent,
            listener,
            path,
        })
    }

    /// Returns the socket path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections until `shutdown` fires, then removes the socket.
    ///
    /// Each connection is served on its own task. In-flight log streams are
    /// cancelled when `shutdown` fires; this returns only after every
    /// connection task has written its final reply.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::Io`] if the socket file cannot be removed.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let connections = TaskTracker::new();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let agent = self.agent.clone();
                        let cancel = shutdown.child_token();
                        let _handle = connections.spawn(async move {
                            if let Err(e) = handle_connection(&agent, stream, cancel).await {
                                tracing::warn!(error = %e, "connection failed");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
            }
        }

        drop(self.listener);
        let _ = connections.close();
        tracing::info!(
            path = %self.path.display(),
            in_flight = connections.len(),
            "agent socket closing, draining connections"
        );
        connections.wait().await;

        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OsdError::io(&self.path, e)),
        }
    }
}

async fn handle_connection(agent: &Agent, stream: UnixStream, cancel: CancellationToken) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let request = tokio::select! {
        () = cancel.cancelled() => return Ok(()),
        request = protocol::read_request(&mut reader) => request,
    };
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            let rejected = OsdError::Protocol {
                message: format!("malformed request: {e}"),
            };
            // The peer may have closed without sending anything.
            let _ = reply(&mut writer, Err(rejected)).await;
            return Err(e);
        }
    };
    tracing::debug!(method = request.method(), "request received");

    let response = match request {
        Request::ListWorkloads { namespace } => agent.list_workloads(namespace).await.map(Response::Workloads),
        Request::Terminate { namespace, id } => agent.terminate(namespace, id).await.map(|()| Response::Ack),
        Request::Reset => agent.reset().await.map(|()| Response::Ack),
        Request::StreamLog { namespace, id } => {
            return stream_log(agent, namespace, id, reader, writer, cancel).await;
        }
    };
    reply(&mut writer, response).await
}

async fn reply(writer: &mut OwnedWriteHalf, response: Result<Response>) -> Result<()> {
    let response = response.unwrap_or_else(|e| {
        tracing::warn!(error = %e, code = e.code().as_i32(), "request failed");
        Response::error(&e)
    });
    protocol::write_response(writer, &response).await
}

async fn stream_log(
    agent: &Agent,
    namespace: Namespace,
    id: WorkloadId,
    reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    cancel: CancellationToken,
) -> Result<()> {
    let watcher = tokio::spawn(watch_disconnect(reader, cancel.clone()));

    let mut handle = match agent.stream_log(namespace, id.clone(), cancel).await {
        Ok(handle) => handle,
        Err(e) => {
            watcher.abort();
            return reply(&mut writer, Err(e)).await;
        }
    };

    let mut delivery = Ok(());
    while let Some(chunk) = handle.next_chunk().await {
        if let Err(e) = protocol::write_response(&mut writer, &Response::Chunk(chunk)).await {
            handle.cancel();
            delivery = Err(e);
            break;
        }
    }
    let outcome = handle.finish().await;
    watcher.abort();

    if let Err(e) = delivery {
        tracing::debug!(id = %id, error = %e, "log client went away");
        return Ok(());
    }
    match outcome {
        Ok(summary) => {
            tracing::debug!(
                id = %id,
                chunks = summary.chunks,
                bytes = summary.bytes,
                cancelled = summary.cancelled,
                "log stream ended"
            );
            if summary.cancelled {
                // The peer may already be gone.
                let _ = protocol::write_response(&mut writer, &Response::EndOfStream).await;
                return Ok(());
            }
            protocol::write_response(&mut writer, &Response::EndOfStream).await
        }
        Err(e) => reply(&mut writer, Err(e)).await,
    }
}

/// Cancels the stream once the client closes its end or sends anything else.
async fn watch_disconnect(mut reader: OwnedReadHalf, cancel: CancellationToken) {
    let mut buf = [0u8; 1];
    let _ = reader.read(&mut buf).await;
    cancel.cancel();
}
