//! Async entry point tying the agent components to a runtime and runner.

use std::sync::Arc;

use osd_common::config::OsdConfig;
use osd_common::error::{OsdError, Result};
use osd_common::types::{LogChunk, Namespace, WorkloadId, WorkloadRecord};
use osd_runtime::client::RuntimeConnector;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::logs::{LogStream, StreamSummary};
use crate::oneshot::WorkloadRunner;
use crate::{enumerate, lifecycle};

/// The node agent.
///
/// Holds no per-call state: every operation opens its own runtime
/// connection on the blocking pool and releases it before returning.
#[derive(Clone)]
pub struct Agent {
    connector: Arc<dyn RuntimeConnector>,
    runner: Arc<dyn WorkloadRunner>,
    config: Arc<OsdConfig>,
}

impl Agent {
    /// Creates an agent over the given runtime connector and one-shot runner.
    pub fn new(
        connector: Arc<dyn RuntimeConnector>,
        runner: Arc<dyn WorkloadRunner>,
        config: OsdConfig,
    ) -> Self {
        Self {
            connector,
            runner,
            config: Arc::new(config),
        }
    }

    /// Lists workloads in a namespace with live usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime is unreachable or the listing fails.
    pub async fn list_workloads(&self, namespace: Namespace) -> Result<Vec<WorkloadRecord>> {
        let connector = Arc::clone(&self.connector);
        blocking(move || enumerate::list_workloads(connector.as_ref(), &namespace)).await
    }

    /// Sends SIGTERM to a workload's task.
    ///
    /// # Errors
    ///
    /// Returns the runtime's error if the signal is not accepted.
    pub async fn terminate(&self, namespace: Namespace, id: WorkloadId) -> Result<()> {
        let connector = Arc::clone(&self.connector);
        blocking(move || lifecycle::terminate(connector.as_ref(), &namespace, &id)).await
    }

    /// Runs the reset workload to completion.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::Execution`] if the workload fails.
    pub async fn reset(&self) -> Result<()> {
        let runner = Arc::clone(&self.runner);
        let config = Arc::clone(&self.config);
        blocking(move || lifecycle::reset(runner.as_ref(), &config.reset)).await
    }

    /// Opens a workload's log and starts streaming it.
    ///
    /// The log file is opened before this returns, so an open failure is
    /// reported here and no chunk is ever produced for it. Chunks are then
    /// read on the blocking pool as the returned handle is drained.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::NoLogSource`] or [`OsdError::Io`] if the log cannot
    /// be opened.
    pub async fn stream_log(
        &self,
        namespace: Namespace,
        id: WorkloadId,
        cancel: CancellationToken,
    ) -> Result<LogStreamHandle> {
        let connector = Arc::clone(&self.connector);
        let chunk_size = self.config.log_chunk_size;
        let stream = {
            let cancel = cancel.clone();
            blocking(move || LogStream::open(connector.as_ref(), &namespace, &id, chunk_size, cancel))
                .await?
        };

        let (mut tx, rx) = mpsc::channel::<LogChunk>(self.config.stream_buffer);
        let task = tokio::task::spawn_blocking(move || stream.pump(&mut tx));
        Ok(LogStreamHandle {
            chunks: rx,
            task,
            cancel,
        })
    }
}

/// Receiving end of an in-progress log stream.
#[derive(Debug)]
pub struct LogStreamHandle {
    chunks: mpsc::Receiver<LogChunk>,
    task: JoinHandle<Result<StreamSummary>>,
    cancel: CancellationToken,
}

impl LogStreamHandle {
    /// Waits for the next chunk; `None` once the reader has stopped.
    pub async fn next_chunk(&mut self) -> Option<LogChunk> {
        self.chunks.recv().await
    }

    /// Stops the reader before its next read.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the reader to stop and returns how the stream ended.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the stream early, if any.
    pub async fn finish(self) -> Result<StreamSummary> {
        let Self {
            chunks,
            task,
            cancel: _,
        } = self;
        drop(chunks);
        join(task).await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    join(tokio::task::spawn_blocking(f)).await
}

async fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle.await.map_err(|e| OsdError::Runtime {
        call: "join",
        message: e.to_string(),
    })?
}
