//! Runtime client abstraction and the scoped per-call connection.
//!
//! Every agent call opens its own connection through a [`RuntimeConnector`]
//! and holds it as a [`ScopedClient`]. The guard closes the connection when
//! it goes out of scope, so early returns and panics release it too.

use std::ops::Deref;
use std::path::PathBuf;

use nix::sys::signal::Signal;
use osd_common::error::Result;
use osd_common::types::{Namespace, TaskStatus, WorkloadId};

use crate::metrics::MetricsPayload;

/// A workload as listed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// Workload identifier.
    pub id: WorkloadId,
}

/// The live task attached to a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Workload the task belongs to.
    pub id: WorkloadId,
    /// Host PID of the task's init process, if it has one.
    pub pid: Option<u32>,
}

/// Namespace-scoped operations on the container runtime.
///
/// Every method is a single blocking runtime call. Implementors are bound
/// to the namespace they were opened for.
pub trait RuntimeClient: Send {
    /// Namespace this client is scoped to.
    fn namespace(&self) -> &Namespace;

    /// Lists workloads in runtime enumeration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing call fails.
    fn workloads(&self) -> Result<Vec<Workload>>;

    /// Returns the task attached to a workload.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::NotFound`](osd_common::error::OsdError::NotFound)
    /// if the workload has no task.
    fn task(&self, workload: &Workload) -> Result<Task>;

    /// Returns the name of the image a workload was created from.
    ///
    /// # Errors
    ///
    /// Returns an error if the image descriptor cannot be fetched.
    fn image_name(&self, workload: &Workload) -> Result<String>;

    /// Returns the current status of a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the status call fails.
    fn task_status(&self, task: &Task) -> Result<TaskStatus>;

    /// Returns the raw metrics attachment of a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics call fails.
    fn task_metrics(&self, task: &Task) -> Result<MetricsPayload>;

    /// Delivers a signal to the task of the given workload.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::NotFound`](osd_common::error::OsdError::NotFound)
    /// if the workload or its task does not exist.
    fn kill(&self, id: &WorkloadId, signal: Signal) -> Result<()>;

    /// Returns the recorded stdout path of a workload's task.
    ///
    /// `Ok(None)` means the task exists but records no output file.
    ///
    /// # Errors
    ///
    /// Returns an error if the task lookup fails.
    fn task_stdout(&self, id: &WorkloadId) -> Result<Option<PathBuf>>;

    /// Releases the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection could not be shut down cleanly.
    fn close(&mut self) -> Result<()>;
}

/// Opens namespace-scoped connections to the container runtime.
pub trait RuntimeConnector: Send + Sync {
    /// Establishes a raw connection for the given namespace.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::Connection`](osd_common::error::OsdError::Connection)
    /// if the runtime cannot be reached.
    fn open(&self, namespace: &Namespace) -> Result<Box<dyn RuntimeClient>>;

    /// Establishes a connection that is closed when the guard is dropped.
    ///
    /// # Errors
    ///
    /// Propagates the failure of [`RuntimeConnector::open`] unchanged.
    fn connect(&self, namespace: &Namespace) -> Result<ScopedClient> {
        let client = self.open(namespace)?;
        tracing::debug!(namespace = %namespace, "runtime connection opened");
        Ok(ScopedClient::new(client))
    }
}

/// A runtime connection that lives exactly as long as one call.
pub struct ScopedClient {
    inner: Box<dyn RuntimeClient>,
}

impl ScopedClient {
    /// Wraps an open client.
    #[must_use]
    pub fn new(inner: Box<dyn RuntimeClient>) -> Self {
        Self { inner }
    }
}

impl Deref for ScopedClient {
    type Target = dyn RuntimeClient;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl Drop for ScopedClient {
    fn drop(&mut self) {
        let namespace = self.inner.namespace().clone();
        match self.inner.close() {
            Ok(()) => tracing::debug!(namespace = %namespace, "runtime connection closed"),
            Err(e) => tracing::warn!(namespace = %namespace, error = %e, "runtime connection close failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use osd_common::error::OsdError;

    use super::*;

    struct CountingClient {
        namespace: Namespace,
        closed: Arc<AtomicUsize>,
    }

    impl RuntimeClient for CountingClient {
        fn namespace(&self) -> &Namespace {
            &self.namespace
        }
        fn workloads(&self) -> Result<Vec<Workload>> {
            Err(OsdError::Runtime {
                call: "list",
                message: "boom".into(),
            })
        }
        fn task(&self, workload: &Workload) -> Result<Task> {
            Ok(Task {
                id: workload.id.clone(),
                pid: None,
            })
        }
        fn image_name(&self, _workload: &Workload) -> Result<String> {
            Ok(String::new())
        }
        fn task_status(&self, _task: &Task) -> Result<TaskStatus> {
            Ok(TaskStatus::Unknown)
        }
        fn task_metrics(&self, _task: &Task) -> Result<MetricsPayload> {
            Ok(MetricsPayload::new("", serde_json::Value::Null))
        }
        fn kill(&self, _id: &WorkloadId, _signal: Signal) -> Result<()> {
            Ok(())
        }
        fn task_stdout(&self, _id: &WorkloadId) -> Result<Option<PathBuf>> {
            Ok(None)
        }
        fn close(&mut self) -> Result<()> {
            let _ = self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingConnector {
        closed: Arc<AtomicUsize>,
    }

    impl RuntimeConnector for CountingConnector {
        fn open(&self, namespace: &Namespace) -> Result<Box<dyn RuntimeClient>> {
            Ok(Box::new(CountingClient {
                namespace: namespace.clone(),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn list_through(connector: &dyn RuntimeConnector) -> Result<Vec<Workload>> {
        let client = connector.connect(&Namespace::new("system"))?;
        let workloads = client.workloads()?;
        Ok(workloads)
    }

    #[test]
    fn guard_closes_on_drop() {
        let closed = Arc::new(AtomicUsize::new(0));
        let connector = CountingConnector {
            closed: Arc::clone(&closed),
        };
        {
            let client = connector.connect(&Namespace::new("system")).expect("connect");
            assert_eq!(client.namespace().as_str(), "system");
        }
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_closes_on_early_error_return() {
        let closed = Arc::new(AtomicUsize::new(0));
        let connector = CountingConnector {
            closed: Arc::clone(&closed),
        };
        assert!(list_through(&connector).is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
