//! Runtime adapter backed by an exported state index on disk.
//!
//! The runtime publishes one JSON record per workload under
//! `<root>/<namespace>/<id>.json`. A connection takes a shared advisory
//! lock on `<root>/.lock` so the runtime can block readers while it
//! rewrites the index; the lock is released when the connection closes.
//!
//! Namespaces and workload ids must each name a single entry under the
//! root. Anything else (absolute paths, separators, `..`) resolves to
//! nothing: an empty listing or `NotFound`.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use osd_common::constants::RUNTIME_LOCK_FILE;
use osd_common::error::{OsdError, Result};
use osd_common::types::{Namespace, TaskStatus, WorkloadId};
use serde::{Deserialize, Serialize};

use crate::client::{RuntimeClient, RuntimeConnector, Task, Workload};
use crate::metrics::MetricsPayload;

/// Persisted record of one workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadEntry {
    /// Workload identifier.
    pub id: WorkloadId,
    /// Image reference the workload was created from.
    #[serde(default)]
    pub image: Option<String>,
    /// Live task, absent once the task has been deleted.
    #[serde(default)]
    pub task: Option<TaskEntry>,
}

/// Persisted record of a workload's task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    /// Host PID of the init process.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Status last recorded by the runtime.
    pub status: TaskStatus,
    /// File the task's stdout is captured to.
    #[serde(default)]
    pub stdout: Option<PathBuf>,
    /// Most recent metrics attachment.
    #[serde(default)]
    pub metrics: Option<MetricsPayload>,
}

/// Connects to a runtime through its state index directory.
#[derive(Debug, Clone)]
pub struct LocalRuntime {
    root: PathBuf,
}

impl LocalRuntime {
    /// Creates a connector for the index rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn connection_error(&self, message: impl Into<String>) -> OsdError {
        OsdError::Connection {
            endpoint: self.root.display().to_string(),
            message: message.into(),
        }
    }
}

impl RuntimeConnector for LocalRuntime {
    fn open(&self, namespace: &Namespace) -> Result<Box<dyn RuntimeClient>> {
        if !self.root.is_dir() {
            return Err(self.connection_error("runtime root is not a directory"));
        }
        let lock_path = self.root.join(RUNTIME_LOCK_FILE);
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| self.connection_error(format!("open {}: {e}", lock_path.display())))?;
        let lock = Flock::lock(file, FlockArg::LockSharedNonblock)
            .map_err(|(_, errno)| self.connection_error(format!("runtime index is locked: {errno}")))?;

        Ok(Box::new(LocalClient {
            namespace: namespace.clone(),
            dir: is_plain_component(namespace.as_str()).then(|| self.root.join(namespace.as_str())),
            lock: Some(lock),
        }))
    }
}

/// A connection to the local runtime scoped to one namespace.
pub struct LocalClient {
    namespace: Namespace,
    dir: Option<PathBuf>,
    lock: Option<Flock<File>>,
}

impl LocalClient {
    fn entry_path(&self, id: &WorkloadId) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        is_plain_component(id.as_str()).then(|| dir.join(format!("{id}.json")))
    }

    fn load(&self, id: &WorkloadId) -> Result<WorkloadEntry> {
        let not_found = || OsdError::NotFound {
            kind: "workload",
            id: id.to_string(),
        };
        let path = self.entry_path(id).ok_or_else(not_found)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(OsdError::io(path, e)),
        };
        Ok(serde_json::from_str(&content)?)
    }

    fn load_task(&self, id: &WorkloadId) -> Result<TaskEntry> {
        self.load(id)?.task.ok_or_else(|| OsdError::NotFound {
            kind: "task",
            id: id.to_string(),
        })
    }
}

/// Returns whether `name` is exactly one normal path component.
fn is_plain_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    !name.contains('/')
        && matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        )
}

/// Maps a recorded PID to a single target process.
///
/// Zero and values beyond `i32::MAX` would address a process group or
/// every process in `kill(2)`, so they name no process at all.
fn single_process(pid: u32) -> Option<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
}

/// Returns whether a process with the given PID still exists.
fn process_alive(pid: u32) -> bool {
    single_process(pid).is_some_and(|pid| !matches!(kill(pid, None), Err(Errno::ESRCH)))
}

impl RuntimeClient for LocalClient {
    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn workloads(&self) -> Result<Vec<Workload>> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };
        let read_dir = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OsdError::io(dir, e)),
        };

        let mut ids = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| OsdError::io(dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|id| Workload {
                id: WorkloadId::new(id),
            })
            .collect())
    }

    fn task(&self, workload: &Workload) -> Result<Task> {
        let task = self.load_task(&workload.id)?;
        Ok(Task {
            id: workload.id.clone(),
            pid: task.pid,
        })
    }

    fn image_name(&self, workload: &Workload) -> Result<String> {
        self.load(&workload.id)?
            .image
            .filter(|name| !name.is_empty())
            .ok_or_else(|| OsdError::NotFound {
                kind: "image",
                id: workload.id.to_string(),
            })
    }

    fn task_status(&self, task: &Task) -> Result<TaskStatus> {
        let entry = self.load_task(&task.id)?;
        match (entry.status, entry.pid) {
            (TaskStatus::Running, Some(pid)) if !process_alive(pid) => Ok(TaskStatus::Stopped),
            (status, _) => Ok(status),
        }
    }

    fn task_metrics(&self, task: &Task) -> Result<MetricsPayload> {
        self.load_task(&task.id)?
            .metrics
            .ok_or_else(|| OsdError::NotFound {
                kind: "metrics",
                id: task.id.to_string(),
            })
    }

    fn kill(&self, id: &WorkloadId, signal: Signal) -> Result<()> {
        let task = self.load_task(id)?;
        let pid = task.pid.ok_or_else(|| OsdError::Runtime {
            call: "kill",
            message: format!("task {id} has no process"),
        })?;
        let target = single_process(pid).ok_or_else(|| OsdError::Runtime {
            call: "kill",
            message: format!("task {id} records pid {pid}, which names no single process"),
        })?;
        match kill(target, signal) {
            Ok(()) => {
                tracing::info!(namespace = %self.namespace, id = %id, pid, signal = ?signal, "signal delivered");
                Ok(())
            }
            Err(Errno::ESRCH) => Err(OsdError::NotFound {
                kind: "process",
                id: pid.to_string(),
            }),
            Err(Errno::EPERM) => Err(OsdError::PermissionDenied {
                message: format!("cannot signal pid {pid}"),
            }),
            Err(e) => Err(OsdError::Runtime {
                call: "kill",
                message: e.to_string(),
            }),
        }
    }

    fn task_stdout(&self, id: &WorkloadId) -> Result<Option<PathBuf>> {
        Ok(self.load_task(id)?.stdout)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(lock) = self.lock.take() {
            let _file = lock.unlock().map_err(|(_, errno)| OsdError::Runtime {
                call: "close",
                message: format!("unlock runtime index: {errno}"),
            })?;
        }
        Ok(())
    }
}
