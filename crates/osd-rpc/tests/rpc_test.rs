//! End-to-end tests: client, socket server, agent, and the local runtime
//! index, all inside a temporary directory.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use osd_agent::Agent;
use osd_agent::oneshot::{OneShotSpec, RunOutcome, WorkloadRunner};
use osd_common::config::OsdConfig;
use osd_common::error::{ErrorCode, OsdError, Result};
use osd_common::types::{Namespace, TaskStatus, WorkloadId};
use osd_rpc::protocol::{self, FrameKind, Response};
use osd_rpc::{Client, LogReader, Server};
use osd_runtime::local::{LocalRuntime, TaskEntry, WorkloadEntry};
use osd_runtime::metrics::{CGROUPS_V1_TYPE_URL, MetricsPayload};
use serde_json::json;
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const NS: &str = "k8s.io";
const BIG_LOG: usize = 1024 * 1024;

struct FixedRunner(i32);

impl WorkloadRunner for FixedRunner {
    fn run(&self, _spec: &OneShotSpec) -> Result<RunOutcome> {
        Ok(RunOutcome { exit_code: self.0 })
    }
}

struct Harness {
    dir: TempDir,
    socket: PathBuf,
    shutdown: CancellationToken,
    server: JoinHandle<Result<()>>,
}

/// Temporary runtime root plus an agent over it; the socket is not bound yet.
fn fixture(chunk_size: usize, reset_exit: i32) -> (TempDir, PathBuf, Agent) {
    let dir = tempfile::tempdir().unwrap();
    let runtime_root = dir.path().join("runtime");
    std::fs::create_dir_all(&runtime_root).unwrap();
    let socket = dir.path().join("run").join("osd.sock");

    let config = OsdConfig {
        socket_path: socket.clone(),
        runtime_root: runtime_root.clone(),
        log_chunk_size: chunk_size,
        stream_buffer: 1,
        ..OsdConfig::default()
    };
    let agent = Agent::new(
        Arc::new(LocalRuntime::new(runtime_root)),
        Arc::new(FixedRunner(reset_exit)),
        config,
    );
    (dir, socket, agent)
}

fn add_entry(dir: &Path, entry: &WorkloadEntry) {
    let ns_dir = dir.join("runtime").join(NS);
    std::fs::create_dir_all(&ns_dir).unwrap();
    std::fs::write(
        ns_dir.join(format!("{}.json", entry.id)),
        serde_json::to_vec(entry).unwrap(),
    )
    .unwrap();
}

fn write_log(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

impl Harness {
    fn start(chunk_size: usize, reset_exit: i32) -> Self {
        let (dir, socket, agent) = fixture(chunk_size, reset_exit);
        let server = Server::bind(&socket, agent).unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(server.serve(shutdown.clone()));
        Self {
            dir,
            socket,
            shutdown,
            server,
        }
    }

    fn client(&self) -> Client {
        Client::new(&self.socket)
    }

    fn runtime_root(&self) -> PathBuf {
        self.dir.path().join("runtime")
    }

    fn add(&self, entry: &WorkloadEntry) {
        add_entry(self.dir.path(), entry);
    }

    fn log_file(&self, name: &str, content: &[u8]) -> PathBuf {
        write_log(self.dir.path(), name, content)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.server.await.unwrap().unwrap();
        assert!(!self.socket.exists(), "socket should be removed on shutdown");
    }
}

fn entry(id: &str, status: TaskStatus, stdout: Option<PathBuf>) -> WorkloadEntry {
    WorkloadEntry {
        id: WorkloadId::new(id),
        image: Some(format!("registry.k8s.io/{id}:v1")),
        task: Some(TaskEntry {
            pid: Some(std::process::id()),
            status,
            stdout,
            metrics: Some(MetricsPayload::new(
                CGROUPS_V1_TYPE_URL,
                json!({ "cpu": { "usage": { "total": 42 } }, "memory": { "usage": { "usage": 2048 } } }),
            )),
        }),
    }
}

fn remote_code(err: &OsdError) -> ErrorCode {
    assert!(matches!(err, OsdError::Remote { .. }), "unexpected error: {err}");
    err.code()
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + u8::try_from(i % 26).unwrap()).collect()
}

#[tokio::test]
async fn lists_workloads_with_usage() {
    let h = Harness::start(1024, 0);
    h.add(&entry("etcd", TaskStatus::Running, None));
    h.add(&entry("kube-apiserver", TaskStatus::Stopped, None));

    let records = h.client().list_workloads(Namespace::new(NS)).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id.as_str(), "etcd");
    assert_eq!(records[0].status, "running");
    assert_eq!(records[0].cpu_usage_total, 42);
    assert_eq!(records[0].memory_usage_bytes, 2048);
    assert_eq!(records[1].status, "stopped");
    assert_eq!(records[1].cpu_usage_total, 0);
    h.stop().await;
}

#[tokio::test]
async fn empty_namespace_lists_nothing() {
    let h = Harness::start(1024, 0);
    let records = h.client().list_workloads(Namespace::new("default")).await.unwrap();
    assert!(records.is_empty());
    h.stop().await;
}

#[tokio::test]
async fn unreachable_runtime_is_reported_as_unavailable() {
    let h = Harness::start(1024, 0);
    std::fs::remove_dir_all(h.runtime_root()).unwrap();

    let err = h.client().list_workloads(Namespace::new(NS)).await.unwrap_err();
    assert_eq!(remote_code(&err), ErrorCode::Unavailable);
    h.stop().await;
}

#[tokio::test]
async fn terminating_unknown_workload_is_not_found() {
    let h = Harness::start(1024, 0);
    let err = h
        .client()
        .terminate(Namespace::new(NS), WorkloadId::new("ghost"))
        .await
        .unwrap_err();
    assert_eq!(remote_code(&err), ErrorCode::NotFound);
    h.stop().await;
}

#[tokio::test]
async fn reset_acknowledges_clean_exit() {
    let h = Harness::start(1024, 0);
    h.client().reset().await.unwrap();
    h.stop().await;
}

#[tokio::test]
async fn reset_failure_carries_execution_code() {
    let h = Harness::start(1024, 3);
    let err = h.client().reset().await.unwrap_err();
    assert_eq!(remote_code(&err), ErrorCode::Execution);
    assert!(err.to_string().contains("exited with code 3"));
    h.stop().await;
}

#[tokio::test]
async fn log_stream_reproduces_file() {
    let h = Harness::start(4, 0);
    let data = content(10);
    let log = h.log_file("etcd.log", &data);
    h.add(&entry("etcd", TaskStatus::Running, Some(log)));

    let mut reader = h
        .client()
        .stream_log(Namespace::new(NS), WorkloadId::new("etcd"))
        .await
        .unwrap();
    let mut chunks = Vec::new();
    while let Some(chunk) = reader.next_chunk().await.unwrap() {
        chunks.push(chunk);
    }

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[2].len(), 2);
    let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.bytes).collect();
    assert_eq!(joined, data);
    assert!(reader.next_chunk().await.unwrap().is_none());
    h.stop().await;
}

#[tokio::test]
async fn empty_log_ends_without_chunks() {
    let h = Harness::start(4, 0);
    let log = h.log_file("empty.log", b"");
    h.add(&entry("etcd", TaskStatus::Running, Some(log)));

    let mut reader = h
        .client()
        .stream_log(Namespace::new(NS), WorkloadId::new("etcd"))
        .await
        .unwrap();
    assert!(reader.next_chunk().await.unwrap().is_none());
    h.stop().await;
}

#[tokio::test]
async fn log_stream_without_source_is_not_found() {
    let h = Harness::start(4, 0);
    h.add(&entry("etcd", TaskStatus::Running, None));

    let mut reader = h
        .client()
        .stream_log(Namespace::new(NS), WorkloadId::new("etcd"))
        .await
        .unwrap();
    let err = reader.next_chunk().await.unwrap_err();
    assert_eq!(remote_code(&err), ErrorCode::NotFound);
    assert!(err.to_string().contains("no log reader found for etcd"));
    h.stop().await;
}

#[tokio::test]
async fn dropping_the_reader_leaves_server_serving() {
    let h = Harness::start(4, 0);
    let log = h.log_file("big.log", &content(64 * 1024));
    h.add(&entry("etcd", TaskStatus::Running, Some(log)));

    let mut reader = h
        .client()
        .stream_log(Namespace::new(NS), WorkloadId::new("etcd"))
        .await
        .unwrap();
    assert!(reader.next_chunk().await.unwrap().is_some());
    drop(reader);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let records = h.client().list_workloads(Namespace::new(NS)).await.unwrap();
    assert_eq!(records.len(), 1);
    h.stop().await;
}

/// Drains a stream, returning how many chunks arrived and how it ended.
async fn drain(reader: &mut LogReader) -> (usize, Result<()>) {
    let mut received = 0usize;
    loop {
        match reader.next_chunk().await {
            Ok(Some(_)) => received += 1,
            Ok(None) => return (received, Ok(())),
            Err(e) => return (received, Err(e)),
        }
    }
}

#[tokio::test]
async fn shutdown_ends_in_flight_stream() {
    let h = Harness::start(4, 0);
    // Far more frames than the socket buffers can hold.
    let log = h.log_file("big.log", &content(BIG_LOG));
    h.add(&entry("etcd", TaskStatus::Running, Some(log)));

    let mut reader = h
        .client()
        .stream_log(Namespace::new(NS), WorkloadId::new("etcd"))
        .await
        .unwrap();
    assert!(reader.next_chunk().await.unwrap().is_some());
    h.shutdown.cancel();

    let (received, ended) = tokio::time::timeout(Duration::from_secs(5), drain(&mut reader))
        .await
        .expect("stream should end after shutdown");
    ended.expect("stream should end with end-of-stream");
    assert!(received + 1 < BIG_LOG / 4);
    h.stop().await;
}

#[tokio::test]
async fn stream_is_finished_before_server_runtime_goes_away() {
    let (dir, socket, agent) = fixture(4, 0);
    let log = write_log(dir.path(), "big.log", &content(BIG_LOG));
    add_entry(dir.path(), &entry("etcd", TaskStatus::Running, Some(log)));

    // The server gets its own runtime, dropped as soon as `serve` returns,
    // the same way the binary's runtime goes away when `main` returns.
    let shutdown = CancellationToken::new();
    let server_thread = {
        let socket = socket.clone();
        let shutdown = shutdown.clone();
        std::thread::spawn(move || -> Result<()> {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap();
            let served = runtime.block_on(async move { Server::bind(&socket, agent)?.serve(shutdown).await });
            drop(runtime);
            served
        })
    };

    let client = Client::new(&socket);
    let mut reader = None;
    for _ in 0..200 {
        if let Ok(mut r) = client.stream_log(Namespace::new(NS), WorkloadId::new("etcd")).await {
            if let Ok(Some(_)) = r.next_chunk().await {
                reader = Some(r);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut reader = reader.expect("server should come up and stream");
    shutdown.cancel();

    let (_, ended) = tokio::time::timeout(Duration::from_secs(5), drain(&mut reader))
        .await
        .expect("stream should end after shutdown");
    ended.expect("stream should end with end-of-stream, not a dropped connection");

    let served = tokio::task::spawn_blocking(move || server_thread.join())
        .await
        .unwrap()
        .unwrap();
    served.unwrap();
    assert!(!socket.exists());
}

#[tokio::test]
async fn malformed_request_gets_invalid_argument_reply() {
    let h = Harness::start(4, 0);
    for payload in [&b"{not json"[..], &br#"{"method":"explode"}"#[..]] {
        let mut stream = UnixStream::connect(&h.socket).await.unwrap();
        protocol::write_frame(&mut stream, FrameKind::Message, payload)
            .await
            .unwrap();
        let Response::Error(reply) = protocol::read_response(&mut stream).await.unwrap() else {
            panic!("expected an error reply");
        };
        assert_eq!(reply.code, ErrorCode::InvalidArgument.as_i32());
        assert!(reply.message.contains("malformed request"));
    }
    h.stop().await;
}

#[tokio::test]
async fn idle_connection_does_not_block_shutdown() {
    let h = Harness::start(4, 0);
    let _idle = UnixStream::connect(&h.socket).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    tokio::time::timeout(Duration::from_secs(5), h.stop())
        .await
        .expect("shutdown should not wait on a silent client");
}

#[tokio::test]
async fn missing_socket_is_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = Client::new(dir.path().join("absent.sock"));
    let err = client.reset().await.unwrap_err();
    assert!(matches!(err, OsdError::Connection { .. }));
    assert_eq!(err.code(), ErrorCode::Unavailable);
}

#[tokio::test]
async fn bind_replaces_stale_socket_file() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("osd.sock");
    std::fs::write(&socket, b"stale").unwrap();
    let agent = Agent::new(
        Arc::new(LocalRuntime::new(dir.path())),
        Arc::new(FixedRunner(0)),
        OsdConfig::default(),
    );
    let server = Server::bind(&socket, agent).unwrap();
    assert_eq!(server.path(), socket.as_path());
}
