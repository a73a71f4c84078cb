//! Wire format shared by the server and client.
//!
//! Every message is a single frame:
//!
//! ```text
//! +----------------+----------------+-----------------+
//! | Length (4B BE) | Kind (4B BE)   | Payload         |
//! +----------------+----------------+-----------------+
//! ```
//!
//! `Length` counts the kind field plus the payload. Requests and control
//! replies are JSON payloads of kind [`FrameKind::Message`]. Log chunks are
//! sent as raw bytes with kind [`FrameKind::LogChunk`] so they are not
//! inflated by a text encoding.
//!
//! A connection carries exactly one request. A `StreamLog` reply is any
//! number of chunk frames followed by `end_of_stream` or `error`; closing
//! the connection before that cancels the stream.

use osd_common::constants::MAX_FRAME_SIZE;
use osd_common::error::{OsdError, Result};
use osd_common::types::{LogChunk, Namespace, WorkloadId, WorkloadRecord};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const KIND_LEN: usize = 4;

/// Payload encoding of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// JSON-encoded request or reply.
    Message,
    /// Raw log bytes.
    LogChunk,
}

impl FrameKind {
    const fn as_u32(self) -> u32 {
        match self {
            Self::Message => 1,
            Self::LogChunk => 2,
        }
    }

    const fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Message),
            2 => Some(Self::LogChunk),
            _ => None,
        }
    }
}

/// A request from a client to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    /// Lists workloads in a namespace.
    ListWorkloads {
        /// Namespace to enumerate.
        namespace: Namespace,
    },
    /// Sends SIGTERM to a workload's task.
    Terminate {
        /// Namespace of the workload.
        namespace: Namespace,
        /// Workload to terminate.
        id: WorkloadId,
    },
    /// Runs the node reset workload to completion.
    Reset,
    /// Streams a workload's stdout.
    StreamLog {
        /// Namespace of the workload.
        namespace: Namespace,
        /// Workload whose log is streamed.
        id: WorkloadId,
    },
}

impl Request {
    /// Short method name for logging.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::ListWorkloads { .. } => "list_workloads",
            Self::Terminate { .. } => "terminate",
            Self::Reset => "reset",
            Self::StreamLog { .. } => "stream_log",
        }
    }
}

/// Error reported to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Numeric class, see [`osd_common::error::ErrorCode`].
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

impl From<&OsdError> for ErrorReply {
    fn from(err: &OsdError) -> Self {
        Self {
            code: err.code().as_i32(),
            message: err.to_string(),
        }
    }
}

impl From<ErrorReply> for OsdError {
    fn from(reply: ErrorReply) -> Self {
        Self::Remote {
            code: reply.code,
            message: reply.message,
        }
    }
}

/// A reply from the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Result of `ListWorkloads`.
    Workloads(Vec<WorkloadRecord>),
    /// Successful `Terminate` or `Reset`.
    Ack,
    /// One chunk of a log stream.
    Chunk(LogChunk),
    /// The log stream reached the end of the file or was cancelled.
    EndOfStream,
    /// The request failed.
    Error(ErrorReply),
}

impl Response {
    /// Builds an error reply from an agent error.
    #[must_use]
    pub fn error(err: &OsdError) -> Self {
        Self::Error(err.into())
    }
}

/// JSON body of the non-chunk replies.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Reply {
    Workloads { workloads: Vec<WorkloadRecord> },
    Ack,
    EndOfStream,
    Error(ErrorReply),
}

/// Writes one frame.
///
/// # Errors
///
/// Returns [`OsdError::Protocol`] if the payload exceeds the frame limit or
/// the write fails.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: FrameKind,
    payload: &[u8],
) -> Result<()> {
    let length = KIND_LEN + payload.len();
    if length > MAX_FRAME_SIZE {
        return Err(OsdError::Protocol {
            message: format!("frame of {length} bytes exceeds limit of {MAX_FRAME_SIZE}"),
        });
    }
    let length = u32::try_from(length).map_err(|_| OsdError::Protocol {
        message: format!("frame of {length} bytes does not fit a length prefix"),
    })?;

    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&length.to_be_bytes());
    buf.extend_from_slice(&kind.as_u32().to_be_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await.map_err(write_failed)?;
    writer.flush().await.map_err(write_failed)
}

/// Reads one frame.
///
/// Returns `None` if the peer closed the connection before a new frame began.
///
/// # Errors
///
/// Returns [`OsdError::Protocol`] on a truncated, oversized, or unknown frame.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<(FrameKind, Vec<u8>)>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(read_failed(e)),
    }
    let length = u32::from_be_bytes(header) as usize;
    if length < KIND_LEN {
        return Err(OsdError::Protocol {
            message: format!("frame length {length} is shorter than its header"),
        });
    }
    if length > MAX_FRAME_SIZE {
        return Err(OsdError::Protocol {
            message: format!("frame of {length} bytes exceeds limit of {MAX_FRAME_SIZE}"),
        });
    }

    let mut kind = [0u8; KIND_LEN];
    reader.read_exact(&mut kind).await.map_err(read_failed)?;
    let raw = u32::from_be_bytes(kind);
    let kind = FrameKind::from_u32(raw).ok_or_else(|| OsdError::Protocol {
        message: format!("unknown frame kind {raw}"),
    })?;

    let mut payload = vec![0u8; length - KIND_LEN];
    reader.read_exact(&mut payload).await.map_err(read_failed)?;
    Ok(Some((kind, payload)))
}

/// Sends a request.
///
/// # Errors
///
/// Returns an error if encoding or the write fails.
pub async fn write_request<W: AsyncWrite + Unpin>(writer: &mut W, request: &Request) -> Result<()> {
    let payload = serde_json::to_vec(request)?;
    write_frame(writer, FrameKind::Message, &payload).await
}

/// Receives a request.
///
/// # Errors
///
/// Returns [`OsdError::Protocol`] if the connection closes first or the
/// frame is not a well-formed request.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Request> {
    match read_frame(reader).await? {
        Some((FrameKind::Message, payload)) => Ok(serde_json::from_slice(&payload)?),
        Some((FrameKind::LogChunk, _)) => Err(OsdError::Protocol {
            message: "expected a request, got a log chunk".into(),
        }),
        None => Err(closed()),
    }
}

/// Sends a reply.
///
/// # Errors
///
/// Returns an error if encoding or the write fails.
pub async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> Result<()> {
    let reply = match response {
        Response::Chunk(chunk) => {
            return write_frame(writer, FrameKind::LogChunk, &chunk.bytes).await;
        }
        Response::Workloads(workloads) => Reply::Workloads {
            workloads: workloads.clone(),
        },
        Response::Ack => Reply::Ack,
        Response::EndOfStream => Reply::EndOfStream,
        Response::Error(err) => Reply::Error(err.clone()),
    };
    let payload = serde_json::to_vec(&reply)?;
    write_frame(writer, FrameKind::Message, &payload).await
}

/// Receives a reply.
///
/// # Errors
///
/// Returns [`OsdError::Protocol`] if the connection closes first or the
/// frame is not a well-formed reply.
pub async fn read_response<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Response> {
    match read_frame(reader).await? {
        Some((FrameKind::LogChunk, bytes)) => Ok(Response::Chunk(LogChunk::new(bytes))),
        Some((FrameKind::Message, payload)) => {
            Ok(match serde_json::from_slice::<Reply>(&payload)? {
                Reply::Workloads { workloads } => Response::Workloads(workloads),
                Reply::Ack => Response::Ack,
                Reply::EndOfStream => Response::EndOfStream,
                Reply::Error(err) => Response::Error(err),
            })
        }
        None => Err(closed()),
    }
}

fn closed() -> OsdError {
    OsdError::Protocol {
        message: "connection closed before a complete message".into(),
    }
}

fn read_failed(e: std::io::Error) -> OsdError {
    OsdError::Protocol {
        message: format!("failed to read frame: {e}"),
    }
}

fn write_failed(e: std::io::Error) -> OsdError {
    OsdError::Protocol {
        message: format!("failed to write frame: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use osd_common::error::ErrorCode;
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn request_survives_the_wire() {
        let (mut a, mut b) = duplex(1024);
        let request = Request::Terminate {
            namespace: Namespace::new("k8s.io"),
            id: WorkloadId::new("etcd"),
        };
        write_request(&mut a, &request).await.unwrap();
        assert_eq!(read_request(&mut b).await.unwrap(), request);
    }

    #[test]
    fn request_json_is_method_tagged() {
        let json = serde_json::to_string(&Request::Reset).unwrap();
        assert_eq!(json, r#"{"method":"reset"}"#);
    }

    #[tokio::test]
    async fn log_chunks_are_sent_as_raw_bytes() {
        let (mut a, mut b) = duplex(1024);
        let chunk = LogChunk::new(b"hello\n".to_vec());
        write_response(&mut a, &Response::Chunk(chunk.clone())).await.unwrap();
        drop(a);

        let (kind, payload) = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(kind, FrameKind::LogChunk);
        assert_eq!(payload, chunk.bytes);
    }

    #[tokio::test]
    async fn error_reply_carries_code_and_message() {
        let (mut a, mut b) = duplex(1024);
        let err = OsdError::NoLogSource { id: "etcd".into() };
        write_response(&mut a, &Response::error(&err)).await.unwrap();

        let Response::Error(reply) = read_response(&mut b).await.unwrap() else {
            panic!("expected error reply");
        };
        assert_eq!(reply.code, ErrorCode::NotFound.as_i32());
        assert_eq!(reply.message, "no log reader found for etcd");
        assert_eq!(OsdError::from(reply).code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn clean_close_reads_as_no_frame() {
        let (a, mut b) = duplex(64);
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let (mut a, mut b) = duplex(64);
        let length = u32::try_from(MAX_FRAME_SIZE + 1).unwrap();
        a.write_all(&length.to_be_bytes()).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, OsdError::Protocol { .. }));
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&4u32.to_be_bytes()).await.unwrap();
        a.write_all(&9u32.to_be_bytes()).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(err.to_string().contains("unknown frame kind 9"));
    }
}
