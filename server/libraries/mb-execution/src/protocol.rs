//
// Copyright 2025 Tabs Data Inc.
//

//! The worker wire protocol: length-prefixed JSON frames on stdin/stdout, one
//! request and one response per invocation. A frame is a 4-byte big-endian
//! length followed by a UTF-8 JSON document.

use mb_common::id::Id;
use mb_error::mb_error;
use mb_objects::types::function::AuthLevel;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. A worker writing a larger frame is in
/// violation of the protocol.
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

#[mb_error]
pub enum ProtocolError {
    #[error("Worker closed its stream before responding")]
    Eof = 7000,
    #[error("Worker frame too large: {0} bytes")]
    FrameTooLarge(usize) = 7001,
    #[error("Worker frame is not valid JSON: {0}")]
    BadJson(#[source] serde_json::Error) = 7002,
    #[error("Worker responded for call {got} while call {want} was in flight")]
    CallIdMismatch { want: Id, got: Id } = 7003,
    #[error("Worker stream error: {0}")]
    Io(#[source] std::io::Error) = 7004,
}

/// Requests sent to a worker.
#[derive(Debug, Serialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum WorkerRequest {
    /// Ask the worker for the function's registration metadata.
    Describe,
    /// Run one invocation.
    Invoke { call_id: Id, input: serde_json::Value },
}

/// Invocation status reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Ok,
    Error,
}

/// Function metadata reported by the worker in response to a describe request.
/// The host learns auth/tags/description from here, not by parsing the script.
#[derive(Debug, Clone, Deserialize)]
pub struct DescribePayload {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_auth")]
    pub auth: AuthLevel,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_auth() -> AuthLevel {
    AuthLevel::Admin
}

/// A response frame from a worker.
#[derive(Debug, Deserialize)]
pub struct WorkerResponse {
    #[serde(default)]
    pub call_id: Option<Id>,
    pub status: WorkerStatus,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub describe: Option<DescribePayload>,
}

/// Writes one frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message).map_err(ProtocolError::BadJson)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    writer
        .write_all(&(body.len() as u32).to_be_bytes())
        .await
        .map_err(ProtocolError::Io)?;
    writer.write_all(&body).await.map_err(ProtocolError::Io)?;
    writer.flush().await.map_err(ProtocolError::Io)?;
    Ok(())
}

/// Reads one frame. EOF before a complete frame is a protocol violation.
pub async fn read_frame<R>(reader: &mut R) -> Result<WorkerResponse, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut length = [0u8; 4];
    match reader.read_exact(&mut length).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::Eof);
        }
        Err(err) => return Err(ProtocolError::Io(err)),
    }
    let length = u32::from_be_bytes(length) as usize;
    if length > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    let mut body = vec![0u8; length];
    match reader.read_exact(&mut body).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::Eof);
        }
        Err(err) => return Err(ProtocolError::Io(err)),
    }
    serde_json::from_slice(&body).map_err(ProtocolError::BadJson)
}

/// Checks the response `call_id` against the in-flight invocation.
pub fn check_call_id(response: &WorkerResponse, want: Id) -> Result<(), ProtocolError> {
    match response.call_id {
        Some(got) if got == want => Ok(()),
        Some(got) => Err(ProtocolError::CallIdMismatch { want, got }),
        None => Err(ProtocolError::CallIdMismatch { want, got: want }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_common::id;
    use serde_json::json;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut host, mut worker) = tokio::io::duplex(1024);
        let call_id = id::id();
        write_frame(
            &mut host,
            &WorkerRequest::Invoke {
                call_id,
                input: json!({"n": 1}),
            },
        )
        .await
        .unwrap();

        let mut length = [0u8; 4];
        worker.read_exact(&mut length).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(length) as usize];
        worker.read_exact(&mut body).await.unwrap();
        let request: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(request["method"], "invoke");
        assert_eq!(request["input"]["n"], 1);

        write_frame(
            &mut worker,
            &json!({"call_id": call_id, "status": "ok", "output": 2}),
        )
        .await
        .unwrap();
        let response = read_frame(&mut host).await.unwrap();
        assert_eq!(response.status, WorkerStatus::Ok);
        assert_eq!(response.output, Some(json!(2)));
        check_call_id(&response, call_id).unwrap();
    }

    #[tokio::test]
    async fn test_eof_is_protocol_violation() {
        let (mut host, worker) = tokio::io::duplex(1024);
        drop(worker);
        assert!(matches!(read_frame(&mut host).await, Err(ProtocolError::Eof)));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_protocol_violation() {
        let (mut host, mut worker) = tokio::io::duplex(1024);
        worker.write_all(&100u32.to_be_bytes()).await.unwrap();
        worker.write_all(b"short").await.unwrap();
        drop(worker);
        assert!(matches!(read_frame(&mut host).await, Err(ProtocolError::Eof)));
    }

    #[tokio::test]
    async fn test_garbage_frame_is_protocol_violation() {
        let (mut host, mut worker) = tokio::io::duplex(1024);
        worker.write_all(&3u32.to_be_bytes()).await.unwrap();
        worker.write_all(b"{{{").await.unwrap();
        assert!(matches!(
            read_frame(&mut host).await,
            Err(ProtocolError::BadJson(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut host, mut worker) = tokio::io::duplex(1024);
        worker
            .write_all(&(MAX_FRAME_BYTES as u32 + 1).to_be_bytes())
            .await
            .unwrap();
        assert!(matches!(
            read_frame(&mut host).await,
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_call_id_mismatch() {
        let response = WorkerResponse {
            call_id: Some(id::id()),
            status: WorkerStatus::Ok,
            output: None,
            error_type: None,
            error_message: None,
            describe: None,
        };
        assert!(matches!(
            check_call_id(&response, id::id()),
            Err(ProtocolError::CallIdMismatch { .. })
        ));
    }
}
