//! Wire protocol: newline-delimited JSON over the daemon socket (spec §6):
//! each line is the request/reply object itself, with no outer envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{IpcError, IpcResult};

/// One RPC call. `id` is caller-chosen and echoed back verbatim; `method` is
/// a dotted name like `session.execute`; `token` must match the daemon's
/// current auth token for every method except `health.ping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub token: String,
}

/// Reply to one [`RpcRequest`], correlated by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: String, result: Value) -> Self {
        Self { id, ok: true, result: Some(result), error: None }
    }

    pub fn err(id: String, error: RpcError) -> Self {
        Self { id, ok: false, result: None, error: Some(error) }
    }
}

/// `{message, code, reference?}` per the RPC surface: `code` carries the
/// tagged `ErrorKind` name, `reference` the error's `docsRef`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl From<&mcp_gateway_core::GatewayError> for RpcError {
    fn from(err: &mcp_gateway_core::GatewayError) -> Self {
        Self { message: err.rendered_message(), code: err.kind.as_str().to_string(), reference: Some(err.docs_ref.clone()) }
    }
}

/// Write one newline-delimited JSON frame. Embedded newlines can't occur
/// because `serde_json::to_string` never emits raw `\n` inside a compact
/// object.
pub async fn write_frame<W, T>(writer: &mut W, message: T) -> IpcResult<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(&message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one newline-delimited JSON frame, rejecting frames over
/// `max_frame_bytes` before they're fully buffered (spec §4.9 "frame size
/// limits").
pub async fn read_frame<R, T>(reader: &mut BufReader<R>, max_frame_bytes: usize) -> IpcResult<T>
where
    R: tokio::io::AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut line = String::new();
    let mut limited = reader.take(max_frame_bytes as u64 + 1);
    let n = limited.read_line(&mut line).await?;

    if n == 0 {
        return Err(IpcError::ConnectionClosed);
    }
    if line.len() > max_frame_bytes {
        return Err(IpcError::FrameTooLarge { size: line.len(), max: max_frame_bytes });
    }

    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_request() {
        let mut buf = Vec::new();
        let req = RpcRequest { id: "call-1".to_string(), method: "health.ping".to_string(), params: Value::Null, token: String::new() };
        write_frame(&mut buf, req.clone()).await.unwrap();

        let mut reader = BufReader::new(&buf[..]);
        let decoded: RpcRequest = read_frame(&mut reader, 1024).await.unwrap();
        assert_eq!(decoded.method, req.method);
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let mut buf = Vec::new();
        let req = RpcRequest { id: "call-2".to_string(), method: "x".repeat(200), params: Value::Null, token: String::new() };
        write_frame(&mut buf, req).await.unwrap();

        let mut reader = BufReader::new(&buf[..]);
        let err = read_frame::<_, RpcRequest>(&mut reader, 32).await.unwrap_err();
        assert!(matches!(err, IpcError::FrameTooLarge { .. }));
    }
}
