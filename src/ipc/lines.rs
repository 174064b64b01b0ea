//! Newline-delimited transport: one JSON message per line.
//!
//! Used over stdio by the binary and over any duplex stream in tests. Each
//! line is handled on its own task; responses are written as they complete.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{
    AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead, FramedWrite, LinesCodec, LinesCodecError,
};

use crate::dispatch::Dispatcher;
use crate::ipc::mcp::{self, RpcResponse, ServerInfo};
use crate::ipc::protocol::{self, Outbound, Rejection};
use crate::types::{CorrelationId, IpcConfig};

/// Message flavor spoken on a line transport.
#[derive(Debug, Clone, PartialEq)]
pub enum LineProtocol {
    /// `{id, tool, arguments}` / `{id, result}` messages.
    Native,
    /// JSON-RPC 2.0 Model Context Protocol.
    Mcp(ServerInfo),
}

impl LineProtocol {
    async fn handle(&self, dispatcher: &Dispatcher, line: &str) -> Option<String> {
        let parsed = serde_json::from_str::<Value>(line);
        match self {
            LineProtocol::Native => {
                let outbound = match parsed {
                    Ok(message) => protocol::respond(dispatcher, message).await,
                    Err(e) => Rejection::new(CorrelationId::null(), format!("invalid JSON: {}", e)).into(),
                };
                render(&outbound)
            }
            LineProtocol::Mcp(server) => {
                let response = match parsed {
                    Ok(message) => mcp::handle(dispatcher, server, message).await?,
                    Err(e) => RpcResponse::failure(Value::Null, mcp::PARSE_ERROR, format!("Parse error: {}", e)),
                };
                render(&response)
            }
        }
    }

    fn oversized(&self, max: usize) -> Option<String> {
        let message = format!("line too long (max {} bytes)", max);
        self.reject(mcp::INVALID_REQUEST, message)
    }

    fn not_utf8(&self, err: std::str::Utf8Error) -> Option<String> {
        self.reject(mcp::PARSE_ERROR, format!("line is not valid UTF-8: {}", err))
    }

    /// Null-id error for a line that never became a message.
    fn reject(&self, rpc_code: i64, message: String) -> Option<String> {
        match self {
            LineProtocol::Native => render(&Outbound::from(Rejection::new(CorrelationId::null(), message))),
            LineProtocol::Mcp(_) => render(&RpcResponse::failure(Value::Null, rpc_code, message)),
        }
    }
}

fn render<T: serde::Serialize>(message: &T) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::error!("failed to encode response: {}", e);
            None
        }
    }
}

/// Serve one line-delimited stream until EOF.
///
/// Returns after every accepted line has been answered.
pub async fn serve_lines<R, W>(
    reader: R,
    writer: W,
    dispatcher: Arc<Dispatcher>,
    protocol: LineProtocol,
    ipc_config: &IpcConfig,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let max_line = ipc_config.max_frame_bytes as usize;
    // split on raw bytes so a bad line can be answered instead of ending the stream
    let mut lines = FramedRead::new(
        reader,
        AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), max_line),
    );
    let (tx, rx) = mpsc::channel::<String>(ipc_config.response_queue_capacity.max(1));
    let writer_task = tokio::spawn(write_lines(writer, rx));
    let protocol = Arc::new(protocol);

    let read_result = loop {
        let chunk = match lines.next().await {
            None => break Ok(()),
            Some(Ok(chunk)) => chunk,
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                // the codec discards up to the next newline
                tracing::warn!("line exceeded {} bytes, discarded", max_line);
                if let Some(response) = protocol.oversized(max_line) {
                    if tx.send(response).await.is_err() {
                        break Ok(());
                    }
                }
                continue;
            }
            Some(Err(AnyDelimiterCodecError::Io(e))) => break Err(e),
        };

        let line = match std::str::from_utf8(&chunk) {
            Ok(line) => line.trim_end_matches('\r').to_string(),
            Err(e) => {
                tracing::warn!("undecodable line: {}", e);
                if let Some(response) = protocol.not_utf8(e) {
                    if tx.send(response).await.is_err() {
                        break Ok(());
                    }
                }
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let dispatcher = dispatcher.clone();
        let protocol = protocol.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = protocol.handle(&dispatcher, &line).await {
                if tx.send(response).await.is_err() {
                    tracing::debug!("output closed before response could be sent");
                }
            }
        });
    };

    drop(tx);
    let write_result = writer_task
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    read_result.and(write_result)
}

async fn write_lines<W>(writer: W, mut rx: mpsc::Receiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new());
    while let Some(line) = rx.recv().await {
        sink.send(line).await.map_err(into_io)?;
    }
    Ok(())
}

fn into_io(e: LinesCodecError) -> std::io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
    }
}

/// Serve the process's stdin/stdout until stdin closes.
pub async fn serve_stdio(
    dispatcher: Arc<Dispatcher>,
    protocol: LineProtocol,
    ipc_config: &IpcConfig,
) -> std::io::Result<()> {
    tracing::info!("serving {} tools on stdio ({:?})", dispatcher.registry().len(), protocol);
    serve_lines(tokio::io::stdin(), tokio::io::stdout(), dispatcher, protocol, ipc_config).await
}
