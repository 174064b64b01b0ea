//! TCP server: accept loop and per-connection handler.
//!
//! Frames are read in arrival order and each request is dispatched on its own
//! task; responses are written as they complete, so completion order is not
//! arrival order. Clients match responses by `id`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::ipc::codec::{
    decode_payload, encode_payload, read_frame, write_frame, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE,
};
use crate::ipc::protocol::{self, Outbound, Rejection};
use crate::types::{CorrelationId, IpcConfig};

/// TCP server wrapping the dispatcher.
#[derive(Debug)]
pub struct IpcServer {
    dispatcher: Arc<Dispatcher>,
    addr: SocketAddr,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
}

impl IpcServer {
    pub fn new(dispatcher: Arc<Dispatcher>, addr: SocketAddr, ipc_config: IpcConfig) -> Self {
        Self {
            dispatcher,
            addr,
            cancel: CancellationToken::new(),
            ipc_config,
        }
    }

    /// Bind and run until cancelled or a fatal error occurs.
    pub async fn serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener).await
    }

    /// Run on an already bound listener.
    pub async fn serve_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let conn_semaphore = Arc::new(Semaphore::new(self.ipc_config.max_connections.min(Semaphore::MAX_PERMITS)));
        tracing::info!(
            "TCP server listening on {} (max_connections={})",
            listener.local_addr()?,
            self.ipc_config.max_connections,
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("TCP server shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let (stream, peer) = accept?;

                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                "Connection from {} rejected: at max_connections ({})",
                                peer,
                                self.ipc_config.max_connections,
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    tracing::debug!("connection from {} (active={})",
                        peer,
                        self.ipc_config.max_connections - conn_semaphore.available_permits(),
                    );
                    let dispatcher = self.dispatcher.clone();
                    let cancel = self.cancel.clone();
                    let ipc_config = self.ipc_config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, dispatcher, cancel, ipc_config, permit).await {
                            tracing::warn!("connection from {} error: {}", peer, e);
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Handle a single TCP connection: read frames → dispatch → write responses.
async fn handle_connection(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
    _permit: OwnedSemaphorePermit, // held for connection lifetime
) -> std::io::Result<()> {
    let (mut reader, writer) = stream.into_split();
    let read_timeout = Duration::from_secs(ipc_config.read_timeout_secs);
    let write_timeout = Duration::from_secs(ipc_config.write_timeout_secs);

    let (tx, rx) = mpsc::channel::<Outbound>(ipc_config.response_queue_capacity.max(1));
    let writer_task = tokio::spawn(write_responses(writer, rx, write_timeout));

    let read_result = loop {
        let frame_result = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            frame = tokio::time::timeout(read_timeout, read_frame(&mut reader, ipc_config.max_frame_bytes)) => frame,
        };

        let (msg_type, payload) = match frame_result {
            Err(_elapsed) => {
                tracing::debug!("read timeout ({}s), closing connection", ipc_config.read_timeout_secs);
                break Ok(());
            }
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => break Ok(()), // clean EOF
            Ok(Err(e)) => {
                // framing is lost; report once and close
                let rejection = Rejection::new(CorrelationId::null(), format!("unreadable frame: {}", e));
                let _ = tx.send(rejection.into()).await;
                break Err(e);
            }
        };

        if msg_type != MSG_REQUEST {
            let rejection = Rejection::new(
                CorrelationId::null(),
                format!("unexpected message type: 0x{:02X}", msg_type),
            );
            if tx.send(rejection.into()).await.is_err() {
                break Ok(());
            }
            continue;
        }

        let message: serde_json::Value = match decode_payload(&payload) {
            Ok(message) => message,
            Err(e) => {
                let rejection = Rejection::new(CorrelationId::null(), format!("invalid msgpack: {}", e));
                if tx.send(rejection.into()).await.is_err() {
                    break Ok(());
                }
                continue;
            }
        };

        let dispatcher = dispatcher.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let outbound = protocol::respond(&dispatcher, message).await;
            if tx.send(outbound).await.is_err() {
                tracing::debug!("connection closed before response could be sent");
            }
        });
    };

    // The writer drains until every in-flight call has answered.
    drop(tx);
    let write_result = writer_task
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    read_result.and(write_result)
}

async fn write_responses(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut rx: mpsc::Receiver<Outbound>,
    timeout: Duration,
) -> std::io::Result<()> {
    while let Some(outbound) = rx.recv().await {
        let msg_type = if outbound.is_error() { MSG_ERROR } else { MSG_RESPONSE };
        let encoded = encode_payload(&outbound)?;
        timed_write(&mut writer, msg_type, &encoded, timeout).await?;
    }
    Ok(())
}

/// Write a frame with a timeout. Returns an error if the write takes too long
/// (prevents slow consumers from holding connections indefinitely).
async fn timed_write<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, write_frame(writer, msg_type, payload))
        .await
        .map_err(|_| {
            tracing::warn!("write timeout ({}s), dropping connection", timeout.as_secs());
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
        })?
}
