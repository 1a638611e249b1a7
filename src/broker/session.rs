//! Per-connection task.
//!
//! # Data Flow
//! ```text
//! accepted stream
//!     → split: reader stays here, writer task drains the bounded outbound queue
//!     → handshake: first frame must be `connect` (bounded by connect timeout)
//!     → broker.attach (authenticate, register, Connect event, connack)
//!     → frame loop until disconnect / EOF / kick / shutdown
//!     → stop writer, release permit and tracker guard
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};

use super::client::Client;
use super::protocol::{self, ClientFrame, ProtocolError, ServerFrame};
use super::server::Broker;
use crate::hooks::{ConnectRequest, DisconnectReason};
use crate::lifecycle::shutdown::ShutdownListener;
use crate::net::{Accepted, ConnectionGuard, ConnectionId, ConnectionStream};

/// How long queued frames may take to flush once the session ends.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

type Stream = Box<dyn ConnectionStream>;

pub(crate) async fn run(
    broker: Arc<Broker>,
    listener: String,
    accepted: Accepted,
    guard: ConnectionGuard,
) {
    let Accepted {
        stream,
        remote,
        permit,
    } = accepted;
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbound, frames) = mpsc::channel(broker.outbound_queue());
    let (stop_tx, stop_rx) = oneshot::channel();
    let mut writer = tokio::spawn(write_frames(write_half, frames, stop_rx));

    let max_frame = broker.max_frame_bytes();
    let mut session = Session {
        broker,
        reader: FrameReader::new(read_half, max_frame),
        listener,
        remote,
        connection: guard.id(),
        outbound,
    };
    session.run().await;
    drop(session);

    let _ = stop_tx.send(());
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        tracing::debug!(connection_id = %guard.id(), "Writer did not drain, aborting");
        writer.abort();
    }
    drop(permit);
    drop(guard);
}

struct Session {
    broker: Arc<Broker>,
    reader: FrameReader,
    listener: String,
    remote: String,
    connection: ConnectionId,
    outbound: mpsc::Sender<ServerFrame>,
}

impl Session {
    async fn run(&mut self) {
        let mut shutdown = self.broker.shutdown_listener();

        let connect = tokio::select! {
            _ = shutdown.triggered() => return,
            read = tokio::time::timeout(self.broker.connect_timeout(), self.reader.next()) => match read {
                Ok(Ok(Some(ClientFrame::Connect { client_id, username, clean }))) => ConnectRequest {
                    client_id,
                    username,
                    clean,
                },
                Ok(Ok(Some(_))) => {
                    self.reply_error(&ProtocolError::Unexpected("non-connect"));
                    return;
                }
                Ok(Ok(None)) => return,
                Ok(Err(e)) => {
                    self.reply_error(&e);
                    return;
                }
                Err(_) => {
                    tracing::debug!(remote = %self.remote, "No connect frame before timeout");
                    return;
                }
            },
        };

        let attached = self.broker.attach(
            connect,
            self.remote.clone(),
            self.listener.clone(),
            self.connection,
            self.outbound.clone(),
        );
        if let Some(client) = attached {
            self.serve(&client, &mut shutdown).await;
        }
    }

    async fn serve(&mut self, client: &Arc<Client>, shutdown: &mut ShutdownListener) {
        loop {
            tokio::select! {
                _ = client.kicked() => return,
                _ = shutdown.triggered() => {
                    self.broker.disconnect(client, DisconnectReason::ServerShutdown, false);
                    return;
                }
                frame = self.reader.next() => match frame {
                    Ok(Some(ClientFrame::Disconnect)) => {
                        self.broker.disconnect(client, DisconnectReason::ClientDisconnect, true);
                        return;
                    }
                    Ok(Some(ClientFrame::Connect { .. })) => {
                        self.fail(client, ProtocolError::Unexpected("second connect"));
                        return;
                    }
                    Ok(Some(frame)) => self.broker.handle(client, frame),
                    Ok(None) => {
                        self.broker.disconnect(client, DisconnectReason::ConnectionLost, false);
                        return;
                    }
                    Err(e) => {
                        self.fail(client, e);
                        return;
                    }
                },
            }
        }
    }

    fn fail(&self, client: &Arc<Client>, error: ProtocolError) {
        tracing::debug!(client_id = %client.info.id, error = %error, "Protocol violation");
        self.reply_error(&error);
        self.broker
            .disconnect(client, DisconnectReason::ProtocolError(error.to_string()), false);
    }

    fn reply_error(&self, error: &ProtocolError) {
        let _ = self.outbound.try_send(ServerFrame::Error {
            message: error.to_string(),
        });
    }
}

/// Reads newline-delimited frames with a per-line size cap.
struct FrameReader {
    inner: BufReader<ReadHalf<Stream>>,
    line: String,
    max: usize,
}

impl FrameReader {
    fn new(read: ReadHalf<Stream>, max: usize) -> Self {
        Self {
            inner: BufReader::new(read),
            line: String::new(),
            max,
        }
    }

    /// Next frame, or `None` at end of stream. Blank lines are skipped.
    async fn next(&mut self) -> Result<Option<ClientFrame>, ProtocolError> {
        loop {
            self.line.clear();
            let limit = self.max as u64 + 1;
            let read = (&mut self.inner).take(limit).read_line(&mut self.line).await?;
            if read == 0 {
                return Ok(None);
            }
            if !self.line.ends_with('\n') && self.line.len() > self.max {
                return Err(ProtocolError::FrameTooLarge(self.max));
            }
            if self.line.trim().is_empty() {
                continue;
            }
            return protocol::decode(&self.line).map(Some);
        }
    }
}

async fn write_frames(
    mut write: WriteHalf<Stream>,
    mut frames: mpsc::Receiver<ServerFrame>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if write_frame(&mut write, &frame).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = &mut stop => {
                while let Ok(frame) = frames.try_recv() {
                    if write_frame(&mut write, &frame).await.is_err() {
                        return;
                    }
                }
                break;
            }
        }
    }
    let _ = write.shutdown().await;
}

async fn write_frame(write: &mut WriteHalf<Stream>, frame: &ServerFrame) -> Result<(), ProtocolError> {
    let line = protocol::encode(frame)?;
    if let Err(e) = write.write_all(line.as_bytes()).await {
        tracing::debug!(error = %e, "Connection write failed");
        return Err(e.into());
    }
    Ok(())
}
