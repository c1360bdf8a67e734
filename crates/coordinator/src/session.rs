//! Per-connection worker session
//!
//! A session owns one connection. Its reader loop decodes worker messages
//! and updates the [`GroundStation`]; a separate writer task drains the
//! session's outbox, which carries both handshake replies and task
//! assignments queued by dispatch passes. Every write is bounded by the
//! configured notify timeout.
//!
//! States: `Connected -> Registered -> Disconnected`. A `hello` can be
//! repeated in any live state. Malformed or unexpected messages are
//! rejected without touching the station; too many in a row close the
//! session.

use crate::station::{GroundStation, SessionLink, SessionState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uplink_common::error::{Result, UplinkError};
use uplink_common::{WorkerId, METRICS};
use uplink_proto::{decode_bytes, read_payload, write_message, Message, ProtocolError};

/// What the reader loop does after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Coordinator side of one worker connection
pub struct WorkerSession<S> {
    station: Arc<GroundStation>,
    stream: S,
    peer: SocketAddr,
}

impl<S> WorkerSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a session for an accepted connection
    pub fn new(station: Arc<GroundStation>, stream: S, peer: SocketAddr) -> Self {
        Self {
            station,
            stream,
            peer,
        }
    }

    /// Serve the connection until the worker leaves or the session fails
    ///
    /// The worker is removed from the station on every exit path.
    pub async fn run(self) -> Result<()> {
        let config = self.station.config().clone();
        let write_limit = config.notify_timeout();
        let (link, outbox_rx) = SessionLink::channel(config.outbox_capacity);
        let close = link.close.clone();
        let replies = link.outbox.clone();
        let id = self.station.connect(self.peer, link);

        let (mut reader, writer) = tokio::io::split(self.stream);
        let mut writer_task = tokio::spawn(write_loop(writer, outbox_rx, write_limit, self.peer));
        let mut writer_done = false;

        let mut handler = MessageHandler {
            station: self.station.clone(),
            id,
            peer: self.peer,
            replies,
            reply_limit: write_limit,
            state: SessionState::Connected,
            protocol_errors: 0,
            max_protocol_errors: config.max_protocol_errors.max(1),
        };
        let mut buf = vec![0u8; config.read_buffer_size];

        let result = loop {
            tokio::select! {
                read = read_payload(&mut reader, &mut buf) => {
                    let payload = match read {
                        Ok(payload) => payload,
                        Err(e) => break Err(UplinkError::from(e)),
                    };
                    debug!(
                        "Received message: {:?} from peer: {}",
                        String::from_utf8_lossy(payload),
                        self.peer
                    );
                    match handler.handle_payload(payload).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Close) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                written = &mut writer_task => {
                    writer_done = true;
                    break match written {
                        Ok(result) => result.and(Err(UplinkError::connection("writer stopped"))),
                        Err(e) => Err(UplinkError::internal(format!("writer task failed: {}", e))),
                    };
                }
                _ = close.notified() => {
                    break Err(UplinkError::connection(format!("{} dropped by the station", id)));
                }
            }
        };

        self.station.disconnect(id);
        drop(handler);

        // The station no longer holds the outbox and the handler's sender is
        // gone, so the writer drains what is queued and exits.
        if !writer_done && timeout(write_limit, &mut writer_task).await.is_err() {
            writer_task.abort();
        }

        if result.is_ok() {
            info!("Session {} with {} closed", id, self.peer);
        }
        result
    }
}

/// Applies decoded messages to the station
struct MessageHandler {
    station: Arc<GroundStation>,
    id: WorkerId,
    peer: SocketAddr,
    replies: mpsc::Sender<Message>,
    reply_limit: Duration,
    state: SessionState,
    protocol_errors: u32,
    max_protocol_errors: u32,
}

impl MessageHandler {
    async fn handle_payload(&mut self, payload: &[u8]) -> Result<Flow> {
        let messages = match decode_bytes(payload) {
            Ok(messages) => messages,
            Err(e) => return self.reject(e.into()),
        };

        for message in messages {
            if self.handle(message).await? == Flow::Close {
                return Ok(Flow::Close);
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle(&mut self, message: Message) -> Result<Flow> {
        match message {
            Message::Disconnect => {
                self.state = SessionState::Disconnected;
                Ok(Flow::Close)
            }
            Message::Hello => {
                self.protocol_errors = 0;
                self.reply(Message::World).await?;
                Ok(Flow::Continue)
            }
            Message::Register(resources) => match self.station.register(self.id, resources) {
                Ok(()) => {
                    self.state = SessionState::Registered;
                    self.protocol_errors = 0;
                    self.reply(Message::Ok).await?;
                    Ok(Flow::Continue)
                }
                Err(UplinkError::UnknownWorker(id)) => Err(UplinkError::connection(format!(
                    "{} is no longer known to the station",
                    id
                ))),
                Err(e) => self.reject(e),
            },
            unexpected => self.reject(ProtocolError::UnknownMessage(unexpected.encode()).into()),
        }
    }

    fn reject(&mut self, err: UplinkError) -> Result<Flow> {
        self.protocol_errors += 1;
        METRICS.coordinator.protocol_errors_total.inc();
        warn!(
            "Rejected message from {} in state {} ({}/{}): {}",
            self.peer, self.state, self.protocol_errors, self.max_protocol_errors, err
        );

        if self.protocol_errors >= self.max_protocol_errors {
            return Err(UplinkError::handshake(format!(
                "{} consecutive protocol errors, last: {}",
                self.protocol_errors, err
            )));
        }
        Ok(Flow::Continue)
    }

    async fn reply(&self, message: Message) -> Result<()> {
        match timeout(self.reply_limit, self.replies.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(UplinkError::connection("session outbox closed")),
            Err(_) => Err(UplinkError::timeout(format!(
                "reply to {} not queued within {:?}",
                self.peer, self.reply_limit
            ))),
        }
    }
}

/// Drain the outbox onto the connection
async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut outbox: mpsc::Receiver<Message>,
    limit: Duration,
    peer: SocketAddr,
) -> Result<()>
where
    S: AsyncWrite,
{
    while let Some(message) = outbox.recv().await {
        match timeout(limit, write_message(&mut writer, &message)).await {
            Ok(Ok(())) => debug!("Sent message: {:?} to peer: {}", message.encode(), peer),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(UplinkError::timeout(format!(
                    "write to {} exceeded {:?}",
                    peer, limit
                )))
            }
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}
