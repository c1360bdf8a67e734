//! Satellite side of the uplink protocol
//!
//! [`WorkerClient::connect`] opens the connection and runs the handshake:
//! `hello` must be answered with `world`, then the resource declaration
//! `::r::<csv>` must be answered with `ok`. Every handshake read is bounded
//! by the configured handshake timeout.
//!
//! [`WorkerClient::run`] then waits for task assignments and feeds them to
//! the [`ResourceLedger`] and the [`ExecutionHook`] until the coordinator
//! closes the connection or a [`ShutdownHandle`] asks the client to stop.

use crate::hook::{ExecutionHook, LoggingHook};
use crate::ledger::ResourceLedger;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uplink_common::config::WorkerConfig;
use uplink_common::error::{Result, UplinkError};
use uplink_common::METRICS;
use uplink_proto::{decode_bytes, read_payload, write_message, Message, ProtocolError};

/// Connection state of a [`WorkerClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No connection
    Disconnected,

    /// Connected and answered `hello`, resources not yet accepted
    Connected,

    /// Resources accepted, waiting for tasks
    Registered,
}

/// Asks a running [`WorkerClient`] to disconnect
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request a clean disconnect
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

enum Event {
    Messages(std::result::Result<Vec<Message>, ProtocolError>),
    Shutdown,
}

/// A satellite connected to a ground station
pub struct WorkerClient {
    address: String,
    name: String,
    config: WorkerConfig,
    state: ClientState,
    stream: Option<TcpStream>,
    buf: Vec<u8>,

    /// Messages that arrived in the same read as an earlier one
    pending: VecDeque<Message>,

    ledger: ResourceLedger,
    hook: Box<dyn ExecutionHook>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WorkerClient {
    /// Create a client for the coordinator at `address` (`host:port`)
    pub fn new(address: impl Into<String>, config: WorkerConfig) -> Self {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| "satellite".to_string());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            address: address.into(),
            ledger: ResourceLedger::new(config.resources.iter().cloned()),
            hook: Box::new(LoggingHook::new(name.clone())),
            buf: vec![0u8; config.read_buffer_size.max(1)],
            name,
            config,
            state: ClientState::Disconnected,
            stream: None,
            pending: VecDeque::new(),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Replace the default logging hook
    pub fn with_hook(mut self, hook: impl ExecutionHook + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    /// Handle that stops [`WorkerClient::run`] from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Connect and complete the hello/world and registration exchanges
    pub async fn connect(&mut self) -> Result<()> {
        let limit = self.config.handshake_timeout();
        let stream = timeout(limit, TcpStream::connect(&self.address))
            .await
            .map_err(|_| UplinkError::timeout(format!("connecting to {}", self.address)))?
            .map_err(|e| {
                UplinkError::connection(format!("Failed to connect to {}: {}", self.address, e))
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        self.stream = Some(stream);
        self.pending.clear();
        info!("{} connected to {}", self.name, self.address);

        if let Err(e) = self.handshake().await {
            error!("Can't connect to server, try again later: {}", e);
            self.close();
            return Err(e);
        }
        Ok(())
    }

    async fn handshake(&mut self) -> Result<()> {
        self.send(&Message::Hello).await?;
        match self.expect_reply().await? {
            Message::World => self.state = ClientState::Connected,
            other => {
                return Err(UplinkError::handshake(format!(
                    "expected world, got {:?}",
                    other.encode()
                )))
            }
        }

        let resources = self.ledger.declared().to_vec();
        self.send(&Message::Register(resources)).await?;
        match self.expect_reply().await? {
            Message::Ok => {
                self.state = ClientState::Registered;
                info!(
                    "{} registered resources {:?}",
                    self.name,
                    self.ledger.declared()
                );
                Ok(())
            }
            other => Err(UplinkError::handshake(format!(
                "resources not accepted, got {:?}",
                other.encode()
            ))),
        }
    }

    /// Process task assignments until the coordinator closes or a stop is requested
    ///
    /// Connects first if needed. Returns `Ok` on either kind of clean end.
    pub async fn run(&mut self) -> Result<()> {
        if self.state == ClientState::Disconnected {
            self.connect().await?;
        }
        let mut shutdown = self.shutdown_rx.clone();

        loop {
            if *shutdown.borrow_and_update() {
                info!("{} stopping on request", self.name);
                return self.stop().await;
            }

            while let Some(message) = self.pending.pop_front() {
                if !self.process(message) {
                    self.close();
                    return Ok(());
                }
            }

            let event = {
                let stream = self
                    .stream
                    .as_mut()
                    .ok_or_else(|| UplinkError::connection("not connected"))?;
                tokio::select! {
                    read = read_payload(stream, &mut self.buf) => {
                        let payload = read?;
                        debug!(
                            "Received message: {:?} from peer: {}",
                            String::from_utf8_lossy(payload),
                            self.address
                        );
                        Event::Messages(decode_bytes(payload))
                    }
                    _ = shutdown.changed() => Event::Shutdown,
                }
            };

            match event {
                Event::Messages(Ok(messages)) => self.pending.extend(messages),
                Event::Messages(Err(e)) => warn!("{} ignored message: {}", self.name, e),
                Event::Shutdown => {}
            }
        }
    }

    /// Send the empty message and close the connection
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            write_message(stream, &Message::Disconnect).await?;
            stream.shutdown().await?;
        }
        self.close();
        Ok(())
    }

    /// Apply one message; false once the coordinator has closed
    fn process(&mut self, message: Message) -> bool {
        match message {
            Message::Assign(task) => {
                self.execute(task);
                true
            }
            Message::Disconnect => {
                info!("{}: coordinator closed the connection", self.name);
                false
            }
            other => {
                warn!("{} ignored unexpected {:?}", self.name, other.encode());
                true
            }
        }
    }

    fn execute(&mut self, task: uplink_proto::Task) {
        METRICS.worker.tasks_received_total.inc();

        if let Err(e) = self.ledger.accept(&task) {
            METRICS.worker.tasks_rejected_total.inc();
            warn!("{} rejected task {}: {}", self.name, task.name(), e);
            return;
        }

        debug!(
            "Executing task '{}' with payoff '{}'",
            task.name(),
            task.payoff()
        );
        match self.hook.execute(&task) {
            Ok(()) => METRICS.worker.tasks_executed_total.inc(),
            Err(e) => {
                METRICS.worker.tasks_rejected_total.inc();
                error!("{}: task {} failed: {}", self.name, task.name(), e);
            }
        }
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| UplinkError::connection("not connected"))?;
        write_message(stream, message).await?;
        debug!(
            "Sent message: {:?} to peer: {}",
            message.encode(),
            self.address
        );
        Ok(())
    }

    /// Next handshake reply, bounded by the handshake timeout
    async fn expect_reply(&mut self) -> Result<Message> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(message);
        }

        let limit = self.config.handshake_timeout();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| UplinkError::connection("not connected"))?;
        let payload = timeout(limit, read_payload(stream, &mut self.buf))
            .await
            .map_err(|_| {
                UplinkError::timeout(format!("no reply from {} within {:?}", self.address, limit))
            })??;
        debug!(
            "Received message: {:?} from peer: {}",
            String::from_utf8_lossy(payload),
            self.address
        );

        let mut messages: VecDeque<Message> = decode_bytes(payload)?.into();
        let first = messages
            .pop_front()
            .ok_or_else(|| UplinkError::handshake("empty reply"))?;
        self.pending.extend(messages);

        if first == Message::Disconnect {
            return Err(UplinkError::connection(format!(
                "{} closed the connection",
                self.address
            )));
        }
        Ok(first)
    }

    fn close(&mut self) {
        self.stream = None;
        self.pending.clear();
        if self.state != ClientState::Disconnected {
            info!("{} disconnected from {}", self.name, self.address);
        }
        self.state = ClientState::Disconnected;
    }
}
