//! Public client API and session loop
//!
//! [`Client::connect`] performs the handshake and hands back a handle; a
//! single spawned task owns the socket and all session state from then on.
//! The task is a cooperative loop over three inputs (the socket, the
//! command channel, and a housekeeping tick), so nothing in the protocol
//! core needs a lock.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{DerethError, NetError, Result, SessionError};
use crate::net::dispatch::{Dispatcher, MessageHandler};
use crate::net::session::{
    DisconnectReason, Session, SessionEvent, SessionOutput, SessionState,
};
use crate::net::transport::Transport;
use crate::protocol::fragment::queues;
use crate::protocol::handshake::Credentials;
use crate::protocol::packet::MAX_PACKET_SIZE;

/// Housekeeping cadence; a quarter of the tightest protocol window
const TICK_INTERVAL: Duration = Duration::from_millis(50);

enum Command {
    Send {
        opcode: u32,
        payload: Vec<u8>,
        queue: u16,
        sent: oneshot::Sender<Result<()>>,
    },
    Disconnect,
}

/// Handle to a connected session
pub struct Client {
    command_tx: mpsc::Sender<Command>,
    events_rx: Option<mpsc::Receiver<SessionEvent>>,
    dispatcher: Arc<Dispatcher>,
    task: JoinHandle<()>,
}

impl Client {
    /// Connect to a game server: bind a socket, run the handshake, and
    /// return once the session is authenticated.
    pub async fn connect(
        endpoint: SocketAddr,
        credentials: Credentials,
        config: ClientConfig,
    ) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(|e| {
            DerethError::Net(NetError::Unreachable(format!(
                "binding local socket: {}",
                e
            )))
        })?;
        Self::connect_with_transport(Arc::new(socket), endpoint, credentials, config).await
    }

    /// Connect over a caller-supplied transport (tests drive a loopback).
    pub async fn connect_with_transport(
        transport: Arc<dyn Transport>,
        endpoint: SocketAddr,
        credentials: Credentials,
        config: ClientConfig,
    ) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel(config.send_queue_depth);
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_depth);
        let (connected_tx, connected_rx) = oneshot::channel();
        let dispatcher = Arc::new(Dispatcher::new());

        let handshake_timeout = config.handshake_timeout();
        let session = Session::new(endpoint, config, Instant::now());
        let mut session_loop = SessionLoop {
            transport,
            peer: endpoint,
            session,
            dispatcher: dispatcher.clone(),
            events_tx,
            command_rx,
            connected_tx: Some(connected_tx),
            flow_spent: 0,
            flow_window_start: Instant::now(),
            deferred: VecDeque::new(),
        };

        let creds = credentials;
        let task = tokio::spawn(async move {
            session_loop.run(creds).await;
        });

        match tokio::time::timeout(handshake_timeout + TICK_INTERVAL, connected_rx).await {
            Ok(Ok(Ok(()))) => {
                info!(%endpoint, "session authenticated");
                Ok(Self {
                    command_tx,
                    events_rx: Some(events_rx),
                    dispatcher,
                    task,
                })
            }
            Ok(Ok(Err(err))) => {
                task.abort();
                Err(err)
            }
            // Loop dropped the sender or the timer fired first.
            Ok(Err(_)) | Err(_) => {
                task.abort();
                Err(DerethError::Session(SessionError::HandshakeTimeout))
            }
        }
    }

    /// Take the session-event receiver. Only the first caller gets it.
    pub fn events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Subscribe a handler for one opcode.
    pub fn on_message(&self, opcode: u32, handler: MessageHandler) {
        self.dispatcher.subscribe(opcode, handler);
    }

    /// Sink for opcodes nobody subscribed to.
    pub fn on_unhandled(&self, handler: MessageHandler) {
        self.dispatcher.set_default(handler);
    }

    /// Send an application message on the general queue.
    pub async fn send(&self, opcode: u32, payload: &[u8]) -> Result<()> {
        self.send_queued(opcode, payload, queues::GENERAL).await
    }

    /// Send an application message to a specific destination queue.
    /// Resolves once the first fragment has been handed to the socket.
    pub async fn send_queued(&self, opcode: u32, payload: &[u8], queue: u16) -> Result<()> {
        let (sent_tx, sent_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Send {
                opcode,
                payload: payload.to_vec(),
                queue,
                sent: sent_tx,
            })
            .await
            .map_err(|_| DerethError::Net(NetError::ChannelClosed))?;
        sent_rx
            .await
            .map_err(|_| DerethError::Net(NetError::ChannelClosed))?
    }

    /// Send the Disconnect-flagged packet and tear the session down.
    pub async fn disconnect(self) -> Result<()> {
        let _ = self.command_tx.send(Command::Disconnect).await;
        let _ = self.task.await;
        Ok(())
    }
}

/// The task that owns the socket and all session state
struct SessionLoop {
    transport: Arc<dyn Transport>,
    peer: SocketAddr,
    session: Session,
    dispatcher: Arc<Dispatcher>,
    events_tx: mpsc::Sender<SessionEvent>,
    command_rx: mpsc::Receiver<Command>,
    connected_tx: Option<oneshot::Sender<Result<()>>>,
    flow_spent: usize,
    flow_window_start: Instant,
    deferred: VecDeque<Vec<u8>>,
}

/// One iteration's input, resolved before any state is touched
enum Input {
    Datagram(Result<usize>),
    Command(Option<Command>),
    Tick,
}

impl SessionLoop {
    async fn run(&mut self, credentials: Credentials) {
        let outputs = self.session.begin_login(&credentials, Instant::now());
        self.process(outputs).await;

        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut buf = vec![0u8; MAX_PACKET_SIZE * 2];

        loop {
            if self.session.state() == SessionState::Dead {
                break;
            }

            let transport = self.transport.clone();
            let input = tokio::select! {
                received = transport.recv_from(&mut buf) => {
                    Input::Datagram(received.map(|(len, _from)| len))
                }
                command = self.command_rx.recv() => Input::Command(command),
                _ = tick.tick() => Input::Tick,
            };
            drop(transport);

            match input {
                Input::Datagram(Ok(len)) => {
                    trace!(len, "datagram received");
                    let now = Instant::now();
                    let mut outputs = self.session.handle_datagram(&buf[..len], now);
                    if self.session.desync_exceeded() {
                        outputs.push(self.session.fail_desync());
                    }
                    self.process(outputs).await;
                }
                Input::Datagram(Err(err)) => {
                    warn!(%err, "socket receive failed");
                    self.emit(SessionEvent::Disconnected(DisconnectReason::TransportClosed))
                        .await;
                    break;
                }
                Input::Command(Some(Command::Send {
                    opcode,
                    payload,
                    queue,
                    sent,
                })) => {
                    let result = self.send_message(opcode, &payload, queue).await;
                    let _ = sent.send(result);
                }
                Input::Command(Some(Command::Disconnect)) | Input::Command(None) => {
                    let outputs = self.session.disconnect(Instant::now());
                    self.process(outputs).await;
                    break;
                }
                Input::Tick => {
                    let outputs = self.session.tick(Instant::now());
                    self.process(outputs).await;
                    self.flush_deferred().await;
                }
            }
        }
        debug!("session loop ended");
    }

    async fn send_message(&mut self, opcode: u32, payload: &[u8], queue: u16) -> Result<()> {
        let mut body = Vec::with_capacity(4 + payload.len());
        body.extend_from_slice(&opcode.to_le_bytes());
        body.extend_from_slice(payload);

        let outputs = self
            .session
            .send_message(&body, queue, Instant::now())
            .map_err(DerethError::Session)?;
        self.process(outputs).await;
        Ok(())
    }

    async fn process(&mut self, outputs: Vec<SessionOutput>) {
        for output in outputs {
            match output {
                SessionOutput::Transmit(bytes) => {
                    self.transmit(bytes).await;
                }
                SessionOutput::TransmitTo(bytes, addr) => {
                    if let Err(err) = self.transport.send_to(&bytes, addr).await {
                        warn!(%err, %addr, "send failed");
                    }
                    // Authentication completes when the ConnectResponse is
                    // on the wire.
                    if self.session.is_authenticated() {
                        if let Some(tx) = self.connected_tx.take() {
                            let _ = tx.send(Ok(()));
                        }
                        self.emit(SessionEvent::Connected).await;
                    }
                }
                SessionOutput::Deliver(message) => {
                    self.dispatcher.dispatch(&message);
                }
                SessionOutput::Event(event) => {
                    if let SessionEvent::Disconnected(reason) = &event {
                        // A refusal during the handshake surfaces to the
                        // caller still waiting in connect().
                        if let Some(tx) = self.connected_tx.take() {
                            let err = match reason {
                                DisconnectReason::HandshakeTimeout => {
                                    DerethError::Session(SessionError::HandshakeTimeout)
                                }
                                DisconnectReason::PeerDisconnected => {
                                    DerethError::Session(SessionError::BadCredentials)
                                }
                                _ => DerethError::Session(SessionError::PeerDisconnected),
                            };
                            let _ = tx.send(Err(err));
                        }
                    }
                    self.emit(event).await;
                }
            }
        }
    }

    /// Send toward the game endpoint, honoring the peer's flow bound.
    async fn transmit(&mut self, bytes: Vec<u8>) {
        if let Some((limit, interval)) = self.session.flow_limit() {
            let now = Instant::now();
            if now.duration_since(self.flow_window_start) >= interval {
                self.flow_window_start = now;
                self.flow_spent = 0;
            }
            if self.flow_spent + bytes.len() > limit as usize {
                trace!(len = bytes.len(), "deferring send past flow window");
                self.deferred.push_back(bytes);
                return;
            }
            self.flow_spent += bytes.len();
        }
        if let Err(err) = self.transport.send_to(&bytes, self.peer).await {
            warn!(%err, "send failed");
        }
    }

    /// Drain deferred datagrams as the flow window allows.
    async fn flush_deferred(&mut self) {
        while let Some(bytes) = self.deferred.pop_front() {
            let allowed = match self.session.flow_limit() {
                Some((limit, interval)) => {
                    let now = Instant::now();
                    if now.duration_since(self.flow_window_start) >= interval {
                        self.flow_window_start = now;
                        self.flow_spent = 0;
                    }
                    self.flow_spent + bytes.len() <= limit as usize
                }
                None => true,
            };
            if !allowed {
                self.deferred.push_front(bytes);
                break;
            }
            self.flow_spent += bytes.len();
            if let Err(err) = self.transport.send_to(&bytes, self.peer).await {
                warn!(%err, "deferred send failed");
            }
        }
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events_tx.send(event).await.is_err() {
            trace!("event receiver dropped");
        }
    }
}
