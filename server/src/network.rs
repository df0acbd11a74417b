//! Gateway network layer: the UDP transport, connection lifecycle and the event loop

use crate::config::GatewayConfig;
use crate::connection_manager::{
    Closing, ConnectError, Connection, ConnectionId, ConnectionManager, Inbound,
};
use crate::error::Result;
use crate::gateway::Gateway;
use crate::outbound::console_message;
use crate::reputation::{ReputationClient, Verdict};
use crate::session::SessionState;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{encode_hello, Packet, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

const VALIDATING_NOTICE: &str = "`oValidating request...";

const REPUTATION_WARNING: &str = "`o`6Warning``: It appears you're using a `4prohibited third-party application`` or logging in with a `4prohibited address``.";

type SendError = Box<dyn std::error::Error + Send + Sync>;

/// Messages sent from network and lookup tasks to the main loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    /// A reputation lookup started at connect time has finished
    ReputationChecked {
        connection_id: ConnectionId,
        verdict: Verdict,
    },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// The gateway server: owns the socket, every connection and the handler registries
pub struct Server {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    connections: ConnectionManager,
    /// Closed connections waiting for the peer to confirm
    closing: HashMap<SocketAddr, Closing>,
    gateway: Gateway,
    reputation: ReputationClient,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Server {
    /// Binds the socket and builds the handler registries. A bind failure is fatal.
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind(&config.bind_address).await?;
        let local_addr = socket.local_addr()?;
        info!("Gateway listening on {}", local_addr);

        let reputation = ReputationClient::new(config.reputation_url.as_deref());
        if !reputation.is_enabled() {
            warn!("No reputation service configured, every address is treated as clean");
        }
        let connections = ConnectionManager::new(config.max_connections);
        let gateway = Gateway::new(config)?;

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket: Arc::new(socket),
            local_addr,
            connections,
            closing: HashMap::new(),
            gateway,
            reputation,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sender for injecting messages into the loop, e.g. [`ServerMessage::Shutdown`]
    pub fn sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<Packet>(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(_) => warn!("Failed to deserialize packet from {}", addr),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue in order
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut outbound_rx =
            std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> std::result::Result<(), SendError> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Sends right away, bypassing the queue
    async fn send_now(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = Self::send_packet_impl(&self.socket, packet, addr).await {
            error!("Failed to send packet to {}: {}", addr, e);
        }
    }

    fn queue_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Ends the session and tells the peer, repeating the notice until it confirms
    fn close(&mut self, connection: Connection, reason: &str) {
        connection.session.set_state(SessionState::Disconnected);
        let closing = connection.into_closing(reason);
        self.queue_packet(closing.notice(), closing.addr);
        self.closing.insert(closing.addr, closing);
    }

    /// Ends the session of a peer that stopped answering. The notice is sent once.
    fn abandon(&self, connection: Connection, reason: &str) {
        connection.session.set_state(SessionState::Disconnected);
        self.queue_packet(
            Packet::Disconnected {
                reason: reason.to_string(),
            },
            connection.addr,
        );
    }

    async fn handle_connect(&mut self, client_version: u32, addr: SocketAddr) {
        info!("Client connecting from {} (version: {})", addr, client_version);

        if client_version != PROTOCOL_VERSION {
            warn!("Rejecting {} with unsupported version {}", addr, client_version);
            let response = Packet::Disconnected {
                reason: "Unsupported client version".to_string(),
            };
            self.send_now(&response, addr).await;
            return;
        }

        if self.closing.remove(&addr).is_some() {
            debug!("{} reconnected while its old connection was closing", addr);
        }

        let connection_id = match self.connections.add_connection(addr) {
            Ok(id) => id,
            Err(ConnectError::AlreadyConnected(existing)) => {
                warn!(
                    "Ignoring second connect from {}, connection {} is still open",
                    addr, existing
                );
                return;
            }
            Err(ConnectError::Full) => {
                let response = Packet::Disconnected {
                    reason: "Server full".to_string(),
                };
                self.send_now(&response, addr).await;
                return;
            }
        };

        let Some(connection) = self.connections.get_mut(connection_id) else {
            return;
        };
        let ip = connection.session.credentials().address;
        let notice = connection.send_data(console_message(VALIDATING_NOTICE).into_bytes());

        self.send_now(&Packet::Connected { connection_id }, addr).await;
        self.send_now(&notice, addr).await;

        let config = &self.gateway.config;
        let timeout = if self.gateway.cache.exists(&ip.to_string()) {
            config.cached_reputation_timeout
        } else {
            config.reputation_timeout
        };

        let reputation = self.reputation.clone();
        let server_tx = self.server_tx.clone();
        tokio::spawn(async move {
            let verdict = reputation.check(ip, timeout).await;
            if let Err(e) = server_tx.send(ServerMessage::ReputationChecked {
                connection_id,
                verdict,
            }) {
                debug!("Main loop gone before verdict for {}: {}", connection_id, e);
            }
        });
    }

    fn handle_verdict(&mut self, connection_id: ConnectionId, verdict: Verdict) {
        let Some(connection) = self.connections.get_mut(connection_id) else {
            debug!("Verdict for closed connection {} discarded", connection_id);
            return;
        };
        let addr = connection.addr;
        let mut packets = Vec::new();

        match verdict {
            Verdict::Block => {
                warn!("Blocking {}: address failed the reputation check", addr);
                if let Some(connection) = self.connections.remove_connection(connection_id) {
                    self.close(connection, "Access denied");
                }
                return;
            }
            Verdict::Warn => {
                info!("{} has a poor reputation score, flagging session", addr);
                connection.session.lock().attributes.reputation_warning = true;
                packets.push(connection.send_data(console_message(REPUTATION_WARNING).into_bytes()));
            }
            Verdict::Clean => {}
        }

        connection.session.set_state(SessionState::PendingBootstrap);
        packets.push(connection.send_data(encode_hello()));

        for packet in packets {
            self.queue_packet(packet, addr);
        }
    }

    fn handle_data(&mut self, sequence: u32, payload: Vec<u8>, addr: SocketAddr) {
        let Some(connection_id) = self.connections.find_by_addr(addr) else {
            debug!("Data from unknown peer {} dropped", addr);
            return;
        };
        let Some(connection) = self.connections.get_mut(connection_id) else {
            return;
        };
        connection.touch();

        // Left unacknowledged so the peer repeats it once the verdict is in
        if connection.session.state() == SessionState::Unauthenticated {
            debug!("Data from {} dropped, reputation check still pending", addr);
            return;
        }

        let ready = match connection.receive(sequence, payload) {
            Inbound::Ready(ready) => ready,
            Inbound::Duplicate => {
                debug!("Duplicate sequence {} from {}", sequence, addr);
                Vec::new()
            }
            Inbound::OutOfWindow => {
                debug!("Sequence {} from {} is too far ahead, dropped", sequence, addr);
                return;
            }
        };

        let mut packets = vec![Packet::Ack { sequence }];
        let mut disconnect = false;
        for payload in ready {
            let outbox = self
                .gateway
                .handle_message(connection_id, addr, &connection.session, &payload);
            let (frames, close) = outbox.into_parts();
            packets.extend(frames.into_iter().map(|frame| connection.send_data(frame)));
            if close {
                disconnect = true;
                break;
            }
        }

        for packet in packets {
            self.queue_packet(packet, addr);
        }

        if disconnect {
            if let Some(connection) = self.connections.remove_connection(connection_id) {
                self.close(connection, "Closed by server");
            }
        }
    }

    fn handle_ack(&mut self, sequence: u32, addr: SocketAddr) {
        if let Some(id) = self.connections.find_by_addr(addr) {
            if let Some(connection) = self.connections.get_mut(id) {
                connection.touch();
                connection.acknowledge(sequence);
            }
        } else if let Some(closing) = self.closing.get_mut(&addr) {
            closing.acknowledge(sequence);
        }
    }

    /// Any sign of life from a connected peer counts as activity
    fn handle_keepalive(&mut self, addr: SocketAddr) -> bool {
        let Some(id) = self.connections.find_by_addr(addr) else {
            return false;
        };
        match self.connections.get_mut(id) {
            Some(connection) => {
                connection.touch();
                true
            }
            None => false,
        }
    }

    /// Processes incoming packets
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => self.handle_connect(client_version, addr).await,
            Packet::Data { sequence, payload } => self.handle_data(sequence, payload, addr),
            Packet::Ack { sequence } => self.handle_ack(sequence, addr),
            Packet::Ping => {
                if self.handle_keepalive(addr) {
                    self.queue_packet(Packet::Pong, addr);
                }
            }
            Packet::Pong => {
                self.handle_keepalive(addr);
            }
            Packet::Disconnect => {
                if self.closing.remove(&addr).is_some() {
                    debug!("{} confirmed the disconnect", addr);
                } else if let Some(id) = self.connections.find_by_addr(addr) {
                    if let Some(connection) = self.connections.remove_connection(id) {
                        connection.session.set_state(SessionState::Disconnected);
                    }
                }
            }
            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    fn check_timeouts(&mut self) {
        let idle_timeout = self.gateway.config.idle_timeout;
        for connection in self.connections.check_timeouts(idle_timeout) {
            info!("Connection {} from {} timed out", connection.id, connection.addr);
            self.abandon(connection, "Timed out");
        }
    }

    /// Repeats unacknowledged packets and gives up on peers that never answer
    fn retransmit(&mut self) {
        let resend_timeout = self.gateway.config.resend_timeout;
        let max_resends = self.gateway.config.max_resends;
        let mut outgoing = Vec::new();
        let mut unresponsive = Vec::new();

        for connection in self.connections.iter_mut() {
            if connection.resends_exhausted(max_resends) {
                unresponsive.push(connection.id);
                continue;
            }
            let addr = connection.addr;
            outgoing.extend(
                connection
                    .due_for_resend(resend_timeout)
                    .into_iter()
                    .map(|packet| (packet, addr)),
            );
        }

        for closing in self.closing.values_mut() {
            let addr = closing.addr;
            outgoing.extend(
                closing
                    .due_for_resend(resend_timeout)
                    .into_iter()
                    .map(|packet| (packet, addr)),
            );
        }
        self.closing
            .retain(|_, closing| !closing.resends_exhausted(max_resends));

        for id in unresponsive {
            if let Some(connection) = self.connections.remove_connection(id) {
                warn!("Connection {} from {} stopped acknowledging", connection.id, connection.addr);
                self.abandon(connection, "Timed out");
            }
        }
        for (packet, addr) in outgoing {
            self.queue_packet(packet, addr);
        }
    }

    /// Pings peers that have gone quiet; live ones answer and stay connected
    fn send_pings(&mut self) {
        let ping_interval = self.gateway.config.ping_interval;
        let quiet: Vec<SocketAddr> = self
            .connections
            .iter_mut()
            .filter_map(|connection| connection.ping_due(ping_interval).then_some(connection.addr))
            .collect();

        for addr in quiet {
            self.queue_packet(Packet::Ping, addr);
        }
    }

    fn maintain(&mut self) {
        self.check_timeouts();
        self.retransmit();
        self.send_pings();
    }

    /// Main server loop. Runs until a shutdown message arrives.
    pub async fn run(&mut self) -> Result<()> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut maintenance = interval(self.gateway.config.maintenance_interval);

        info!("Gateway started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        }
                        Some(ServerMessage::ReputationChecked { connection_id, verdict }) => {
                            self.handle_verdict(connection_id, verdict);
                        }
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Shutting down gateway");
                            break;
                        }
                    }
                }
                _ = maintenance.tick() => {
                    self.maintain();
                }
            }

            let swept = self.gateway.cache.sweep_expired();
            if swept > 0 {
                debug!("Swept {} expired cache entries", swept);
            }
        }

        Ok(())
    }
}
