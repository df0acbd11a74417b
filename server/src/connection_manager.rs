//! Connection tracking for the gateway
//!
//! This module owns the server-side view of every connected peer:
//! - Connection lifecycle (connect, disconnect, idle timeout)
//! - Reliable ordered delivery of `Data` in both directions (acks, resends, reordering)
//! - Capacity limits and the one-session-per-address rule
//!
//! Every connection exclusively owns its [`Session`]. Removing the connection drops
//! the session with it, so nothing can reach a session after its peer is gone.

use crate::session::Session;
use log::info;
use shared::Packet;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

pub type ConnectionId = u32;

/// How far ahead of the next expected sequence inbound data may arrive and still be
/// buffered. Anything further is dropped unacknowledged, so the peer sends it again.
pub const REORDER_WINDOW: u32 = 64;

/// A sent packet the peer has not acknowledged yet
#[derive(Debug, Clone)]
struct InFlight {
    packet: Packet,
    sent_at: Instant,
    resends: u32,
}

/// Takes every in-flight packet older than `resend_timeout` and restamps it
fn take_due(in_flight: &mut BTreeMap<u32, InFlight>, resend_timeout: Duration) -> Vec<Packet> {
    in_flight
        .values_mut()
        .filter(|entry| entry.sent_at.elapsed() >= resend_timeout)
        .map(|entry| {
            entry.sent_at = Instant::now();
            entry.resends += 1;
            entry.packet.clone()
        })
        .collect()
}

/// What became of one inbound data packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Payloads now deliverable in sequence order. Empty when the packet filled no gap.
    Ready(Vec<Vec<u8>>),
    /// Already delivered; acknowledge again and ignore
    Duplicate,
    /// Too far ahead to buffer; dropped without an ack
    OutOfWindow,
}

/// A connected peer and the session it owns
///
/// Each connection maintains:
/// - Transport metadata (ID, address, last activity)
/// - The next inbound sequence to deliver, plus a buffer for data that arrived early
/// - Sent data awaiting acknowledgement, and the next outbound sequence to stamp
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier assigned by the server
    pub id: ConnectionId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
    next_inbound: u32,
    reorder: BTreeMap<u32, Vec<u8>>,
    next_outbound: u32,
    in_flight: BTreeMap<u32, InFlight>,
    /// Set once the peer has sent anything after connecting, proving it got `Connected`
    handshake_confirmed: bool,
    handshake_sent_at: Instant,
    last_ping: Option<Instant>,
    /// Session state for this connection
    pub session: Session,
}

impl Connection {
    /// Creates a connection with a fresh session seeded with the peer's address
    pub fn new(id: ConnectionId, addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            last_seen: now,
            next_inbound: 0,
            reorder: BTreeMap::new(),
            next_outbound: 0,
            in_flight: BTreeMap::new(),
            handshake_confirmed: false,
            handshake_sent_at: now,
            last_ping: None,
            session: Session::new(addr.ip()),
        }
    }

    /// Records activity from the peer
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.handshake_confirmed = true;
    }

    /// Checks if the peer has been silent for longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Slots an inbound data packet into the receive window
    ///
    /// Text commands are stateful, so payloads are only released in the order the peer
    /// sent them. Data that arrives ahead of a gap waits here until the gap is filled.
    pub fn receive(&mut self, sequence: u32, payload: Vec<u8>) -> Inbound {
        if sequence < self.next_inbound {
            return Inbound::Duplicate;
        }
        if sequence - self.next_inbound >= REORDER_WINDOW {
            return Inbound::OutOfWindow;
        }

        self.reorder.insert(sequence, payload);
        let mut ready = Vec::new();
        while let Some(payload) = self.reorder.remove(&self.next_inbound) {
            ready.push(payload);
            self.next_inbound += 1;
        }
        Inbound::Ready(ready)
    }

    /// Wraps `payload` in the next data packet and tracks it until acknowledged
    pub fn send_data(&mut self, payload: Vec<u8>) -> Packet {
        let sequence = self.next_outbound;
        self.next_outbound = self.next_outbound.wrapping_add(1);

        let packet = Packet::Data { sequence, payload };
        self.in_flight.insert(
            sequence,
            InFlight {
                packet: packet.clone(),
                sent_at: Instant::now(),
                resends: 0,
            },
        );
        packet
    }

    /// Clears an acknowledged packet. Returns false for unknown or repeated acks.
    pub fn acknowledge(&mut self, sequence: u32) -> bool {
        self.in_flight.remove(&sequence).is_some()
    }

    pub fn unacknowledged(&self) -> usize {
        self.in_flight.len()
    }

    /// Packets to send again: unacknowledged data, and `Connected` while the peer has
    /// not shown it arrived
    pub fn due_for_resend(&mut self, resend_timeout: Duration) -> Vec<Packet> {
        let mut packets = Vec::new();
        if !self.handshake_confirmed && self.handshake_sent_at.elapsed() >= resend_timeout {
            self.handshake_sent_at = Instant::now();
            packets.push(Packet::Connected {
                connection_id: self.id,
            });
        }
        packets.extend(take_due(&mut self.in_flight, resend_timeout));
        packets
    }

    /// True once some packet has been sent more than `max_resends` times unanswered
    pub fn resends_exhausted(&self, max_resends: u32) -> bool {
        self.in_flight.values().any(|entry| entry.resends > max_resends)
    }

    /// Whether a quiet peer should be pinged now. Marks the ping as sent.
    pub fn ping_due(&mut self, ping_interval: Duration) -> bool {
        let quiet = self.last_seen.elapsed() >= ping_interval;
        let ping_stale = self
            .last_ping
            .map_or(true, |sent| sent.elapsed() >= ping_interval);
        if quiet && ping_stale {
            self.last_ping = Some(Instant::now());
            return true;
        }
        false
    }

    /// Drops the session and keeps what is needed to finish closing the transport
    pub fn into_closing(self, reason: &str) -> Closing {
        Closing {
            addr: self.addr,
            reason: reason.to_string(),
            in_flight: self.in_flight,
            sent_at: Instant::now(),
            resends: 0,
        }
    }
}

/// A connection the server has closed, kept until the peer confirms with `Disconnect`
///
/// Data still unacknowledged at close time keeps being repeated along with the
/// `Disconnected` notice, so a redirect is not lost to a dropped datagram.
#[derive(Debug)]
pub struct Closing {
    pub addr: SocketAddr,
    reason: String,
    in_flight: BTreeMap<u32, InFlight>,
    sent_at: Instant,
    resends: u32,
}

impl Closing {
    pub fn notice(&self) -> Packet {
        Packet::Disconnected {
            reason: self.reason.clone(),
        }
    }

    pub fn acknowledge(&mut self, sequence: u32) {
        self.in_flight.remove(&sequence);
    }

    /// Outstanding data followed by the notice, once every `resend_timeout`
    pub fn due_for_resend(&mut self, resend_timeout: Duration) -> Vec<Packet> {
        if self.sent_at.elapsed() < resend_timeout {
            return Vec::new();
        }
        self.sent_at = Instant::now();
        self.resends += 1;

        let mut packets: Vec<Packet> = self
            .in_flight
            .values()
            .map(|entry| entry.packet.clone())
            .collect();
        packets.push(self.notice());
        packets
    }

    pub fn resends_exhausted(&self, max_resends: u32) -> bool {
        self.resends > max_resends
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("address already holds connection {0}")]
    AlreadyConnected(ConnectionId),
    #[error("server is full")]
    Full,
}

/// Manages all connected peers
///
/// The ConnectionManager enforces the capacity limit, allows a single connection per
/// peer address, and reaps connections that have gone quiet.
pub struct ConnectionManager {
    /// Connections indexed by their unique ID
    connections: HashMap<ConnectionId, Connection>,
    /// Next available connection ID
    next_connection_id: ConnectionId,
    /// Maximum number of concurrent connections allowed
    max_connections: usize,
}

impl ConnectionManager {
    /// Creates an empty manager. Connection IDs start from 1.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_connection_id: 1,
            max_connections,
        }
    }

    /// Attempts to register a new connection for `addr`
    ///
    /// A second connect from an address that already holds a connection is refused and
    /// the existing connection is left exactly as it was.
    pub fn add_connection(&mut self, addr: SocketAddr) -> Result<ConnectionId, ConnectError> {
        if let Some(existing) = self.find_by_addr(addr) {
            return Err(ConnectError::AlreadyConnected(existing));
        }
        if self.connections.len() >= self.max_connections {
            return Err(ConnectError::Full);
        }

        let id = self.next_connection_id;
        self.next_connection_id = self.next_connection_id.wrapping_add(1).max(1);

        info!("Connection {} established from {}", id, addr);
        self.connections.insert(id, Connection::new(id, addr));
        Ok(id)
    }

    /// Removes a connection, returning it so the caller can notify the peer
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        info!("Connection {} from {} closed", connection.id, connection.addr);
        Some(connection)
    }

    /// Finds a connection ID by peer address
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|(_, connection)| connection.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    /// Removes connections idle for longer than `timeout`, returning them
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<Connection> {
        let timed_out: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|id| self.remove_connection(id))
            .collect()
    }

    /// Returns the number of open connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LoginToken, SessionState};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_connection_creation() {
        let addr = test_addr();
        let connection = Connection::new(1, addr);

        assert_eq!(connection.id, 1);
        assert_eq!(connection.addr, addr);
        assert_eq!(connection.unacknowledged(), 0);
        assert_eq!(connection.session.credentials().address, addr.ip());
        assert_eq!(connection.session.state(), SessionState::Unauthenticated);
    }

    #[test]
    fn test_inbound_data_released_in_order() {
        let mut connection = Connection::new(1, test_addr());

        assert_eq!(connection.receive(0, vec![0]), Inbound::Ready(vec![vec![0]]));
        // 2 arrives before 1 and waits for it
        assert_eq!(connection.receive(2, vec![2]), Inbound::Ready(vec![]));
        assert_eq!(connection.receive(2, vec![2]), Inbound::Ready(vec![]));
        assert_eq!(
            connection.receive(1, vec![1]),
            Inbound::Ready(vec![vec![1], vec![2]])
        );
        assert_eq!(connection.receive(1, vec![1]), Inbound::Duplicate);
        assert_eq!(connection.receive(3 + REORDER_WINDOW, vec![9]), Inbound::OutOfWindow);
        assert_eq!(connection.receive(3, vec![3]), Inbound::Ready(vec![vec![3]]));
    }

    #[test]
    fn test_outbound_data_tracked_until_acked() {
        let mut connection = Connection::new(1, test_addr());

        assert_eq!(
            connection.send_data(vec![7]),
            Packet::Data {
                sequence: 0,
                payload: vec![7]
            }
        );
        connection.send_data(vec![8]);
        assert_eq!(connection.unacknowledged(), 2);

        assert!(connection.acknowledge(0));
        assert!(!connection.acknowledge(0));
        assert!(!connection.acknowledge(5));
        assert_eq!(connection.unacknowledged(), 1);
    }

    #[test]
    fn test_resend_schedule() {
        let mut connection = Connection::new(4, test_addr());
        connection.send_data(vec![1]);

        // Nothing is due before the timeout
        assert!(connection.due_for_resend(Duration::from_secs(60)).is_empty());

        // Until the peer answers, Connected is repeated along with the data
        let due = connection.due_for_resend(Duration::ZERO);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0], Packet::Connected { connection_id: 4 });

        connection.touch();
        let due = connection.due_for_resend(Duration::ZERO);
        assert_eq!(due.len(), 1);
        assert!(matches!(due[0], Packet::Data { sequence: 0, .. }));

        assert!(!connection.resends_exhausted(2));
        connection.due_for_resend(Duration::ZERO);
        assert!(connection.resends_exhausted(2));

        connection.acknowledge(0);
        assert!(connection.due_for_resend(Duration::ZERO).is_empty());
        assert!(!connection.resends_exhausted(2));
    }

    #[test]
    fn test_ping_only_when_quiet() {
        let mut connection = Connection::new(1, test_addr());
        let interval = Duration::from_secs(1);

        assert!(!connection.ping_due(interval));

        connection.last_seen = Instant::now() - Duration::from_secs(3);
        assert!(connection.ping_due(interval));
        // Not repeated until another interval passes
        assert!(!connection.ping_due(interval));

        connection.touch();
        assert!(!connection.ping_due(interval));
    }

    #[test]
    fn test_closing_repeats_notice_and_unacked_data() {
        let mut connection = Connection::new(1, test_addr());
        connection.send_data(vec![1]);
        connection.send_data(vec![2]);
        connection.acknowledge(0);

        let mut closing = connection.into_closing("Closed by server");
        assert_eq!(closing.addr, test_addr());
        assert!(closing.due_for_resend(Duration::from_secs(60)).is_empty());

        let due = closing.due_for_resend(Duration::ZERO);
        assert_eq!(due.len(), 2);
        assert!(matches!(due[0], Packet::Data { sequence: 1, .. }));
        assert_eq!(due[1], closing.notice());

        closing.acknowledge(1);
        assert_eq!(closing.due_for_resend(Duration::ZERO), vec![closing.notice()]);
        assert!(closing.resends_exhausted(1));
    }

    #[test]
    fn test_connection_timeout() {
        let mut connection = Connection::new(1, test_addr());

        assert!(!connection.is_timed_out(Duration::from_secs(1)));

        connection.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(connection.is_timed_out(Duration::from_secs(1)));

        connection.touch();
        assert!(!connection.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_add_connections() {
        let mut manager = ConnectionManager::new(3);

        assert_eq!(manager.add_connection(test_addr()), Ok(1));
        assert_eq!(manager.add_connection(test_addr2()), Ok(2));
        assert_eq!(manager.len(), 2);
        assert!(!manager.is_empty());
    }

    #[test]
    fn test_double_connect_keeps_existing_session() {
        let mut manager = ConnectionManager::new(3);
        let id = manager.add_connection(test_addr()).unwrap();
        manager
            .get(id)
            .unwrap()
            .session
            .set_login(LoginToken::default());

        assert_eq!(
            manager.add_connection(test_addr()),
            Err(ConnectError::AlreadyConnected(id))
        );
        assert_eq!(manager.len(), 1);
        assert!(manager.get(id).unwrap().session.bootstrapped());
    }

    #[test]
    fn test_capacity() {
        let mut manager = ConnectionManager::new(1);

        assert!(manager.add_connection(test_addr()).is_ok());
        assert_eq!(manager.add_connection(test_addr2()), Err(ConnectError::Full));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_connection() {
        let mut manager = ConnectionManager::new(2);
        let id = manager.add_connection(test_addr()).unwrap();

        let removed = manager.remove_connection(id).unwrap();
        assert_eq!(removed.addr, test_addr());
        assert!(manager.is_empty());
        assert!(manager.remove_connection(id).is_none());
        assert_eq!(manager.find_by_addr(test_addr()), None);
    }

    #[test]
    fn test_find_by_addr() {
        let mut manager = ConnectionManager::new(2);
        let id1 = manager.add_connection(test_addr()).unwrap();
        let _id2 = manager.add_connection(test_addr2()).unwrap();

        assert_eq!(manager.find_by_addr(test_addr()), Some(id1));
        let unknown: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(manager.find_by_addr(unknown), None);
    }

    #[test]
    fn test_check_timeouts() {
        let mut manager = ConnectionManager::new(2);
        let stale = manager.add_connection(test_addr()).unwrap();
        let fresh = manager.add_connection(test_addr2()).unwrap();
        manager.get_mut(stale).unwrap().last_seen = Instant::now() - Duration::from_secs(30);

        let removed = manager.check_timeouts(Duration::from_secs(10));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, stale);
        assert!(manager.get(fresh).is_some());
        assert!(manager.get(stale).is_none());
    }
}
