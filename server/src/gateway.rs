//! Registries and collaborators shared by every handler, built once at startup.

use crate::cache::SessionCache;
use crate::config::GatewayConfig;
use crate::dispatcher::{Channel, Context, Dispatch, Dispatcher};
use crate::error::Result;
use crate::handlers;
use crate::outbound::Outbox;
use crate::session::Session;
use crate::store::DocumentStore;
use log::{debug, warn};
use shared::{decode_message, MessageType, TextScanner};
use std::net::SocketAddr;

/// Commands accepted before a login has been recorded
pub const BOOTSTRAP_KEYS: &[&str] = &["ltoken", "tankIDName"];

pub struct Gateway {
    pub config: GatewayConfig,
    pub store: DocumentStore,
    pub cache: SessionCache,
    generic_text: Dispatcher,
    game_message: Dispatcher,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let store = DocumentStore::new(config.database_dir.clone());
        let generic_text = Dispatcher::new(Channel::GenericText, BOOTSTRAP_KEYS);
        let game_message = Dispatcher::new(Channel::GameMessage, &[]);

        handlers::register_generic_text(&generic_text)?;
        handlers::register_game_message(&game_message)?;
        debug!(
            "Registered {} generic text and {} game message handlers",
            generic_text.len(),
            game_message.len()
        );

        Ok(Self {
            config,
            store,
            cache: SessionCache::new(),
            generic_text,
            game_message,
        })
    }

    /// Decodes one inbound game message and routes it. The returned outbox holds the
    /// frames to send back and whether to close the connection afterwards.
    pub fn handle_message(
        &self,
        connection_id: u32,
        peer: SocketAddr,
        session: &Session,
        payload: &[u8],
    ) -> Outbox {
        let mut outbox = Outbox::new();

        let message = match decode_message(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Undecodable message from {}: {}", peer, e);
                return outbox;
            }
        };
        debug!(
            "Message type {} from {} >> {:?}",
            message.message_type, peer, message.text
        );

        let dispatcher = match MessageType::from_u32(message.message_type) {
            Some(MessageType::GenericText) => &self.generic_text,
            Some(MessageType::GameMessage) => &self.game_message,
            _ => {
                warn!(
                    "Unhandled message type {} from {}",
                    message.message_type, peer
                );
                return outbox;
            }
        };

        let scanner = TextScanner::parse(&message.text);
        let mut ctx = Context {
            connection_id,
            peer,
            session,
            gateway: self,
            outbox: &mut outbox,
        };
        if dispatcher.dispatch(&mut ctx, &scanner) == Dispatch::Failed {
            debug!("Connection {} kept open after handler failure", connection_id);
        }

        outbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{encode_text_message, ParsedFrame};
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::tempdir;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_handlers_registered() {
        let dir = tempdir().unwrap();
        let gateway = Gateway::new(GatewayConfig {
            database_dir: dir.path().to_path_buf(),
            ..GatewayConfig::default()
        })
        .unwrap();

        assert_eq!(gateway.generic_text.len(), 3);
        assert_eq!(gateway.game_message.len(), 4);
    }

    #[test]
    fn test_unknown_message_type_ignored() {
        let dir = tempdir().unwrap();
        let gateway = Gateway::new(GatewayConfig {
            database_dir: dir.path().to_path_buf(),
            ..GatewayConfig::default()
        })
        .unwrap();
        let session = Session::new(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let outbox = gateway.handle_message(1, peer(), &session, &encode_text_message(MessageType::GamePacket, "x"));
        assert!(outbox.frames().is_empty());

        let outbox = gateway.handle_message(1, peer(), &session, &[2, 0]);
        assert!(outbox.frames().is_empty());
    }

    #[test]
    fn test_ltoken_message_routes_to_redirect() {
        use base64::Engine;

        let dir = tempdir().unwrap();
        let gateway = Gateway::new(GatewayConfig {
            database_dir: dir.path().to_path_buf(),
            ..GatewayConfig::default()
        })
        .unwrap();
        let session = Session::new(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let token = base64::engine::general_purpose::STANDARD
            .encode("_session=S1&merchant_name=M1&growId=G&password=P");
        let payload = encode_text_message(
            MessageType::GenericText,
            &format!("protocol|209\nltoken|{}\n", token),
        );
        let outbox = gateway.handle_message(1, peer(), &session, &payload);

        assert!(outbox.should_disconnect());
        let names: Vec<String> = outbox
            .frames()
            .iter()
            .map(|f| ParsedFrame::parse(f).unwrap().function_name().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["OnConsoleMessage", "SetHasGrowID", "OnSendToServer"]);
    }
}
