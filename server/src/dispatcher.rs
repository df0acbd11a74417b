//! Command routing: key extraction, the bootstrap gate, role checks and
//! error containment around handler calls.

use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::outbound::{console_message, Outbox};
use crate::session::{Attribute, LoginToken, Role, Session};
use log::{debug, error, warn};
use shared::{FrameBuilder, TextScanner};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

/// Which inbound message type a dispatcher serves. Key promotion differs per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    GenericText,
    GameMessage,
}

/// How the command key was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// `dialog_name` of a dialog return
    DialogReturn(String),
    /// First key was `protocol`; the command is the key of the second line
    Protocol(String),
    /// A lone `key|value` line names its command in the value
    SingleLine(String),
    /// `action|<command>`
    Action(String),
    Plain(String),
}

impl Envelope {
    pub fn classify(channel: Channel, scanner: &TextScanner) -> Self {
        match channel {
            Channel::GenericText => Self::classify_generic_text(scanner),
            Channel::GameMessage => Self::classify_game_message(scanner),
        }
    }

    fn classify_generic_text(scanner: &TextScanner) -> Self {
        let dialog_name = scanner.get("dialog_name", 1);
        if !dialog_name.is_empty() {
            return Envelope::DialogReturn(dialog_name.to_string());
        }
        if scanner.field(0, 0) == "protocol" {
            return Envelope::Protocol(scanner.field(1, 0).to_string());
        }
        if scanner.line_count() == 1 {
            return Envelope::SingleLine(scanner.field(0, 1).to_string());
        }
        Envelope::Plain(scanner.field(0, 0).to_string())
    }

    fn classify_game_message(scanner: &TextScanner) -> Self {
        if scanner.field(0, 0) == "action" || scanner.line_count() == 1 {
            return Envelope::Action(scanner.field(0, 1).to_string());
        }
        Envelope::Plain(scanner.field(0, 0).to_string())
    }

    pub fn key(&self) -> &str {
        match self {
            Envelope::DialogReturn(key)
            | Envelope::Protocol(key)
            | Envelope::SingleLine(key)
            | Envelope::Action(key)
            | Envelope::Plain(key) => key,
        }
    }
}

/// Everything a handler may touch while serving one message
pub struct Context<'a> {
    pub connection_id: u32,
    pub peer: SocketAddr,
    pub session: &'a Session,
    pub gateway: &'a Gateway,
    pub outbox: &'a mut Outbox,
}

impl Context<'_> {
    pub fn send(&mut self, frame: FrameBuilder) {
        self.outbox.send(frame);
    }

    pub fn disconnect(&mut self) {
        self.outbox.disconnect();
    }

    /// Login token recorded at bootstrap. Handlers behind the bootstrap gate can rely on it.
    pub fn login(&self) -> Result<LoginToken> {
        self.session
            .login()
            .ok_or_else(|| GatewayError::Denied("`4Please log in again.``".to_string()))
    }
}

/// Returns the advisory flag: true if the connection should carry on as usual
pub type HandlerFn = fn(&mut Context<'_>, &TextScanner) -> Result<bool>;

#[derive(Clone, Copy)]
pub struct HandlerEntry {
    pub required_role: Role,
    pub required_attribute: Attribute,
    pub handler: HandlerFn,
}

impl HandlerEntry {
    /// A handler anyone past the bootstrap gate may run
    pub fn open(handler: HandlerFn) -> Self {
        Self {
            required_role: Role::empty(),
            required_attribute: Attribute::empty(),
            handler,
        }
    }

    pub fn requires(mut self, role: Role) -> Self {
        self.required_role = role;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Handled { advisory: bool },
    /// Handler returned a domain error, already shown to the player
    Failed,
    /// Bootstrap not completed yet
    Locked,
    Unknown,
    Unauthorized,
}

pub struct Dispatcher {
    channel: Channel,
    bootstrap_keys: &'static [&'static str],
    handlers: RwLock<HashMap<String, HandlerEntry>>,
}

impl Dispatcher {
    pub fn new(channel: Channel, bootstrap_keys: &'static [&'static str]) -> Self {
        Self {
            channel,
            bootstrap_keys,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, key: &str, entry: HandlerEntry) -> Result<()> {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        if handlers.contains_key(key) {
            return Err(GatewayError::DuplicateHandler(key.to_string()));
        }
        handlers.insert(key.to_string(), entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &str) -> Option<HandlerEntry> {
        self.handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .copied()
    }

    pub fn dispatch(&self, ctx: &mut Context<'_>, scanner: &TextScanner) -> Dispatch {
        let envelope = Envelope::classify(self.channel, scanner);
        let key = envelope.key();

        let is_bootstrap = self.bootstrap_keys.iter().any(|bootstrap| *bootstrap == key);
        if !is_bootstrap && !ctx.session.bootstrapped() {
            debug!("Refusing {} from {} before bootstrap", key, ctx.peer);
            return Dispatch::Locked;
        }

        let Some(entry) = self.lookup(key) else {
            warn!("Unhandled key {} from {}", key, ctx.peer);
            return Dispatch::Unknown;
        };

        let has_role = ctx.session.roles().contains(entry.required_role);
        let has_attribute = ctx.session.attribute_flags().contains(entry.required_attribute);
        if !(has_role && has_attribute) {
            debug!("{} is not authorized for {}", ctx.peer, key);
            return Dispatch::Unauthorized;
        }

        match (entry.handler)(ctx, scanner) {
            Ok(advisory) => {
                debug!("{} handled for {} (advisory: {})", key, ctx.peer, advisory);
                Dispatch::Handled { advisory }
            }
            Err(e) => {
                let credentials = ctx.session.credentials();
                error!(
                    "Error when player with {}({}) executing {}: {}",
                    ctx.peer, credentials.account_name, key, e
                );
                ctx.send(console_message(&e.player_message()));
                Dispatch::Failed
            }
        }
    }
}
