//! Per-connection session state: credentials, authorization bitsets and the
//! attribute record the login workflow builds up.

use bitflags::bitflags;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

bitflags! {
    /// Authorization roles. The empty set is the plain player role.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Role: u32 {
        const MERCHANT = 1 << 0;
        const ADMIN = 1 << 10;
    }
}

bitflags! {
    /// Orthogonal authorization attributes. None are defined yet, so every
    /// requirement is the empty set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Attribute: u32 {}
}

impl Default for Role {
    fn default() -> Self {
        Self::empty()
    }
}

impl Default for Attribute {
    fn default() -> Self {
        Self::empty()
    }
}

impl Role {
    /// Highest single role held, ADMIN > MERCHANT > none
    pub fn highest(self) -> Role {
        if self.contains(Role::ADMIN) {
            Role::ADMIN
        } else if self.contains(Role::MERCHANT) {
            Role::MERCHANT
        } else {
            Role::empty()
        }
    }

    fn rank(self) -> u8 {
        match self.highest() {
            r if r == Role::ADMIN => 2,
            r if r == Role::MERCHANT => 1,
            _ => 0,
        }
    }

    /// Holds `role` outright, or holds something that outranks it
    pub fn at_least(self, role: Role) -> bool {
        self.contains(role) || self.rank() >= role.rank()
    }

    /// Role named in a merchant document
    pub fn from_document_role(name: &str) -> Role {
        match name {
            "admin" => Role::ADMIN,
            "merchant" => Role::MERCHANT,
            _ => Role::empty(),
        }
    }

    pub fn name(self) -> &'static str {
        match self.highest() {
            r if r == Role::ADMIN => "Admin",
            r if r == Role::MERCHANT => "Merchant",
            _ => "Player",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account_name: String,
    pub account_secret: String,
    pub address: IpAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, reputation verdict outstanding
    Unauthenticated,
    /// Hello sent, waiting for `ltoken` or `tankIDName`
    PendingBootstrap,
    Authenticated,
    WorldListShown,
    PendingRedirect,
    Disconnected,
}

/// What the client presented at bootstrap
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoginToken {
    pub session: String,
    pub merchant: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionAttributes {
    /// Set once a bootstrap command has been accepted
    pub login: Option<LoginToken>,
    /// Reason the fingerprint heuristic flagged the client, if it did
    pub third_party: Option<String>,
    /// Reputation service returned a medium-risk score
    pub reputation_warning: bool,
    /// World list page currently shown
    pub page: usize,
}

impl SessionAttributes {
    pub fn bootstrapped(&self) -> bool {
        self.login.is_some()
    }

    pub fn risk_flagged(&self) -> bool {
        self.third_party.is_some() || self.reputation_warning
    }
}

#[derive(Debug, Clone)]
pub struct SessionData {
    pub credentials: Credentials,
    pub roles: Role,
    pub attribute_flags: Attribute,
    pub state: SessionState,
    pub attributes: SessionAttributes,
}

/// Mutex-guarded session. Each accessor holds the lock only for its own read or write.
#[derive(Debug)]
pub struct Session {
    inner: Mutex<SessionData>,
}

impl Session {
    pub fn new(address: IpAddr) -> Self {
        Self {
            inner: Mutex::new(SessionData {
                credentials: Credentials {
                    account_name: String::new(),
                    account_secret: String::new(),
                    address,
                },
                roles: Role::empty(),
                attribute_flags: Attribute::empty(),
                state: SessionState::Unauthenticated,
                attributes: SessionAttributes::default(),
            }),
        }
    }

    /// A poisoned lock only means a handler panicked mid-update; the data is still usable.
    pub fn lock(&self) -> MutexGuard<'_, SessionData> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn credentials(&self) -> Credentials {
        self.lock().credentials.clone()
    }

    pub fn set_account(&self, name: &str, secret: &str) {
        let mut data = self.lock();
        data.credentials.account_name = name.to_string();
        data.credentials.account_secret = secret.to_string();
    }

    pub fn roles(&self) -> Role {
        self.lock().roles
    }

    pub fn grant_role(&self, role: Role) {
        self.lock().roles.insert(role);
    }

    pub fn attribute_flags(&self) -> Attribute {
        self.lock().attribute_flags
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn set_state(&self, state: SessionState) {
        self.lock().state = state;
    }

    pub fn attributes(&self) -> SessionAttributes {
        self.lock().attributes.clone()
    }

    pub fn login(&self) -> Option<LoginToken> {
        self.lock().attributes.login.clone()
    }

    pub fn set_login(&self, login: LoginToken) {
        self.lock().attributes.login = Some(login);
    }

    pub fn bootstrapped(&self) -> bool {
        self.lock().attributes.bootstrapped()
    }

    pub fn risk_flagged(&self) -> bool {
        self.lock().attributes.risk_flagged()
    }

    pub fn page(&self) -> usize {
        self.lock().attributes.page
    }

    pub fn set_page(&self, page: usize) {
        self.lock().attributes.page = page;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn session() -> Session {
        Session::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[test]
    fn test_role_bits() {
        assert_eq!(Role::MERCHANT.bits(), 1);
        assert_eq!(Role::ADMIN.bits(), 1 << 10);
        assert_eq!(Role::default(), Role::empty());
    }

    #[test]
    fn test_highest_role() {
        assert_eq!((Role::ADMIN | Role::MERCHANT).highest(), Role::ADMIN);
        assert_eq!(Role::MERCHANT.highest(), Role::MERCHANT);
        assert_eq!(Role::empty().highest(), Role::empty());
    }

    #[test]
    fn test_at_least() {
        assert!(Role::ADMIN.at_least(Role::MERCHANT));
        assert!(Role::ADMIN.at_least(Role::ADMIN));
        assert!(Role::MERCHANT.at_least(Role::MERCHANT));
        assert!(!Role::MERCHANT.at_least(Role::ADMIN));
        assert!(!Role::empty().at_least(Role::MERCHANT));
        assert!(Role::empty().at_least(Role::empty()));
    }

    #[test]
    fn test_role_names() {
        assert_eq!(Role::from_document_role("admin"), Role::ADMIN);
        assert_eq!(Role::from_document_role("merchant"), Role::MERCHANT);
        assert_eq!(Role::from_document_role("Admin"), Role::empty());
        assert_eq!((Role::ADMIN | Role::MERCHANT).name(), "Admin");
        assert_eq!(Role::empty().name(), "Player");
    }

    #[test]
    fn test_new_session() {
        let session = session();

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(session.roles(), Role::empty());
        assert!(!session.bootstrapped());
        assert!(!session.risk_flagged());
        assert_eq!(session.credentials().address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_bootstrap_and_flags() {
        let session = session();
        session.set_login(LoginToken {
            session: "S1".to_string(),
            merchant: "M1".to_string(),
        });
        assert!(session.bootstrapped());

        session.lock().attributes.reputation_warning = true;
        assert!(session.risk_flagged());

        session.grant_role(Role::MERCHANT);
        session.grant_role(Role::ADMIN);
        assert_eq!(session.roles(), Role::MERCHANT | Role::ADMIN);
    }
}
