//! Command handlers, one module per stage of the login workflow.
//!
//! - [`login`]: the two bootstrap commands
//! - [`world`]: building the paginated world list
//! - [`join`]: menu clicks, dialog returns and the redirect itself

pub mod join;
pub mod login;
pub mod world;

use crate::dispatcher::{Dispatcher, HandlerEntry};
use crate::error::Result;

pub fn register_generic_text(dispatcher: &Dispatcher) -> Result<()> {
    dispatcher.register("ltoken", HandlerEntry::open(login::ltoken))?;
    dispatcher.register("tankIDName", HandlerEntry::open(login::player_login))?;
    dispatcher.register("join_server", HandlerEntry::open(join::join_server))?;
    Ok(())
}

pub fn register_game_message(dispatcher: &Dispatcher) -> Result<()> {
    dispatcher.register("exit", HandlerEntry::open(join::exit))?;
    dispatcher.register("quit_to_exit", HandlerEntry::open(join::quit_to_exit))?;
    dispatcher.register("join_request", HandlerEntry::open(join::join_request))?;
    dispatcher.register("world_button", HandlerEntry::open(join::join_request))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::GatewayConfig;
    use crate::dispatcher::Context;
    use crate::gateway::Gateway;
    use crate::outbound::Outbox;
    use crate::session::{LoginToken, Session};
    use crate::store::{MerchantRecord, ServerList, ServerRecord};
    use shared::ParsedFrame;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;

    pub struct Harness {
        pub dir: TempDir,
        pub gateway: Gateway,
        pub session: Session,
    }

    impl Harness {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let gateway = Gateway::new(GatewayConfig {
                database_dir: dir.path().to_path_buf(),
                reputation_url: None,
                ..GatewayConfig::default()
            })
            .unwrap();
            Self {
                dir,
                gateway,
                session: Session::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))),
            }
        }

        /// Session that has completed bootstrap for `merchant` as `account`
        pub fn logged_in(merchant: &str, account: &str, secret: &str) -> Self {
            let harness = Self::new();
            harness.session.set_account(account, secret);
            harness.session.set_login(LoginToken {
                session: "S1".to_string(),
                merchant: merchant.to_string(),
            });
            harness
        }

        pub fn add_merchant(&self, id: &str, role: &str, coin: i64, servers: Vec<ServerRecord>) {
            let merchant = MerchantRecord {
                account_name: "owner".to_string(),
                account_secret: "pw".to_string(),
                role: role.to_string(),
                coin,
                servers_key: format!("{}-servers", id),
                ..MerchantRecord::default()
            };
            self.gateway.store.save_merchant(id, &merchant).unwrap();
            self.gateway
                .store
                .save_servers(
                    &merchant.servers_key,
                    &ServerList {
                        servers,
                        ..ServerList::default()
                    },
                )
                .unwrap();
        }

        pub fn merchant(&self, id: &str) -> MerchantRecord {
            self.gateway.store.load_merchant(id).unwrap()
        }

        pub fn servers(&self, id: &str) -> Vec<ServerRecord> {
            let key = self.merchant(id).servers_key;
            self.gateway.store.load_servers(&key).unwrap().unwrap().servers
        }

        pub fn run<F>(&self, f: F) -> (crate::error::Result<bool>, Outbox)
        where
            F: FnOnce(&mut Context<'_>) -> crate::error::Result<bool>,
        {
            let mut outbox = Outbox::new();
            let mut ctx = Context {
                connection_id: 1,
                peer: "10.0.0.7:51000".parse().unwrap(),
                session: &self.session,
                gateway: &self.gateway,
                outbox: &mut outbox,
            };
            let result = f(&mut ctx);
            (result, outbox)
        }
    }

    pub fn frames(outbox: &Outbox) -> Vec<ParsedFrame> {
        outbox
            .frames()
            .iter()
            .map(|bytes| ParsedFrame::parse(bytes).unwrap())
            .collect()
    }

    pub fn function_names(outbox: &Outbox) -> Vec<String> {
        frames(outbox)
            .iter()
            .map(|frame| frame.function_name().unwrap_or_default().to_string())
            .collect()
    }

    /// Text argument of the first frame calling `function`
    pub fn first_text(outbox: &Outbox, function: &str) -> Option<String> {
        frames(outbox)
            .into_iter()
            .find(|frame| frame.function_name() == Some(function))
            .and_then(|frame| frame.arg_str(1).map(str::to_string))
    }
}
