//! # Logon Gateway Library
//!
//! This library implements the login gateway that sits in front of the game-world
//! servers. A client connects here first, is checked and authenticated, picks a
//! destination from its merchant's server list, and is then told to reconnect to that
//! server with a session token.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! Every peer gets exactly one connection and one session. A second connect from the
//! same address is ignored, and the session is dropped together with its connection.
//! Data travels over UDP with acknowledgements, resends and in-order release, and
//! quiet peers are pinged so that only unresponsive ones hit the idle timeout.
//!
//! ### Trust Evaluation
//! Each new address is looked up in an external IP reputation service. Lookups run in
//! the background and report back to the event loop; until the verdict arrives the
//! connection's data is discarded. Login fingerprints are also screened for signs of
//! third-party clients.
//!
//! ### Command Routing
//! Inbound text commands are keyed, gated behind the bootstrap login and the caller's
//! role, and handed to the matching handler. Handler errors are shown to the player
//! instead of closing the connection.
//!
//! ### Redirects
//! Accepted clients are sent to a downstream server, either the configured default
//! (token logins) or the server they picked from the world list.
//!
//! ## Module Organization
//!
//! - `network`: UDP socket, receive/send tasks and the main event loop
//! - `connection_manager`: connection table, sequence tracking and idle timeouts
//! - `gateway` / `dispatcher`: handler registries and command routing
//! - `handlers`: the login, world-list and join workflow
//! - `session`: per-connection state and the role bitsets
//! - `store`: JSON documents on disk (merchants, server lists, saved sessions)
//! - `cache`: short-lived process-wide key/value cache
//! - `reputation`: HTTP client for the IP reputation service
//! - `menu` / `outbound`: text templates and the call frames sent to clients
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::GatewayConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig {
//!         bind_address: "0.0.0.0:17091".to_string(),
//!         ..GatewayConfig::default()
//!     };
//!
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Persistence
//!
//! Documents are the system of record and are re-read on every request. There is no
//! locking across a read-modify-write, so two connections editing the same merchant
//! at once can lose one of the updates.

pub mod cache;
pub mod config;
pub mod connection_manager;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod menu;
pub mod network;
pub mod outbound;
pub mod reputation;
pub mod session;
pub mod store;
pub mod utils;
