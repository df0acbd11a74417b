//! Flat-file JSON documents that act as the system of record.
//!
//! ```text
//! <root>/merchants/<id>.json
//! <root>/servers/<servers_key>.json
//! <root>/sessions/<token>
//! <root>/transactions.json
//! ```
//!
//! Documents are read at request time, mutated in memory and written back whole. Two
//! connections touching the same document at once can lose one of the writes; nothing
//! here locks across a read-modify-write cycle.
//!
//! Fields this gateway does not know about are kept in `extra` and written back as-is.

use crate::config::DEFAULT_GAME_PORT;
use crate::error::{GatewayError, Result};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MerchantOptions {
    #[serde(default)]
    pub hide_servers: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MerchantRecord {
    #[serde(rename = "tankIDName", default)]
    pub account_name: String,
    #[serde(rename = "tankIDPass", default)]
    pub account_secret: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub coin: i64,
    #[serde(default)]
    pub servers_key: String,
    #[serde(default)]
    pub options: MerchantOptions,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MerchantRecord {
    /// True when the submitted account is the merchant's own
    pub fn is_owner(&self, account_name: &str, account_secret: &str) -> bool {
        !account_name.is_empty()
            && self.account_name == account_name
            && self.account_secret == account_secret
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ButtonColor {
    #[serde(default)]
    pub red: u8,
    #[serde(default)]
    pub green: u8,
    #[serde(default)]
    pub blue: u8,
    #[serde(default)]
    pub alpha: u8,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerOptions {
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub hide_server: bool,
    #[serde(default)]
    pub block_3rd_app: bool,
    #[serde(default)]
    pub color: ButtonColor,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_GAME_PORT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Unix seconds after which the listing needs a coin to stay up
    #[serde(default)]
    pub expired_at: i64,
    #[serde(default)]
    pub options: ServerOptions,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServerRecord {
    pub fn new(name: &str, expired_at: i64) -> Self {
        Self {
            name: name.to_string(),
            display_name: name.to_string(),
            host: default_host(),
            port: default_port(),
            expired_at,
            options: ServerOptions::default(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerList {
    #[serde(default)]
    pub servers: Vec<ServerRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoinTotals {
    #[serde(default)]
    pub used: i64,
    #[serde(default)]
    pub produced: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transactions {
    #[serde(default)]
    pub coin: CoinTotals,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Rejects ids that could escape their directory
fn check_id(field: &'static str, id: &str) -> Result<()> {
    let reason = if id.is_empty() {
        Some("must not be empty")
    } else if id.contains('/') || id.contains('\\') {
        Some("must not contain a path separator")
    } else if id.contains("..") {
        Some("must not contain '..'")
    } else if id.contains('\0') {
        Some("must not contain NUL")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(GatewayError::InvalidField {
            field,
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn merchant_path(&self, id: &str) -> Result<PathBuf> {
        check_id("merchant", id)?;
        Ok(self.root.join("merchants").join(format!("{}.json", id)))
    }

    fn servers_path(&self, key: &str) -> Result<PathBuf> {
        check_id("servers key", key)?;
        Ok(self.root.join("servers").join(format!("{}.json", key)))
    }

    fn session_path(&self, token: &str) -> Result<PathBuf> {
        check_id("session", token)?;
        Ok(self.root.join("sessions").join(token))
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| GatewayError::Document {
                path: path.to_path_buf(),
                source,
            })
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let text = serde_json::to_string_pretty(value).map_err(|source| GatewayError::Document {
            path: path.to_path_buf(),
            source,
        })?;
        Self::write_file(path, &text)
    }

    fn write_file(path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    fn count_files(dir: &Path) -> Result<usize> {
        match fs::read_dir(dir) {
            Ok(entries) => {
                let mut count = 0;
                for entry in entries {
                    if entry?.file_type()?.is_file() {
                        count += 1;
                    }
                }
                Ok(count)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_merchant(&self, id: &str) -> Result<MerchantRecord> {
        let path = self.merchant_path(id)?;
        Self::read_json(&path)?.ok_or_else(|| GatewayError::UnknownMerchant(id.to_string()))
    }

    pub fn save_merchant(&self, id: &str, merchant: &MerchantRecord) -> Result<()> {
        Self::write_json(&self.merchant_path(id)?, merchant)
    }

    /// The merchant's server list, or `None` if it has never been created
    pub fn load_servers(&self, key: &str) -> Result<Option<ServerList>> {
        Self::read_json(&self.servers_path(key)?)
    }

    pub fn save_servers(&self, key: &str, servers: &ServerList) -> Result<()> {
        Self::write_json(&self.servers_path(key)?, servers)
    }

    /// Saved redirect parameters for a session token
    pub fn load_session(&self, token: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.session_path(token)?) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_session(&self, token: &str, params: &str) -> Result<()> {
        Self::write_file(&self.session_path(token)?, params)
    }

    pub fn count_merchants(&self) -> Result<usize> {
        Self::count_files(&self.root.join("merchants"))
    }

    pub fn count_sessions(&self) -> Result<usize> {
        Self::count_files(&self.root.join("sessions"))
    }

    pub fn load_transactions(&self) -> Result<Transactions> {
        Ok(Self::read_json(&self.root.join("transactions.json"))?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_missing_merchant() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::new(dir.path());

        assert!(matches!(
            store.load_merchant("ghost"),
            Err(GatewayError::UnknownMerchant(id)) if id == "ghost"
        ));
    }

    #[test]
    fn test_unsafe_ids_rejected() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::new(dir.path());

        for id in ["", "../etc/passwd", "a/b", "a\\b", "..", "x\0y"] {
            assert!(
                matches!(store.load_merchant(id), Err(GatewayError::InvalidField { .. })),
                "id {:?} should be rejected",
                id
            );
        }
        assert!(store.save_session("../escape", "x").is_err());
    }

    #[test]
    fn test_merchant_round_trip_preserves_unknown_fields() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::new(dir.path());
        let merchants = dir.path().join("merchants");
        fs::create_dir_all(&merchants).unwrap();
        fs::write(
            merchants.join("acme.json"),
            json!({
                "tankIDName": "owner",
                "tankIDPass": "pw",
                "role": "merchant",
                "coin": 3,
                "servers_key": "acme-list",
                "options": { "hide_servers": false, "theme": "dark" },
                "email": "owner@example.com"
            })
            .to_string(),
        )
        .unwrap();

        let mut merchant = store.load_merchant("acme").unwrap();
        assert_eq!(merchant.account_name, "owner");
        assert_eq!(merchant.coin, 3);
        assert!(merchant.is_owner("owner", "pw"));
        assert!(!merchant.is_owner("owner", "wrong"));

        merchant.coin -= 1;
        store.save_merchant("acme", &merchant).unwrap();

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(merchants.join("acme.json")).unwrap()).unwrap();
        assert_eq!(raw["coin"], 2);
        assert_eq!(raw["email"], "owner@example.com");
        assert_eq!(raw["options"]["theme"], "dark");
    }

    #[test]
    fn test_server_defaults() {
        let list: ServerList =
            serde_json::from_value(json!({ "servers": [{ "name": "alpha" }] })).unwrap();
        let server = &list.servers[0];

        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 17091);
        assert!(!server.options.disable);
        assert_eq!(server.options.color, ButtonColor::default());
    }

    #[test]
    fn test_servers_absent_then_saved() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::new(dir.path());

        assert!(store.load_servers("k").unwrap().is_none());

        let list = ServerList {
            servers: vec![ServerRecord::new("alpha", 0)],
            extra: Map::new(),
        };
        store.save_servers("k", &list).unwrap();
        assert_eq!(store.load_servers("k").unwrap(), Some(list));
    }

    #[test]
    fn test_malformed_document() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::new(dir.path());
        fs::create_dir_all(dir.path().join("servers")).unwrap();
        fs::write(dir.path().join("servers/bad.json"), "{ not json").unwrap();

        assert!(matches!(
            store.load_servers("bad"),
            Err(GatewayError::Document { .. })
        ));
    }

    #[test]
    fn test_sessions_and_counts() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::new(dir.path());

        assert_eq!(store.count_sessions().unwrap(), 0);
        assert!(store.load_session("S1").unwrap().is_none());

        store.save_session("S1", "name=alpha&host=1.2.3.4").unwrap();
        store.save_session("S2", "name=beta").unwrap();

        assert_eq!(store.load_session("S1").unwrap().as_deref(), Some("name=alpha&host=1.2.3.4"));
        assert_eq!(store.count_sessions().unwrap(), 2);
        assert_eq!(store.count_merchants().unwrap(), 0);
    }

    #[test]
    fn test_transactions_default_when_missing() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::new(dir.path());
        assert_eq!(store.load_transactions().unwrap().coin, CoinTotals::default());

        fs::write(
            dir.path().join("transactions.json"),
            r#"{"coin":{"used":4,"produced":10}}"#,
        )
        .unwrap();
        let transactions = store.load_transactions().unwrap();
        assert_eq!(transactions.coin.used, 4);
        assert_eq!(transactions.coin.produced, 10);
    }
}
