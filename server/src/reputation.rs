//! IP reputation lookups.
//!
//! The service answers `GET {base}/check-ip/{ip}` with a JSON object. Any of the
//! boolean flags set blocks the connection; a risk score at or above
//! [`RISK_SCORE_THRESHOLD`] only earns a warning. Lookups that fail for any reason
//! are treated as clean so an outage of the service never locks players out.

use log::{debug, warn};
use reqwest::Client;
use serde_json::Value;
use std::net::IpAddr;
use std::time::Duration;

pub const RISK_SCORE_THRESHOLD: f64 = 85.0;

const BLOCKING_FLAGS: [&str; 4] = ["status", "is_vpn", "is_vps", "is_proxy"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Warn,
    Block,
}

/// Classifies a reputation response body
pub fn evaluate(response: &Value) -> Verdict {
    let flagged = BLOCKING_FLAGS
        .iter()
        .any(|flag| response.get(*flag).and_then(Value::as_bool) == Some(true));
    if flagged {
        return Verdict::Block;
    }

    match response.get("presentence").and_then(Value::as_f64) {
        Some(score) if score >= RISK_SCORE_THRESHOLD => Verdict::Warn,
        _ => Verdict::Clean,
    }
}

#[derive(Debug, Clone)]
pub struct ReputationClient {
    base_url: Option<String>,
    http_client: Client,
}

impl ReputationClient {
    /// `None` disables lookups entirely
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
            http_client: Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    pub async fn check(&self, ip: IpAddr, timeout: Duration) -> Verdict {
        let Some(base_url) = &self.base_url else {
            return Verdict::Clean;
        };
        let url = format!("{}/check-ip/{}", base_url, ip);

        match self.fetch(&url, timeout).await {
            Ok(body) => {
                let verdict = evaluate(&body);
                debug!("Reputation for {}: {:?}", ip, verdict);
                verdict
            }
            Err(e) => {
                warn!("Reputation lookup for {} failed, allowing: {}", ip, e);
                Verdict::Clean
            }
        }
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Value, reqwest::Error> {
        self.http_client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}
