use shared::WireError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed document {path}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("merchant {0} is not registered")]
    UnknownMerchant(String),

    #[error("access denied: {0}")]
    Denied(String),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("duplicate handler registered for {0}")]
    DuplicateHandler(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Console text shown to the player. Internal failures never leak paths or causes.
    pub fn player_message(&self) -> String {
        match self {
            GatewayError::UnknownMerchant(merchant) => {
                format!("`4Error``: This merchant (`w{}``) is not affiliated with us!", merchant)
            }
            GatewayError::Denied(reason) => reason.clone(),
            GatewayError::InvalidField { field, reason } => {
                format!("`4Error``: Invalid {}, {}.", field, reason)
            }
            _ => "`4Error``: Something went wrong on our side, please try again later.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_message_hides_internals() {
        let io = GatewayError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/srv/database/servers/abc.json",
        ));
        assert!(!io.player_message().contains("/srv"));
        assert!(io.to_string().contains("/srv"));
    }

    #[test]
    fn test_player_message_for_domain_errors() {
        let err = GatewayError::UnknownMerchant("acme".to_string());
        assert!(err.player_message().contains("acme"));

        let err = GatewayError::Denied("Go away.".to_string());
        assert_eq!(err.player_message(), "Go away.");

        let err = GatewayError::InvalidField {
            field: "session",
            reason: "contains a path separator".to_string(),
        };
        assert!(err.player_message().contains("session"));
    }
}
