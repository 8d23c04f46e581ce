//! Error types for a discovery run.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that end a discovery run.
///
/// Every variant is terminal: the run stops and the destination keeps its
/// previous content.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Connection, DNS, TLS or timeout failure.
    #[error("Network error requesting {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// NetBox rejected the token (HTTP 401 or 403).
    #[error("Authentication rejected by {url} (HTTP {status})")]
    Auth { url: String, status: u16 },

    /// Non-2xx status or a body that is not a NetBox list response.
    #[error("Bad response from {url}: {reason}")]
    BadResponse {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    /// Output could not be written, renamed or cleaned up.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid settings, detected before any request is made.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ExporterError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn bad_response(url: impl ToString, reason: impl Into<String>) -> Self {
        Self::BadResponse {
            url: url.to_string(),
            status: None,
            reason: reason.into(),
        }
    }

    /// Short machine-friendly name of the variant, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Auth { .. } => "auth",
            Self::BadResponse { .. } => "bad_response",
            Self::Io { .. } => "io",
            Self::Config(_) => "config",
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Network { .. } => 2,
            Self::Auth { .. } => 3,
            Self::BadResponse { .. } => 4,
            Self::Io { .. } => 5,
            Self::Config(_) => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            ExporterError::Auth {
                url: "u".into(),
                status: 401,
            },
            ExporterError::bad_response("u", "boom"),
            ExporterError::io("/tmp/x", std::io::Error::other("disk full")),
            ExporterError::Config(ConfigError::Validation("x".into())),
        ];

        let mut codes: Vec<u8> = errors.iter().map(|e| e.exit_code()).collect();
        codes.push(2); // Network, which needs a live reqwest::Error
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), 5);
        assert!(codes.iter().all(|&c| c != 0));
    }

    #[test]
    fn test_display_includes_context() {
        let err = ExporterError::Auth {
            url: "https://netbox.example.com/api/dcim/devices/".into(),
            status: 403,
        };
        let msg = err.to_string();
        assert!(msg.contains("403"));
        assert!(msg.contains("netbox.example.com"));
        assert_eq!(err.kind(), "auth");

        let err = ExporterError::io("/srv/sd/netbox.json", std::io::Error::other("read-only"));
        assert!(err.to_string().contains("/srv/sd/netbox.json"));
    }
}
