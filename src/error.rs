use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("blocked by {reason}")]
    Policy { reason: PolicyReason },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// HTTP status a proxy or management client sees for this error.
    pub fn status(&self) -> u16 {
        match self {
            ProxyError::Validation(_) => 400,
            ProxyError::Policy { .. } => 403,
            ProxyError::Upstream(_) => 502,
            ProxyError::Config(_) | ProxyError::Io(_) => 500,
        }
    }
}

/// Which host rule rejected a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyReason {
    AllowHostRegex,
    DenyHostRegex,
}

impl PolicyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyReason::AllowHostRegex => "ALLOW_HOST_REGEX",
            PolicyReason::DenyHostRegex => "DENY_HOST_REGEX",
        }
    }
}

impl std::fmt::Display for PolicyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid regex for {field}: {source}")]
    Regex {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}

pub type Result<T> = std::result::Result<T, ProxyError>;
