//! wg-manager Error Types

use thiserror::Error;

/// Result type alias for wg-manager operations
pub type Result<T> = std::result::Result<T, Error>;

/// wg-manager error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("client with name {0:?} not found")]
    PeerNotFound(String),

    // Privilege errors
    #[error("wg-manager must run as root (netlink, iptables, sysctl)")]
    NotRoot,

    // Autodetection errors
    #[error("Detection failed: {0}")]
    Detection(String),

    // External command errors
    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    // Link errors
    #[error("Link {0} already exists")]
    LinkExists(String),

    #[error("Link {0} not found")]
    LinkNotFound(String),

    #[error("Netlink error: {0}")]
    Netlink(String),

    // Control plane errors
    #[error("WireGuard error: {0}")]
    WireGuard(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A failed startup or teardown step, wrapping its cause
    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl Error {
    /// Wrap this error with the step that produced it
    pub fn step(self, step: &'static str) -> Self {
        Error::Step {
            step,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through step wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error means the object is already there
    pub fn is_already_exists(&self) -> bool {
        matches!(self.root(), Error::LinkExists(_))
    }

    /// Check if this error means the object is already gone
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Error::LinkNotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Attach a step description to a fallible result
pub trait StepContext<T> {
    fn step(self, step: &'static str) -> Result<T>;
}

impl<T> StepContext<T> for Result<T> {
    fn step(self, step: &'static str) -> Result<T> {
        self.map_err(|e| e.step(step))
    }
}
