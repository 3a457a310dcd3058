use std::io;

/// Custom error type for the bridge
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A bounded resource (registry slots, in-flight byte budget) is full
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    /// Send would block or ran out of socket memory; retry later
    #[error("Transient I/O error: {0}")]
    TransientIo(io::Error),
    /// Peer closed, read/write failure, resolve or connect failure
    #[error("Connection error: {0}")]
    Connection(String),
    /// Bad startup settings or bind/listen failure
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// UART errors
    #[error("UART error: {0}")]
    Uart(String),
    /// WiFi errors
    #[error("WiFi error: {0}")]
    WiFi(String),
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// General errors
    #[error("Error: {0}")]
    General(String),
}

impl Error {
    /// Wrap an I/O error, classifying would-block/out-of-memory style
    /// failures as transient and everything else as a connection error.
    pub fn from_socket(err: io::Error) -> Self {
        if is_transient_kind(err.kind()) {
            Error::TransientIo(err)
        } else {
            Error::Connection(err.to_string())
        }
    }

    /// Whether the failed operation may succeed if retried unchanged
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientIo(_) => true,
            Error::Io(err) => is_transient_kind(err.kind()),
            _ => false,
        }
    }
}

fn is_transient_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::OutOfMemory
    )
}

/// Result type for the bridge
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_errors_are_classified() {
        let would_block = Error::from_socket(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(would_block.is_transient());

        let oom = Error::from_socket(io::Error::from(io::ErrorKind::OutOfMemory));
        assert!(matches!(oom, Error::TransientIo(_)));

        let reset = Error::from_socket(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(reset, Error::Connection(_)));
        assert!(!reset.is_transient());
    }
}
