use thiserror::Error;

/// Fatal to the process: the magic ring could not be set up.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to create shared memory object: {0}")]
    ShmCreate(#[source] std::io::Error),
    #[error("failed to size shared memory object: {0}")]
    ShmTruncate(#[source] std::io::Error),
    #[error("failed to reserve address space: {0}")]
    Reserve(#[source] std::io::Error),
    #[error("failed to map shared memory: {0}")]
    Map(#[source] std::io::Error),
}

/// Fatal to a connection: the peer sent something the codec can't parse.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown message type {0}")]
    UnknownMessageType(u32),
}

/// Transport-level faults, reported to a per-operation error sink; the
/// caller decides whether the connection should be torn down.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("operation was cancelled")]
    Cancelled,
}
