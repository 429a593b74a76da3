//! Error types for the executor side of the protocol

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use uuid::Uuid;

/// Rejections raised by the handshake slots
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The slot for this message kind was already fulfilled
    #[error("Received duplicate {kind}: first job_uuid={first} and then job_uuid={received}")]
    DuplicateMessage {
        kind: &'static str,
        first: Uuid,
        received: Uuid,
    },

    /// A job request arrived before any initial job request
    #[error("Received job request before an initial job request job_uuid={job_uuid}")]
    OutOfOrderMessage { job_uuid: Uuid },

    /// A job request named a different job than the accepted initial request
    #[error("Received job request for job_uuid={received} while handling job_uuid={expected}")]
    MismatchedJob { expected: Uuid, received: Uuid },

    /// Job identity requested before the initial job request was accepted
    #[error("Job UUID is missing")]
    NotInitialized,
}

/// Failures of the duplex channel to the miner
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("Failed to send message: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("Failed to receive message: {0}")]
    Receive(#[source] tungstenite::Error),

    /// The peer is gone and nothing more can be sent
    #[error("Connection closed")]
    Closed,
}

/// Errors surfaced by the protocol handler
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("Unsupported message received: {message_type}")]
    UnsupportedMessage { message_type: &'static str },

    #[error("Malformed message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProtocolError {
    /// Whether this error ends the session
    ///
    /// Duplicate, out-of-order, unsupported and malformed messages are
    /// answered with a diagnostic and the session carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Transport(_)
                | ProtocolError::Encode(_)
                | ProtocolError::Handshake(HandshakeError::NotInitialized)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        let duplicate = ProtocolError::from(HandshakeError::DuplicateMessage {
            kind: "initial job request",
            first: Uuid::new_v4(),
            received: Uuid::new_v4(),
        });
        assert!(!duplicate.is_fatal());

        let unsupported = ProtocolError::UnsupportedMessage {
            message_type: "GenericError",
        };
        assert!(!unsupported.is_fatal());

        assert!(ProtocolError::from(HandshakeError::NotInitialized).is_fatal());
        assert!(ProtocolError::from(TransportError::Closed).is_fatal());
    }
}
