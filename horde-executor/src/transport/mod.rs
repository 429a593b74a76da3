//! Transport layer
//!
//! The duplex channel between an executor and its miner. Frames are
//! serialized protocol messages; framing, retries and TLS belong to the
//! implementation.
//!
//! All transports are trait-based so the protocol handler can be tested
//! without a network.

#[cfg(test)]
pub mod memory;
mod ws;

pub use ws::WsTransport;

use async_trait::async_trait;

use crate::error::TransportError;

/// Duplex message channel
///
/// Sends are delivered in the order they are awaited; `receive` is driven by a
/// single reader.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one serialized message and returns once the channel accepted it
    async fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Waits for the next serialized message
    ///
    /// Returns `Ok(None)` once the peer closed the connection.
    async fn receive(&self) -> Result<Option<String>, TransportError>;
}
