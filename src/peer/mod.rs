//! Per-peer connection state machine: dial, handshake, then the
//! choke/interested/request message loop against one TCP peer.
use thiserror::Error;

pub mod connection;
pub mod handshake;
pub mod message;

pub use connection::PeerConnection;
pub use handshake::Handshake;
pub use message::Message;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[from] crate::torrent::TorrentError),

    #[error("connection timed out")]
    Timeout,

    #[error("framing error: {0}")]
    Framing(String),
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
