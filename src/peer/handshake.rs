//! The BitTorrent peer handshake: the first 68 bytes exchanged over every
//! peer TCP connection. It verifies both sides are talking about the same
//! torrent (via info_hash) before any wire messages are exchanged.
use crate::torrent::TorrentError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::instrument;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// A BitTorrent handshake message: protocol identifier, reserved
/// extension-flag bytes, info hash, and peer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serializes the handshake into the wire format:
    /// `19 | "BitTorrent protocol" | reserved(8) | info_hash(20) | peer_id(20)`.
    #[instrument(level = "trace")]
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Reads exactly 68 bytes from `stream` and parses them as a handshake,
    /// validating the length prefix and protocol literal but not the peer id.
    #[instrument(level = "trace", skip(stream))]
    pub async fn read(stream: &mut TcpStream) -> Result<Self, TorrentError> {
        let mut buf = [0u8; 68];
        timeout(HANDSHAKE_TIMEOUT, stream.read_exact(&mut buf))
            .await
            .map_err(|_| TorrentError::HandshakeTimeout)??;

        if buf[0] != 19 || &buf[1..20] != PROTOCOL {
            return Err(TorrentError::HandshakeInvalidProtocol);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self {
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Dials `addr`, exchanges handshakes, and validates that the remote's
    /// info_hash matches ours. Returns the remote's handshake (its peer_id
    /// is not checked against anything — the spec does not require it).
    #[instrument(level = "debug", skip(info_hash, peer_id))]
    pub async fn perform(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Result<(TcpStream, Handshake), TorrentError> {
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| TorrentError::HandshakeTimeout)??;

        let ours = Handshake::new(info_hash, peer_id);
        timeout(HANDSHAKE_TIMEOUT, stream.write_all(&ours.serialize()))
            .await
            .map_err(|_| TorrentError::HandshakeTimeout)??;

        let theirs = Handshake::read(&mut stream).await?;
        if theirs.info_hash != info_hash {
            return Err(TorrentError::HandshakeInfoHashMismatch);
        }

        Ok((stream, theirs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_68_bytes_per_spec_example() {
        let info_hash = [0xAA; 20];
        let peer_id = [0xBB; 20];
        let handshake = Handshake::new(info_hash, peer_id);
        let bytes = handshake.serialize();

        let mut expected = Vec::with_capacity(68);
        expected.push(19);
        expected.extend_from_slice(PROTOCOL);
        expected.extend_from_slice(&[0u8; 8]);
        expected.extend_from_slice(&[0xAA; 20]);
        expected.extend_from_slice(&[0xBB; 20]);

        assert_eq!(&bytes[..], &expected[..]);
    }

    #[tokio::test]
    async fn rejects_wrong_protocol_length() {
        use tokio::net::{TcpListener, TcpStream as ClientStream};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut bad = [0u8; 68];
            bad[0] = 18;
            socket.write_all(&bad).await.unwrap();
        });

        let mut client = ClientStream::connect(addr).await.unwrap();
        let result = Handshake::read(&mut client).await;
        assert!(result.is_err());
        server.await.unwrap();
    }
}
