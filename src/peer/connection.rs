//! The `Exchanging` phase of the peer state machine: after a successful
//! handshake, send Interested, then loop reading framed messages and
//! issuing at most one outstanding block request at a time.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::piece::PieceManager;

use super::handshake::Handshake;
use super::message::Message;
use super::{PeerError, PeerResult};

const FRAME_TIMEOUT: Duration = Duration::from_secs(125);

/// Connection state: the four booleans every BitTorrent peer connection
/// tracks, initialized `(true, false, true, false)` per the spec.
struct ConnectionState {
    am_choking: bool,
    am_interested: bool,
    peer_is_choking: bool,
    peer_is_interested: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState {
            am_choking: true,
            am_interested: false,
            peer_is_choking: true,
            peer_is_interested: false,
        }
    }
}

pub struct PeerConnection {
    stream: TcpStream,
    state: ConnectionState,
    piece_manager: Arc<PieceManager>,
}

impl PeerConnection {
    /// Dials `addr`, performs the handshake, and runs the message loop
    /// until the connection closes or errors. Any failure along the way
    /// (connect, handshake, framing, timeout) simply ends the task — the
    /// client never treats a single peer's failure as fatal.
    #[instrument(level = "debug", skip(piece_manager, info_hash, peer_id))]
    pub async fn run(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        piece_manager: Arc<PieceManager>,
    ) -> PeerResult<()> {
        let (stream, _their_handshake) = Handshake::perform(addr, info_hash, peer_id).await?;

        let mut connection = PeerConnection {
            stream,
            state: ConnectionState::default(),
            piece_manager,
        };
        connection.exchange().await
    }

    async fn exchange(&mut self) -> PeerResult<()> {
        self.send(&Message::Interested).await?;
        self.state.am_interested = true;

        loop {
            let mut length_buf = [0u8; 4];
            timeout(FRAME_TIMEOUT, self.stream.read_exact(&mut length_buf))
                .await
                .map_err(|_| PeerError::Timeout)??;
            let length = u32::from_be_bytes(length_buf) as usize;

            if length == 0 {
                continue; // keep-alive
            }

            let mut payload = vec![0u8; length];
            timeout(FRAME_TIMEOUT, self.stream.read_exact(&mut payload))
                .await
                .map_err(|_| PeerError::Timeout)??;

            let id = payload[0];
            let body = &payload[1..];
            match Message::decode(id, body)? {
                Some(message) => self.handle(message).await?,
                None => debug!(id, "ignoring unrecognized message id"),
            }
        }
    }

    async fn handle(&mut self, message: Message) -> PeerResult<()> {
        match message {
            Message::Choke => self.state.peer_is_choking = true,
            Message::Unchoke => {
                self.state.peer_is_choking = false;
                self.request_next().await?;
            }
            Message::Interested => self.state.peer_is_interested = true,
            Message::NotInterested => self.state.peer_is_interested = false,
            Message::Have { .. } | Message::Bitfield(_) => {
                // Accepted but not used to filter requests — see open questions.
            }
            Message::Request { .. } | Message::Cancel { .. } => {
                // This client never seeds; requests from peers are ignored.
            }
            Message::Piece { index, begin, data } => {
                self.piece_manager.block_received(index, begin, &data);
                self.request_next().await?;
            }
        }
        Ok(())
    }

    async fn request_next(&mut self) -> PeerResult<()> {
        if self.state.peer_is_choking {
            return Ok(());
        }
        if let Some(block) = self.piece_manager.next_request() {
            let request = Message::Request {
                index: block.piece_index,
                begin: block.offset,
                length: block.length,
            };
            self.send(&request).await?;
        }
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> PeerResult<()> {
        self.stream.write_all(&message.encode()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::PieceManager;
    use crate::torrent::file::InfoDict;
    use crate::torrent::Metainfo;
    use sha1::{Digest, Sha1};
    use tokio::net::TcpListener;

    fn hash_of(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        out
    }

    fn single_piece_metainfo(data: &[u8]) -> Metainfo {
        Metainfo {
            announce: "http://t".to_string(),
            announce_list: vec![],
            info: InfoDict {
                piece_length: data.len() as i64,
                pieces: vec![],
                name: "out.bin".to_string(),
                length: Some(data.len() as i64),
                files: vec![],
                is_directory: false,
            },
            info_hash: [0u8; 20],
            pieces_hash: vec![hash_of(data)],
        }
    }

    #[tokio::test]
    async fn keep_alive_then_have_produces_single_event_no_error() {
        // Drives the byte sequence from the wire-framing property directly
        // through the decode path the connection loop uses.
        let keep_alive = [0u8, 0, 0, 0];
        let have_frame = [0u8, 0, 0, 5, 4, 0, 0, 0, 7];

        assert_eq!(u32::from_be_bytes(keep_alive), 0);
        let length = u32::from_be_bytes([have_frame[0], have_frame[1], have_frame[2], have_frame[3]]);
        assert_eq!(length, 5);
        let decoded = Message::decode(have_frame[4], &have_frame[5..]).unwrap();
        assert_eq!(decoded, Some(Message::Have { piece_index: 7 }));
    }

    #[tokio::test]
    async fn download_happy_path_completes_and_writes_output() {
        let data = vec![9u8; 16_384];
        let metainfo = single_piece_metainfo(&data);
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("out.bin");
        let piece_manager = Arc::new(PieceManager::new(&metainfo, &output_path).unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let info_hash = metainfo.info_hash();
        let peer_id = [1u8; 20];
        let server_data = data.clone();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut handshake_buf = [0u8; 68];
            socket.read_exact(&mut handshake_buf).await.unwrap();
            let mut response = [0u8; 68];
            response[0] = 19;
            response[1..20].copy_from_slice(b"BitTorrent protocol");
            response[28..48].copy_from_slice(&info_hash);
            response[48..68].copy_from_slice(&[2u8; 20]);
            socket.write_all(&response).await.unwrap();

            // Expect the Interested message.
            let mut length_buf = [0u8; 4];
            socket.read_exact(&mut length_buf).await.unwrap();
            let mut body = vec![0u8; u32::from_be_bytes(length_buf) as usize];
            socket.read_exact(&mut body).await.unwrap();

            // Send Unchoke so the client starts requesting.
            socket.write_all(&Message::Unchoke.encode()).await.unwrap();

            loop {
                let mut length_buf = [0u8; 4];
                if socket.read_exact(&mut length_buf).await.is_err() {
                    break;
                }
                let length = u32::from_be_bytes(length_buf) as usize;
                let mut body = vec![0u8; length];
                socket.read_exact(&mut body).await.unwrap();
                if body[0] != super::super::message::REQUEST {
                    continue;
                }
                let begin = u32::from_be_bytes([body[5], body[6], body[7], body[8]]);
                let piece = Message::Piece {
                    index: 0,
                    begin,
                    data: server_data.clone(),
                };
                socket.write_all(&piece.encode()).await.unwrap();
                break;
            }
        });

        let pm = piece_manager.clone();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            PeerConnection::run(addr, info_hash, peer_id, pm),
        )
        .await;
        // The connection either errors on EOF after delivering the piece or
        // the timeout elapses; either way the piece manager must be complete.
        let _ = result;
        server.await.unwrap();
        assert!(piece_manager.is_complete());
        assert_eq!(std::fs::read(&output_path).unwrap(), data);
    }
}
