//! The BitTorrent peer wire messages exchanged after the handshake.
//!
//! Every message on the wire is framed as `length(u32 be) | id(u8) |
//! payload`, with a zero length prefix reserved for keep-alives (no id, no
//! payload). `Message::decode` receives the id and payload already split
//! apart by the framing loop in `connection.rs`.
use byteorder::{BigEndian, ByteOrder};

use super::PeerError;

pub const CHOKE: u8 = 0;
pub const UNCHOKE: u8 = 1;
pub const INTERESTED: u8 = 2;
pub const NOT_INTERESTED: u8 = 3;
pub const HAVE: u8 = 4;
pub const BITFIELD: u8 = 5;
pub const REQUEST: u8 = 6;
pub const PIECE: u8 = 7;
pub const CANCEL: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    /// Encodes this message including its 4-byte length prefix and 1-byte id.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Choke => frame(CHOKE, &[]),
            Message::Unchoke => frame(UNCHOKE, &[]),
            Message::Interested => frame(INTERESTED, &[]),
            Message::NotInterested => frame(NOT_INTERESTED, &[]),
            Message::Have { piece_index } => {
                let mut body = [0u8; 4];
                BigEndian::write_u32(&mut body, *piece_index);
                frame(HAVE, &body)
            }
            Message::Bitfield(bits) => frame(BITFIELD, bits),
            Message::Request {
                index,
                begin,
                length,
            } => frame(REQUEST, &request_body(*index, *begin, *length)),
            Message::Piece { index, begin, data } => {
                let mut body = Vec::with_capacity(8 + data.len());
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(data);
                frame(PIECE, &body)
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => frame(CANCEL, &request_body(*index, *begin, *length)),
        }
    }

    /// Decodes a message id and payload into a `Message`. Returns `Ok(None)`
    /// for an id this client doesn't recognize — the caller must skip such
    /// messages without closing the connection, per protocol convention.
    pub fn decode(id: u8, payload: &[u8]) -> Result<Option<Message>, PeerError> {
        let message = match id {
            CHOKE => Message::Choke,
            UNCHOKE => Message::Unchoke,
            INTERESTED => Message::Interested,
            NOT_INTERESTED => Message::NotInterested,
            HAVE => {
                if payload.len() != 4 {
                    return Err(PeerError::Framing("have payload must be 4 bytes".into()));
                }
                Message::Have {
                    piece_index: BigEndian::read_u32(payload),
                }
            }
            BITFIELD => Message::Bitfield(payload.to_vec()),
            REQUEST => {
                let (index, begin, length) = parse_request_body(payload)?;
                Message::Request {
                    index,
                    begin,
                    length,
                }
            }
            PIECE => {
                if payload.len() < 8 {
                    return Err(PeerError::Framing("piece payload too short".into()));
                }
                Message::Piece {
                    index: BigEndian::read_u32(&payload[0..4]),
                    begin: BigEndian::read_u32(&payload[4..8]),
                    data: payload[8..].to_vec(),
                }
            }
            CANCEL => {
                let (index, begin, length) = parse_request_body(payload)?;
                Message::Cancel {
                    index,
                    begin,
                    length,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

fn frame(id: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + body.len());
    let length = 1 + body.len() as u32;
    out.extend_from_slice(&length.to_be_bytes());
    out.push(id);
    out.extend_from_slice(body);
    out
}

fn request_body(index: u32, begin: u32, length: u32) -> [u8; 12] {
    let mut body = [0u8; 12];
    BigEndian::write_u32(&mut body[0..4], index);
    BigEndian::write_u32(&mut body[4..8], begin);
    BigEndian::write_u32(&mut body[8..12], length);
    body
}

fn parse_request_body(payload: &[u8]) -> Result<(u32, u32, u32), PeerError> {
    if payload.len() != 12 {
        return Err(PeerError::Framing(
            "request/cancel payload must be 12 bytes".into(),
        ));
    }
    Ok((
        BigEndian::read_u32(&payload[0..4]),
        BigEndian::read_u32(&payload[4..8]),
        BigEndian::read_u32(&payload[8..12]),
    ))
}
