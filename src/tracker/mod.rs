//! Tracker client logic for the BitTorrent protocol.
//!
//! This module implements communication with BitTorrent trackers, including:
//! - HTTP and UDP (BEP-15) announce requests
//! - Peer list parsing (compact and non-compact forms)
//! - Peer id generation and percent-encoding helpers
//!
//! [`TrackerClient::announce_all`] tries each of a torrent's tracker URLs
//! in order and returns the first non-empty peer list; per-tracker errors
//! are diagnostics, not failures — only exhausting every tracker without a
//! peer is surfaced to the caller as an empty list.
use std::net::Ipv4Addr;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::bencode::{self, BencodeValue};
use crate::torrent::Metainfo;

pub mod http;
pub mod udp;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const UDP_STEP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("non-200 response: {0}")]
    BadStatus(u16),

    #[error("bencode error in tracker response: {0}")]
    Bencode(#[from] bencode::BencodeError),

    #[error("malformed tracker response: {0}")]
    MalformedResponse(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("unsupported tracker scheme: {0}")]
    UnsupportedScheme(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UDP tracker timed out")]
    Timeout,

    #[error("UDP tracker sent an invalid or mismatched reply")]
    InvalidUdpReply,
}

/// An IPv4 peer endpoint received from a tracker. Port 0 is never
/// constructed — callers filter it out while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from((self.ip, self.port))
    }
}

/// Parses the compact peer format: a byte string whose length is a
/// multiple of 6, each group being a big-endian IPv4 address followed by a
/// big-endian port. Entries with port 0 are discarded.
pub(crate) fn parse_compact_peers(bytes: &[u8]) -> Vec<PeerEndpoint> {
    bytes
        .chunks_exact(6)
        .filter_map(|chunk| {
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            if port == 0 {
                return None;
            }
            Some(PeerEndpoint {
                ip: Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
                port,
            })
        })
        .collect()
}

pub(crate) fn parse_dict_peers(entries: &[BencodeValue]) -> Vec<PeerEndpoint> {
    entries
        .iter()
        .filter_map(|entry| {
            let ip_bytes = entry.get(b"ip")?.as_bytes_field("peer ip").ok()?;
            let ip_str = std::str::from_utf8(ip_bytes).ok()?;
            let ip: Ipv4Addr = ip_str.parse().ok()?;
            let port = entry.get(b"port")?.as_integer_field("peer port").ok()? as u16;
            if port == 0 {
                return None;
            }
            Some(PeerEndpoint { ip, port })
        })
        .collect()
}

pub struct TrackerClient {
    peer_id: [u8; 20],
    port: u16,
}

impl TrackerClient {
    pub fn new(port: u16) -> Self {
        TrackerClient {
            peer_id: generate_peer_id(),
            port,
        }
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Tries each tracker URL in `metainfo.announce_urls()` order,
    /// returning the first non-empty peer list. Per-tracker failures are
    /// logged and do not abort the search.
    #[instrument(skip(self, metainfo), level = "debug")]
    pub async fn announce_all(&self, metainfo: &Metainfo) -> Vec<PeerEndpoint> {
        for url in metainfo.announce_urls() {
            let outcome = if url.starts_with("http") {
                http::announce(&url, metainfo, self.peer_id, self.port, HTTP_TIMEOUT).await
            } else if url.starts_with("udp") {
                udp::announce(&url, metainfo, self.peer_id, self.port).await
            } else {
                warn!(url, "skipping tracker with unsupported scheme");
                continue;
            };

            match outcome {
                Ok(peers) if !peers.is_empty() => {
                    tracing::info!(url, count = peers.len(), "tracker returned peers");
                    return peers;
                }
                Ok(_) => warn!(url, "tracker returned no peers"),
                Err(err) => warn!(url, error = %err, "tracker announce failed"),
            }
        }
        Vec::new()
    }
}

/// Generates a 20-byte Azureus-style peer id: the literal `-PC0001-`
/// followed by 12 random ASCII decimal digits.
fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    let prefix = b"-PC0001-";
    peer_id[..prefix.len()].copy_from_slice(prefix);
    let mut rng = rand::rng();
    for slot in &mut peer_id[prefix.len()..] {
        *slot = b'0' + rng.random_range(0..10);
    }
    peer_id
}

/// Percent-encodes a byte slice octet-by-octet per RFC 3986, used for the
/// raw `info_hash`/`peer_id` query parameters trackers expect un-decoded.
pub(crate) fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_peers_example() {
        let bytes = [
            0x0A, 0x00, 0x00, 0x01, 0x1A, 0xE1, 0x0A, 0x00, 0x00, 0x02, 0x1A, 0xE2,
        ];
        let peers = parse_compact_peers(&bytes);
        assert_eq!(
            peers,
            vec![
                PeerEndpoint {
                    ip: Ipv4Addr::new(10, 0, 0, 1),
                    port: 6881
                },
                PeerEndpoint {
                    ip: Ipv4Addr::new(10, 0, 0, 2),
                    port: 6882
                },
            ]
        );
    }

    #[test]
    fn drops_zero_port_peers() {
        let bytes = [0x0A, 0x00, 0x00, 0x01, 0x00, 0x00];
        assert!(parse_compact_peers(&bytes).is_empty());
    }

    #[test]
    fn generated_peer_id_has_expected_prefix_and_length() {
        let peer_id = generate_peer_id();
        assert_eq!(peer_id.len(), 20);
        assert_eq!(&peer_id[..8], b"-PC0001-");
        assert!(peer_id[8..].iter().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn url_encode_matches_rfc3986_unreserved_set() {
        assert_eq!(url_encode(b"abc123-._~"), "abc123-._~");
        assert_eq!(url_encode(&[0x00, 0xFF]), "%00%FF");
    }
}
