//! Library root for rstc, a minimal BitTorrent leech client.
//!
//! Re-exports the core modules: bencoding codec, metainfo parsing, tracker
//! announce, the piece manager, peer connections, and the client
//! supervisor that wires them together.
pub mod bencode;
pub mod client;
pub mod peer;
pub mod piece;
pub mod torrent;
pub mod tracker;
