//! The metainfo view: a read-only typed façade over a decoded bencode
//! dictionary, giving the rest of the client typed access to the fields it
//! needs without re-walking `BencodeValue` at every call site.
use crate::bencode::BencodeValue;
use crate::torrent::info_hash;

use super::TorrentError;

pub const BLOCK_SIZE: u32 = 16_384;

#[derive(Debug, PartialEq, Clone)]
pub struct Metainfo {
    pub announce: String,
    pub announce_list: Vec<Vec<String>>,
    pub info: InfoDict,
    pub info_hash: [u8; 20],
    pub pieces_hash: Vec<[u8; 20]>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct InfoDict {
    pub piece_length: i64,
    pub pieces: Vec<u8>,
    pub name: String,
    pub length: Option<i64>,
    pub files: Vec<FileDict>,
    pub is_directory: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FileDict {
    pub length: i64,
    pub path: Vec<String>,
}

/// Splits the concatenated `pieces` byte string into one 20-byte SHA-1 hash
/// per piece; the slice's length must be a multiple of 20.
fn parse_pieces(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>, TorrentError> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    Ok(pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

fn utf8_field(bytes: &[u8], field: &'static str) -> Result<String, TorrentError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| TorrentError::InvalidFormat(format!("{field} is not UTF-8: {e}")))
}

fn parse_announce_list(value: &BencodeValue) -> Result<Vec<Vec<String>>, TorrentError> {
    let tiers = value.as_list_field("announce-list")?;
    tiers
        .iter()
        .map(|tier| {
            tier.as_list_field("announce-list tier")?
                .iter()
                .map(|tracker| {
                    utf8_field(tracker.as_bytes_field("announce-list url")?, "tracker url")
                })
                .collect()
        })
        .collect()
}

fn parse_files(value: &BencodeValue) -> Result<Vec<FileDict>, TorrentError> {
    value
        .as_list_field("files")?
        .iter()
        .map(|entry| {
            let length = entry
                .get(b"length")
                .ok_or_else(|| TorrentError::MissingField("files[].length".to_string()))?
                .as_integer_field("files[].length")?;
            let path = entry
                .get(b"path")
                .ok_or_else(|| TorrentError::MissingField("files[].path".to_string()))?
                .as_list_field("files[].path")?
                .iter()
                .map(|p| utf8_field(p.as_bytes_field("files[].path component")?, "path component"))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FileDict { length, path })
        })
        .collect()
}

fn parse_info_dict(value: &BencodeValue) -> Result<InfoDict, TorrentError> {
    let piece_length = value
        .get(b"piece length")
        .ok_or_else(|| TorrentError::MissingField("piece length".to_string()))?
        .as_integer_field("piece length")?;
    if piece_length <= 0 {
        return Err(TorrentError::InvalidFormat(
            "piece length must be positive".to_string(),
        ));
    }

    let pieces = value
        .get(b"pieces")
        .ok_or_else(|| TorrentError::MissingField("pieces".to_string()))?
        .as_bytes_field("pieces")?
        .to_vec();

    let name = utf8_field(
        value
            .get(b"name")
            .ok_or_else(|| TorrentError::MissingField("name".to_string()))?
            .as_bytes_field("name")?,
        "name",
    )
    .unwrap_or_else(|_| "output.bin".to_string());

    let length = match value.get(b"length") {
        Some(v) => Some(v.as_integer_field("length")?),
        None => None,
    };

    let files = match value.get(b"files") {
        Some(v) => parse_files(v)?,
        None => Vec::new(),
    };

    if length.is_none() && files.is_empty() {
        return Err(TorrentError::MissingField(
            "exactly one of length or files".to_string(),
        ));
    }
    if length.is_some() && !files.is_empty() {
        return Err(TorrentError::InvalidFormat(
            "info dict has both length and files".to_string(),
        ));
    }

    let is_directory = !files.is_empty();

    Ok(InfoDict {
        piece_length,
        pieces,
        name,
        length,
        files,
        is_directory,
    })
}

impl Metainfo {
    /// Parses a full metainfo dictionary (the decoded contents of a
    /// `.torrent` file) into a typed view. Fails if any required key is
    /// missing or malformed.
    #[tracing::instrument(level = "debug", skip(data))]
    pub fn parse(data: &BencodeValue) -> Result<Metainfo, TorrentError> {
        let announce_bytes = data
            .get(b"announce")
            .ok_or_else(|| TorrentError::MissingField("announce".to_string()))?
            .as_bytes_field("announce")?;
        let announce = utf8_field(announce_bytes, "announce")?;

        let info_value = data
            .get(b"info")
            .ok_or_else(|| TorrentError::MissingField("info".to_string()))?;
        let info_entries = info_value.as_dict_field("info")?;
        let info = parse_info_dict(info_value)?;

        let announce_list = match data.get(b"announce-list") {
            Some(v) => parse_announce_list(v)?,
            None => Vec::new(),
        };

        let info_hash = info_hash::calculate_info_hash(info_entries)?;
        let pieces_hash = parse_pieces(&info.pieces)?;

        Ok(Metainfo {
            announce,
            announce_list,
            info,
            info_hash,
            pieces_hash,
        })
    }

    /// Ordered, duplicate-free list of tracker announce URLs: `announce`
    /// followed by every `announce-list` tier, in the order they appear.
    pub fn announce_urls(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut urls = Vec::new();
        for url in std::iter::once(&self.announce).chain(self.announce_list.iter().flatten()) {
            if seen.insert(url.clone()) {
                urls.push(url.clone());
            }
        }
        urls
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    pub fn piece_length(&self) -> u64 {
        self.info.piece_length as u64
    }

    pub fn piece_hashes(&self) -> &[[u8; 20]] {
        &self.pieces_hash
    }

    /// Total content length: `length` for single-file torrents, the sum of
    /// `files[].length` for multi-file ones.
    pub fn total_length(&self) -> u64 {
        if self.info.is_directory {
            self.info.files.iter().map(|f| f.length as u64).sum()
        } else {
            self.info.length.unwrap_or(0) as u64
        }
    }

    /// The name used for the (single, concatenated) output file.
    pub fn output_name(&self) -> &str {
        &self.info.name
    }

    pub fn num_pieces(&self) -> usize {
        self.pieces_hash.len()
    }
}
