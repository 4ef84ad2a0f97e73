//! Computes the info hash: the SHA-1 of the canonical bencoding of a
//! torrent's `info` sub-dictionary. Canonical re-encoding (ascending key
//! order) is what makes this value independent of how the source file
//! happened to order its keys.
use crate::bencode;
use crate::bencode::BencodeValue;
use crate::torrent::TorrentError;
use sha1::Digest;
use sha1::Sha1;

pub fn calculate_info_hash(
    info_dict: &[(Vec<u8>, BencodeValue)],
) -> Result<[u8; 20], TorrentError> {
    let buffer = bencode::encoder::encode_to_vec(&BencodeValue::Dict(info_dict.to_vec()))?;

    let mut hasher = Sha1::new();
    hasher.update(&buffer);
    let result = hasher.finalize();

    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&result[..]);
    Ok(info_hash)
}
