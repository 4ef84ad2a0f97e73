//! HTTP tracker announce: `GET <announce>?info_hash=...&peer_id=...&...`
//! returning a bencoded reply whose `peers` field is either the compact
//! byte-string form or a list of `{ip, port}` dictionaries.
use std::time::Duration;

use crate::bencode;
use crate::torrent::Metainfo;

use super::{parse_compact_peers, parse_dict_peers, url_encode, PeerEndpoint, TrackerError};

pub(crate) async fn announce(
    announce_url: &str,
    metainfo: &Metainfo,
    peer_id: [u8; 20],
    port: u16,
    timeout: Duration,
) -> Result<Vec<PeerEndpoint>, TrackerError> {
    let info_hash = metainfo.info_hash();
    let left = metainfo.total_length();

    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
        url_encode(&info_hash),
        url_encode(&peer_id),
        port,
        left,
    );
    let url = format!("{announce_url}?{query}");

    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response = client.get(&url).send().await?;
    let status = response.status();
    if status.as_u16() != 200 {
        return Err(TrackerError::BadStatus(status.as_u16()));
    }
    let body = response.bytes().await?;
    parse_announce_response(&body)
}

fn parse_announce_response(body: &[u8]) -> Result<Vec<PeerEndpoint>, TrackerError> {
    let decoded = bencode::decode(body)?;
    let peers_value = decoded
        .get(b"peers")
        .ok_or_else(|| TrackerError::MalformedResponse("missing 'peers' field".into()))?;

    let peers = match peers_value {
        bencode::BencodeValue::String(bytes) => parse_compact_peers(bytes),
        bencode::BencodeValue::List(entries) => parse_dict_peers(entries),
        _ => {
            return Err(TrackerError::MalformedResponse(
                "'peers' field had an unexpected type".into(),
            ))
        }
    };
    Ok(peers)
}
