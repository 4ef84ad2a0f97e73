//! UDP tracker announce per BEP-15: a connect round-trip to obtain a
//! connection id, then an announce round-trip that returns the same
//! compact peer list format as the HTTP protocol's `peers` byte string.
//!
//! Each step opens a fresh socket, sends once, and waits at most
//! [`super::UDP_STEP_TIMEOUT`] for a reply — there is no retransmission on
//! timeout, matching the reference client's single-shot behavior.
use std::io::Write as _;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use url::Url;

use crate::torrent::Metainfo;

use super::{parse_compact_peers, PeerEndpoint, TrackerError, UDP_STEP_TIMEOUT};

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const DEFAULT_UDP_PORT: u16 = 6969;

pub(crate) async fn announce(
    announce_url: &str,
    metainfo: &Metainfo,
    peer_id: [u8; 20],
    port: u16,
) -> Result<Vec<PeerEndpoint>, TrackerError> {
    let url = Url::parse(announce_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| TrackerError::MalformedResponse("UDP tracker URL has no host".into()))?;
    let tracker_port = url.port().unwrap_or(DEFAULT_UDP_PORT);
    let remote = format!("{host}:{tracker_port}");

    let connection_id = connect(&remote).await?;
    announce_step(&remote, connection_id, metainfo, peer_id, port).await
}

async fn connect(remote: &str) -> Result<u64, TrackerError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(remote).await?;

    let transaction_id: u32 = rand::rng().random();
    let mut request = Vec::with_capacity(16);
    request.write_u64::<BigEndian>(PROTOCOL_ID)?;
    request.write_u32::<BigEndian>(ACTION_CONNECT)?;
    request.write_u32::<BigEndian>(transaction_id)?;
    socket.send(&request).await?;

    let mut buf = [0u8; 16];
    let n = timeout(UDP_STEP_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| TrackerError::Timeout)??;
    if n < 16 {
        return Err(TrackerError::InvalidUdpReply);
    }

    let mut cursor = &buf[..];
    let resp_action = cursor.read_u32::<BigEndian>()?;
    let resp_transaction_id = cursor.read_u32::<BigEndian>()?;
    let connection_id = cursor.read_u64::<BigEndian>()?;
    if resp_action != ACTION_CONNECT || resp_transaction_id != transaction_id {
        return Err(TrackerError::InvalidUdpReply);
    }
    Ok(connection_id)
}

async fn announce_step(
    remote: &str,
    connection_id: u64,
    metainfo: &Metainfo,
    peer_id: [u8; 20],
    port: u16,
) -> Result<Vec<PeerEndpoint>, TrackerError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(remote).await?;

    let transaction_id: u32 = rand::rng().random();
    let key: u32 = rand::rng().random();
    let left = metainfo.total_length();

    let mut request = Vec::with_capacity(98);
    request.write_u64::<BigEndian>(connection_id)?;
    request.write_u32::<BigEndian>(ACTION_ANNOUNCE)?;
    request.write_u32::<BigEndian>(transaction_id)?;
    request.write_all(&metainfo.info_hash())?;
    request.write_all(&peer_id)?;
    request.write_u64::<BigEndian>(0)?; // downloaded
    request.write_u64::<BigEndian>(left)?;
    request.write_u64::<BigEndian>(0)?; // uploaded
    request.write_u32::<BigEndian>(0)?; // event: none
    request.write_u32::<BigEndian>(0)?; // ip: default
    request.write_u32::<BigEndian>(key)?;
    request.write_i32::<BigEndian>(-1)?; // num_want: default
    request.write_u16::<BigEndian>(port)?;
    socket.send(&request).await?;

    let mut buf = [0u8; 2048];
    let n = timeout(UDP_STEP_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| TrackerError::Timeout)??;
    if n < 20 {
        return Err(TrackerError::InvalidUdpReply);
    }

    let mut cursor = &buf[..20];
    let resp_action = cursor.read_u32::<BigEndian>()?;
    let resp_transaction_id = cursor.read_u32::<BigEndian>()?;
    if resp_action != ACTION_ANNOUNCE || resp_transaction_id != transaction_id {
        return Err(TrackerError::InvalidUdpReply);
    }

    Ok(parse_compact_peers(&buf[20..n]))
}
