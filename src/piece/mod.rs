//! The piece manager: builds the piece/block plan from a metainfo view,
//! hands out block requests, accepts block deliveries, verifies piece
//! integrity by SHA-1, and persists verified pieces to the output file.
//!
//! Shared across every peer task behind an `Arc`, with a single mutex
//! guarding the two mutating operations (`next_request`,
//! `block_received`) so a block can never be handed out twice while still
//! Missing, and a piece can never un-verify once its hash matches.
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::torrent::file::BLOCK_SIZE;
use crate::torrent::Metainfo;

#[derive(Debug, Error)]
pub enum PieceManagerError {
    #[error("I/O error writing output file: {0}")]
    Io(#[from] std::io::Error),
}

/// A single block request/delivery unit: at most `BLOCK_SIZE` bytes within
/// one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub piece_index: u32,
    pub offset: u32,
    pub length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Missing,
    Pending,
    Retrieved,
}

struct Piece {
    index: u32,
    blocks: Vec<Block>,
    states: Vec<BlockState>,
    hash: [u8; 20],
    buf: Vec<u8>,
}

impl Piece {
    fn new(index: u32, length: u64, hash: [u8; 20]) -> Self {
        let mut blocks = Vec::new();
        let mut remaining = length;
        let mut offset = 0u32;
        while remaining > 0 {
            let len = remaining.min(BLOCK_SIZE as u64) as u32;
            blocks.push(Block {
                piece_index: index,
                offset,
                length: len,
            });
            offset += len;
            remaining -= len as u64;
        }
        let states = vec![BlockState::Missing; blocks.len()];
        Piece {
            index,
            blocks,
            states,
            hash,
            buf: vec![0u8; length as usize],
        }
    }

    fn all_retrieved(&self) -> bool {
        self.states.iter().all(|s| *s == BlockState::Retrieved)
    }

    fn next_missing(&mut self) -> Option<Block> {
        let position = self
            .states
            .iter()
            .position(|s| *s == BlockState::Missing)?;
        self.states[position] = BlockState::Pending;
        Some(self.blocks[position])
    }

    fn receive(&mut self, offset: u32, data: &[u8]) -> bool {
        let Some(position) = self.blocks.iter().position(|b| b.offset == offset) else {
            return false;
        };
        if self.states[position] != BlockState::Pending {
            return false;
        }
        let start = offset as usize;
        self.buf[start..start + data.len()].copy_from_slice(data);
        self.states[position] = BlockState::Retrieved;
        true
    }

    fn reset(&mut self) {
        self.states.fill(BlockState::Missing);
    }

    fn verify(&self) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(&self.buf);
        let digest = hasher.finalize();
        digest.as_slice() == self.hash
    }
}

pub struct PieceManager {
    pieces: Mutex<Vec<Piece>>,
    file: Mutex<File>,
    piece_length: u64,
}

impl PieceManager {
    /// Builds the piece/block plan for `metainfo` and creates (or
    /// truncates) the output file at `output_path`.
    pub fn new(metainfo: &Metainfo, output_path: &Path) -> Result<Self, PieceManagerError> {
        let piece_length = metainfo.piece_length();
        let total_length = metainfo.total_length();
        let num_pieces = metainfo.num_pieces() as u64;

        let pieces = (0..num_pieces)
            .map(|i| {
                let length = if i == num_pieces - 1 {
                    total_length - i * piece_length
                } else {
                    piece_length
                };
                Piece::new(i as u32, length, metainfo.piece_hashes()[i as usize])
            })
            .collect();

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(output_path)?;

        Ok(PieceManager {
            pieces: Mutex::new(pieces),
            file: Mutex::new(file),
            piece_length,
        })
    }

    /// Returns the next Missing block (marking it Pending), scanning
    /// pieces in index order. `None` if there is no outstanding work.
    pub fn next_request(&self) -> Option<Block> {
        let mut pieces = self.pieces.lock().unwrap();
        for piece in pieces.iter_mut() {
            if !piece.all_retrieved() {
                if let Some(block) = piece.next_missing() {
                    return Some(block);
                }
            }
        }
        None
    }

    /// Records a block delivery. Ignored if the target block isn't
    /// Pending (tolerates racing requests to multiple peers). When every
    /// block of the piece is Retrieved, hash-checks the assembled buffer:
    /// on match it is written to the output file and the piece stays
    /// Retrieved; on mismatch every block reverts to Missing.
    pub fn block_received(&self, piece_index: u32, offset: u32, data: &[u8]) {
        let mut pieces = self.pieces.lock().unwrap();
        let Some(piece) = pieces.get_mut(piece_index as usize) else {
            return;
        };
        if !piece.receive(offset, data) {
            return;
        }
        if !piece.all_retrieved() {
            return;
        }

        if piece.verify() {
            let write_offset = piece.index as u64 * self.piece_length;
            let mut file = self.file.lock().unwrap();
            if let Err(err) = write_piece(&mut file, write_offset, &piece.buf) {
                warn!(piece = piece_index, error = %err, "failed to write verified piece to disk");
            } else {
                info!(piece = piece_index, "piece verified and written");
            }
        } else {
            warn!(piece = piece_index, "piece hash mismatch, re-requesting");
            piece.reset();
        }
    }

    /// True iff every piece's blocks are all Retrieved (and therefore
    /// hash-verified — a piece cannot stay Retrieved otherwise).
    pub fn is_complete(&self) -> bool {
        let pieces = self.pieces.lock().unwrap();
        pieces.iter().all(|p| p.all_retrieved())
    }

    /// Fraction of blocks across the whole torrent that are Retrieved.
    pub fn progress(&self) -> f64 {
        let pieces = self.pieces.lock().unwrap();
        let mut retrieved = 0usize;
        let mut total = 0usize;
        for piece in pieces.iter() {
            total += piece.states.len();
            retrieved += piece
                .states
                .iter()
                .filter(|s| **s == BlockState::Retrieved)
                .count();
        }
        if total == 0 {
            return 1.0;
        }
        retrieved as f64 / total as f64
    }

    /// Flushes and releases the output file handle.
    pub fn close(&self) -> Result<(), PieceManagerError> {
        let mut file = self.file.lock().unwrap();
        file.flush()?;
        debug!("piece manager closed output file");
        Ok(())
    }
}

fn write_piece(file: &mut File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        out
    }

    fn metainfo_with(total_length: u64, piece_length: u64, data: &[u8]) -> Metainfo {
        use crate::torrent::file::InfoDict;
        let num_pieces = total_length.div_ceil(piece_length);
        let mut pieces_hash = Vec::new();
        for i in 0..num_pieces {
            let start = (i * piece_length) as usize;
            let end = ((i + 1) * piece_length).min(total_length) as usize;
            pieces_hash.push(hash_of(&data[start..end]));
        }
        Metainfo {
            announce: "http://t".to_string(),
            announce_list: vec![],
            info: InfoDict {
                piece_length: piece_length as i64,
                pieces: vec![],
                name: "out.bin".to_string(),
                length: Some(total_length as i64),
                files: vec![],
                is_directory: false,
            },
            info_hash: [0u8; 20],
            pieces_hash,
        }
    }

    /// Builds a multi-file metainfo (`info.files`, no `info.length`) whose
    /// `total_length()` is the sum of each file's length, matching spec
    /// §3's "sum over `files`" rule for the directory case.
    fn multi_file_metainfo(piece_length: u64, file_lengths: &[u64], data: &[u8]) -> Metainfo {
        use crate::torrent::file::{FileDict, InfoDict};
        let total_length: u64 = file_lengths.iter().sum();
        let num_pieces = total_length.div_ceil(piece_length);
        let mut pieces_hash = Vec::new();
        for i in 0..num_pieces {
            let start = (i * piece_length) as usize;
            let end = ((i + 1) * piece_length).min(total_length) as usize;
            pieces_hash.push(hash_of(&data[start..end]));
        }
        let files = file_lengths
            .iter()
            .enumerate()
            .map(|(i, &length)| FileDict {
                length: length as i64,
                path: vec![format!("part-{i}.bin")],
            })
            .collect();
        Metainfo {
            announce: "http://t".to_string(),
            announce_list: vec![],
            info: InfoDict {
                piece_length: piece_length as i64,
                pieces: vec![],
                name: "multi".to_string(),
                length: None,
                files,
                is_directory: true,
            },
            info_hash: [0u8; 20],
            pieces_hash,
        }
    }

    #[test]
    fn multi_file_total_length_sums_file_lengths_and_matches_piece_plan() {
        let piece_length = BLOCK_SIZE as u64;
        let data = vec![3u8; piece_length as usize * 2];
        let metainfo = multi_file_metainfo(piece_length, &[piece_length, piece_length], &data);
        assert_eq!(metainfo.total_length(), piece_length * 2);

        let dir = tempfile::tempdir().unwrap();
        let manager = PieceManager::new(&metainfo, &dir.path().join("out.bin")).unwrap();
        let pieces = manager.pieces.lock().unwrap();
        let sum: u64 = pieces
            .iter()
            .flat_map(|p| p.blocks.iter())
            .map(|b| b.length as u64)
            .sum();
        assert_eq!(sum, metainfo.total_length());
    }

    #[test]
    fn piece_plan_arithmetic_matches_total_length() {
        let piece_length = 32_768u64;
        let total_length = piece_length * 3 + 1000;
        let data = vec![7u8; total_length as usize];
        let metainfo = metainfo_with(total_length, piece_length, &data);

        let dir = tempfile::tempdir().unwrap();
        let manager = PieceManager::new(&metainfo, &dir.path().join("out.bin")).unwrap();
        let pieces = manager.pieces.lock().unwrap();

        let sum: u64 = pieces
            .iter()
            .flat_map(|p| p.blocks.iter())
            .map(|b| b.length as u64)
            .sum();
        assert_eq!(sum, total_length);
        assert_eq!(pieces.len() as u64, 4);
    }

    #[test]
    fn scheduler_never_returns_same_missing_block_twice_before_delivery() {
        let piece_length = BLOCK_SIZE as u64 * 2;
        let data = vec![1u8; piece_length as usize];
        let metainfo = metainfo_with(piece_length, piece_length, &data);
        let dir = tempfile::tempdir().unwrap();
        let manager = PieceManager::new(&metainfo, &dir.path().join("out.bin")).unwrap();

        let first = manager.next_request().unwrap();
        let second = manager.next_request().unwrap();
        assert_ne!((first.piece_index, first.offset), (second.piece_index, second.offset));
        assert!(manager.next_request().is_none());
    }

    #[test]
    fn verifier_resets_piece_on_hash_mismatch_then_succeeds_on_retry() {
        let piece_length = BLOCK_SIZE as u64;
        let data = vec![42u8; piece_length as usize];
        let metainfo = metainfo_with(piece_length, piece_length, &data);
        let dir = tempfile::tempdir().unwrap();
        let manager = PieceManager::new(&metainfo, &dir.path().join("out.bin")).unwrap();

        let block = manager.next_request().unwrap();
        let mut corrupt = data.clone();
        corrupt[0] ^= 0xFF;
        manager.block_received(block.piece_index, block.offset, &corrupt);
        assert!(!manager.is_complete());

        let block = manager.next_request().unwrap();
        manager.block_received(block.piece_index, block.offset, &data);
        assert!(manager.is_complete());
    }

    #[test]
    fn delivery_to_non_pending_block_is_ignored() {
        let piece_length = BLOCK_SIZE as u64;
        let data = vec![5u8; piece_length as usize];
        let metainfo = metainfo_with(piece_length, piece_length, &data);
        let dir = tempfile::tempdir().unwrap();
        let manager = PieceManager::new(&metainfo, &dir.path().join("out.bin")).unwrap();

        manager.block_received(0, 0, &data);
        assert!(!manager.is_complete());
        assert_eq!(manager.progress(), 0.0);
    }
}
