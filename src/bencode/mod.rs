//! Bencode codec: the binary serialization format used by metainfo files and
//! tracker HTTP replies.
//!
//! Bencode has four value kinds — integers, byte strings, lists, and ordered
//! dictionaries. A dictionary's keys are byte strings; a conforming decoder
//! accepts any key order on the way in but a conforming encoder must emit
//! keys in ascending lexicographic order, which is what makes info-hash
//! computation stable regardless of how a given file was authored.
use thiserror::Error;

pub mod decoder;
pub mod encoder;

pub use decoder::decode;
pub use encoder::{encode, encode_to_vec};

/// A decoded bencode value.
///
/// `Dict` is a `Vec` of key/value pairs rather than a `HashMap`: decoding
/// must preserve the order keys were observed in (round-trip fidelity on
/// already-canonical input), while encoding always re-sorts by key bytes.
/// A `HashMap` cannot express "preserve observed order" without an auxiliary
/// index, so the ordered vector is simpler and is the single source of truth
/// for both operations.
#[derive(Debug, PartialEq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(Vec<(Vec<u8>, BencodeValue)>),
}

impl BencodeValue {
    /// Looks up a key in a `Dict`, returning `None` for any other variant or
    /// a missing key.
    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        match self {
            BencodeValue::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.as_slice() == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Typed accessor for a `String` value, failing with `field` as context.
    pub fn as_bytes_field(&self, field: &'static str) -> BencodeResult<&[u8]> {
        match self {
            BencodeValue::String(s) => Ok(s),
            _ => Err(BencodeError::InvalidFieldType(field)),
        }
    }

    /// Typed accessor for an `Integer` value.
    pub fn as_integer_field(&self, field: &'static str) -> BencodeResult<i64> {
        match self {
            BencodeValue::Integer(i) => Ok(*i),
            _ => Err(BencodeError::InvalidFieldType(field)),
        }
    }

    /// Typed accessor for a `List` value.
    pub fn as_list_field(&self, field: &'static str) -> BencodeResult<&[BencodeValue]> {
        match self {
            BencodeValue::List(items) => Ok(items),
            _ => Err(BencodeError::InvalidFieldType(field)),
        }
    }

    /// Typed accessor for a `Dict` value.
    pub fn as_dict_field(&self, field: &'static str) -> BencodeResult<&[(Vec<u8>, BencodeValue)]> {
        match self {
            BencodeValue::Dict(entries) => Ok(entries),
            _ => Err(BencodeError::InvalidFieldType(field)),
        }
    }
}

/// Errors raised while decoding or encoding bencoded data.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid bencode format: {0}")]
    InvalidFormat(String),

    #[error("invalid integer syntax")]
    InvalidInteger,

    #[error("invalid string length")]
    InvalidStringLength,

    #[error("unexpected end of input")]
    UnexpectedEOI,

    #[error("cannot encode type: {0}")]
    CannotEncodeType(&'static str),

    #[error("dictionary keys must be byte strings")]
    DictKeyNotString,

    #[error("missing terminator for {0}")]
    MissingTerminator(&'static str),

    #[error("field {0} has the wrong type")]
    InvalidFieldType(&'static str),
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;
pub type Result<T> = BencodeResult<T>;
