//! Bencode decoding.
use super::BencodeError;
use super::BencodeResult;
use super::BencodeValue;

use std::io::{self, Read};
use tracing::instrument;

/// Decodes a single bencoded value from the start of `data`.
///
/// This is the entry point callers reach for: it wraps the byte slice in a
/// peekable byte iterator and dispatches on the leading tag byte.
pub fn decode(data: &[u8]) -> BencodeResult<BencodeValue> {
    let mut reader = io::Cursor::new(data).bytes().peekable();
    decode_next(&mut reader)
}

/// Decodes a bencode byte string in the format `<length>:<data>`.
#[instrument(skip(reader), level = "trace")]
pub fn decode_string<R: Read>(
    reader: &mut std::iter::Peekable<io::Bytes<R>>,
) -> BencodeResult<Vec<u8>> {
    let length_str = read_until(reader, b':')?;
    if length_str.len() > 1 && length_str.starts_with('0') {
        return Err(BencodeError::InvalidStringLength);
    }
    let length = length_str
        .parse::<usize>()
        .map_err(|_| BencodeError::InvalidStringLength)?;

    let mut string_bytes = vec![0; length];
    for byte in string_bytes.iter_mut() {
        *byte = reader
            .next()
            .ok_or(BencodeError::UnexpectedEOI)?
            .map_err(BencodeError::Io)?;
    }
    Ok(string_bytes)
}

/// Reads bytes up to and including `delimiter`, returning everything before
/// it decoded as ASCII/UTF-8 (length prefixes and integers are always
/// decimal digits, so this never legitimately sees non-UTF-8 bytes).
#[instrument(skip(reader), level = "trace")]
fn read_until<R: Read>(
    reader: &mut std::iter::Peekable<io::Bytes<R>>,
    delimiter: u8,
) -> BencodeResult<String> {
    let mut buffer = Vec::new();

    loop {
        let &current_byte = reader
            .peek()
            .ok_or(BencodeError::UnexpectedEOI)?
            .as_ref()
            .map_err(|e| BencodeError::Io(io::Error::from(e.kind())))?;

        if current_byte == delimiter {
            reader
                .next()
                .ok_or(BencodeError::UnexpectedEOI)?
                .map_err(BencodeError::Io)?;
            break;
        }
        buffer.push(
            reader
                .next()
                .ok_or(BencodeError::UnexpectedEOI)?
                .map_err(BencodeError::Io)?,
        );
    }

    String::from_utf8(buffer)
        .map_err(|e| BencodeError::InvalidFormat(format!("non-ASCII length/integer: {e}")))
}

/// Decodes a bencode integer in the format `i<decimal>e`.
///
/// Leading zeros (other than the bare `0`) and `-0` are ill-formed per the
/// bencode grammar and rejected here rather than silently accepted.
#[instrument(skip(reader), level = "trace")]
pub fn decode_integer<R: Read>(
    reader: &mut std::iter::Peekable<io::Bytes<R>>,
) -> BencodeResult<i64> {
    let first_byte = reader
        .next()
        .ok_or(BencodeError::UnexpectedEOI)?
        .map_err(BencodeError::Io)?;

    if first_byte != b'i' {
        return Err(BencodeError::InvalidFormat(
            "integer must start with 'i'".to_string(),
        ));
    }

    let num_str = read_until(reader, b'e')?;

    if num_str.is_empty() {
        return Err(BencodeError::InvalidInteger);
    }
    if num_str == "-0" {
        return Err(BencodeError::InvalidInteger);
    }
    let digits = num_str.strip_prefix('-').unwrap_or(&num_str);
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return Err(BencodeError::InvalidInteger);
    }

    num_str
        .parse::<i64>()
        .map_err(|_| BencodeError::InvalidInteger)
}

/// Decodes a bencode list in the format `l<items>e`.
#[instrument(skip(reader), level = "trace")]
fn decode_list<R: Read>(
    reader: &mut std::iter::Peekable<io::Bytes<R>>,
) -> BencodeResult<Vec<BencodeValue>> {
    let first_byte = reader
        .next()
        .ok_or(BencodeError::UnexpectedEOI)?
        .map_err(BencodeError::Io)?;
    if first_byte != b'l' {
        return Err(BencodeError::InvalidFormat(
            "list must start with 'l'".to_string(),
        ));
    }

    let mut list = Vec::new();
    loop {
        let &current_byte = reader
            .peek()
            .ok_or(BencodeError::UnexpectedEOI)?
            .as_ref()
            .map_err(|e| BencodeError::Io(io::Error::from(e.kind())))?;

        if current_byte == b'e' {
            reader
                .next()
                .ok_or(BencodeError::UnexpectedEOI)?
                .map_err(BencodeError::Io)?;
            break;
        }

        list.push(decode_next(reader)?);
    }
    Ok(list)
}

/// Decodes a bencode dictionary in the format `d<key><value>...e`.
///
/// Keys must be byte strings; any key order is accepted on decode (the
/// encoder is solely responsible for canonical ordering). Duplicate keys
/// keep the first occurrence in iteration order but `get` always returns
/// the first match, matching the "first wins" convention most bencode
/// parsers settle on.
#[instrument(skip(reader), level = "trace")]
fn decode_dict<R: Read>(
    reader: &mut std::iter::Peekable<io::Bytes<R>>,
) -> BencodeResult<Vec<(Vec<u8>, BencodeValue)>> {
    let first_byte = reader
        .next()
        .ok_or(BencodeError::UnexpectedEOI)?
        .map_err(BencodeError::Io)?;

    if first_byte != b'd' {
        return Err(BencodeError::InvalidFormat(
            "dictionary must start with 'd'".to_string(),
        ));
    }

    let mut entries = Vec::new();
    loop {
        let &current_byte = reader
            .peek()
            .ok_or(BencodeError::UnexpectedEOI)?
            .as_ref()
            .map_err(|e| BencodeError::Io(io::Error::from(e.kind())))?;

        if current_byte == b'e' {
            reader
                .next()
                .ok_or(BencodeError::UnexpectedEOI)?
                .map_err(BencodeError::Io)?;
            break;
        }

        if !current_byte.is_ascii_digit() {
            return Err(BencodeError::DictKeyNotString);
        }
        let key = decode_string(reader)?;
        let value = decode_next(reader)?;
        entries.push((key, value));
    }

    Ok(entries)
}

#[instrument(skip(reader), level = "trace")]
fn decode_next<R: Read>(
    reader: &mut std::iter::Peekable<io::Bytes<R>>,
) -> BencodeResult<BencodeValue> {
    let &first_byte = reader
        .peek()
        .ok_or(BencodeError::UnexpectedEOI)?
        .as_ref()
        .map_err(|e| BencodeError::Io(io::Error::from(e.kind())))?;

    match first_byte {
        b'0'..=b'9' => decode_string(reader).map(BencodeValue::String),
        b'i' => decode_integer(reader).map(BencodeValue::Integer),
        b'l' => decode_list(reader).map(BencodeValue::List),
        b'd' => decode_dict(reader).map(BencodeValue::Dict),
        other => Err(BencodeError::InvalidFormat(format!(
            "unexpected type marker: {}",
            other as char
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hello_world_dict() {
        let value = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
        assert_eq!(
            value,
            BencodeValue::Dict(vec![
                (b"cow".to_vec(), BencodeValue::String(b"moo".to_vec())),
                (b"spam".to_vec(), BencodeValue::String(b"eggs".to_vec())),
            ])
        );
    }

    #[test]
    fn decodes_integers() {
        assert_eq!(decode(b"i42e").unwrap(), BencodeValue::Integer(42));
        assert_eq!(decode(b"i-42e").unwrap(), BencodeValue::Integer(-42));
        assert_eq!(decode(b"i0e").unwrap(), BencodeValue::Integer(0));
    }

    #[test]
    fn rejects_leading_zero_integers() {
        assert!(decode(b"i04e").is_err());
        assert!(decode(b"i-0e").is_err());
    }

    #[test]
    fn decodes_nested_list() {
        let value = decode(b"li42ei-1ee").unwrap();
        assert_eq!(
            value,
            BencodeValue::List(vec![BencodeValue::Integer(42), BencodeValue::Integer(-1)])
        );
    }

    #[test]
    fn rejects_truncated_string() {
        assert!(decode(b"5:hi").is_err());
    }

    #[test]
    fn rejects_non_string_dict_key() {
        assert!(decode(b"di1ei2ee").is_err());
    }

    #[test]
    fn preserves_arbitrary_key_order_on_decode() {
        let value = decode(b"d4:spam4:eggs3:cow3:mooe").unwrap();
        match value {
            BencodeValue::Dict(entries) => {
                assert_eq!(entries[0].0, b"spam");
                assert_eq!(entries[1].0, b"cow");
            }
            _ => panic!("expected dict"),
        }
    }
}
