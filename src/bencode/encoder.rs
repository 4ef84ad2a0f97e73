//! Bencode encoding.
use super::BencodeValue;
use super::Result;
use std::io::Write;
use tracing::instrument;

#[instrument(skip(writer, s), level = "trace")]
fn encode_string<W: Write>(writer: &mut W, s: &[u8]) -> Result<()> {
    write!(writer, "{}:", s.len())?;
    writer.write_all(s)?;
    Ok(())
}

#[instrument(skip(writer), level = "trace")]
fn encode_integer<W: Write>(writer: &mut W, i: i64) -> Result<()> {
    write!(writer, "i{i}e")?;
    Ok(())
}

#[instrument(skip(writer, list), level = "trace")]
fn encode_list<W: Write>(writer: &mut W, list: &[BencodeValue]) -> Result<()> {
    writer.write_all(b"l")?;
    for item in list {
        encode_value(writer, item)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

/// Dictionaries always re-sort their entries by key bytes before emission,
/// regardless of the order they were decoded or constructed in. This is
/// what makes info-hash computation independent of how a torrent file
/// happened to order its `info` keys.
#[instrument(skip(writer, dict), level = "trace")]
fn encode_dict<W: Write>(writer: &mut W, dict: &[(Vec<u8>, BencodeValue)]) -> Result<()> {
    writer.write_all(b"d")?;
    let mut entries: Vec<&(Vec<u8>, BencodeValue)> = dict.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, value) in entries {
        encode_string(writer, key)?;
        encode_value(writer, value)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

#[instrument(skip(writer), level = "trace")]
fn encode_value<W: Write>(writer: &mut W, value: &BencodeValue) -> Result<()> {
    match value {
        BencodeValue::String(s) => encode_string(writer, s),
        BencodeValue::Integer(i) => encode_integer(writer, *i),
        BencodeValue::List(list) => encode_list(writer, list),
        BencodeValue::Dict(dict) => encode_dict(writer, dict),
    }
}

#[instrument(skip(writer), level = "debug")]
pub fn encode<W: Write>(writer: &mut W, value: &BencodeValue) -> Result<()> {
    encode_value(writer, value)
}

/// Convenience wrapper returning the encoded bytes directly.
pub fn encode_to_vec(value: &BencodeValue) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    encode(&mut buffer, value)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::super::decoder::decode;
    use super::*;

    #[test]
    fn round_trips_hello_world() {
        let input = b"d3:cow3:moo4:spam4:eggse";
        let value = decode(input).unwrap();
        let encoded = encode_to_vec(&value).unwrap();
        assert_eq!(encoded, input);
    }

    #[test]
    fn sorts_dict_keys_regardless_of_construction_order() {
        let value = BencodeValue::Dict(vec![
            (b"zebra".to_vec(), BencodeValue::Integer(1)),
            (b"apple".to_vec(), BencodeValue::Integer(2)),
        ]);
        let encoded = encode_to_vec(&value).unwrap();
        assert_eq!(encoded, b"d5:applei2e5:zebrai1ee");
    }

    #[test]
    fn encodes_negative_integers() {
        let encoded = encode_to_vec(&BencodeValue::Integer(-7)).unwrap();
        assert_eq!(encoded, b"i-7e");
    }
}
