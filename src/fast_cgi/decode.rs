use bytes::Buf;
use bytes::Bytes;

use super::error::ClientError;

/// Read one name-value pair from the front of `block`.
/// Returns (name, value, remaining).
///
/// Lengths are big-endian on the wire in all cases: a single byte below
/// 0x80, otherwise four bytes with the high bit of the first byte set and
/// the remaining 31 bits giving the length.
pub fn decode_name_value_pair(mut block: Bytes)
                              -> Result<(Bytes, Bytes, Bytes), ClientError>
{
    let name_length = decode_length(&mut block)?;
    let value_length = decode_length(&mut block)?;
    if block.len() < name_length + value_length {
        return Err(ClientError::Encoding(format!(
            "name-value pair of {} bytes runs past the {} buffered bytes",
            name_length + value_length,
            block.len()
        )));
    }
    let name = block.split_to(name_length);
    let value = block.split_to(value_length);
    Ok((name, value, block))
}

fn decode_length(block: &mut Bytes) -> Result<usize, ClientError>
{
    if block.is_empty() {
        return Err(ClientError::Encoding(
            "name-value pair truncated in length field".to_string(),
        ));
    }
    if (block[0] & 0x80) == 0 {
        Ok(block.get_u8().into())
    } else {
        if block.len() < 4 {
            return Err(ClientError::Encoding(
                "name-value pair truncated in length field".to_string(),
            ));
        }
        Ok((block.get_u32() & 0x7fff_ffff) as usize)
    }
}

#[test]
fn test_decode_name_value_pair_11()
{
    let block = Bytes::from_static(&[2u8, 3, 1, 2, 6, 5, 4]);
    let (name, value, rest) = decode_name_value_pair(block).unwrap();
    assert_eq!(name, Bytes::from_static(&[1, 2]));
    assert_eq!(value, Bytes::from_static(&[6, 5, 4]));
    assert!(rest.is_empty());
}

#[test]
fn test_decode_name_value_pair_41()
{
    let block = Bytes::from_static(&[0x80u8, 0, 0, 3, 3, 1, 2, 3, 6, 5, 4]);
    let (name, value, _) = decode_name_value_pair(block).unwrap();
    assert_eq!(name, Bytes::from_static(&[1, 2, 3]));
    assert_eq!(value, Bytes::from_static(&[6, 5, 4]));
}

#[test]
fn test_decode_name_value_pair_14()
{
    let block = Bytes::from_static(&[3u8, 0x80, 0, 0, 3, 1, 2, 3, 6, 5, 4]);
    let (name, value, _) = decode_name_value_pair(block).unwrap();
    assert_eq!(name, Bytes::from_static(&[1, 2, 3]));
    assert_eq!(value, Bytes::from_static(&[6, 5, 4]));
}

#[test]
fn test_decode_name_value_pair_44()
{
    let block = Bytes::from_static(&[0x80u8, 0, 0, 3, 0x80, 0, 0, 3, 1, 2, 3,
                                     6, 5, 4]);
    let (name, value, _) = decode_name_value_pair(block).unwrap();
    assert_eq!(name, Bytes::from_static(&[1, 2, 3]));
    assert_eq!(value, Bytes::from_static(&[6, 5, 4]));
}

#[test]
fn test_decode_rejects_overrunning_length()
{
    let block = Bytes::from_static(&[5u8, 1, b'a', b'b']);
    assert!(decode_name_value_pair(block).is_err());
}

#[test]
fn test_decode_rejects_truncated_length_field()
{
    let block = Bytes::from_static(&[0x80u8, 0, 0]);
    assert!(decode_name_value_pair(block).is_err());
}
