use bytes::BufMut;

/// Write one length field, switching to the 4-byte form above 127.
fn encode_length(buf: &mut dyn BufMut, len: usize)
{
    if len > 127 {
        buf.put_u32(u32::try_from(len).unwrap() | 0x8000_0000u32);
    } else {
        buf.put_u8(len as u8);
    }
}

/// Write name-value pair
pub fn encode_name_value_pair(buf: &mut dyn BufMut, name: &[u8], value: &[u8])
{
    encode_length(buf, name.len());
    encode_length(buf, value.len());
    buf.put_slice(name);
    buf.put_slice(value);
}

#[cfg(test)]
use bytes::BytesMut;

#[test]
fn test_encode_short_lengths()
{
    let mut buf = BytesMut::new();
    encode_name_value_pair(&mut buf, b"ab", b"xyz");
    assert_eq!(&buf[..], &[2u8, 3, b'a', b'b', b'x', b'y', b'z']);
}

#[test]
fn test_encode_switches_to_four_bytes_above_127()
{
    let name = vec![b'n'; 127];
    let value = vec![b'v'; 128];
    let mut buf = BytesMut::new();
    encode_name_value_pair(&mut buf, &name, &value);
    assert_eq!(buf[0], 127);
    assert_eq!(&buf[1..5], &[0x80u8, 0, 0, 128]);
    assert_eq!(buf.len(), 1 + 4 + 127 + 128);
}
