use std::collections::HashMap;
use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

use super::decode;
use super::error::ClientError;

/// First-in-first-out queue of owned byte segments.
///
/// `append` takes ownership of a segment without copying; reads consume
/// leading segments in order, advancing the read cursor of the first
/// partially consumed one.  There is no internal defragmentation.
#[derive(Debug, Default)]
pub struct ByteQueue
{
    segments: VecDeque<Bytes>,
    len: usize,
}

impl ByteQueue {
    pub fn new() -> ByteQueue
    {
        ByteQueue {
            segments: VecDeque::new(),
            len: 0,
        }
    }

    /// Append one segment, taking ownership.  Empty segments are dropped.
    pub fn append(&mut self, segment: Bytes)
    {
        if segment.is_empty() {
            return;
        }
        self.len += segment.len();
        self.segments.push_back(segment);
    }

    /// Number of pending bytes.
    pub fn len(&self) -> usize
    {
        self.len
    }

    pub fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    /// Copy at most `n` bytes into `dest` starting at `offset`, removing
    /// them from the queue.  Returns the number of bytes consumed, which is
    /// exactly `min(n, len, dest.len() - offset)`.
    pub fn read(&mut self, n: usize, dest: &mut [u8], offset: usize) -> usize
    {
        let room = dest.len().saturating_sub(offset);
        let mut wanted = n.min(self.len).min(room);
        let mut written = 0;
        while wanted > 0 {
            let front = self.segments.front_mut().unwrap();
            let take = wanted.min(front.len());
            dest[offset + written..offset + written + take]
                .copy_from_slice(&front[..take]);
            front.advance(take);
            if front.is_empty() {
                self.segments.pop_front();
            }
            self.len -= take;
            written += take;
            wanted -= take;
        }
        written
    }

    /// Move up to `n` bytes into `out`, removing them from the queue.
    /// Returns the number of bytes moved.
    pub fn drain_up_to(&mut self, n: usize, out: &mut BytesMut) -> usize
    {
        let mut wanted = n.min(self.len);
        let moved = wanted;
        while wanted > 0 {
            let front = self.segments.front_mut().unwrap();
            let take = wanted.min(front.len());
            out.extend_from_slice(&front[..take]);
            front.advance(take);
            if front.is_empty() {
                self.segments.pop_front();
            }
            self.len -= take;
            wanted -= take;
        }
        moved
    }

    /// Contiguous copy of the entire pending content; the queue is left
    /// untouched.
    pub fn snapshot_copy(&self) -> Bytes
    {
        let mut out = BytesMut::with_capacity(self.len);
        for segment in &self.segments {
            out.extend_from_slice(segment);
        }
        out.freeze()
    }

    /// Drain the queue into one contiguous block.
    pub fn take_all(&mut self) -> Bytes
    {
        if self.segments.len() == 1 {
            self.len = 0;
            return self.segments.pop_front().unwrap();
        }
        let out = self.snapshot_copy();
        self.reset();
        out
    }

    /// Decode the pending bytes as FastCGI name-value pairs, draining the
    /// queue.  Later pairs overwrite earlier ones with the same name.
    pub fn decode_name_value_pairs(&mut self)
                                   -> Result<HashMap<String, String>, ClientError>
    {
        let mut block = self.take_all();
        let mut pairs = HashMap::new();
        while !block.is_empty() {
            let (name, value, rest) = decode::decode_name_value_pair(block)?;
            let name = String::from_utf8(name.to_vec()).map_err(|_| {
                ClientError::Encoding("parameter name is not UTF-8".to_string())
            })?;
            let value = String::from_utf8(value.to_vec()).map_err(|_| {
                ClientError::Encoding(format!("value of {} is not UTF-8", name))
            })?;
            pairs.insert(name, value);
            block = rest;
        }
        Ok(pairs)
    }

    /// Empty the queue.
    pub fn reset(&mut self)
    {
        self.segments.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::super::encode;
    use super::*;

    #[test]
    fn read_crosses_segment_boundaries()
    {
        let mut q = ByteQueue::new();
        q.append(Bytes::from_static(&[1, 2, 3]));
        q.append(Bytes::from_static(&[4, 5]));
        q.append(Bytes::from_static(&[6]));
        assert_eq!(q.len(), 6);

        let mut dest = [0u8; 4];
        assert_eq!(q.read(4, &mut dest, 0), 4);
        assert_eq!(dest, [1, 2, 3, 4]);
        assert_eq!(q.len(), 2);

        let mut rest = [0u8; 8];
        assert_eq!(q.read(8, &mut rest, 0), 2);
        assert_eq!(&rest[..2], &[5, 6]);
        assert!(q.is_empty());
    }

    #[test]
    fn read_respects_dest_offset()
    {
        let mut q = ByteQueue::new();
        q.append(Bytes::from_static(b"abcd"));
        let mut dest = [0u8; 4];
        assert_eq!(q.read(10, &mut dest, 2), 2);
        assert_eq!(&dest, b"\0\0ab");
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn snapshot_copy_does_not_consume()
    {
        let mut q = ByteQueue::new();
        q.append(Bytes::from_static(b"he"));
        q.append(Bytes::from_static(b"llo"));
        assert_eq!(q.snapshot_copy(), Bytes::from_static(b"hello"));
        assert_eq!(q.len(), 5);
        assert_eq!(q.take_all(), Bytes::from_static(b"hello"));
        assert!(q.is_empty());
    }

    #[test]
    fn drain_up_to_moves_partial_segments()
    {
        let mut q = ByteQueue::new();
        q.append(Bytes::from_static(b"abc"));
        q.append(Bytes::from_static(b"defg"));
        let mut out = BytesMut::new();
        assert_eq!(q.drain_up_to(5, &mut out), 5);
        assert_eq!(&out[..], b"abcde");
        assert_eq!(q.len(), 2);
        assert_eq!(q.take_all(), Bytes::from_static(b"fg"));
    }

    #[test]
    fn decode_pairs_spanning_segments()
    {
        let mut encoded = BytesMut::new();
        encode::encode_name_value_pair(&mut encoded, b"REQUEST_METHOD", b"GET");
        encode::encode_name_value_pair(&mut encoded, b"QUERY_STRING", b"a=1");
        let encoded = encoded.freeze();

        // Split the encoding mid-pair to prove segmentation is invisible.
        let mut q = ByteQueue::new();
        q.append(encoded.slice(..7));
        q.append(encoded.slice(7..));

        let pairs = q.decode_name_value_pairs().unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs["REQUEST_METHOD"], "GET");
        assert_eq!(pairs["QUERY_STRING"], "a=1");
        assert!(q.is_empty());
    }

    #[test]
    fn decode_pairs_last_writer_wins()
    {
        let mut encoded = BytesMut::new();
        encode::encode_name_value_pair(&mut encoded, b"X", b"first");
        encode::encode_name_value_pair(&mut encoded, b"X", b"second");
        let mut q = ByteQueue::new();
        q.append(encoded.freeze());
        let pairs = q.decode_name_value_pairs().unwrap();
        assert_eq!(pairs["X"], "second");
    }

    #[test]
    fn decode_pairs_roundtrip_across_length_boundary()
    {
        let long_value = "v".repeat(128);
        let mut encoded = BytesMut::new();
        encode::encode_name_value_pair(&mut encoded, b"SHORT", b"x");
        encode::encode_name_value_pair(&mut encoded, "L".repeat(127).as_bytes(),
                                       long_value.as_bytes());
        let mut q = ByteQueue::new();
        q.append(encoded.freeze());
        let pairs = q.decode_name_value_pairs().unwrap();
        assert_eq!(pairs["SHORT"], "x");
        assert_eq!(pairs["L".repeat(127).as_str()], long_value);
    }

    #[test]
    fn decode_pairs_rejects_overrun()
    {
        let mut q = ByteQueue::new();
        q.append(Bytes::from_static(&[10u8, 1, b'a']));
        assert!(q.decode_name_value_pairs().is_err());
    }

    #[test]
    fn reset_empties_the_queue()
    {
        let mut q = ByteQueue::new();
        q.append(Bytes::from_static(b"data"));
        q.reset();
        assert!(q.is_empty());
        let mut dest = [0u8; 4];
        assert_eq!(q.read(4, &mut dest, 0), 0);
    }
}
