//! Client-side record builders and a response parser for tests.  These
//! mimic what a web server would put on the wire.

use bytes::{Buf, Bytes, BytesMut};

use super::defs;
use super::defs::RecordType;
use super::encode;

pub fn frame(rec_type: RecordType, request_id: u16, content: &[u8]) -> Vec<u8>
{
    assert!(content.len() <= defs::FCGI_MAX_CONTENT_LEN);
    let mut out = Vec::with_capacity(defs::FCGI_HEADER_LEN + content.len());
    out.push(defs::FCGI_VERSION_1);
    out.push(rec_type.to_u8());
    out.extend_from_slice(&request_id.to_be_bytes());
    out.extend_from_slice(&(content.len() as u16).to_be_bytes());
    out.push(0);
    out.push(0);
    out.extend_from_slice(content);
    out
}

pub fn begin_request(request_id: u16, role: u16, keep_conn: bool) -> Vec<u8>
{
    let mut body = [0u8; 8];
    body[..2].copy_from_slice(&role.to_be_bytes());
    if keep_conn {
        body[2] = defs::FCGI_KEEP_CONN;
    }
    frame(RecordType::BeginRequest, request_id, &body)
}

/// PARAMS content followed by the empty PARAMS terminator.
pub fn params(request_id: u16, pairs: &[(&str, &str)]) -> Vec<u8>
{
    let mut content = BytesMut::new();
    for (name, value) in pairs {
        encode::encode_name_value_pair(&mut content, name.as_bytes(),
                                       value.as_bytes());
    }
    let mut out = Vec::new();
    for chunk in content.chunks(defs::FCGI_MAX_CONTENT_LEN) {
        out.extend_from_slice(&frame(RecordType::Params, request_id, chunk));
    }
    out.extend_from_slice(&frame(RecordType::Params, request_id, &[]));
    out
}

pub fn stdin(request_id: u16, content: &[u8]) -> Vec<u8>
{
    frame(RecordType::Stdin, request_id, content)
}

/// A complete minimal request: BEGIN_REQUEST, PARAMS, empty STDIN.
pub fn simple_request(request_id: u16, keep_conn: bool,
                      pairs: &[(&str, &str)]) -> Vec<u8>
{
    let mut out = begin_request(request_id, 1, keep_conn);
    out.extend_from_slice(&params(request_id, pairs));
    out.extend_from_slice(&stdin(request_id, &[]));
    out
}

/// One record as seen by the test client.
#[derive(Debug)]
pub struct ClientRecord
{
    pub rec_type: RecordType,
    pub request_id: u16,
    pub content: Bytes,
}

/// Split a byte stream written by the server into records.
pub fn parse_records(mut data: Bytes) -> Vec<ClientRecord>
{
    let mut records = Vec::new();
    while !data.is_empty() {
        assert!(data.len() >= defs::FCGI_HEADER_LEN, "partial record header");
        let version = data.get_u8();
        assert_eq!(version, defs::FCGI_VERSION_1);
        let rec_type = RecordType::from_u8(data.get_u8()).unwrap();
        let request_id = data.get_u16();
        let content_len = usize::from(data.get_u16());
        let padding_len = usize::from(data.get_u8());
        let _reserved = data.get_u8();
        let content = data.split_to(content_len);
        data.advance(padding_len);
        records.push(ClientRecord {
            rec_type,
            request_id,
            content,
        });
    }
    records
}

/// Concatenated STDOUT content for one request, and whether the stream was
/// closed by a zero-length record followed by END_REQUEST.
pub fn stdout_body(records: &[ClientRecord], request_id: u16) -> (Bytes, bool)
{
    let mut body = BytesMut::new();
    let mut terminated = false;
    let mut ended = false;
    for record in records {
        if record.request_id != request_id {
            continue;
        }
        match record.rec_type {
            RecordType::Stdout if record.content.is_empty() => {
                terminated = true;
            }
            RecordType::Stdout => {
                assert!(!terminated, "stdout content after the end marker");
                body.extend_from_slice(&record.content);
            }
            RecordType::EndRequest => {
                ended = true;
            }
            _ => {}
        }
    }
    (body.freeze(), terminated && ended)
}
