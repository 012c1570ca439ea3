//! # RESP2 Encoding and Parsing
//!
//! Purpose: Frame outgoing commands and decode store replies for the pooled
//! connections, reusing caller-owned buffers.
//!
//! ## Design Principles
//! 1. **Top-Down Parsing**: One reply is read per call, recursing into arrays.
//! 2. **Buffer Reuse**: The connection owns the line buffer between calls.
//! 3. **Binary-Safe**: Bulk strings stay raw bytes; callers choose decoding.
//! 4. **Fail Fast**: Broken framing is a `Protocol` error and poisons the
//!    connection upstream.

use std::io::BufRead;

use crate::error::TransportError;

/// Nesting limit for array replies. `SCAN` needs two levels.
const MAX_DEPTH: usize = 8;
/// Largest bulk reply accepted (bytes).
const MAX_BULK_LEN: i64 = 64 * 1024 * 1024;

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays, with an empty vector for null arrays.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Turns an error reply into `TransportError::Server`, passing others through.
    pub fn into_result(self) -> Result<RespValue, TransportError> {
        match self {
            RespValue::Error(message) => Err(TransportError::Server {
                message: String::from_utf8_lossy(&message).into_owned(),
            }),
            other => Ok(other),
        }
    }

    /// Accepts `+OK` (or any simple string) as success.
    pub fn expect_ok(self) -> Result<(), TransportError> {
        match self.into_result()? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(TransportError::UnexpectedResponse),
        }
    }

    pub fn expect_integer(self) -> Result<i64, TransportError> {
        match self.into_result()? {
            RespValue::Integer(value) => Ok(value),
            _ => Err(TransportError::UnexpectedResponse),
        }
    }

    /// Reads a bulk or simple string; null bulk becomes `None`.
    pub fn expect_bytes(self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.into_result()? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Simple(data) => Ok(Some(data)),
            _ => Err(TransportError::UnexpectedResponse),
        }
    }

    pub fn expect_array(self) -> Result<Vec<RespValue>, TransportError> {
        match self.into_result()? {
            RespValue::Array(items) => Ok(items),
            _ => Err(TransportError::UnexpectedResponse),
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    write_header(out, b'*', args.len());
    for arg in args {
        write_header(out, b'$', arg.len());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
) -> Result<RespValue, TransportError> {
    read_value(reader, line_buf, 0)
}

fn read_value<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> Result<RespValue, TransportError> {
    if depth > MAX_DEPTH {
        return Err(TransportError::Protocol);
    }

    read_line(reader, line_buf)?;
    let (&tag, rest) = line_buf.split_first().ok_or(TransportError::Protocol)?;
    match tag {
        b'+' => Ok(RespValue::Simple(rest.to_vec())),
        b'-' => Ok(RespValue::Error(rest.to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(rest)?)),
        b'$' => {
            let len = parse_i64(rest)?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_i64(rest)?;
            if len <= 0 {
                return Ok(RespValue::Array(Vec::new()));
            }
            let mut items = Vec::with_capacity(len.min(1024) as usize);
            for _ in 0..len {
                items.push(read_value(reader, line_buf, depth + 1)?);
            }
            Ok(RespValue::Array(items))
        }
        _ => Err(TransportError::Protocol),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> Result<RespValue, TransportError> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    if len > MAX_BULK_LEN {
        return Err(TransportError::Protocol);
    }
    // Payload and trailing CRLF in one read.
    let mut data = vec![0u8; len as usize + 2];
    reader.read_exact(&mut data)?;
    if !data.ends_with(b"\r\n") {
        return Err(TransportError::Protocol);
    }
    data.truncate(len as usize);
    Ok(RespValue::Bulk(Some(data)))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<(), TransportError> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        // Peer closed the socket between replies.
        return Err(TransportError::Protocol);
    }
    if !buf.ends_with(b"\r\n") {
        return Err(TransportError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> Result<i64, TransportError> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or(TransportError::Protocol)
}

fn write_header(out: &mut Vec<u8>, tag: u8, len: usize) {
    out.push(tag);
    out.extend_from_slice(len.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(input: &[u8]) -> Result<RespValue, TransportError> {
        let mut reader = Cursor::new(input.to_vec());
        let mut line = Vec::new();
        read_response(&mut reader, &mut line)
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[b"GET", b"ns:key"], &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$6\r\nns:key\r\n");
    }

    #[test]
    fn parses_scalar_replies() {
        assert_eq!(parse(b"+PONG\r\n").unwrap(), RespValue::Simple(b"PONG".to_vec()));
        assert_eq!(parse(b":-7\r\n").unwrap(), RespValue::Integer(-7));
        assert_eq!(parse(b"$-1\r\n").unwrap(), RespValue::Bulk(None));
        assert_eq!(
            parse(b"$5\r\nhello\r\n").unwrap(),
            RespValue::Bulk(Some(b"hello".to_vec()))
        );
    }

    #[test]
    fn parses_scan_reply() {
        let reply = parse(b"*2\r\n$2\r\n17\r\n*2\r\n$3\r\na:1\r\n$3\r\na:2\r\n").unwrap();
        let items = reply.expect_array().unwrap();
        assert_eq!(items[0], RespValue::Bulk(Some(b"17".to_vec())));
        assert_eq!(
            items[1],
            RespValue::Array(vec![
                RespValue::Bulk(Some(b"a:1".to_vec())),
                RespValue::Bulk(Some(b"a:2".to_vec())),
            ])
        );
    }

    #[test]
    fn error_reply_becomes_server_error() {
        let reply = parse(b"-ERR bad\r\n").unwrap();
        match reply.expect_ok() {
            Err(TransportError::Server { message }) => assert_eq!(message, "ERR bad"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn rejects_broken_framing() {
        assert!(matches!(parse(b"+OK\n"), Err(TransportError::Protocol)));
        assert!(matches!(parse(b"$3\r\nabcd\r\n"), Err(TransportError::Protocol)));
        assert!(matches!(parse(b"?x\r\n"), Err(TransportError::Protocol)));
        assert!(matches!(parse(b""), Err(TransportError::Protocol)));
    }

    #[test]
    fn rejects_runaway_nesting() {
        let mut input = Vec::new();
        for _ in 0..=MAX_DEPTH + 1 {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        assert!(matches!(parse(&input), Err(TransportError::Protocol)));
    }

    #[test]
    fn rejects_oversized_bulk() {
        assert!(matches!(
            parse(b"$9223372036854775807\r\nabc\r\n"),
            Err(TransportError::Protocol)
        ));
        let header = format!("${}\r\n", MAX_BULK_LEN + 1);
        assert!(matches!(parse(header.as_bytes()), Err(TransportError::Protocol)));
    }
}
