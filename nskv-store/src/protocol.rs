//! # Request Parsing and Reply Encoding
//!
//! Incremental RESP2 command parsing over a `BytesMut` read buffer, plus the
//! reply encoders used by command dispatch. Bytes are consumed only once a
//! whole command is available.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Largest bulk argument accepted (bytes).
const MAX_BULK_LEN: usize = 64 * 1024 * 1024;
/// Largest argument count accepted per command.
const MAX_ARGS: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RespError {
    #[error("protocol error")]
    Protocol,
}

/// Parses commands sent as RESP arrays of bulk strings, or inline
/// whitespace-separated lines (as typed into a raw TCP session).
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Returns the next complete command, `Ok(None)` if more bytes are needed.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        if buf.is_empty() {
            return Ok(None);
        }
        let parsed = if buf[0] == b'*' {
            parse_array(&buf[..])?
        } else {
            parse_inline(&buf[..])
        };
        Ok(parsed.map(|(args, consumed)| {
            buf.advance(consumed);
            args
        }))
    }
}

fn parse_array(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, RespError> {
    let Some((header, mut pos)) = line(buf, 0) else {
        return Ok(None);
    };
    let count = parse_len(&header[1..])?;
    if count > MAX_ARGS {
        return Err(RespError::Protocol);
    }

    let mut args = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let Some((header, next)) = line(buf, pos) else {
            return Ok(None);
        };
        if header.first() != Some(&b'$') {
            return Err(RespError::Protocol);
        }
        let len = parse_len(&header[1..])?;
        if len > MAX_BULK_LEN {
            return Err(RespError::Protocol);
        }
        let end = next + len;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(RespError::Protocol);
        }
        args.push(buf[next..end].to_vec());
        pos = end + 2;
    }
    Ok(Some((args, pos)))
}

fn parse_inline(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    let end = buf.iter().position(|&b| b == b'\n')?;
    let args = buf[..end]
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty())
        .map(<[u8]>::to_vec)
        .collect();
    Some((args, end + 1))
}

/// Returns the line starting at `from` (without CRLF) and the index after it.
fn line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(from..)?;
    let idx = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..idx], from + idx + 2))
}

fn parse_len(digits: &[u8]) -> Result<usize, RespError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or(RespError::Protocol)
}

pub fn resp_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.push(b'+');
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Generic error reply, prefixed with `ERR`.
pub fn resp_error(message: &str) -> Vec<u8> {
    resp_error_code("ERR", message)
}

/// Error reply with an explicit code such as `NOAUTH` or `WRONGPASS`.
pub fn resp_error_code(code: &str, message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(code.len() + message.len() + 4);
    buf.push(b'-');
    buf.extend_from_slice(code.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_integer(value: i64) -> Vec<u8> {
    format!(":{}\r\n", value).into_bytes()
}

pub fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 16);
    write_bulk(&mut buf, data);
    buf
}

pub fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// Array of bulk strings.
pub fn resp_bulk_array<I, T>(items: I) -> Vec<u8>
where
    I: ExactSizeIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut buf = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        write_bulk(&mut buf, item.as_ref());
    }
    buf
}

/// `SCAN` reply: `[cursor, [keys...]]`.
pub fn resp_scan(cursor: u64, keys: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = b"*2\r\n".to_vec();
    write_bulk(&mut buf, cursor.to_string().as_bytes());
    buf.extend_from_slice(&resp_bulk_array(keys.iter()));
    buf
}

fn write_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}
