use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::Display;

/// One RESP2 value. `Null`/`NullArray` are carried as distinct variants
/// rather than folded into `Bulk`/`Array` so the encoder can pick the right
/// wire form without the caller re-deriving it from an `Option`.
#[derive(Debug, Clone, PartialEq)]
pub enum Resp {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Array(Vec<Resp>),
    Null,
    NullArray,
}

impl Resp {
    pub fn bulk(s: impl Into<Bytes>) -> Resp {
        Resp::Bulk(s.into())
    }

    pub fn ok() -> Resp {
        Resp::Simple("OK".to_string())
    }

    pub fn as_bulk_str(&self) -> Option<&str> {
        match self {
            Resp::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

impl Display for Resp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resp::Simple(s) => write!(f, "{s}"),
            Resp::Error(s) => write!(f, "-{s}"),
            Resp::Integer(i) => write!(f, "{i}"),
            Resp::Bulk(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Resp::Array(items) => {
                for item in items {
                    write!(f, "{item} ")?;
                }
                Ok(())
            }
            Resp::Null | Resp::NullArray => write!(f, "(nil)"),
        }
    }
}

/// A RESP command arriving over the wire is always an array of bulk
/// strings; this is the shape the parser in [`crate::protocol::command`]
/// expects. Anything else is a protocol violation.
pub fn command_array(parts: impl IntoIterator<Item = impl Into<Bytes>>) -> Resp {
    Resp::Array(parts.into_iter().map(|p| Resp::Bulk(p.into())).collect())
}

/// Encodes a value into its RESP2 wire form. Pure function: same input
/// always produces the same bytes, no I/O.
pub fn encode(value: &Resp) -> Bytes {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf);
    buf.freeze()
}

fn encode_into(value: &Resp, buf: &mut BytesMut) {
    match value {
        Resp::Simple(s) => {
            buf.put_u8(b'+');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        }
        Resp::Error(s) => {
            buf.put_u8(b'-');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        }
        Resp::Integer(n) => {
            buf.put_u8(b':');
            buf.put_slice(n.to_string().as_bytes());
            buf.put_slice(b"\r\n");
        }
        Resp::Bulk(b) => {
            buf.put_u8(b'$');
            buf.put_slice(b.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            buf.put_slice(b);
            buf.put_slice(b"\r\n");
        }
        Resp::Null => buf.put_slice(b"$-1\r\n"),
        Resp::NullArray => buf.put_slice(b"*-1\r\n"),
        Resp::Array(items) => {
            buf.put_u8(b'*');
            buf.put_slice(items.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            for item in items {
                encode_into(item, buf);
            }
        }
    }
}

/// A length-prefixed bulk payload with no trailing CRLF, as used for the
/// RDB blob sent after `+FULLRESYNC`.
pub fn encode_raw_bulk(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 16);
    buf.put_u8(b'$');
    buf.put_slice(payload.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(payload);
    buf.freeze()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown type byte '{0}'")]
    UnknownType(char),
    #[error("malformed length in {0}")]
    MalformedLength(&'static str),
    #[error("malformed line, missing trailing CRLF")]
    MissingTerminator,
}

/// Attempts to decode exactly one RESP value from the front of `input`.
///
/// Returns `Ok(None)` when `input` holds an incomplete frame (the caller
/// should read more bytes and retry) and `Ok(Some((value, consumed)))`
/// when a full frame was parsed, where `consumed` is the number of bytes
/// the caller should advance past. Pure function: no I/O, no mutation of
/// `input` itself.
pub fn decode(input: &[u8]) -> Result<Option<(Resp, usize)>, DecodeError> {
    if input.is_empty() {
        return Ok(None);
    }
    match input[0] {
        b'+' => decode_line(input, 1).map(|opt| opt.map(|(s, n)| (Resp::Simple(s), n))),
        b'-' => decode_line(input, 1).map(|opt| opt.map(|(s, n)| (Resp::Error(s), n))),
        b':' => decode_line(input, 1).map(|opt| {
            opt.and_then(|(s, n)| s.trim().parse::<i64>().ok().map(|v| (Resp::Integer(v), n)))
        }),
        b'$' => decode_bulk(input),
        b'*' => decode_array(input),
        other => Err(DecodeError::UnknownType(other as char)),
    }
}

fn find_crlf(input: &[u8], from: usize) -> Option<usize> {
    input[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| p + from)
}

fn decode_line(input: &[u8], from: usize) -> Result<Option<(String, usize)>, DecodeError> {
    match find_crlf(input, from) {
        None => Ok(None),
        Some(pos) => {
            let s = std::str::from_utf8(&input[from..pos])
                .map_err(|_| DecodeError::MalformedLength("line"))?
                .to_string();
            Ok(Some((s, pos + 2)))
        }
    }
}

fn decode_bulk(input: &[u8]) -> Result<Option<(Resp, usize)>, DecodeError> {
    let (len_str, header_len) = match decode_line(input, 1)? {
        None => return Ok(None),
        Some(v) => v,
    };
    let len: i64 = len_str
        .trim()
        .parse()
        .map_err(|_| DecodeError::MalformedLength("bulk"))?;
    if len < 0 {
        return Ok(Some((Resp::Null, header_len)));
    }
    let len = len as usize;
    let body_start = header_len;
    let body_end = body_start + len;
    if input.len() < body_end + 2 {
        return Ok(None);
    }
    if &input[body_end..body_end + 2] != b"\r\n" {
        return Err(DecodeError::MissingTerminator);
    }
    let body = Bytes::copy_from_slice(&input[body_start..body_end]);
    Ok(Some((Resp::Bulk(body), body_end + 2)))
}

fn decode_array(input: &[u8]) -> Result<Option<(Resp, usize)>, DecodeError> {
    let (len_str, mut consumed) = match decode_line(input, 1)? {
        None => return Ok(None),
        Some(v) => v,
    };
    let len: i64 = len_str
        .trim()
        .parse()
        .map_err(|_| DecodeError::MalformedLength("array"))?;
    if len < 0 {
        return Ok(Some((Resp::NullArray, consumed)));
    }
    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        match decode(&input[consumed..])? {
            None => return Ok(None),
            Some((item, item_len)) => {
                items.push(item);
                consumed += item_len;
            }
        }
    }
    Ok(Some((Resp::Array(items), consumed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant() {
        let values = vec![
            Resp::Simple("OK".into()),
            Resp::Error("ERR bad".into()),
            Resp::Integer(-42),
            Resp::Bulk(Bytes::from_static(b"hello")),
            Resp::Null,
            Resp::NullArray,
            Resp::Array(vec![Resp::Integer(1), Resp::bulk(Bytes::from_static(b"a"))]),
        ];
        for v in values {
            let encoded = encode(&v);
            let (decoded, consumed) = decode(&encoded).unwrap().unwrap();
            assert_eq!(decoded, v);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn partial_frame_returns_none() {
        let full = encode(&command_array(["SET", "k", "v"]));
        let partial = &full[..full.len() - 2];
        assert_eq!(decode(partial).unwrap(), None);
    }

    #[test]
    fn command_array_decodes_as_array_of_bulk() {
        let encoded = encode(&command_array(["SET", "foo", "bar"]));
        let (decoded, _) = decode(&encoded).unwrap().unwrap();
        match decoded {
            Resp::Array(items) => {
                assert_eq!(items.len(), 3);
                assert_eq!(items[0].as_bulk_str(), Some("SET"));
            }
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn unknown_type_byte_is_protocol_error() {
        assert_eq!(decode(b"!oops\r\n"), Err(DecodeError::UnknownType('!')));
    }
}
