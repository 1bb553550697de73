use std::fs::File;
use std::io::{BufReader, Read};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use bytes::Bytes;

use crate::store::value::ValueStore;

/// The canonical empty RDB payload (header + a handful of aux fields +
/// CRC footer) sent to a replica during `PSYNC` full resync. Captured
/// byte-for-byte so a real `redis-cli`/replica sees exactly what a
/// genuine empty snapshot looks like.
const RDB_EMPTY_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

pub fn empty_rdb() -> Vec<u8> {
    hex_to_bytes(RDB_EMPTY_HEX)
}

fn hex_to_bytes(hex: &str) -> Vec<u8> {
    assert_eq!(hex.len() % 2, 0);
    let mut result = Vec::with_capacity(hex.len() / 2);
    let mut iter = hex.chars();
    while let Some(c1) = iter.next() {
        let c2 = iter.next().expect("even-length hex string");
        result.push(u8::from_str_radix(&format!("{c1}{c2}"), 16).expect("valid hex digit pair"));
    }
    result
}

enum Length {
    Len(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
}

fn read_byte(r: &mut impl Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Top two bits of the length byte select the encoding: `00` 6-bit,
/// `01` 14-bit, `10` 32-bit, `11` an encoded integer.
fn read_length(r: &mut impl Read) -> Result<Length> {
    let head = read_byte(r)?;
    match head & 0b1100_0000 {
        0b0000_0000 => Ok(Length::Len((head & 0b0011_1111) as u64)),
        0b0100_0000 => {
            let low6 = head & 0b0011_1111;
            let second = read_byte(r)?;
            Ok(Length::Len(u16::from_be_bytes([low6, second]) as u64))
        }
        0b1000_0000 => {
            let mut buf = [0u8; 4];
            r.read_exact(&mut buf)?;
            Ok(Length::Len(u32::from_be_bytes(buf) as u64))
        }
        0b1100_0000 => match head & 0b0011_1111 {
            0 => Ok(Length::Int8(read_byte(r)? as i8)),
            1 => {
                let mut buf = [0u8; 2];
                r.read_exact(&mut buf)?;
                Ok(Length::Int16(i16::from_le_bytes(buf)))
            }
            2 => {
                let mut buf = [0u8; 4];
                r.read_exact(&mut buf)?;
                Ok(Length::Int32(i32::from_le_bytes(buf)))
            }
            n => bail!("unsupported RDB string encoding byte: {n}"),
        },
        _ => unreachable!("two bits, four cases"),
    }
}

fn read_string(r: &mut impl Read) -> Result<Bytes> {
    match read_length(r)? {
        Length::Len(len) => {
            let mut buf = vec![0u8; len as usize];
            r.read_exact(&mut buf)?;
            Ok(Bytes::from(buf))
        }
        Length::Int8(v) => Ok(Bytes::from(v.to_string())),
        Length::Int16(v) => Ok(Bytes::from(v.to_string())),
        Length::Int32(v) => Ok(Bytes::from(v.to_string())),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

/// Loads a `.rdb` snapshot from disk into the given value store. Only the
/// subset needed to ingest a real snapshot's key/value/expiry pairs is
/// implemented (string values only); persistence formats for other types
/// are out of scope. A missing or unreadable file is non-fatal — the
/// server just starts empty, matching how `--dir`/`--dbfilename` behave
/// when no prior snapshot exists yet.
pub fn load_into(path: &std::path::Path, store: &ValueStore) -> Result<()> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return Ok(()),
    };
    let mut reader = BufReader::new(file);

    let mut header = [0u8; 9];
    if reader.read_exact(&mut header).is_err() {
        return Ok(());
    }
    if &header[..5] != b"REDIS" {
        bail!("not an RDB file: bad magic");
    }

    let mut pending_expiry_ms: Option<u64> = None;
    loop {
        let opcode = match read_byte(&mut reader) {
            Ok(b) => b,
            Err(_) => break,
        };
        match opcode {
            0xFF => break, // EOF marker, 8-byte CRC footer follows (ignored)
            0xFE => {
                let _db_index = read_length(&mut reader)?;
            }
            0xFB => {
                let _hash_size = read_length(&mut reader)?;
                let _expire_size = read_length(&mut reader)?;
            }
            0xFA => {
                let _aux_key = read_string(&mut reader)?;
                let _aux_val = read_string(&mut reader)?;
            }
            0xFC => {
                let mut buf = [0u8; 8];
                reader.read_exact(&mut buf)?;
                pending_expiry_ms = Some(u64::from_le_bytes(buf));
            }
            0xFD => {
                let mut buf = [0u8; 4];
                reader.read_exact(&mut buf)?;
                pending_expiry_ms = Some(u32::from_le_bytes(buf) as u64 * 1000);
            }
            0..=14 => {
                // value-type byte; 0 is the only one this server persists (string)
                let key = read_string(&mut reader)?;
                let value = read_string(&mut reader)?;
                let expiry = pending_expiry_ms.take();
                if expiry.map(|e| e > now_ms()).unwrap_or(true) {
                    store.load_entry(key, value, expiry);
                }
            }
            other => bail!("unsupported RDB opcode: {other:#x}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rdb_starts_with_redis_magic() {
        let bytes = empty_rdb();
        assert_eq!(&bytes[..5], b"REDIS");
        assert_eq!(&bytes[5..9], b"0011");
    }
}
