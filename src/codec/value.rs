use std::collections::HashMap;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Value;
use crate::kind::token::FIRST_TOKEN;
use crate::kind::TokenMap;

pub const MARK_END: u8 = 0x00;
pub const MARK_NULL: u8 = 0x01;
pub const MARK_OBJECT_BEGIN: u8 = 0x02;
pub const MARK_ARRAY_BEGIN: u8 = 0x03;
pub const MARK_STRING: u8 = 0x04;
pub const MARK_FALSE: u8 = 0x05;
pub const MARK_TRUE: u8 = 0x06;
pub const MARK_DECIMAL_NEG: u8 = 0x07;
pub const MARK_DECIMAL_POS: u8 = 0x08;
pub const MARK_INT_NEG: u8 = 0x09;
pub const MARK_INT_ZERO: u8 = 0x0A;
pub const MARK_UINT8: u8 = 0x0B;
pub const MARK_UINT16: u8 = 0x0C;
pub const MARK_UINT32: u8 = 0x0D;
pub const MARK_INT64: u8 = 0x0E;
pub const MARK_EXTENSION: u8 = 0x0F;
pub const MARK_HEADER_END: u8 = 0x10;

/// Encodes one document value, appending to `out`. Object entries are
/// emitted in ascending token-id order, then ascending lexicographic order
/// for any name `tokens` doesn't yet know about — this is the canonical
/// ordering required for `encode` to be a pure function of document
/// content, independent of map iteration order.
pub fn encode_value(out: &mut Vec<u8>, value: &Value, tokens: &TokenMap) -> Result<()> {
    match value {
        Value::Null => out.push(MARK_NULL),
        Value::Bool(false) => out.push(MARK_FALSE),
        Value::Bool(true) => out.push(MARK_TRUE),
        Value::Int(i) => encode_int(out, *i),
        Value::Decimal(magnitude, fraction) => encode_decimal(out, *magnitude, *fraction),
        Value::String(s) => encode_string(out, s)?,
        Value::Array(items) => {
            out.push(MARK_ARRAY_BEGIN);
            for item in items {
                encode_value(out, item, tokens)?;
            }
            out.push(MARK_END);
        }
        Value::Object(map) => {
            out.push(MARK_OBJECT_BEGIN);
            encode_object_entries(out, map, tokens)?;
            out.push(MARK_END);
        }
    }
    Ok(())
}

fn encode_object_entries(
    out: &mut Vec<u8>,
    map: &HashMap<String, Value>,
    tokens: &TokenMap,
) -> Result<()> {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|(name_a, _), (name_b, _)| {
        match (tokens.token_for(name_a), tokens.token_for(name_b)) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => name_a.cmp(name_b),
        }
    });
    for (name, value) in entries {
        match tokens.token_for(name) {
            Some(tok) => out.push(tok),
            None => encode_string(out, name)?,
        }
        encode_value(out, value, tokens)?;
    }
    Ok(())
}

fn encode_string(out: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::new(ErrorKind::InvalidEncoding, "string contains embedded NUL"));
    }
    out.push(MARK_STRING);
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    Ok(())
}

fn abs_u64(v: i64) -> u64 {
    (v as i128).unsigned_abs() as u64
}

fn encode_int(out: &mut Vec<u8>, i: i64) {
    if i == 0 {
        out.push(MARK_INT_ZERO);
        return;
    }
    if i > 0 {
        let v = i as u64;
        if v <= u8::MAX as u64 {
            out.push(MARK_UINT8);
            out.push(v as u8);
        } else if v <= u16::MAX as u64 {
            out.push(MARK_UINT16);
            out.extend_from_slice(&(v as u16).to_be_bytes());
        } else if v <= u32::MAX as u64 {
            out.push(MARK_UINT32);
            out.extend_from_slice(&(v as u32).to_be_bytes());
        } else {
            out.push(MARK_INT64);
            out.extend_from_slice(&i.to_be_bytes());
        }
    } else {
        out.push(MARK_INT_NEG);
        out.extend_from_slice(&abs_u64(i).to_be_bytes());
    }
}

fn encode_decimal(out: &mut Vec<u8>, magnitude: i64, fraction: i64) {
    let negative = magnitude < 0 || (magnitude == 0 && fraction < 0);
    out.push(if negative { MARK_DECIMAL_NEG } else { MARK_DECIMAL_POS });
    out.extend_from_slice(&abs_u64(magnitude).to_be_bytes());
    out.extend_from_slice(&abs_u64(fraction).to_be_bytes());
}

fn truncated() -> Error {
    Error::new(ErrorKind::InvalidEncoding, "truncated input")
}

fn read_u8(input: &[u8], pos: &mut usize) -> Result<u8> {
    let b = *input.get(*pos).ok_or_else(truncated)?;
    *pos += 1;
    Ok(b)
}

fn read_be<const N: usize>(input: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    if input.len() < *pos + N {
        return Err(truncated());
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&input[*pos..*pos + N]);
    *pos += N;
    Ok(arr)
}

fn read_cstring(input: &[u8]) -> Result<(String, usize)> {
    let nul = input.iter().position(|&b| b == 0).ok_or_else(truncated)?;
    let s = std::str::from_utf8(&input[..nul])
        .map_err(|e| Error::new(ErrorKind::InvalidEncoding, format!("invalid utf8: {e}")))?
        .to_string();
    Ok((s, nul + 1))
}

/// Decodes one document value from the front of `input`. Returns the value
/// and the number of bytes consumed. Fails with `InvalidEncoding` on any
/// malformed byte sequence without consuming further input, and with
/// `UnknownToken` when an object property token isn't in `tokens` — callers
/// should treat that as a recoverable inconsistent-index/missing-schema
/// signal, not a hard failure of the surrounding operation.
pub fn decode_value(input: &[u8], tokens: &TokenMap) -> Result<(Value, usize)> {
    let marker = *input.first().ok_or_else(truncated)?;
    let mut pos = 1usize;
    let value = match marker {
        MARK_NULL => Value::Null,
        MARK_FALSE => Value::Bool(false),
        MARK_TRUE => Value::Bool(true),
        MARK_INT_ZERO => Value::Int(0),
        MARK_UINT8 => Value::Int(read_u8(input, &mut pos)? as i64),
        MARK_UINT16 => Value::Int(u16::from_be_bytes(read_be::<2>(input, &mut pos)?) as i64),
        MARK_UINT32 => Value::Int(u32::from_be_bytes(read_be::<4>(input, &mut pos)?) as i64),
        MARK_INT64 => Value::Int(i64::from_be_bytes(read_be::<8>(input, &mut pos)?)),
        MARK_INT_NEG => {
            let magnitude = u64::from_be_bytes(read_be::<8>(input, &mut pos)?);
            Value::Int(-(magnitude as i128) as i64)
        }
        MARK_DECIMAL_POS | MARK_DECIMAL_NEG => {
            let magnitude = u64::from_be_bytes(read_be::<8>(input, &mut pos)?) as i128;
            let fraction = u64::from_be_bytes(read_be::<8>(input, &mut pos)?) as i128;
            let sign: i128 = if marker == MARK_DECIMAL_NEG { -1 } else { 1 };
            Value::Decimal((sign * magnitude) as i64, (sign * fraction) as i64)
        }
        MARK_STRING => {
            let (s, used) = read_cstring(&input[pos..])?;
            pos += used;
            Value::String(s)
        }
        MARK_ARRAY_BEGIN => {
            let mut items = Vec::new();
            loop {
                if *input.get(pos).ok_or_else(truncated)? == MARK_END {
                    pos += 1;
                    break;
                }
                let (item, used) = decode_value(&input[pos..], tokens)?;
                pos += used;
                items.push(item);
            }
            Value::Array(items)
        }
        MARK_OBJECT_BEGIN => {
            let mut map = HashMap::new();
            loop {
                let b = *input.get(pos).ok_or_else(truncated)?;
                if b == MARK_END {
                    pos += 1;
                    break;
                }
                let name = if b == MARK_STRING {
                    pos += 1;
                    let (s, used) = read_cstring(&input[pos..])?;
                    pos += used;
                    s
                } else if b >= FIRST_TOKEN {
                    pos += 1;
                    tokens
                        .name_for(b)
                        .ok_or_else(|| {
                            Error::new(ErrorKind::UnknownToken, format!("token {b:#x} not in kind dictionary"))
                        })?
                        .to_string()
                } else {
                    return Err(Error::new(ErrorKind::InvalidEncoding, format!("invalid property marker {b:#x}")));
                };
                let (value, used) = decode_value(&input[pos..], tokens)?;
                pos += used;
                map.insert(name, value);
            }
            Value::Object(map)
        }
        MARK_EXTENSION => {
            let len = u32::from_be_bytes(read_be::<4>(input, &mut pos)?) as usize;
            if input.len() < pos + len {
                return Err(truncated());
            }
            pos += len;
            Value::Null
        }
        other => return Err(Error::new(ErrorKind::InvalidEncoding, format!("unknown marker {other:#x}"))),
    };
    Ok((value, pos))
}
