use crate::codec::value::{MARK_HEADER_END, MARK_TRUE};
use crate::core::error::{Error, ErrorKind, Result};
use crate::kind::{KindId, TokenMap};

const HEADER_VERSION: u8 = 1;

/// The fixed-shape prefix of every primary record: version byte, kind-id,
/// `_rev`, and an optional tombstone marker, terminated by `MARK_HEADER_END`.
/// Its bytes are stripped before the body reaches `codec::decode_value` but
/// still count toward a kind's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    pub kind_id: KindId,
    pub rev: i64,
    pub del: bool,
}

impl RecordHeader {
    pub fn new(kind_id: KindId, rev: i64, del: bool) -> Self {
        RecordHeader { version: HEADER_VERSION, kind_id, rev, del }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.version);
        super::value::encode_value(out, &crate::core::types::Value::Int(self.kind_id as i64), &TokenMap::new())
            .expect("integer encoding never fails");
        super::value::encode_value(out, &crate::core::types::Value::Int(self.rev), &TokenMap::new())
            .expect("integer encoding never fails");
        if self.del {
            out.push(MARK_TRUE);
        }
        out.push(MARK_HEADER_END);
    }

    pub fn decode(input: &[u8]) -> Result<(RecordHeader, usize)> {
        let version = *input.first().ok_or_else(truncated)?;
        let mut pos = 1usize;
        let no_tokens = TokenMap::new();
        let (kind_id_value, used) = super::value::decode_value(&input[pos..], &no_tokens)?;
        pos += used;
        let kind_id = kind_id_value
            .as_int()
            .ok_or_else(|| Error::new(ErrorKind::InvalidEncoding, "header kind-id is not an integer"))? as KindId;

        let (rev_value, used) = super::value::decode_value(&input[pos..], &no_tokens)?;
        pos += used;
        let rev = rev_value
            .as_int()
            .ok_or_else(|| Error::new(ErrorKind::InvalidEncoding, "header _rev is not an integer"))?;

        let mut del = false;
        if *input.get(pos).ok_or_else(truncated)? == MARK_TRUE {
            del = true;
            pos += 1;
        }
        let terminator = *input.get(pos).ok_or_else(truncated)?;
        if terminator != MARK_HEADER_END {
            return Err(Error::new(ErrorKind::InvalidEncoding, "missing header terminator"));
        }
        pos += 1;
        Ok((RecordHeader { version, kind_id, rev, del }, pos))
    }
}

fn truncated() -> Error {
    Error::new(ErrorKind::InvalidEncoding, "truncated record header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips_without_tombstone() {
        let header = RecordHeader::new(7, 42, false);
        let mut buf = Vec::new();
        header.encode(&mut buf);
        let (decoded, used) = RecordHeader::decode(&buf).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_roundtrips_with_tombstone() {
        let header = RecordHeader::new(7, 43, true);
        let mut buf = Vec::new();
        header.encode(&mut buf);
        let (decoded, _) = RecordHeader::decode(&buf).unwrap();
        assert!(decoded.del);
    }
}
