use std::collections::HashMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, Result};

/// The main shard's reserved id. ShardInfo entries and kind/index metadata
/// always live here regardless of which shard a document's `_id` embeds.
pub const MAIN_SHARD: u32 = 0;

/// 128-bit object identifier: 32 bits of shard id, 96 bits of local id.
/// Embedding the shard in the id means an id uniquely names its home shard
/// without a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(u128);

impl Id {
    const LOCAL_BITS: u32 = 96;
    const LOCAL_MASK: u128 = (1u128 << Self::LOCAL_BITS) - 1;

    pub fn new(shard_id: u32, local_id: u128) -> Self {
        Id(((shard_id as u128) << Self::LOCAL_BITS) | (local_id & Self::LOCAL_MASK))
    }

    pub fn shard_id(&self) -> u32 {
        (self.0 >> Self::LOCAL_BITS) as u32
    }

    pub fn local_id(&self) -> u128 {
        self.0 & Self::LOCAL_MASK
    }

    pub fn to_be_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        Id(u128::from_be_bytes(bytes))
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.to_be_bytes())
    }

    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| Error::new(ErrorKind::InvalidArgument, format!("bad id: {e}")))?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::new(ErrorKind::InvalidArgument, "id must be 16 bytes"))?;
        Ok(Id::from_be_bytes(arr))
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// A recursive document value. Null/bool/int/decimal/string/array/object,
/// mirroring the marker table the codec encodes against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Fixed-point decimal: magnitude and fraction, each an independent
    /// signed int64 as the wire format carries them.
    Decimal(i64, i64),
    String(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Looks up a dotted property path, e.g. `"addr.city"`, descending
    /// through nested objects. Returns `None` on any missing segment.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut cur = self;
        for segment in path.split('.') {
            cur = cur.as_object()?.get(segment)?;
        }
        Some(cur)
    }
}

/// A persisted document: body plus the metadata every record in `objects`
/// carries (`_id`, `_kind`, `_rev`, `_del`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Id,
    pub kind: String,
    pub rev: i64,
    pub del: bool,
    pub props: HashMap<String, Value>,
}

impl Document {
    pub fn new(id: Id, kind: impl Into<String>) -> Self {
        Document { id, kind: kind.into(), rev: 0, del: false, props: HashMap::new() }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut cur = self.props.get(first)?;
        for segment in segments {
            cur = cur.as_object()?.get(segment)?;
        }
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrips_through_base64() {
        let id = Id::new(42, 0xdead_beef_cafe);
        let encoded = id.to_base64();
        let decoded = Id::from_base64(&encoded).unwrap();
        assert_eq!(id, decoded);
        assert_eq!(decoded.shard_id(), 42);
        assert_eq!(decoded.local_id(), 0xdead_beef_cafe);
    }

    #[test]
    fn id_ordering_is_shard_major() {
        let a = Id::new(1, 999);
        let b = Id::new(2, 0);
        assert!(a < b);
    }

    #[test]
    fn document_get_descends_dotted_path() {
        let mut doc = Document::new(Id::new(0, 1), "Test:1");
        let mut addr = HashMap::new();
        addr.insert("city".to_string(), Value::String("Saigon".to_string()));
        doc.props.insert("addr".to_string(), Value::Object(addr));
        assert_eq!(doc.get("addr.city"), Some(&Value::String("Saigon".to_string())));
        assert_eq!(doc.get("addr.zip"), None);
    }
}
