use crate::core::types::Value;
use crate::kind::collation::{fold, Collation};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_DECIMAL: u8 = 3;
const TAG_STRING: u8 = 4;

fn biased_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

/// Encodes one collated scalar into a self-framing sort-key segment: a
/// 1-byte type tag plus a fixed-width (numeric) or NUL-terminated
/// (string) payload. Segments concatenate safely into a composite key
/// because every segment's length is either fixed or explicitly
/// terminated — document property strings can never contain an embedded
/// NUL (the codec rejects that at encode time), so `0x00` is a safe
/// string terminator here.
pub fn encode_segment(value: &Value, collation: Collation) -> Vec<u8> {
    match value {
        Value::Null => vec![TAG_NULL],
        Value::Bool(b) => vec![TAG_BOOL, if *b { 1 } else { 0 }],
        Value::Int(i) => {
            let mut out = vec![TAG_INT];
            out.extend_from_slice(&biased_i64(*i));
            out
        }
        Value::Decimal(magnitude, fraction) => {
            let mut out = vec![TAG_DECIMAL];
            out.extend_from_slice(&biased_i64(*magnitude));
            out.extend_from_slice(&biased_i64(*fraction));
            out
        }
        Value::String(s) => {
            let folded = fold(s, collation);
            let mut out = vec![TAG_STRING];
            out.extend_from_slice(folded.as_bytes());
            out.push(0);
            out
        }
        // Arrays/objects never reach here: the extractor fans multi-valued
        // leaves out into scalar candidates before encoding.
        Value::Array(_) | Value::Object(_) => vec![TAG_NULL],
    }
}

/// Joins an ordered list of per-property segments into one composite
/// index-key prefix (the object `_id` is appended separately by the
/// caller).
pub fn join_segments(segments: &[Vec<u8>]) -> Vec<u8> {
    segments.concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_segments_sort_numerically() {
        let a = encode_segment(&Value::Int(-5), Collation::Tertiary);
        let b = encode_segment(&Value::Int(3), Collation::Tertiary);
        assert!(a < b);
    }

    #[test]
    fn shorter_string_prefix_sorts_before_longer() {
        let a = encode_segment(&Value::String("a".to_string()), Collation::Identical);
        let b = encode_segment(&Value::String("ab".to_string()), Collation::Identical);
        assert!(a < b);
    }
}
