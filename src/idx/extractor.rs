use crate::analysis::Analyzer;
use crate::core::types::{Document, Value};
use crate::idx::sortkey::{encode_segment, join_segments};
use crate::kind::kind::{IndexDef, IndexProp, Tokenization};

/// Collated candidate values for one property, before the cross-product
/// across an index's properties. A multi-valued leaf (an array, or a
/// tokenized string) fans out into one candidate per element/token; a
/// missing property with no default contributes no candidates at all,
/// which drops the whole index entry for that property combination.
fn candidates(doc_value: Option<&Value>, prop: &IndexProp, analyzer: &Analyzer) -> Vec<Value> {
    let value = match doc_value.or(prop.default.as_ref()) {
        Some(v) => v,
        None => return Vec::new(),
    };

    match value {
        Value::Array(items) => items.iter().flat_map(|v| candidates(Some(v), prop, analyzer)).collect(),
        Value::String(s) => match prop.tokenization {
            Tokenization::None => vec![Value::String(s.clone())],
            Tokenization::Default => analyzer.tokenize(s).into_iter().map(Value::String).collect(),
            Tokenization::All => analyzer.tokenize_with_prefixes(s).into_iter().map(Value::String).collect(),
        },
        other => vec![other.clone()],
    }
}

/// Walks `index`'s property paths over `doc`, collating and tokenizing each
/// one, then takes the cross-product across properties to produce the
/// composite sort-key prefixes this document contributes to the index.
/// `_id` is not part of the returned prefix; callers append it to make
/// each full index entry unique.
pub fn extract_keys(index: &IndexDef, doc: &Document) -> Vec<Vec<u8>> {
    let analyzer = Analyzer::whitespace();
    let mut prefixes: Vec<Vec<Vec<u8>>> = vec![Vec::new()];

    for prop in &index.props {
        let raw = doc.get(&prop.path);
        let values = candidates(raw, prop, &analyzer);
        if values.is_empty() {
            return Vec::new();
        }
        let segments: Vec<Vec<u8>> = values.iter().map(|v| encode_segment(v, prop.collation)).collect();

        let mut next = Vec::with_capacity(prefixes.len() * segments.len());
        for prefix in &prefixes {
            for segment in &segments {
                let mut extended = prefix.clone();
                extended.push(segment.clone());
                next.push(extended);
            }
        }
        prefixes = next;
    }

    prefixes.into_iter().map(|segments| join_segments(&segments)).collect()
}
