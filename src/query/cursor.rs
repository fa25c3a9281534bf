use base64::Engine;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Id;
use crate::kvs::KvPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Initialized,
    Positioned,
    Exhausted,
    Closed,
}

/// Strips the trailing 16-byte `_id` from an index entry key. The id is
/// always the last 16 bytes regardless of the composite prefix's own
/// (variable-width) encoding, since `idx::diff::entry_key` appends it
/// last and nothing after it.
fn split_id(key: &[u8]) -> (&[u8], Id) {
    let split = key.len() - 16;
    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(&key[split..]);
    (&key[..split], Id::from_be_bytes(id_bytes))
}

/// Iterates a single index's already-range-scanned, ascending entries,
/// applying `distinct` suppression and exposing an opaque page token for
/// resumption. Ordering (`desc`, `orderBy`) and materialization-heavy
/// concerns live in `search`; this cursor is the `find`-path primitive:
/// walk an index range, yield `(key, id)`, stop.
pub struct Cursor {
    entries: Vec<KvPair>,
    pos: usize,
    state: CursorState,
    distinct: bool,
    last_distinct_prefix: Option<Vec<u8>>,
    desc: bool,
}

impl Cursor {
    pub fn new(mut entries: Vec<KvPair>, desc: bool, distinct: bool) -> Self {
        if desc {
            entries.reverse();
        }
        Cursor { entries, pos: 0, state: CursorState::Initialized, distinct, last_distinct_prefix: None, desc }
    }

    /// Resumes a cursor built from the same range scan, skipping forward
    /// to (and including) the entry whose key equals the decoded page
    /// token.
    pub fn resume(mut entries: Vec<KvPair>, desc: bool, distinct: bool, page: &str) -> Result<Self> {
        if desc {
            entries.reverse();
        }
        let token = base64::engine::general_purpose::STANDARD
            .decode(page)
            .map_err(|e| Error::new(ErrorKind::InvalidQuery, format!("bad page token: {e}")))?;
        let pos = entries.iter().position(|(k, _)| *k == token).ok_or_else(|| {
            Error::new(ErrorKind::InvalidQuery, "page token does not match the current result set")
        })?;
        Ok(Cursor {
            entries,
            pos,
            state: CursorState::Positioned,
            distinct,
            last_distinct_prefix: None,
            desc,
        })
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn next(&mut self) -> Option<(Vec<u8>, Id)> {
        if self.state == CursorState::Closed || self.state == CursorState::Exhausted {
            return None;
        }
        while self.pos < self.entries.len() {
            let (key, _) = &self.entries[self.pos];
            self.pos += 1;
            let (prefix, id) = split_id(key);

            if self.distinct {
                if self.last_distinct_prefix.as_deref() == Some(prefix) {
                    continue;
                }
                self.last_distinct_prefix = Some(prefix.to_vec());
            }

            self.state = CursorState::Positioned;
            return Some((key.clone(), id));
        }
        self.state = CursorState::Exhausted;
        None
    }

    /// The page token to resume from: the key of the next unseen entry,
    /// or `None` once exhausted.
    pub fn page_token(&self) -> Option<String> {
        self.entries.get(self.pos).map(|(k, _)| base64::engine::general_purpose::STANDARD.encode(k))
    }

    pub fn close(&mut self) {
        self.state = CursorState::Closed;
    }

    pub fn is_desc(&self) -> bool {
        self.desc
    }
}
