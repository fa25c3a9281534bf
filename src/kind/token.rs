use std::collections::HashMap;

use crate::core::error::{Error, ErrorKind, Result};

/// First token id; 0x00-0x1F are reserved marker bytes in the codec.
pub const FIRST_TOKEN: u8 = 0x20;

/// A per-kind bidirectional map from property name to a small integer
/// token. Tokens make record payloads compact and stable across renames of
/// unrelated properties. Allocated once, never reused or reassigned.
#[derive(Debug, Clone, Default)]
pub struct TokenMap {
    name_to_token: HashMap<String, u8>,
    token_to_name: HashMap<u8, String>,
    next_token: u8,
}

impl TokenMap {
    pub fn new() -> Self {
        TokenMap { name_to_token: HashMap::new(), token_to_name: HashMap::new(), next_token: FIRST_TOKEN }
    }

    pub fn token_for(&self, name: &str) -> Option<u8> {
        self.name_to_token.get(name).copied()
    }

    pub fn name_for(&self, token: u8) -> Option<&str> {
        self.token_to_name.get(&token).map(|s| s.as_str())
    }

    /// Allocates a token for `name` if it doesn't already have one. Returns
    /// the existing or newly-allocated token. Callers serialize concurrent
    /// calls for the same kind via an external per-kind mutex (`kind::
    /// Registry`); this method itself assumes exclusive access.
    pub fn add_token(&mut self, name: &str) -> Result<u8> {
        if let Some(tok) = self.name_to_token.get(name) {
            return Ok(*tok);
        }
        if self.next_token == u8::MAX {
            return Err(Error::new(ErrorKind::Internal, "token space exhausted for kind"));
        }
        let tok = self.next_token;
        self.next_token += 1;
        self.name_to_token.insert(name.to_string(), tok);
        self.token_to_name.insert(tok, name.to_string());
        Ok(tok)
    }

    pub fn len(&self) -> usize {
        self.name_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_to_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_token_is_idempotent() {
        let mut map = TokenMap::new();
        let a = map.add_token("foo").unwrap();
        let b = map.add_token("foo").unwrap();
        assert_eq!(a, b);
        assert_eq!(map.name_for(a), Some("foo"));
    }

    #[test]
    fn tokens_start_above_marker_range() {
        let mut map = TokenMap::new();
        let tok = map.add_token("x").unwrap();
        assert!(tok >= FIRST_TOKEN);
    }
}
