/// Fixed cookies (short byte prefixes) selecting a sub-database within a
/// shard's keyspace. Every key a `Store` operation touches is prefixed
/// with one of these.
pub const OBJECTS: &[u8] = b"o";
pub const INDEXES: &[u8] = b"i";
pub const KINDS: &[u8] = b"k";
pub const INDEX_IDS: &[u8] = b"x";
pub const SEQ: &[u8] = b"s";

pub fn prefix_key(cookie: &[u8], key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(cookie.len() + 1 + key.len());
    out.extend_from_slice(cookie);
    out.push(b':');
    out.extend_from_slice(key);
    out
}

/// Inclusive lower / exclusive upper bound covering every key under
/// `cookie`, for range scans confined to one sub-database.
pub fn cookie_bounds(cookie: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let lower = prefix_key(cookie, b"");
    let mut upper = cookie.to_vec();
    upper.push(b';');
    (lower, upper)
}
