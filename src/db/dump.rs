use std::collections::HashMap;
use std::io::{BufRead, Write};

use serde_json::Value as Json;

use crate::codec::header::RecordHeader;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, Id, Value, MAIN_SHARD};
use crate::kvs::cookie;

use super::admin::require_admin;
use super::{decode_record, encode_record, Database};

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Decimal(num, denom) => {
            let f = if *denom == 0 { 0.0 } else { *num as f64 / *denom as f64 };
            serde_json::Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null)
        }
        Value::String(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Object(map) => Json::Object(map.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect()),
    }
}

fn json_to_value(json: Json) -> Result<Value> {
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Decimal((f * 1_000_000.0).round() as i64, 1_000_000))
            } else {
                Err(Error::new(ErrorKind::InvalidEncoding, format!("number out of range: {n}")))
            }
        }
        Json::String(s) => Ok(Value::String(s)),
        Json::Array(items) => items.into_iter().map(json_to_value).collect::<Result<Vec<_>>>().map(Value::Array),
        Json::Object(map) => map.into_iter().map(|(k, v)| json_to_value(v).map(|v| (k, v))).collect::<Result<HashMap<_, _>>>().map(Value::Object),
    }
}

/// One line of the portable dump format: `{ id, kind, shardId, rev, del, props }`.
fn doc_line(doc: &Document) -> String {
    let json = serde_json::json!({
        "id": doc.id.to_base64(),
        "kind": doc.kind,
        "shardId": doc.id.shard_id(),
        "rev": doc.rev,
        "del": doc.del,
        "props": doc.props.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect::<serde_json::Map<_, _>>(),
    });
    json.to_string()
}

impl Database {
    /// Writes every live object (or, with `include_deleted`, every
    /// tombstone too) across every mounted shard as newline-delimited
    /// JSON. Returns the number of records written. Admin-gated: a dump
    /// crosses kind boundaries, so per-kind read permissions don't apply.
    pub fn dump(&self, caller: &str, include_deleted: bool, out: &mut dyn Write) -> Result<u64> {
        require_admin(caller)?;
        let txn = self.begin_txn();
        let mut written = 0u64;
        for shard_id in self.shards.mounted_ids() {
            for (key, bytes) in txn.scan_cookie(shard_id, cookie::OBJECTS)? {
                let (header, _) = RecordHeader::decode(&bytes)?;
                if header.del && !include_deleted {
                    continue;
                }
                let entry = match self.kinds.entry_for_kind_id(header.kind_id) {
                    Some(entry) => entry,
                    None => continue,
                };
                let id = Id::from_be_bytes(key.as_slice().try_into().map_err(|_| Error::new(ErrorKind::StorageCorrupt, "object key is not a 16-byte id"))?);
                let kind = entry.schema.read().id.clone();
                let (_, props) = {
                    let tokens = entry.tokens.lock();
                    decode_record(&bytes, &tokens)?
                };
                let doc = Document { id, kind, rev: header.rev, del: header.del, props };
                writeln!(out, "{}", doc_line(&doc)).map_err(|e| Error::new(ErrorKind::Io, e.to_string()))?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Replays a dump produced by `dump` back into the store inside one
    /// transaction: every line either lands, or the whole load aborts
    /// before anything commits. Writes raw records (not through `put`),
    /// so an object's original id, rev, and tombstone state are
    /// preserved exactly rather than re-derived.
    pub fn load(&self, caller: &str, input: &mut dyn BufRead) -> Result<u64> {
        require_admin(caller)?;
        let txn = self.begin_txn();
        let mut loaded = 0u64;

        for line in input.lines() {
            let line = line.map_err(|e| Error::new(ErrorKind::Io, e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let json: Json = serde_json::from_str(&line).map_err(|e| Error::new(ErrorKind::InvalidEncoding, e.to_string()))?;
            let id_str = json.get("id").and_then(Json::as_str).ok_or_else(|| Error::new(ErrorKind::InvalidEncoding, "dump line missing id"))?;
            let id = Id::from_base64(id_str)?;
            let kind_name = json.get("kind").and_then(Json::as_str).ok_or_else(|| Error::new(ErrorKind::InvalidEncoding, "dump line missing kind"))?;
            let rev = json.get("rev").and_then(Json::as_i64).unwrap_or(1);
            let del = json.get("del").and_then(Json::as_bool).unwrap_or(false);
            let props_json = json.get("props").cloned().unwrap_or(Json::Object(Default::default()));
            let props = match props_json {
                Json::Object(map) => map.into_iter().map(|(k, v)| json_to_value(v).map(|v| (k, v))).collect::<Result<HashMap<_, _>>>()?,
                _ => return Err(Error::new(ErrorKind::InvalidEncoding, "dump line props is not an object")),
            };

            let entry = self.kinds.require(kind_name)?;
            let shard_id = id.shard_id();
            if !self.shards.is_mounted(shard_id) {
                return Err(Error::new(ErrorKind::InvalidShardId, format!("shard not mounted: {shard_id}")));
            }

            let key = id.to_be_bytes();
            let old_bytes = txn.get(shard_id, cookie::OBJECTS, &key)?;
            let old_doc = match &old_bytes {
                Some(bytes) => {
                    let (old_header, old_props) = {
                        let tokens = entry.tokens.lock();
                        decode_record(bytes, &tokens)?
                    };
                    if old_header.del {
                        None
                    } else {
                        Some(Document { id, kind: kind_name.to_string(), rev: old_header.rev, del: false, props: old_props })
                    }
                }
                None => None,
            };

            for name in props.keys() {
                entry.tokens.lock().add_token(name)?;
            }
            let new_bytes = {
                let tokens = entry.tokens.lock();
                encode_record(entry.kind_id, rev, del, &props, &tokens)?
            };
            if shard_id == MAIN_SHARD {
                txn.record_usage(entry.kind_id, new_bytes.len() as i64 - old_bytes.as_ref().map_or(0, |b| b.len() as i64));
            }
            txn.put(shard_id, cookie::OBJECTS, &key, new_bytes);

            let new_doc = if del { Document { id, kind: kind_name.to_string(), rev, del: true, props: HashMap::new() } } else { Document { id, kind: kind_name.to_string(), rev, del: false, props } };
            {
                let schema = entry.schema.read();
                txn.apply_index_diffs(shard_id, entry.kind_id, &schema.indexes, id, old_doc.as_ref(), Some(&new_doc))?;
            }
            loaded += 1;
        }

        txn.commit()?;
        self.note_commit();
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::types::MAIN_SHARD;
    use crate::kind::Kind;
    use tempfile::tempdir;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempdir().unwrap();
        let config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
        (dir, Database::open(config).unwrap())
    }

    fn grantable_kind() -> Kind {
        let mut kind = Kind::new("Item:1", "alice");
        kind.permissions.allow("alice", crate::kind::Permission::Create);
        kind.permissions.allow("alice", crate::kind::Permission::Read);
        kind
    }

    #[test]
    fn dump_then_load_round_trips_into_a_fresh_database() {
        let (_dir1, db1) = open_db();
        db1.put_kind("alice", grantable_kind()).unwrap();
        let mut props = HashMap::new();
        props.insert("name".to_string(), Value::String("widget".to_string()));
        db1.put("alice", "Item:1", None, MAIN_SHARD, None, props).unwrap();

        let mut buf = Vec::new();
        let written = db1.dump("*", false, &mut buf).unwrap();
        assert_eq!(written, 1);

        let (_dir2, db2) = open_db();
        db2.put_kind("alice", grantable_kind()).unwrap();
        let loaded = db2.load("*", &mut buf.as_slice()).unwrap();
        assert_eq!(loaded, 1);

        let found = db2.find("alice", crate::query::Query::new("Item:1").with_limit(10)).unwrap();
        assert_eq!(found.documents.len(), 1);
        assert_eq!(found.documents[0].props.get("name"), Some(&Value::String("widget".to_string())));
    }

    #[test]
    fn dump_without_admin_caller_is_denied() {
        let (_dir, db) = open_db();
        let mut buf = Vec::new();
        let err = db.dump("alice", false, &mut buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AccessDenied);
    }
}
