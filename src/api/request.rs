use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as Json;

use crate::core::error::Result;
use crate::core::types::{Document, Id};
use crate::db::admin::{HealthStatus, PurgeReport, Stats};
use crate::db::crud::{BatchOp, BatchOpResult, PutResult};
use crate::db::Database;
use crate::kind::{IndexDef, IndexProp, Kind, Permission, Tokenization};
use crate::kind::collation::Collation;
use crate::profile::StatEntry;
use crate::query::Query;
use crate::shard::ShardInfo;
use crate::watch::Watch;

use super::query::WireQuery;
use super::value::{from_json, props_from_json, to_json};

/// Wire shape of one secondary-index property, mirroring `IndexProp`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireIndexProp {
    pub path: String,
    #[serde(default)]
    pub collate: Option<String>,
    #[serde(default)]
    pub tokenize: Option<String>,
    pub default: Option<Json>,
}

/// Wire shape of one secondary index: `{ name, props: [...], incDel }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireIndexDef {
    pub name: String,
    pub props: Vec<WireIndexProp>,
    #[serde(default)]
    pub inc_del: bool,
}

/// Wire shape of a `putKind` request body: the schema's id, owner,
/// indexes and inheritance chain. Permissions and quotas are set through
/// their own separate wire requests, mirroring the `putPermissions`/
/// `putQuotas` split.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireKind {
    pub id: String,
    pub owner: String,
    #[serde(default)]
    pub indexes: Vec<WireIndexDef>,
    #[serde(default)]
    pub extends: Vec<String>,
}

fn parse_collation(name: &str) -> Collation {
    match name {
        "primary" => Collation::Primary,
        "secondary" => Collation::Secondary,
        "quaternary" => Collation::Quaternary,
        "identical" => Collation::Identical,
        _ => Collation::Tertiary,
    }
}

fn parse_tokenization(name: &str) -> Tokenization {
    match name {
        "all" => Tokenization::All,
        "none" => Tokenization::None,
        _ => Tokenization::Default,
    }
}

impl TryFrom<WireKind> for Kind {
    type Error = crate::core::error::Error;

    fn try_from(wire: WireKind) -> Result<Kind> {
        let mut kind = Kind::new(wire.id, wire.owner);
        kind.extends = wire.extends;
        for index in wire.indexes {
            let mut props = Vec::with_capacity(index.props.len());
            for prop in index.props {
                let mut p = IndexProp::new(prop.path);
                if let Some(collate) = prop.collate {
                    p.collation = parse_collation(&collate);
                }
                if let Some(tokenize) = prop.tokenize {
                    p.tokenization = parse_tokenization(&tokenize);
                }
                if let Some(default) = prop.default {
                    p.default = Some(from_json(default)?);
                }
                props.push(p);
            }
            let mut def = IndexDef::new(index.name, props);
            def.inc_del = index.inc_del;
            kind.indexes.push(def);
        }
        Ok(kind)
    }
}

fn parse_permission(name: &str) -> Option<Permission> {
    match name {
        "read" => Some(Permission::Read),
        "create" => Some(Permission::Create),
        "update" => Some(Permission::Update),
        "delete" => Some(Permission::Delete),
        "extend" => Some(Permission::Extend),
        _ => None,
    }
}

/// Every operation the wire boundary accepts, one variant per external
/// verb named in the query grammar and CRUD/admin surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    Put { kind: String, id: Option<String>, shard_id: u32, expected_rev: Option<i64>, props: HashMap<String, Json> },
    Get { id: String },
    Del { id: String, expected_rev: Option<i64> },
    Merge { id: String, expected_rev: Option<i64>, props: HashMap<String, Json> },
    Batch { ops: Vec<WireBatchOp> },
    Find { query: WireQuery },
    Search { query: WireQuery },
    PutKind { kind: WireKind },
    DelKind { kind_id: String },
    PutPermissions { kind_id: String, grants: Vec<WireGrant> },
    PutQuotas { kind_id: String, quota: i64 },
    ReserveIds { kind: String, shard_id: u32, count: u64 },
    MountShard { info: WireShardInfo },
    UnmountShard { shard_id: u32 },
    SetShardActive { shard_id: u32, active: bool },
    Compact,
    Stats,
    HealthCheck,
    Purge,
    PurgeStatus,
    Dump { include_deleted: bool },
    Load { data: String },
    Profile { target: String, enable: bool },
    GetProfile { target: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum WireBatchOp {
    Put { kind: String, id: Option<String>, shard_id: u32, expected_rev: Option<i64>, props: HashMap<String, Json> },
    Get { id: String },
    Del { id: String, expected_rev: Option<i64> },
    Merge { id: String, expected_rev: Option<i64>, props: HashMap<String, Json> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireGrant {
    pub caller: String,
    pub perm: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireShardInfo {
    pub id: u32,
    #[serde(default)]
    pub transient: bool,
    pub device_id: String,
    pub device_uri: String,
    pub mount_path: String,
    pub device_name: String,
    pub database_path: String,
    #[serde(default)]
    pub parent_device_id: String,
    pub description: Option<String>,
}

fn parse_id(s: &str) -> Result<Id> {
    Id::from_base64(s)
}

fn props_json_map(props: HashMap<String, Json>) -> Result<HashMap<String, crate::core::types::Value>> {
    props_from_json(props)
}

fn doc_to_json(doc: &Document) -> Json {
    serde_json::json!({
        "id": doc.id.to_base64(),
        "kind": doc.kind,
        "rev": doc.rev,
        "del": doc.del,
        "props": doc.props.iter().map(|(k, v)| (k.clone(), to_json(v))).collect::<serde_json::Map<_, _>>(),
    })
}

fn put_result_to_json(result: &PutResult) -> Json {
    serde_json::json!({ "id": result.id.to_base64(), "rev": result.rev })
}

/// Every shape a dispatched `Request` can resolve to.
#[derive(Debug, Clone)]
pub enum Response {
    Put(PutResult),
    Get(Option<Document>),
    Del(i64),
    Merge(PutResult),
    Batch(Vec<BatchOpResult>),
    Find { documents: Vec<Document>, page: Option<String> },
    Search { documents: Vec<Document>, page: Option<String> },
    KindId(String),
    Unit,
    Ids(Vec<Id>),
    Stats(Stats),
    HealthCheck(HealthStatus),
    Purge(PurgeReport),
    PurgeStatus(Option<PurgeReport>),
    Dump(String),
    Loaded(u64),
    Profile(Vec<StatEntry>),
}

impl Response {
    /// Renders a response the way it would cross the wire: documents as
    /// plain JSON objects via `api::value`, everything else as its
    /// natural JSON shape.
    pub fn to_json(&self) -> Json {
        match self {
            Response::Put(r) | Response::Merge(r) => put_result_to_json(r),
            Response::Get(doc) => doc.as_ref().map(doc_to_json).unwrap_or(Json::Null),
            Response::Del(rev) => serde_json::json!({ "rev": rev }),
            Response::Batch(results) => Json::Array(
                results
                    .iter()
                    .map(|r| match r {
                        BatchOpResult::Put(p) | BatchOpResult::Merge(p) => put_result_to_json(p),
                        BatchOpResult::Get(doc) => doc.as_ref().map(doc_to_json).unwrap_or(Json::Null),
                        BatchOpResult::Del(rev) => serde_json::json!({ "rev": rev }),
                    })
                    .collect(),
            ),
            Response::Find { documents, page } | Response::Search { documents, page } => serde_json::json!({
                "results": documents.iter().map(doc_to_json).collect::<Vec<_>>(),
                "page": page,
            }),
            Response::KindId(id) => Json::String(id.clone()),
            Response::Unit => Json::Null,
            Response::Ids(ids) => Json::Array(ids.iter().map(|id| Json::String(id.to_base64())).collect()),
            Response::Stats(s) => serde_json::json!({
                "uptimeSecs": s.uptime.as_secs(),
                "putCount": s.put_count,
                "getCount": s.get_count,
                "delCount": s.del_count,
                "findCount": s.find_count,
                "searchCount": s.search_count,
                "mountedShards": s.mounted_shards,
                "objectCounts": s.object_counts.iter().map(|(k, v)| (k.to_string(), *v)).collect::<serde_json::Map<_, _>>(),
            }),
            Response::HealthCheck(h) => serde_json::json!({ "ok": h.ok, "mountedShards": h.mounted_shards }),
            Response::Purge(r) => serde_json::json!({ "objectsReclaimed": r.objects_reclaimed, "durationMs": r.duration.as_millis() as u64 }),
            Response::PurgeStatus(r) => r
                .as_ref()
                .map(|r| serde_json::json!({ "objectsReclaimed": r.objects_reclaimed, "durationMs": r.duration.as_millis() as u64 }))
                .unwrap_or(Json::Null),
            Response::Dump(text) => Json::String(text.clone()),
            Response::Loaded(count) => serde_json::json!({ "loaded": count }),
            Response::Profile(entries) => Json::Array(
                entries
                    .iter()
                    .map(|e| serde_json::json!({ "category": e.category, "method": e.method, "durationMicros": e.duration.as_micros() as u64 }))
                    .collect(),
            ),
        }
    }
}

fn wire_batch_op_into(op: WireBatchOp) -> Result<BatchOp> {
    Ok(match op {
        WireBatchOp::Put { kind, id, shard_id, expected_rev, props } => {
            BatchOp::Put { kind, id: id.map(|s| parse_id(&s)).transpose()?, shard_id, expected_rev, props: props_json_map(props)? }
        }
        WireBatchOp::Get { id } => BatchOp::Get { id: parse_id(&id)? },
        WireBatchOp::Del { id, expected_rev } => BatchOp::Del { id: parse_id(&id)?, expected_rev },
        WireBatchOp::Merge { id, expected_rev, props } => BatchOp::Merge { id: parse_id(&id)?, expected_rev, props: props_json_map(props)? },
    })
}

/// Routes one decoded wire `Request` to the matching `Database` method,
/// translating wire ids/values on the way in and documents/results back
/// to plain JSON-shaped values on the way out via `Response::to_json`.
pub fn dispatch(db: &Database, caller: &str, request: Request) -> Result<Response> {
    match request {
        Request::Put { kind, id, shard_id, expected_rev, props } => {
            let id = id.map(|s| parse_id(&s)).transpose()?;
            db.put(caller, &kind, id, shard_id, expected_rev, props_json_map(props)?).map(Response::Put)
        }
        Request::Get { id } => db.get(caller, parse_id(&id)?).map(Response::Get),
        Request::Del { id, expected_rev } => db.del(caller, parse_id(&id)?, expected_rev).map(Response::Del),
        Request::Merge { id, expected_rev, props } => db.merge(caller, parse_id(&id)?, expected_rev, props_json_map(props)?).map(Response::Merge),
        Request::Batch { ops } => {
            let ops = ops.into_iter().map(wire_batch_op_into).collect::<Result<Vec<_>>>()?;
            db.batch(caller, ops).map(Response::Batch)
        }
        Request::Find { query } => {
            let query: Query = query.try_into()?;
            let result = db.find(caller, query)?;
            Ok(Response::Find { documents: result.documents, page: result.page })
        }
        Request::Search { query } => {
            let query: Query = query.try_into()?;
            let result = db.search(caller, query)?;
            Ok(Response::Search { documents: result.documents, page: result.page })
        }
        Request::PutKind { kind } => {
            let kind: Kind = kind.try_into()?;
            db.put_kind(caller, kind).map(Response::KindId)
        }
        Request::DelKind { kind_id } => db.del_kind(caller, &kind_id).map(|_| Response::Unit),
        Request::PutPermissions { kind_id, grants } => {
            let grants = grants
                .into_iter()
                .filter_map(|g| parse_permission(&g.perm).map(|p| (g.caller, p)))
                .collect();
            db.put_permissions(caller, &kind_id, grants).map(|_| Response::Unit)
        }
        Request::PutQuotas { kind_id, quota } => db.put_quotas(caller, &kind_id, quota).map(|_| Response::Unit),
        Request::ReserveIds { kind, shard_id, count } => db.reserve_ids(caller, &kind, shard_id, count).map(Response::Ids),
        Request::MountShard { info } => {
            // Mount always attaches as active, matching the original
            // `mountShard` call; deactivating a mounted shard in place is
            // the separate `setShardActive` operation below.
            let info = ShardInfo {
                id: info.id,
                active: true,
                transient: info.transient,
                timestamp: 0,
                id_base64: String::new(),
                device_id: info.device_id,
                device_uri: info.device_uri,
                mount_path: info.mount_path,
                device_name: info.device_name,
                database_path: info.database_path,
                parent_device_id: info.parent_device_id,
                description: info.description,
                kind_hashes: HashMap::new(),
            };
            db.mount_shard(caller, info).map(|_| Response::Unit)
        }
        Request::UnmountShard { shard_id } => db.unmount_shard(caller, shard_id).map(|_| Response::Unit),
        Request::SetShardActive { shard_id, active } => db.set_shard_active(caller, shard_id, active).map(|_| Response::Unit),
        Request::Compact => db.compact(caller).map(|_| Response::Unit),
        Request::Stats => Ok(Response::Stats(db.stats())),
        Request::HealthCheck => Ok(Response::HealthCheck(db.health_check())),
        Request::Purge => db.purge(caller).map(Response::Purge),
        Request::PurgeStatus => db.purge_status(caller).map(Response::PurgeStatus),
        Request::Dump { include_deleted } => {
            let mut buf = Vec::new();
            db.dump(caller, include_deleted, &mut buf)?;
            Ok(Response::Dump(String::from_utf8(buf).map_err(|e| crate::core::error::Error::new(crate::core::error::ErrorKind::InvalidEncoding, e.to_string()))?))
        }
        Request::Load { data } => {
            let mut reader: &[u8] = data.as_bytes();
            db.load(caller, &mut reader).map(Response::Loaded)
        }
        Request::Profile { target, enable } => db.profiler.set_enabled(caller, &target, enable).map(|_| Response::Unit),
        Request::GetProfile { target } => db.profiler.snapshot(caller, &target).map(Response::Profile),
    }
}

/// Arms a `watch` request: identical to `find` but leaves a live `Watch`
/// registered that fires `on_fire` the first time a matching write lands.
pub fn dispatch_watch(db: &Database, caller: &str, query: WireQuery, on_fire: impl Fn() + Send + Sync + 'static) -> Result<(Response, Arc<Watch>)> {
    let query: Query = query.try_into()?;
    let (result, watch) = db.watch(caller, query, on_fire)?;
    Ok((Response::Find { documents: result.documents, page: result.page }, watch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_request_deserializes_from_json() {
        let json = serde_json::json!({
            "op": "put",
            "kind": "Item:1",
            "id": null,
            "shardId": 0,
            "expectedRev": null,
            "props": {"name": "widget"},
        });
        let request: Request = serde_json::from_value(json).unwrap();
        assert!(matches!(request, Request::Put { .. }));
    }

    #[test]
    fn find_request_nests_a_wire_query() {
        let json = serde_json::json!({
            "op": "find",
            "query": {"from": "Item:1", "where": [{"prop": "x", "op": "=", "val": 1}]},
        });
        let request: Request = serde_json::from_value(json).unwrap();
        match request {
            Request::Find { query } => assert_eq!(query.from, "Item:1"),
            _ => panic!("expected Find"),
        }
    }
}
