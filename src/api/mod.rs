//! JSON wire boundary: converts between `serde_json::Value`-shaped
//! requests/responses and the strongly-typed `Database` API. Carries no
//! transport of its own — sits directly in front of whatever process
//! embeds this crate.

pub mod query;
pub mod request;
pub mod value;

pub use query::{WireAggregate, WireClause, WireQuery};
pub use request::{dispatch, dispatch_watch, Request, Response, WireBatchOp, WireGrant, WireIndexDef, WireIndexProp, WireKind, WireShardInfo};
pub use value::{from_json, props_from_json, props_to_json, to_json};
