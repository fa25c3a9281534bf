pub mod core;
pub mod codec;
pub mod kvs;
pub mod kind;
pub mod idx;
pub mod analysis;
pub mod txn;
pub mod query;
pub mod search;
pub mod signal;
pub mod watch;
pub mod shard;
pub mod api;
pub mod profile;
pub mod tool;
pub mod db;

pub use core::error::{Error, ErrorKind, Result};
pub use core::types::{Document, Id, Value};
pub use db::Database;

/*
┌────────────────────────────────────────────────────────────────────────────────────────────┐
│                                  JSONDB ARCHITECTURE                                         │
└────────────────────────────────────────────────────────────────────────────────────────────┘

Database
  ├─ shard::Pool           mounted shards, each backing a kvs::Store
  │    └─ kvs::Store       cookie-prefixed ordered KV over a pluggable KvEngine
  ├─ kind::Registry        kind-id -> KindRecord (schema, indexes, tokens, owner, perms)
  ├─ txn::Coordinator      forks per-shard Txn, quota accounting, commit ordering
  ├─ idx                   extractor pipeline + index write protocol (old/new key diff)
  ├─ query                 where/filter AST -> planner -> index range -> Cursor
  ├─ search                SearchCursor (materialize/sort/distinct/paginate) + SearchCache
  ├─ watch::Registry       armed Watchers over index key ranges, fired post-commit
  ├─ signal::Signal        generation-tagged slot arena backing watch + shard-status
  └─ profile::Auditor      thin per-operation timing sink

A put/get/del/merge enters through Database, which opens a txn::Transaction spanning
every shard touched. Writes flow: codec encodes the document -> kind::Registry resolves/
allocates tokens -> idx computes index key diffs -> kvs::Store applies primary + index
writes inside the shard's overlay -> watch::Registry is consulted for matching armed
watchers, which fire on commit. Reads flow in reverse: query::Planner selects an index,
opens a kvs cursor, idx filters non-indexed predicates; search::SearchCursor additionally
materializes, sorts, and paginates when a single index can't provide the final order.
*/
