use std::collections::{HashMap, HashSet};

use crate::core::types::Value;
use crate::kind::collation::Collation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tokenization {
    None,
    Default,
    All,
}

impl Default for Tokenization {
    fn default() -> Self {
        Tokenization::None
    }
}

/// One property contributing to an index's composite key.
#[derive(Debug, Clone)]
pub struct IndexProp {
    pub path: String,
    pub collation: Collation,
    pub tokenization: Tokenization,
    pub default: Option<Value>,
}

impl IndexProp {
    pub fn new(path: impl Into<String>) -> Self {
        IndexProp { path: path.into(), collation: Collation::default(), tokenization: Tokenization::default(), default: None }
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }

    pub fn with_tokenization(mut self, tokenization: Tokenization) -> Self {
        self.tokenization = tokenization;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A named ordered projection of a kind's documents: an ordered list of
/// properties whose cross-product of sort keys forms the index's entries.
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub props: Vec<IndexProp>,
    pub inc_del: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, props: Vec<IndexProp>) -> Self {
        IndexDef { name: name.into(), props, inc_del: false }
    }

    pub fn including_deleted(mut self) -> Self {
        self.inc_del = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Create,
    Update,
    Delete,
    Extend,
}

/// caller-principal -> granted permissions. `"*"` is the wildcard caller.
#[derive(Debug, Clone, Default)]
pub struct PermissionMatrix {
    grants: HashMap<String, HashSet<Permission>>,
}

impl PermissionMatrix {
    pub fn allow(&mut self, caller: impl Into<String>, perm: Permission) {
        self.grants.entry(caller.into()).or_default().insert(perm);
    }

    pub fn is_allowed(&self, caller: &str, perm: Permission) -> bool {
        self.grants.get(caller).is_some_and(|p| p.contains(&perm))
            || self.grants.get("*").is_some_and(|p| p.contains(&perm))
    }
}

/// A named schema: `name:version` identifier, owner, secondary indexes, an
/// inheritance chain used only to compose permissions (storage is flat,
/// never polymorphic), and the permission matrix itself.
#[derive(Debug, Clone)]
pub struct Kind {
    pub id: String,
    pub owner: String,
    pub indexes: Vec<IndexDef>,
    pub extends: Vec<String>,
    pub permissions: PermissionMatrix,
}

impl Kind {
    pub fn new(id: impl Into<String>, owner: impl Into<String>) -> Self {
        Kind { id: id.into(), owner: owner.into(), indexes: Vec::new(), extends: Vec::new(), permissions: PermissionMatrix::default() }
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// Indexes added, removed, or redefined between a kind's previous schema
/// and the one just put, by name. Drives the reindex pass in `idx`.
#[derive(Debug, Clone, Default)]
pub struct IndexDelta {
    pub added: Vec<IndexDef>,
    pub removed: Vec<IndexDef>,
    pub modified: Vec<IndexDef>,
}

impl IndexDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn compute(old: &[IndexDef], new: &[IndexDef]) -> Self {
        let mut delta = IndexDelta::default();
        for new_idx in new {
            match old.iter().find(|i| i.name == new_idx.name) {
                None => delta.added.push(new_idx.clone()),
                Some(old_idx) if !index_defs_equal(old_idx, new_idx) => delta.modified.push(new_idx.clone()),
                Some(_) => {}
            }
        }
        for old_idx in old {
            if !new.iter().any(|i| i.name == old_idx.name) {
                delta.removed.push(old_idx.clone());
            }
        }
        delta
    }
}

fn index_defs_equal(a: &IndexDef, b: &IndexDef) -> bool {
    a.props.len() == b.props.len()
        && a.inc_del == b.inc_del
        && a.props.iter().zip(&b.props).all(|(x, y)| {
            x.path == y.path && x.collation == y.collation && x.tokenization == y.tokenization
        })
}
