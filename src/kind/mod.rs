pub mod collation;
pub mod kind;
pub mod registry;
pub mod token;

pub use kind::{IndexDef, IndexProp, Kind, Permission, PermissionMatrix, Tokenization};
pub use registry::{KindEntry, Registry};
pub use token::TokenMap;

/// A small integer standing in for a kind's `name:version` identifier
/// inside a record header, distinct from property tokens.
pub type KindId = u32;
