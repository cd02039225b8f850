use crate::errors::EntityError;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

const ID_LEN: usize = 64;

/// Identifies one entity within a namespace.
///
/// Ids derived from the same name are always equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(Arc<str>);

impl EntityId {
    pub(crate) fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        EntityId(hex.into())
    }

    /// Parses the string form of an id produced by [`EntityId::as_str`].
    pub(crate) fn parse(s: &str) -> Result<Self, EntityError> {
        if s.len() != ID_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(EntityError::InvalidId(s.to_string()));
        }
        Ok(EntityId(s.to_ascii_lowercase().into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
