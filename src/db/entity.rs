use bytes::Bytes;

/// A stored value.
///
/// Entities are replaced wholesale on overwrite and never mutated in place, so
/// a reader holding a clone is unaffected by later writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// A binary-safe string
    String(Bytes),
}

impl Entity {
    /// Returns the string payload, or `None` if the entity holds another shape.
    ///
    /// Strings are the only shape today, so this always succeeds; commands
    /// still go through it so a `WRONGTYPE` reply falls out naturally once more
    /// shapes exist.
    pub fn as_string(&self) -> Option<&Bytes> {
        match self {
            Entity::String(value) => Some(value),
        }
    }
}

impl From<Bytes> for Entity {
    fn from(value: Bytes) -> Self {
        Entity::String(value)
    }
}
