use crate::types::value::Value;

/// Outcome of looking up a foreign key in the new identifier space.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedForeign {
    /// The related row exists; its new key is carried.
    Found(Value),
    /// The old row had no reference (null or zero), so the new value is null.
    KnownAbsent,
    /// The old row references something the new schema does not have.
    Unresolved,
}

impl ResolvedForeign {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ResolvedForeign::Unresolved)
    }

    /// Value to write, or `None` when the relation could not be resolved.
    pub fn value(&self) -> Option<Value> {
        match self {
            ResolvedForeign::Found(value) => Some(value.clone()),
            ResolvedForeign::KnownAbsent => Some(Value::Null),
            ResolvedForeign::Unresolved => None,
        }
    }
}
