//! Resource identifier scheme.
//!
//! Resource ids render a monotonic counter in the BiocFileCache textual
//! format (`BFC<n>`), so directories written by this crate can be mixed
//! with caches produced by the reference implementation. Ids are assigned
//! once at creation from a persisted counter and never change.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Textual prefix shared with the reference rid format.
pub const RID_PREFIX: &str = "BFC";

/// A stable, externally-compatible resource identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Render a counter value in the reference textual format.
    ///
    /// Counter values are positive; the i64 width is the theoretical
    /// exhaustion bound, enforced where the counter is incremented.
    pub fn from_counter(counter: i64) -> Self {
        Self(format!("{RID_PREFIX}{counter}"))
    }

    /// Parse a rid back to its counter value.
    ///
    /// Returns `None` for ids not in the reference format (imports from
    /// foreign caches keep their textual id but do not feed the counter).
    pub fn counter(&self) -> Option<i64> {
        self.0.strip_prefix(RID_PREFIX)?.parse().ok()
    }

    /// View as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_format() {
        let rid = ResourceId::from_counter(1);
        assert_eq!(rid.as_str(), "BFC1");
        assert_eq!(rid.counter(), Some(1));

        let rid = ResourceId::from_counter(90125);
        assert_eq!(rid.as_str(), "BFC90125");
    }

    #[test]
    fn test_counter_rejects_foreign_ids() {
        assert_eq!(ResourceId::from("abc123".to_string()).counter(), None);
        assert_eq!(ResourceId::from("BFCx".to_string()).counter(), None);
    }

    #[test]
    fn test_rid_is_monotonic_in_counter() {
        let a = ResourceId::from_counter(41);
        let b = ResourceId::from_counter(42);
        assert!(a.counter().unwrap() < b.counter().unwrap());
    }
}
