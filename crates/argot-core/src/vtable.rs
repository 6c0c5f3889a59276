//! Per-type dynamic method table
//!
//! A string-keyed, type-indexed association that is independent of the
//! static reflection metadata, so behavior (a custom printer, an equality
//! override) can be attached to a type after the fact, including from a
//! different module than the one that defined the type. Lookup falls back
//! through the ancestor chain, nearest ancestor first.

use crate::types::registry::TypeTable;
use crate::value::Any;
use crate::{RtResult, RuntimeError};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

/// Process-wide dynamic dispatch table.
pub struct VTable {
    // key -> (type index -> value); hot lookups stay on the sharded map
    entries: DashMap<String, FxHashMap<i32, Any>>,
}

static GLOBAL: Lazy<VTable> = Lazy::new(|| VTable {
    entries: DashMap::new(),
});

impl VTable {
    /// The process-wide table
    pub fn global() -> &'static VTable {
        &GLOBAL
    }

    /// Attach `value` to `type_idx` under `key`, replacing any previous
    /// entry for the exact type.
    pub fn set(&self, type_idx: i32, key: &str, value: Any) -> RtResult<()> {
        if TypeTable::global().info_by_index(type_idx).is_none() {
            return Err(RuntimeError::KeyError(format!(
                "cannot attach `{}` to unknown type index {}",
                key, type_idx
            )));
        }
        self.entries
            .entry(key.to_string())
            .or_default()
            .insert(type_idx, value);
        Ok(())
    }

    /// Look up `key` for `type_idx`: the exact type wins, then the
    /// nearest ancestor that defines the key. `None` when no ancestor
    /// defines it.
    pub fn get(&self, type_idx: i32, key: &str) -> Option<Any> {
        let per_key = self.entries.get(key)?;
        if let Some(value) = per_key.get(&type_idx) {
            return Some(value.clone());
        }
        let record = TypeTable::global().info_by_index(type_idx)?;
        for ancestor in record.ancestors().iter().rev() {
            if let Some(value) = per_key.get(ancestor) {
                return Some(value.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::type_index;

    #[test]
    fn test_exact_entry() {
        let table = TypeTable::global();
        let ty = table.register(type_index::OBJECT, "test.vt.Exact", None).unwrap();

        let vt = VTable::global();
        vt.set(ty.type_index(), "__str__", Any::int(1)).unwrap();
        assert_eq!(vt.get(ty.type_index(), "__str__").unwrap().as_int(), Some(1));
    }

    #[test]
    fn test_ancestor_fallback_nearest_wins() {
        let table = TypeTable::global();
        let base = table.register(type_index::OBJECT, "test.vt.Base", None).unwrap();
        let mid = table.register(base.type_index(), "test.vt.Mid", None).unwrap();
        let leaf = table.register(mid.type_index(), "test.vt.Leaf", None).unwrap();

        let vt = VTable::global();
        vt.set(base.type_index(), "greet", Any::int(10)).unwrap();
        vt.set(mid.type_index(), "greet", Any::int(20)).unwrap();

        // leaf has no entry of its own: the nearest ancestor (mid) wins
        assert_eq!(vt.get(leaf.type_index(), "greet").unwrap().as_int(), Some(20));
        assert_eq!(vt.get(base.type_index(), "greet").unwrap().as_int(), Some(10));
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let table = TypeTable::global();
        let ty = table.register(type_index::OBJECT, "test.vt.Bare", None).unwrap();
        assert!(VTable::global().get(ty.type_index(), "no_such_key").is_none());
    }

    #[test]
    fn test_set_unknown_type_errors() {
        assert!(VTable::global().set(777_777_000, "k", Any::int(0)).is_err());
    }
}
