//! Global type registry
//!
//! A process-wide, append-only table mapping type index ↔ type key ↔
//! metadata. Static indices are compile-time constants (core object and
//! typing families); dynamic indices are assigned once per distinct type
//! key starting at [`type_index::DYN_OBJECT_BEGIN`].
//!
//! Registration is idempotent per key so that independently compiled
//! modules declaring the same logical type converge on one shared index.
//! Reads (`is_instance`, lookups) are hot-path and stay lock-free on the
//! sharded maps; writers serialize on a single registration lock.

use crate::reflect::Reflection;
use crate::value::type_index;
use crate::{RtResult, RuntimeError};
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Metadata of one registered type.
///
/// The ancestor chain is ordered root → immediate parent and is
/// append-only: `ancestors[i]` is always the ancestor at depth `i`, which
/// is what makes `is_instance` O(1).
pub struct TypeRecord {
    type_index: i32,
    type_key: String,
    ancestors: Vec<i32>,
    reflection: OnceCell<Reflection>,
}

impl TypeRecord {
    fn new(type_index: i32, type_key: String, ancestors: Vec<i32>) -> Self {
        TypeRecord {
            type_index,
            type_key,
            ancestors,
            reflection: OnceCell::new(),
        }
    }

    /// Stable integer identity
    #[inline]
    pub fn type_index(&self) -> i32 {
        self.type_index
    }

    /// Unique string key
    #[inline]
    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    /// Depth in the ancestry tree (root types have depth 0)
    #[inline]
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }

    /// Ancestor indices, root first
    #[inline]
    pub fn ancestors(&self) -> &[i32] {
        &self.ancestors
    }

    /// Reflection metadata, when defined
    pub fn reflection(&self) -> Option<&Reflection> {
        self.reflection.get()
    }

    /// Attach reflection metadata. Callable once; re-definition is a
    /// caller error.
    pub(crate) fn set_reflection(&self, reflection: Reflection) -> RtResult<()> {
        self.reflection.set(reflection).map_err(|_| {
            RuntimeError::StateError(format!(
                "reflection for type `{}` is already defined",
                self.type_key
            ))
        })
    }
}

impl std::fmt::Debug for TypeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRecord")
            .field("type_index", &self.type_index)
            .field("type_key", &self.type_key)
            .field("ancestors", &self.ancestors)
            .field("has_reflection", &self.reflection.get().is_some())
            .finish()
    }
}

/// The process-wide type table.
///
/// Created once at first use and never shrinking. Use
/// [`TypeTable::global`]; separate instances exist only in tests.
pub struct TypeTable {
    by_index: DashMap<i32, Arc<TypeRecord>>,
    by_key: DashMap<String, i32>,
    next_dyn_index: AtomicI32,
    register_lock: Mutex<()>,
}

static GLOBAL: Lazy<TypeTable> = Lazy::new(TypeTable::bootstrap);

impl TypeTable {
    /// The process-wide table, bootstrapped with the core type families.
    pub fn global() -> &'static TypeTable {
        &GLOBAL
    }

    fn bootstrap() -> Self {
        let table = TypeTable {
            by_index: DashMap::new(),
            by_key: DashMap::new(),
            next_dyn_index: AtomicI32::new(type_index::DYN_OBJECT_BEGIN),
            register_lock: Mutex::new(()),
        };

        // On-stack POD tags: roots with empty chains.
        table.insert_root("None", type_index::NONE);
        table.insert_root("int", type_index::INT);
        table.insert_root("float", type_index::FLOAT);
        table.insert_root("Ptr", type_index::PTR);
        table.insert_root("DataType", type_index::DATA_TYPE);
        table.insert_root("Device", type_index::DEVICE);
        table.insert_root("RawStr", type_index::RAW_STR);

        // Heap object families.
        table.insert_root("object.Object", type_index::OBJECT);
        for (key, index) in [
            ("object.List", type_index::LIST),
            ("object.Dict", type_index::DICT),
            ("object.Error", type_index::ERROR),
            ("object.Func", type_index::FUNC),
            ("object.Str", type_index::STR),
            ("typing.Type", type_index::TYPE),
        ] {
            table
                .register(type_index::OBJECT, key, Some(index))
                .expect("core type bootstrap");
        }
        for (key, index) in [
            ("typing.AnyType", type_index::TYPE_ANY),
            ("typing.AtomicType", type_index::TYPE_ATOMIC),
            ("typing.PtrType", type_index::TYPE_PTR),
            ("typing.OptionalType", type_index::TYPE_OPTIONAL),
            ("typing.ListType", type_index::TYPE_LIST),
            ("typing.DictType", type_index::TYPE_DICT),
        ] {
            table
                .register(type_index::TYPE, key, Some(index))
                .expect("core type bootstrap");
        }
        table
    }

    #[cfg(test)]
    pub(crate) fn new_for_test() -> Self {
        Self::bootstrap()
    }

    fn insert_root(&self, key: &str, index: i32) {
        let record = Arc::new(TypeRecord::new(index, key.to_string(), Vec::new()));
        self.by_index.insert(index, record);
        self.by_key.insert(key.to_string(), index);
    }

    /// Register `type_key` under `parent_index`.
    ///
    /// Idempotent: a key that is already registered returns the existing
    /// record, regardless of `proposed_index`. Otherwise the record gets
    /// `proposed_index` when one is given (a reserved static slot) or the
    /// next free dynamic index, and an ancestor chain equal to the
    /// parent's chain with the parent appended. Concurrent first
    /// registrations of one key resolve to a single winning record.
    pub fn register(
        &self,
        parent_index: i32,
        type_key: &str,
        proposed_index: Option<i32>,
    ) -> RtResult<Arc<TypeRecord>> {
        if let Some(index) = self.by_key.get(type_key).map(|i| *i) {
            return Ok(self.by_index.get(&index).expect("key without record").clone());
        }

        let _guard = self.register_lock.lock();

        // A racing registrant may have won while we waited for the lock;
        // the loser reuses the winner's record.
        if let Some(index) = self.by_key.get(type_key).map(|i| *i) {
            log::trace!("type `{}` registered concurrently, reusing index {}", type_key, index);
            return Ok(self.by_index.get(&index).expect("key without record").clone());
        }

        let parent = self.by_index.get(&parent_index).ok_or_else(|| {
            RuntimeError::KeyError(format!(
                "cannot register `{}`: unknown parent type index {}",
                type_key, parent_index
            ))
        })?;

        let index = match proposed_index {
            Some(index) if index >= 0 => {
                if self.by_index.contains_key(&index) {
                    return Err(RuntimeError::StateError(format!(
                        "type index {} is already registered to `{}`",
                        index,
                        self.by_index.get(&index).unwrap().type_key()
                    )));
                }
                index
            }
            _ => self.next_dyn_index.fetch_add(1, Ordering::Relaxed),
        };

        let mut ancestors = parent.ancestors().to_vec();
        ancestors.push(parent_index);
        drop(parent);

        let record = Arc::new(TypeRecord::new(index, type_key.to_string(), ancestors));
        self.by_index.insert(index, record.clone());
        self.by_key.insert(type_key.to_string(), index);
        log::trace!("registered type `{}` as index {}", type_key, index);
        Ok(record)
    }

    /// Record for a type index
    pub fn info_by_index(&self, index: i32) -> Option<Arc<TypeRecord>> {
        self.by_index.get(&index).map(|r| r.clone())
    }

    /// Record for a type key
    pub fn info_by_key(&self, key: &str) -> Option<Arc<TypeRecord>> {
        let index = *self.by_key.get(key)?;
        self.info_by_index(index)
    }

    /// True when `type_idx` is `target_idx` or a descendant of it.
    ///
    /// O(1): the target's depth indexes directly into the instance's
    /// ancestor chain, built once at registration time.
    pub fn is_instance(&self, type_idx: i32, target_idx: i32) -> bool {
        if type_idx == target_idx {
            return true;
        }
        let Some(record) = self.by_index.get(&type_idx) else {
            return false;
        };
        let Some(target) = self.by_index.get(&target_idx) else {
            return false;
        };
        record.ancestors().get(target.depth()).copied() == Some(target_idx)
    }

    /// Attach reflection metadata to a registered type (once per type).
    pub fn define_reflection(&self, index: i32, reflection: Reflection) -> RtResult<()> {
        let record = self.info_by_index(index).ok_or_else(|| {
            RuntimeError::KeyError(format!("unknown type index {}", index))
        })?;
        record.set_reflection(reflection)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    /// Always false after bootstrap
    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_core_types() {
        let table = TypeTable::new_for_test();
        assert!(!table.is_empty());
        assert_eq!(
            table.info_by_key("object.Object").unwrap().type_index(),
            type_index::OBJECT
        );
        assert_eq!(
            table.info_by_index(type_index::LIST).unwrap().type_key(),
            "object.List"
        );
        // core containers are children of the root object type
        assert_eq!(
            table.info_by_index(type_index::STR).unwrap().ancestors(),
            &[type_index::OBJECT]
        );
        // typing descriptors sit one level deeper
        assert_eq!(
            table.info_by_index(type_index::TYPE_LIST).unwrap().ancestors(),
            &[type_index::OBJECT, type_index::TYPE]
        );
    }

    #[test]
    fn test_register_dynamic_chain() {
        let table = TypeTable::new_for_test();
        let animal = table.register(type_index::OBJECT, "test.Animal", None).unwrap();
        let dog = table
            .register(animal.type_index(), "test.Dog", None)
            .unwrap();

        assert!(animal.type_index() >= type_index::DYN_OBJECT_BEGIN);
        assert_eq!(animal.depth(), 1);
        assert_eq!(dog.depth(), 2);
        assert_eq!(dog.ancestors(), &[type_index::OBJECT, animal.type_index()]);
    }

    #[test]
    fn test_register_idempotent() {
        let table = TypeTable::new_for_test();
        let first = table.register(type_index::OBJECT, "test.Node", None).unwrap();
        let second = table.register(type_index::OBJECT, "test.Node", None).unwrap();
        assert_eq!(first.type_index(), second.type_index());
        assert_eq!(table.info_by_key("test.Node").unwrap().type_index(), first.type_index());
    }

    #[test]
    fn test_register_unknown_parent() {
        let table = TypeTable::new_for_test();
        assert!(table.register(424242, "test.Orphan", None).is_err());
    }

    #[test]
    fn test_register_occupied_static_slot() {
        let table = TypeTable::new_for_test();
        let result = table.register(type_index::OBJECT, "test.Clash", Some(type_index::LIST));
        assert!(result.is_err());
    }

    #[test]
    fn test_is_instance() {
        let table = TypeTable::new_for_test();
        let animal = table.register(type_index::OBJECT, "test.Animal", None).unwrap();
        let dog = table.register(animal.type_index(), "test.Dog", None).unwrap();
        let rock = table.register(type_index::OBJECT, "test.Rock", None).unwrap();

        assert!(table.is_instance(dog.type_index(), dog.type_index()));
        assert!(table.is_instance(dog.type_index(), animal.type_index()));
        assert!(table.is_instance(dog.type_index(), type_index::OBJECT));
        assert!(!table.is_instance(dog.type_index(), rock.type_index()));
        assert!(!table.is_instance(animal.type_index(), dog.type_index()));
        assert!(!table.is_instance(dog.type_index(), 999_999));
    }

    #[test]
    fn test_lookup_miss() {
        let table = TypeTable::new_for_test();
        assert!(table.info_by_index(55_555).is_none());
        assert!(table.info_by_key("no.Such.Type").is_none());
    }
}
