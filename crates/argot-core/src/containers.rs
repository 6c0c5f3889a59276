//! Core containers: List, Dict, Str
//!
//! All three are refcounted heap objects holding [`Any`] cells. Contracts:
//! List preserves insertion order with amortized O(1) append and O(1)
//! indexed access; Dict has unique keys and amortized O(1) lookup with
//! unspecified iteration order; Str is immutable with an explicit length,
//! so embedded zero bytes are fine.

use crate::object::{ObjHeader, ObjectRepr, Ref};
use crate::value::{type_index, Any, AnyView};
use crate::{RtResult, RuntimeError};
use rustc_hash::FxHashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

// ============================================================================
// List
// ============================================================================

/// Contiguous resizable sequence of cells.
#[repr(C)]
pub struct ListObj {
    header: ObjHeader,
    items: Vec<Any>,
}

unsafe impl ObjectRepr for ListObj {
    const TYPE_INDEX: i32 = type_index::LIST;
}

impl ListObj {
    /// New empty list
    pub fn new() -> Ref<ListObj> {
        Self::with_capacity(0)
    }

    /// New list with reserved capacity
    pub fn with_capacity(capacity: usize) -> Ref<ListObj> {
        Ref::alloc(ListObj {
            header: ObjHeader::for_type::<ListObj>(),
            items: Vec::with_capacity(capacity),
        })
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Current backing capacity
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Option<Any> {
        self.items.get(index).cloned()
    }

    /// Replace the element at `index`
    pub fn set(&mut self, index: usize, value: Any) -> RtResult<()> {
        match self.items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RuntimeError::IndexError(format!(
                "list index {} out of bounds (length {})",
                index,
                self.items.len()
            ))),
        }
    }

    /// Append an element (amortized O(1))
    pub fn push(&mut self, value: Any) {
        self.items.push(value);
    }

    /// Remove and return the last element
    pub fn pop(&mut self) -> Option<Any> {
        self.items.pop()
    }

    /// Iterate elements in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Any> {
        self.items.iter()
    }
}

// ============================================================================
// Dict
// ============================================================================

/// Dict key wrapper: hashes and compares cells by tag and value.
///
/// Integers by value, floats by bit pattern, strings by content, pointers
/// and heap objects by address.
pub(crate) struct AnyKey(pub(crate) Any);

impl Hash for AnyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let view = self.0.view();
        view.type_index.hash(state);
        match view.type_index {
            type_index::NONE => {}
            type_index::INT => unsafe { view.v.v_int64 }.hash(state),
            type_index::FLOAT => unsafe { view.v.v_float64 }.to_bits().hash(state),
            type_index::STR => self.0.as_str_obj().unwrap().as_bytes().hash(state),
            type_index::PTR => (unsafe { view.v.v_ptr } as usize).hash(state),
            type_index::DATA_TYPE | type_index::DEVICE => {
                unsafe { view.v.v_bytes }.hash(state)
            }
            _ => (unsafe { view.v.v_obj } as usize).hash(state),
        }
    }
}

impl PartialEq for AnyKey {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.0.view(), other.0.view());
        if a.type_index != b.type_index {
            return false;
        }
        match a.type_index {
            type_index::NONE => true,
            type_index::INT => unsafe { a.v.v_int64 == b.v.v_int64 },
            type_index::FLOAT => unsafe { a.v.v_float64.to_bits() == b.v.v_float64.to_bits() },
            type_index::STR => {
                self.0.as_str_obj().unwrap().as_bytes() == other.0.as_str_obj().unwrap().as_bytes()
            }
            type_index::PTR => unsafe { a.v.v_ptr == b.v.v_ptr },
            type_index::DATA_TYPE | type_index::DEVICE => unsafe { a.v.v_bytes == b.v.v_bytes },
            _ => unsafe { std::ptr::eq(a.v.v_obj, b.v.v_obj) },
        }
    }
}

impl Eq for AnyKey {}

/// Associative mapping from cell to cell with unique keys.
#[repr(C)]
pub struct DictObj {
    header: ObjHeader,
    map: FxHashMap<AnyKey, Any>,
}

unsafe impl ObjectRepr for DictObj {
    const TYPE_INDEX: i32 = type_index::DICT;
}

impl DictObj {
    /// New empty dict
    pub fn new() -> Ref<DictObj> {
        Self::with_capacity(0)
    }

    /// New dict with reserved capacity
    pub fn with_capacity(capacity: usize) -> Ref<DictObj> {
        Ref::alloc(DictObj {
            header: ObjHeader::for_type::<DictObj>(),
            map: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        })
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Insert an entry; returns the value previously stored under `key`.
    pub fn insert(&mut self, key: Any, value: Any) -> Option<Any> {
        self.map.insert(AnyKey(key), value)
    }

    /// Value stored under `key`
    pub fn get(&self, key: &AnyView) -> Option<Any> {
        self.map.get(&AnyKey(key.to_any())).cloned()
    }

    /// True when `key` is present
    pub fn contains_key(&self, key: &AnyView) -> bool {
        self.map.contains_key(&AnyKey(key.to_any()))
    }

    /// Remove and return the value stored under `key`
    pub fn remove(&mut self, key: &AnyView) -> Option<Any> {
        self.map.remove(&AnyKey(key.to_any()))
    }

    /// Iterate entries (order unspecified)
    pub fn iter(&self) -> impl Iterator<Item = (&Any, &Any)> {
        self.map.iter().map(|(k, v)| (&k.0, v))
    }
}

// ============================================================================
// Str
// ============================================================================

/// Owned immutable byte string with explicit length.
#[repr(C)]
pub struct StrObj {
    header: ObjHeader,
    bytes: Box<[u8]>,
}

unsafe impl ObjectRepr for StrObj {
    const TYPE_INDEX: i32 = type_index::STR;
}

impl StrObj {
    /// New string holding a copy of `bytes`
    pub fn new(bytes: &[u8]) -> Ref<StrObj> {
        Ref::alloc(StrObj {
            header: ObjHeader::for_type::<StrObj>(),
            bytes: bytes.to_vec().into_boxed_slice(),
        })
    }

    /// New string taking ownership of `s`
    pub fn from_string(s: String) -> Ref<StrObj> {
        Ref::alloc(StrObj {
            header: ObjHeader::for_type::<StrObj>(),
            bytes: s.into_bytes().into_boxed_slice(),
        })
    }

    /// Byte length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Content as UTF-8, replacing invalid sequences
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

impl fmt::Display for StrObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}
