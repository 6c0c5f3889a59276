//! First-class type-descriptor objects
//!
//! Descriptors are heap objects referencing other descriptors, forming a
//! tree: `Any`, `Atomic<tag>`, `Ptr<T>`, `Optional<T>`, `List<T>`,
//! `Dict<K, V>`. Reflection metadata stores one per field, and generic
//! type checking walks the tree with [`ty_check`].

use crate::object::{ObjHeader, ObjectRepr, Ref};
use crate::types::registry::TypeTable;
use crate::value::{type_index, Any, AnyView};

/// The `Any` descriptor: matches every cell.
#[repr(C)]
pub struct AnyTypeObj {
    header: ObjHeader,
}

unsafe impl ObjectRepr for AnyTypeObj {
    const TYPE_INDEX: i32 = type_index::TYPE_ANY;
}

impl AnyTypeObj {
    /// New `Any` descriptor
    pub fn new() -> Ref<AnyTypeObj> {
        Ref::alloc(AnyTypeObj {
            header: ObjHeader::for_type::<AnyTypeObj>(),
        })
    }
}

/// `Atomic<tag>`: matches exactly one type index (or its descendants).
#[repr(C)]
pub struct AtomicTypeObj {
    header: ObjHeader,
    type_index: i32,
}

unsafe impl ObjectRepr for AtomicTypeObj {
    const TYPE_INDEX: i32 = type_index::TYPE_ATOMIC;
}

impl AtomicTypeObj {
    /// New atomic descriptor for `index`
    pub fn new(index: i32) -> Ref<AtomicTypeObj> {
        Ref::alloc(AtomicTypeObj {
            header: ObjHeader::for_type::<AtomicTypeObj>(),
            type_index: index,
        })
    }

    /// The matched type index
    pub fn matched_index(&self) -> i32 {
        self.type_index
    }
}

/// `Ptr<T>`: matches a typeless pointer (nullable).
#[repr(C)]
pub struct PtrTypeObj {
    header: ObjHeader,
    target: Any,
}

unsafe impl ObjectRepr for PtrTypeObj {
    const TYPE_INDEX: i32 = type_index::TYPE_PTR;
}

impl PtrTypeObj {
    /// New pointer descriptor over `target`
    pub fn new(target: Any) -> Ref<PtrTypeObj> {
        Ref::alloc(PtrTypeObj {
            header: ObjHeader::for_type::<PtrTypeObj>(),
            target,
        })
    }

    /// Pointee descriptor
    pub fn target(&self) -> &Any {
        &self.target
    }
}

/// `Optional<T>`: matches `None` or whatever `T` matches.
#[repr(C)]
pub struct OptionalTypeObj {
    header: ObjHeader,
    target: Any,
}

unsafe impl ObjectRepr for OptionalTypeObj {
    const TYPE_INDEX: i32 = type_index::TYPE_OPTIONAL;
}

impl OptionalTypeObj {
    /// New optional descriptor over `target`
    pub fn new(target: Any) -> Ref<OptionalTypeObj> {
        Ref::alloc(OptionalTypeObj {
            header: ObjHeader::for_type::<OptionalTypeObj>(),
            target,
        })
    }

    /// Inner descriptor
    pub fn target(&self) -> &Any {
        &self.target
    }
}

/// `List<T>` descriptor.
#[repr(C)]
pub struct ListTypeObj {
    header: ObjHeader,
    elem: Any,
}

unsafe impl ObjectRepr for ListTypeObj {
    const TYPE_INDEX: i32 = type_index::TYPE_LIST;
}

impl ListTypeObj {
    /// New list descriptor over `elem`
    pub fn new(elem: Any) -> Ref<ListTypeObj> {
        Ref::alloc(ListTypeObj {
            header: ObjHeader::for_type::<ListTypeObj>(),
            elem,
        })
    }

    /// Element descriptor
    pub fn elem(&self) -> &Any {
        &self.elem
    }
}

/// `Dict<K, V>` descriptor.
#[repr(C)]
pub struct DictTypeObj {
    header: ObjHeader,
    key: Any,
    value: Any,
}

unsafe impl ObjectRepr for DictTypeObj {
    const TYPE_INDEX: i32 = type_index::TYPE_DICT;
}

impl DictTypeObj {
    /// New dict descriptor over `key` / `value`
    pub fn new(key: Any, value: Any) -> Ref<DictTypeObj> {
        Ref::alloc(DictTypeObj {
            header: ObjHeader::for_type::<DictTypeObj>(),
            key,
            value,
        })
    }

    /// Key descriptor
    pub fn key(&self) -> &Any {
        &self.key
    }

    /// Value descriptor
    pub fn value(&self) -> &Any {
        &self.value
    }
}

// Convenience constructors used by reflection definitions.

/// `Any` descriptor cell
pub fn ty_any() -> Any {
    AnyTypeObj::new().into_any()
}

/// `Atomic<index>` descriptor cell
pub fn ty_atomic(index: i32) -> Any {
    AtomicTypeObj::new(index).into_any()
}

/// `Ptr<T>` descriptor cell
pub fn ty_ptr(target: Any) -> Any {
    PtrTypeObj::new(target).into_any()
}

/// `Optional<T>` descriptor cell
pub fn ty_optional(target: Any) -> Any {
    OptionalTypeObj::new(target).into_any()
}

/// `List<T>` descriptor cell
pub fn ty_list(elem: Any) -> Any {
    ListTypeObj::new(elem).into_any()
}

/// `Dict<K, V>` descriptor cell
pub fn ty_dict(key: Any, value: Any) -> Any {
    DictTypeObj::new(key, value).into_any()
}

/// Render a descriptor tree (`"Optional[object.Str]"`, `"int"`, ...).
pub fn ty_repr(desc: &AnyView) -> String {
    match desc.type_index {
        type_index::TYPE_ANY => "Any".to_string(),
        type_index::TYPE_ATOMIC => {
            let atomic: &AtomicTypeObj = unsafe { desc.obj_unchecked() };
            TypeTable::global()
                .info_by_index(atomic.matched_index())
                .map(|r| r.type_key().to_string())
                .unwrap_or_else(|| format!("type#{}", atomic.matched_index()))
        }
        type_index::TYPE_PTR => {
            let ptr: &PtrTypeObj = unsafe { desc.obj_unchecked() };
            format!("Ptr[{}]", ty_repr(&ptr.target().view()))
        }
        type_index::TYPE_OPTIONAL => {
            let opt: &OptionalTypeObj = unsafe { desc.obj_unchecked() };
            format!("Optional[{}]", ty_repr(&opt.target().view()))
        }
        type_index::TYPE_LIST => {
            let list: &ListTypeObj = unsafe { desc.obj_unchecked() };
            format!("List[{}]", ty_repr(&list.elem().view()))
        }
        type_index::TYPE_DICT => {
            let dict: &DictTypeObj = unsafe { desc.obj_unchecked() };
            format!(
                "Dict[{}, {}]",
                ty_repr(&dict.key().view()),
                ty_repr(&dict.value().view())
            )
        }
        _ => format!("<not a type: #{}>", desc.type_index),
    }
}

/// Check whether `value` conforms to the descriptor tree `desc`.
pub fn ty_check(desc: &AnyView, value: &AnyView) -> bool {
    match desc.type_index {
        type_index::TYPE_ANY => true,
        type_index::TYPE_ATOMIC => {
            let atomic: &AtomicTypeObj = unsafe { desc.obj_unchecked() };
            TypeTable::global().is_instance(value.type_index, atomic.matched_index())
        }
        type_index::TYPE_PTR => {
            value.type_index == type_index::PTR || value.type_index == type_index::NONE
        }
        type_index::TYPE_OPTIONAL => {
            let opt: &OptionalTypeObj = unsafe { desc.obj_unchecked() };
            value.is_none() || ty_check(&opt.target().view(), value)
        }
        type_index::TYPE_LIST => {
            if value.type_index != type_index::LIST {
                return false;
            }
            let elem_desc = unsafe { desc.obj_unchecked::<ListTypeObj>() }.elem().view();
            let list: &crate::containers::ListObj = unsafe { value.obj_unchecked() };
            list.iter().all(|item| ty_check(&elem_desc, &item.view()))
        }
        type_index::TYPE_DICT => {
            if value.type_index != type_index::DICT {
                return false;
            }
            let dict_desc: &DictTypeObj = unsafe { desc.obj_unchecked() };
            let key_desc = dict_desc.key().view();
            let value_desc = dict_desc.value().view();
            let dict: &crate::containers::DictObj = unsafe { value.obj_unchecked() };
            dict.iter()
                .all(|(k, v)| ty_check(&key_desc, &k.view()) && ty_check(&value_desc, &v.view()))
        }
        _ => false,
    }
}

/// Structural equality over two descriptor trees.
pub fn ty_equal(lhs: &AnyView, rhs: &AnyView) -> bool {
    if lhs.type_index != rhs.type_index {
        return false;
    }
    match lhs.type_index {
        type_index::TYPE_ANY => true,
        type_index::TYPE_ATOMIC => {
            let a: &AtomicTypeObj = unsafe { lhs.obj_unchecked() };
            let b: &AtomicTypeObj = unsafe { rhs.obj_unchecked() };
            a.matched_index() == b.matched_index()
        }
        type_index::TYPE_PTR => {
            let a: &PtrTypeObj = unsafe { lhs.obj_unchecked() };
            let b: &PtrTypeObj = unsafe { rhs.obj_unchecked() };
            ty_equal(&a.target().view(), &b.target().view())
        }
        type_index::TYPE_OPTIONAL => {
            let a: &OptionalTypeObj = unsafe { lhs.obj_unchecked() };
            let b: &OptionalTypeObj = unsafe { rhs.obj_unchecked() };
            ty_equal(&a.target().view(), &b.target().view())
        }
        type_index::TYPE_LIST => {
            let a: &ListTypeObj = unsafe { lhs.obj_unchecked() };
            let b: &ListTypeObj = unsafe { rhs.obj_unchecked() };
            ty_equal(&a.elem().view(), &b.elem().view())
        }
        type_index::TYPE_DICT => {
            let a: &DictTypeObj = unsafe { lhs.obj_unchecked() };
            let b: &DictTypeObj = unsafe { rhs.obj_unchecked() };
            ty_equal(&a.key().view(), &b.key().view())
                && ty_equal(&a.value().view(), &b.value().view())
        }
        _ => false,
    }
}
