//! Reflection metadata and structural equivalence
//!
//! [`Reflection`] attaches generic introspection data to a registered
//! type: ordered field descriptors, method descriptors, and a structural
//! classification. Field access goes through accessor closures generated
//! once per type when the reflection is defined, so no caller performs
//! raw offset arithmetic.
//!
//! Structural equality honors the four-way classification:
//!
//! - opaque fields (no sub-classification) are skipped,
//! - value fields compare structurally,
//! - `Bind` fields install a left↔right mapping before descending,
//! - `Var` nodes compare equal iff they are consistently mapped within
//!   one comparison (free variables bind to each other on first
//!   encounter).
//!
//! [`structural_hash`] mirrors equality: bound nodes hash by
//! first-encounter ordinal, and fields combine in declaration order.

use crate::containers::{DictObj, ListObj, StrObj};
use crate::object::{inc_ref, ObjHeader};
use crate::types::registry::TypeTable;
use crate::types::typing::{ty_check, ty_equal, ty_repr, AtomicTypeObj};
use crate::value::{type_index, Any, AnyView, DataType, Device};
use crate::{RtResult, RuntimeError};
use rustc_hash::{FxHashMap, FxHasher};
use std::ffi::{c_void, CStr};
use std::hash::Hasher;

// ============================================================================
// Classification
// ============================================================================

/// Structural classification of a type as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureKind {
    /// Not structural: instances compare by identity
    None,
    /// Structural, introduces no bindings of its own
    NoBind,
    /// Structural, a binding site (its `Bind` fields define mappings)
    Bind,
    /// A variable: equal to whatever it is consistently mapped to
    Var,
}

impl StructureKind {
    /// ABI integer encoding
    pub fn as_i32(self) -> i32 {
        match self {
            StructureKind::None => 0,
            StructureKind::NoBind => 1,
            StructureKind::Bind => 2,
            StructureKind::Var => 3,
        }
    }

    /// Decode the ABI integer encoding
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(StructureKind::None),
            1 => Some(StructureKind::NoBind),
            2 => Some(StructureKind::Bind),
            3 => Some(StructureKind::Var),
            _ => None,
        }
    }
}

/// Structural classification of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStructureKind {
    /// Compared structurally
    NoBind,
    /// Defines a binding between the two compared objects
    Bind,
}

impl FieldStructureKind {
    /// ABI integer encoding
    pub fn as_i32(self) -> i32 {
        match self {
            FieldStructureKind::NoBind => 0,
            FieldStructureKind::Bind => 1,
        }
    }

    /// Decode the ABI integer encoding
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(FieldStructureKind::NoBind),
            1 => Some(FieldStructureKind::Bind),
            _ => None,
        }
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Descriptor of one reflected field.
pub struct FieldDesc {
    /// Field name
    pub name: String,
    /// Logical position in the field list
    pub index: i32,
    /// Byte offset past the object header
    pub offset: usize,
    /// Slot width in bytes
    pub num_bytes: usize,
    /// Frozen fields may be read but reject a generic set
    pub frozen: bool,
    /// Type-descriptor object for the slot
    pub ty: Any,
    /// Structural sub-classification; `None` marks the field opaque
    pub structure: Option<FieldStructureKind>,
}

/// Descriptor of one reflected method.
pub struct MethodDesc {
    /// Method name
    pub name: String,
    /// Bound function object
    pub func: Any,
    /// Static methods take no instance argument
    pub is_static: bool,
}

// ============================================================================
// Field accessors
// ============================================================================

#[derive(Clone, Copy)]
enum SlotKind {
    I8,
    I16,
    I32,
    I64,
    F64,
    RawPtr,
    DataType,
    Device,
    /// Full 16-byte owned cell
    AnyCell,
    /// Nullable owned object pointer
    ObjPtr,
}

fn classify(desc: &FieldDesc) -> RtResult<SlotKind> {
    let bad_width = || {
        Err(RuntimeError::ValueError(format!(
            "field `{}`: slot of {} bytes does not fit `{}`",
            desc.name,
            desc.num_bytes,
            ty_repr(&desc.ty.view())
        )))
    };
    let by_width = |num_bytes: usize| match num_bytes {
        8 => Ok(SlotKind::ObjPtr),
        16 => Ok(SlotKind::AnyCell),
        _ => bad_width(),
    };
    match desc.ty.view().type_index {
        type_index::TYPE_ANY => {
            if desc.num_bytes == 16 {
                Ok(SlotKind::AnyCell)
            } else {
                bad_width()
            }
        }
        type_index::TYPE_PTR => Ok(SlotKind::RawPtr),
        type_index::TYPE_OPTIONAL | type_index::TYPE_LIST | type_index::TYPE_DICT => {
            by_width(desc.num_bytes)
        }
        type_index::TYPE_ATOMIC => {
            let view = desc.ty.view();
            let atomic: &AtomicTypeObj = unsafe { view.obj_unchecked() };
            match atomic.matched_index() {
                type_index::INT => match desc.num_bytes {
                    1 => Ok(SlotKind::I8),
                    2 => Ok(SlotKind::I16),
                    4 => Ok(SlotKind::I32),
                    8 => Ok(SlotKind::I64),
                    _ => bad_width(),
                },
                type_index::FLOAT => {
                    if desc.num_bytes == 8 {
                        Ok(SlotKind::F64)
                    } else {
                        bad_width()
                    }
                }
                type_index::PTR => Ok(SlotKind::RawPtr),
                type_index::DATA_TYPE => Ok(SlotKind::DataType),
                type_index::DEVICE => Ok(SlotKind::Device),
                idx if idx >= type_index::STATIC_OBJECT_BEGIN => by_width(desc.num_bytes),
                idx => Err(RuntimeError::TypeError(format!(
                    "field `{}`: atomic descriptor over unsupported tag {}",
                    desc.name, idx
                ))),
            }
        }
        other => Err(RuntimeError::TypeError(format!(
            "field `{}`: `{}` (tag {}) is not a type descriptor",
            desc.name,
            ty_repr(&desc.ty.view()),
            other
        ))),
    }
}

/// Typed get/set closure pair for one field, generated at definition time.
pub struct FieldAccessor {
    getter: Box<dyn Fn(*mut ObjHeader) -> Any + Send + Sync>,
    setter: Box<dyn Fn(*mut ObjHeader, &AnyView) -> RtResult<()> + Send + Sync>,
}

impl FieldAccessor {
    fn build(desc: &FieldDesc) -> RtResult<FieldAccessor> {
        let kind = classify(desc)?;
        let offset = std::mem::size_of::<ObjHeader>() + desc.offset;
        let name = desc.name.clone();
        let ty = desc.ty.clone();

        let getter: Box<dyn Fn(*mut ObjHeader) -> Any + Send + Sync> = match kind {
            SlotKind::I8 => Box::new(move |obj| unsafe {
                Any::int(((obj as *mut u8).add(offset) as *const i8).read_unaligned() as i64)
            }),
            SlotKind::I16 => Box::new(move |obj| unsafe {
                Any::int(((obj as *mut u8).add(offset) as *const i16).read_unaligned() as i64)
            }),
            SlotKind::I32 => Box::new(move |obj| unsafe {
                Any::int(((obj as *mut u8).add(offset) as *const i32).read_unaligned() as i64)
            }),
            SlotKind::I64 => Box::new(move |obj| unsafe {
                Any::int(((obj as *mut u8).add(offset) as *const i64).read_unaligned())
            }),
            SlotKind::F64 => Box::new(move |obj| unsafe {
                Any::float(((obj as *mut u8).add(offset) as *const f64).read_unaligned())
            }),
            SlotKind::RawPtr => Box::new(move |obj| unsafe {
                Any::ptr(((obj as *mut u8).add(offset) as *const *mut c_void).read_unaligned())
            }),
            SlotKind::DataType => Box::new(move |obj| unsafe {
                Any::dtype(((obj as *mut u8).add(offset) as *const DataType).read_unaligned())
            }),
            SlotKind::Device => Box::new(move |obj| unsafe {
                Any::device(((obj as *mut u8).add(offset) as *const Device).read_unaligned())
            }),
            SlotKind::AnyCell => Box::new(move |obj| unsafe {
                ((obj as *mut u8).add(offset) as *const AnyView)
                    .read_unaligned()
                    .to_any()
            }),
            SlotKind::ObjPtr => Box::new(move |obj| unsafe {
                let ptr = ((obj as *mut u8).add(offset) as *const *mut ObjHeader).read_unaligned();
                if ptr.is_null() {
                    Any::none()
                } else {
                    inc_ref(ptr);
                    Any::from_obj_ptr_owned(ptr)
                }
            }),
        };

        let setter: Box<dyn Fn(*mut ObjHeader, &AnyView) -> RtResult<()> + Send + Sync> = {
            match kind {
                SlotKind::I8 | SlotKind::I16 | SlotKind::I32 | SlotKind::I64 => {
                    let width = desc.num_bytes;
                    let name = name.clone();
                    Box::new(move |obj, value| {
                        let i = value.as_int().ok_or_else(|| {
                            RuntimeError::TypeError(format!("field `{}` expects int", name))
                        })?;
                        unsafe {
                            let base = (obj as *mut u8).add(offset);
                            match width {
                                1 => (base as *mut i8).write_unaligned(i as i8),
                                2 => (base as *mut i16).write_unaligned(i as i16),
                                4 => (base as *mut i32).write_unaligned(i as i32),
                                _ => (base as *mut i64).write_unaligned(i),
                            }
                        }
                        Ok(())
                    })
                }
                SlotKind::F64 => {
                    let name = name.clone();
                    Box::new(move |obj, value| {
                        let f = value.as_float().ok_or_else(|| {
                            RuntimeError::TypeError(format!("field `{}` expects float", name))
                        })?;
                        unsafe {
                            ((obj as *mut u8).add(offset) as *mut f64).write_unaligned(f)
                        };
                        Ok(())
                    })
                }
                SlotKind::RawPtr => {
                    let name = name.clone();
                    Box::new(move |obj, value| {
                        let p = if value.is_none() {
                            std::ptr::null_mut()
                        } else {
                            value.as_ptr().ok_or_else(|| {
                                RuntimeError::TypeError(format!("field `{}` expects Ptr", name))
                            })?
                        };
                        unsafe {
                            ((obj as *mut u8).add(offset) as *mut *mut c_void).write_unaligned(p)
                        };
                        Ok(())
                    })
                }
                SlotKind::DataType => {
                    let name = name.clone();
                    Box::new(move |obj, value| {
                        let dt = value.as_dtype().ok_or_else(|| {
                            RuntimeError::TypeError(format!("field `{}` expects DataType", name))
                        })?;
                        unsafe {
                            ((obj as *mut u8).add(offset) as *mut DataType).write_unaligned(dt)
                        };
                        Ok(())
                    })
                }
                SlotKind::Device => {
                    let name = name.clone();
                    Box::new(move |obj, value| {
                        let dev = value.as_device().ok_or_else(|| {
                            RuntimeError::TypeError(format!("field `{}` expects Device", name))
                        })?;
                        unsafe {
                            ((obj as *mut u8).add(offset) as *mut Device).write_unaligned(dev)
                        };
                        Ok(())
                    })
                }
                SlotKind::AnyCell => {
                    let name = name.clone();
                    let ty = ty.clone();
                    Box::new(move |obj, value| {
                        if !ty_check(&ty.view(), value) {
                            return Err(RuntimeError::TypeError(format!(
                                "field `{}` expects `{}`",
                                name,
                                ty_repr(&ty.view())
                            )));
                        }
                        unsafe {
                            let slot = (obj as *mut u8).add(offset) as *mut Any;
                            let old = slot.read_unaligned();
                            slot.write_unaligned(value.to_any());
                            drop(old);
                        }
                        Ok(())
                    })
                }
                SlotKind::ObjPtr => {
                    let name = name.clone();
                    let ty = ty.clone();
                    Box::new(move |obj, value| {
                        if !value.is_none() && value.obj_ptr().is_none() {
                            return Err(RuntimeError::TypeError(format!(
                                "field `{}` expects an object reference",
                                name
                            )));
                        }
                        if !ty_check(&ty.view(), value) {
                            return Err(RuntimeError::TypeError(format!(
                                "field `{}` expects `{}`",
                                name,
                                ty_repr(&ty.view())
                            )));
                        }
                        unsafe {
                            let slot = (obj as *mut u8).add(offset) as *mut *mut ObjHeader;
                            let old = slot.read_unaligned();
                            let new = value.obj_ptr().unwrap_or(std::ptr::null_mut());
                            if !new.is_null() {
                                inc_ref(new);
                            }
                            slot.write_unaligned(new);
                            if !old.is_null() {
                                crate::object::dec_ref(old);
                            }
                        }
                        Ok(())
                    })
                }
            }
        };

        Ok(FieldAccessor { getter, setter })
    }

    /// Read the field as an owned cell.
    ///
    /// # Safety
    /// `obj` must point to a live object of the type this accessor was
    /// generated for.
    pub unsafe fn get(&self, obj: *mut ObjHeader) -> Any {
        (self.getter)(obj)
    }

    /// Write the field from a cell, enforcing the slot's type descriptor.
    ///
    /// # Safety
    /// Same contract as [`FieldAccessor::get`], plus exclusive access to
    /// the slot for the duration of the call.
    pub unsafe fn set(&self, obj: *mut ObjHeader, value: &AnyView) -> RtResult<()> {
        (self.setter)(obj, value)
    }
}

// ============================================================================
// Reflection
// ============================================================================

/// Generic introspection data attached to one registered type.
pub struct Reflection {
    fields: Vec<FieldDesc>,
    methods: Vec<MethodDesc>,
    structure: StructureKind,
    accessors: Vec<FieldAccessor>,
    by_name: FxHashMap<String, usize>,
}

impl Reflection {
    /// Build reflection data, generating one accessor per field.
    pub fn new(
        fields: Vec<FieldDesc>,
        methods: Vec<MethodDesc>,
        structure: StructureKind,
    ) -> RtResult<Self> {
        let mut accessors = Vec::with_capacity(fields.len());
        let mut by_name = FxHashMap::default();
        for (slot, field) in fields.iter().enumerate() {
            accessors.push(FieldAccessor::build(field)?);
            if by_name.insert(field.name.clone(), slot).is_some() {
                return Err(RuntimeError::ValueError(format!(
                    "duplicate field name `{}`",
                    field.name
                )));
            }
        }
        Ok(Reflection {
            fields,
            methods,
            structure,
            accessors,
            by_name,
        })
    }

    /// Field descriptors in declaration order
    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    /// Method descriptors
    pub fn methods(&self) -> &[MethodDesc] {
        &self.methods
    }

    /// Structural classification of the type
    pub fn structure(&self) -> StructureKind {
        self.structure
    }

    /// Method descriptor by name
    pub fn method(&self, name: &str) -> Option<&MethodDesc> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Field descriptor and accessor by name
    pub fn field(&self, name: &str) -> Option<(&FieldDesc, &FieldAccessor)> {
        let slot = *self.by_name.get(name)?;
        Some((&self.fields[slot], &self.accessors[slot]))
    }

    fn slots(&self) -> impl Iterator<Item = (&FieldDesc, &FieldAccessor)> {
        self.fields.iter().zip(self.accessors.iter())
    }
}

/// Attach reflection to a registered type. Callable once per type.
pub fn define_reflection(
    type_idx: i32,
    fields: Vec<FieldDesc>,
    methods: Vec<MethodDesc>,
    structure: StructureKind,
) -> RtResult<()> {
    TypeTable::global().define_reflection(type_idx, Reflection::new(fields, methods, structure)?)
}

/// Generic field read through the type's accessor table.
pub fn field_get(obj: &Any, name: &str) -> RtResult<Any> {
    let (ptr, reflection) = reflection_of(obj)?;
    let (_, accessor) = reflection.field(name).ok_or_else(|| {
        RuntimeError::KeyError(format!("no field `{}` on `{}`", name, obj.type_key().unwrap_or_default()))
    })?;
    Ok(unsafe { accessor.get(ptr) })
}

/// Generic field write; frozen fields reject it.
pub fn field_set(obj: &Any, name: &str, value: &AnyView) -> RtResult<()> {
    let (ptr, reflection) = reflection_of(obj)?;
    let (desc, accessor) = reflection.field(name).ok_or_else(|| {
        RuntimeError::KeyError(format!("no field `{}` on `{}`", name, obj.type_key().unwrap_or_default()))
    })?;
    if desc.frozen {
        return Err(RuntimeError::AttributeError(format!(
            "field `{}` is frozen",
            name
        )));
    }
    unsafe { accessor.set(ptr, value) }
}

fn reflection_of(obj: &Any) -> RtResult<(*mut ObjHeader, &'static Reflection)> {
    let ptr = obj.obj_ptr().ok_or_else(|| {
        RuntimeError::TypeError(format!("tag {} has no fields", obj.type_index()))
    })?;
    let record = TypeTable::global()
        .info_by_index(obj.type_index())
        .ok_or_else(|| RuntimeError::KeyError(format!("unknown type index {}", obj.type_index())))?;
    let reflection = record.reflection().ok_or_else(|| {
        RuntimeError::StateError(format!(
            "type `{}` has no reflection defined",
            record.type_key()
        ))
    })?;
    // records are append-only and never dropped; the borrow is effectively 'static
    let reflection = unsafe { &*(reflection as *const Reflection) };
    Ok((ptr, reflection))
}

// ============================================================================
// Structural equality
// ============================================================================

#[derive(Default)]
struct EqCtx {
    fwd: FxHashMap<usize, usize>,
    rev: FxHashMap<usize, usize>,
}

impl EqCtx {
    fn bind(&mut self, lhs: usize, rhs: usize) -> bool {
        if let Some(&mapped) = self.fwd.get(&lhs) {
            return mapped == rhs;
        }
        if self.rev.contains_key(&rhs) {
            return false;
        }
        self.fwd.insert(lhs, rhs);
        self.rev.insert(rhs, lhs);
        true
    }
}

/// Structural equality between two cells.
///
/// Honors the per-type [`StructureKind`] and per-field
/// [`FieldStructureKind`]; free variables match alpha-equivalently (bound
/// on first encounter, consistent afterwards). Dict keys compare by
/// value, not alpha-equivalence.
pub fn structural_equal(lhs: &AnyView, rhs: &AnyView) -> bool {
    let mut ctx = EqCtx::default();
    eq_view(lhs, rhs, &mut ctx)
}

fn str_bytes<'a>(view: &'a AnyView) -> Option<&'a [u8]> {
    match view.type_index {
        type_index::RAW_STR => Some(unsafe { CStr::from_ptr(view.v.v_str) }.to_bytes()),
        type_index::STR => Some(unsafe { view.obj_unchecked::<StrObj>() }.as_bytes()),
        _ => None,
    }
}

fn eq_view(a: &AnyView, b: &AnyView, ctx: &mut EqCtx) -> bool {
    // owned and borrowed strings compare alike, by content
    if let (Some(sa), Some(sb)) = (str_bytes(a), str_bytes(b)) {
        return sa == sb;
    }
    if a.type_index != b.type_index {
        return false;
    }
    match a.type_index {
        type_index::NONE => true,
        type_index::INT => unsafe { a.v.v_int64 == b.v.v_int64 },
        type_index::FLOAT => unsafe { a.v.v_float64.to_bits() == b.v.v_float64.to_bits() },
        type_index::PTR => unsafe { a.v.v_ptr == b.v.v_ptr },
        type_index::DATA_TYPE | type_index::DEVICE => unsafe { a.v.v_bytes == b.v.v_bytes },
        type_index::LIST => {
            let la: &ListObj = unsafe { a.obj_unchecked() };
            let lb: &ListObj = unsafe { b.obj_unchecked() };
            la.len() == lb.len()
                && la
                    .iter()
                    .zip(lb.iter())
                    .all(|(x, y)| eq_view(&x.view(), &y.view(), ctx))
        }
        type_index::DICT => {
            let da: &DictObj = unsafe { a.obj_unchecked() };
            let db: &DictObj = unsafe { b.obj_unchecked() };
            da.len() == db.len()
                && da.iter().all(|(k, v)| match db.get(&k.view()) {
                    Some(other) => eq_view(&v.view(), &other.view(), ctx),
                    None => false,
                })
        }
        type_index::FUNC | type_index::ERROR => unsafe { std::ptr::eq(a.v.v_obj, b.v.v_obj) },
        type_index::TYPE_ANY..=type_index::TYPE_DICT => ty_equal(a, b),
        _ => eq_object(a, b, ctx),
    }
}

fn eq_object(a: &AnyView, b: &AnyView, ctx: &mut EqCtx) -> bool {
    let a_ptr = unsafe { a.v.v_obj } as usize;
    let b_ptr = unsafe { b.v.v_obj } as usize;
    let Some(record) = TypeTable::global().info_by_index(a.type_index) else {
        return a_ptr == b_ptr;
    };
    let Some(reflection) = record.reflection() else {
        return a_ptr == b_ptr;
    };
    match reflection.structure() {
        StructureKind::None => a_ptr == b_ptr,
        StructureKind::Var => match ctx.fwd.get(&a_ptr) {
            Some(&mapped) => mapped == b_ptr,
            None => ctx.bind(a_ptr, b_ptr),
        },
        StructureKind::NoBind | StructureKind::Bind => {
            let a_hdr = a_ptr as *mut ObjHeader;
            let b_hdr = b_ptr as *mut ObjHeader;
            for (desc, accessor) in reflection.slots() {
                let Some(kind) = desc.structure else {
                    continue; // opaque
                };
                let av = unsafe { accessor.get(a_hdr) };
                let bv = unsafe { accessor.get(b_hdr) };
                if kind == FieldStructureKind::Bind {
                    if let (Some(ap), Some(bp)) = (av.obj_ptr(), bv.obj_ptr()) {
                        if !ctx.bind(ap as usize, bp as usize) {
                            return false;
                        }
                    }
                }
                if !eq_view(&av.view(), &bv.view(), ctx) {
                    return false;
                }
            }
            true
        }
    }
}

// ============================================================================
// Structural hash
// ============================================================================

#[derive(Default)]
struct HashCtx {
    ordinals: FxHashMap<usize, u64>,
    next_ordinal: u64,
}

impl HashCtx {
    fn ordinal(&mut self, ptr: usize) -> u64 {
        if let Some(&ord) = self.ordinals.get(&ptr) {
            return ord;
        }
        let ord = self.next_ordinal;
        self.next_ordinal += 1;
        self.ordinals.insert(ptr, ord);
        ord
    }
}

#[inline]
fn mix(seed: u64, value: u64) -> u64 {
    // FxHash-style combiner
    (seed.rotate_left(5) ^ value).wrapping_mul(0x51_7c_c1_b7_27_22_0a_95)
}

fn bytes_hash(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Structural hash consistent with [`structural_equal`]: equal values
/// produce equal hashes.
pub fn structural_hash(view: &AnyView) -> u64 {
    let mut ctx = HashCtx::default();
    hash_view(view, &mut ctx)
}

fn hash_view(view: &AnyView, ctx: &mut HashCtx) -> u64 {
    if let Some(bytes) = str_bytes(view) {
        return mix(type_index::STR as u64, bytes_hash(bytes));
    }
    let tag = view.type_index as u64;
    match view.type_index {
        type_index::NONE => mix(tag, 0),
        type_index::INT => mix(tag, unsafe { view.v.v_int64 } as u64),
        type_index::FLOAT => mix(tag, unsafe { view.v.v_float64 }.to_bits()),
        type_index::PTR => mix(tag, unsafe { view.v.v_ptr } as usize as u64),
        type_index::DATA_TYPE | type_index::DEVICE => {
            mix(tag, u64::from_ne_bytes(unsafe { view.v.v_bytes }))
        }
        type_index::LIST => {
            let list: &ListObj = unsafe { view.obj_unchecked() };
            let mut h = mix(tag, list.len() as u64);
            for item in list.iter() {
                h = mix(h, hash_view(&item.view(), ctx));
            }
            h
        }
        type_index::DICT => {
            let dict: &DictObj = unsafe { view.obj_unchecked() };
            // entry hashes combine by XOR so iteration order cannot matter
            let mut acc = 0u64;
            for (k, v) in dict.iter() {
                acc ^= mix(hash_view(&k.view(), ctx), hash_view(&v.view(), ctx));
            }
            mix(tag, acc ^ dict.len() as u64)
        }
        type_index::FUNC | type_index::ERROR => mix(tag, unsafe { view.v.v_obj } as usize as u64),
        type_index::TYPE_ANY..=type_index::TYPE_DICT => {
            mix(type_index::TYPE as u64, bytes_hash(ty_repr(view).as_bytes()))
        }
        _ => hash_object(view, ctx),
    }
}

fn hash_object(view: &AnyView, ctx: &mut HashCtx) -> u64 {
    let ptr = unsafe { view.v.v_obj } as usize;
    let tag = view.type_index as u64;
    let Some(record) = TypeTable::global().info_by_index(view.type_index) else {
        return mix(tag, ptr as u64);
    };
    let Some(reflection) = record.reflection() else {
        return mix(tag, ptr as u64);
    };
    match reflection.structure() {
        StructureKind::None => mix(tag, ptr as u64),
        StructureKind::Var => mix(tag, ctx.ordinal(ptr)),
        StructureKind::NoBind | StructureKind::Bind => {
            let hdr = ptr as *mut ObjHeader;
            let mut h = mix(tag, 0x9e37);
            for (desc, accessor) in reflection.slots() {
                let Some(kind) = desc.structure else {
                    continue;
                };
                let value = unsafe { accessor.get(hdr) };
                if kind == FieldStructureKind::Bind {
                    if let Some(p) = value.obj_ptr() {
                        ctx.ordinal(p as usize);
                    }
                }
                h = mix(h, hash_view(&value.view(), ctx));
            }
            h
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ext_obj_create;
    use crate::types::typing::{ty_any, ty_atomic};
    use crate::value::type_index;

    const HDR: usize = std::mem::size_of::<ObjHeader>();

    fn int_field(name: &str, index: i32, offset: usize) -> FieldDesc {
        FieldDesc {
            name: name.to_string(),
            index,
            offset,
            num_bytes: 8,
            frozen: false,
            ty: ty_atomic(type_index::INT),
            structure: Some(FieldStructureKind::NoBind),
        }
    }

    fn cell_field(
        name: &str,
        index: i32,
        offset: usize,
        structure: Option<FieldStructureKind>,
    ) -> FieldDesc {
        FieldDesc {
            name: name.to_string(),
            index,
            offset,
            num_bytes: 16,
            frozen: false,
            ty: ty_any(),
            structure,
        }
    }

    #[test]
    fn test_define_and_access_fields() {
        let ty = TypeTable::global()
            .register(type_index::OBJECT, "test.rf.Point", None)
            .unwrap();
        define_reflection(
            ty.type_index(),
            vec![int_field("x", 0, 0), int_field("y", 1, 8)],
            vec![],
            StructureKind::NoBind,
        )
        .unwrap();

        let obj = ext_obj_create(HDR + 16, ty.type_index()).unwrap();
        field_set(&obj, "x", &AnyView::int(3)).unwrap();
        field_set(&obj, "y", &AnyView::int(4)).unwrap();
        assert_eq!(field_get(&obj, "x").unwrap().as_int(), Some(3));
        assert_eq!(field_get(&obj, "y").unwrap().as_int(), Some(4));

        // missing field is a lookup error
        assert!(field_get(&obj, "z").is_err());
        // wrong payload type is a type error
        assert!(field_set(&obj, "x", &AnyView::float(1.0)).is_err());
    }

    #[test]
    fn test_frozen_field_rejects_set() {
        let ty = TypeTable::global()
            .register(type_index::OBJECT, "test.rf.Frozen", None)
            .unwrap();
        let mut field = int_field("id", 0, 0);
        field.frozen = true;
        define_reflection(ty.type_index(), vec![field], vec![], StructureKind::NoBind).unwrap();

        let obj = ext_obj_create(HDR + 8, ty.type_index()).unwrap();
        let err = field_set(&obj, "id", &AnyView::int(1)).unwrap_err();
        assert_eq!(err.kind(), "AttributeError");
        // reads still work
        assert_eq!(field_get(&obj, "id").unwrap().as_int(), Some(0));
    }

    #[test]
    fn test_redefinition_is_state_error() {
        let ty = TypeTable::global()
            .register(type_index::OBJECT, "test.rf.Once", None)
            .unwrap();
        define_reflection(ty.type_index(), vec![], vec![], StructureKind::None).unwrap();
        let err = define_reflection(ty.type_index(), vec![], vec![], StructureKind::None)
            .unwrap_err();
        assert_eq!(err.kind(), "StateError");
    }

    #[test]
    fn test_structural_equal_pods_and_strings() {
        assert!(structural_equal(&AnyView::int(1), &AnyView::int(1)));
        assert!(!structural_equal(&AnyView::int(1), &AnyView::int(2)));
        assert!(!structural_equal(&AnyView::int(1), &AnyView::float(1.0)));

        let a = Any::str("abc");
        let b = Any::str("abc");
        assert!(structural_equal(&a.view(), &b.view()));
        assert_eq!(
            structural_hash(&a.view()),
            structural_hash(&b.view())
        );
    }

    #[test]
    fn test_structural_equal_containers() {
        let la = crate::containers::ListObj::new();
        let lb = crate::containers::ListObj::new();
        unsafe {
            la.as_mut().push(Any::int(1));
            la.as_mut().push(Any::str("x"));
            lb.as_mut().push(Any::int(1));
            lb.as_mut().push(Any::str("x"));
        }
        let (a, b) = (la.into_any(), lb.into_any());
        assert!(structural_equal(&a.view(), &b.view()));
        assert_eq!(structural_hash(&a.view()), structural_hash(&b.view()));

        // element order matters
        let _ = b;
        let lc = crate::containers::ListObj::new();
        unsafe {
            lc.as_mut().push(Any::str("x"));
            lc.as_mut().push(Any::int(1));
        }
        assert!(!structural_equal(&a.view(), &lc.into_any().view()));
    }

    // shared across tests: reflection can only be defined once per type
    fn setup_binding_types() -> (i32, i32) {
        use once_cell::sync::Lazy;
        static TYPES: Lazy<(i32, i32)> = Lazy::new(|| {
            let table = TypeTable::global();
            let var = table
                .register(type_index::OBJECT, "test.rf.Var", None)
                .unwrap();
            let lam = table
                .register(type_index::OBJECT, "test.rf.Lambda", None)
                .unwrap();
            // a Var carries only an opaque name
            define_reflection(
                var.type_index(),
                vec![cell_field("name", 0, 0, None)],
                vec![],
                StructureKind::Var,
            )
            .unwrap();
            // a Lambda binds its parameter, then compares its body
            define_reflection(
                lam.type_index(),
                vec![
                    cell_field("param", 0, 0, Some(FieldStructureKind::Bind)),
                    cell_field("body", 1, 16, Some(FieldStructureKind::NoBind)),
                ],
                vec![],
                StructureKind::Bind,
            )
            .unwrap();
            (var.type_index(), lam.type_index())
        });
        *TYPES
    }

    fn make_var(ty: i32, name: &str) -> Any {
        let v = ext_obj_create(HDR + 16, ty).unwrap();
        field_set(&v, "name", &Any::str(name).view()).unwrap();
        v
    }

    fn make_lambda(ty: i32, param: &Any, body: &Any) -> Any {
        let l = ext_obj_create(HDR + 32, ty).unwrap();
        field_set(&l, "param", &param.view()).unwrap();
        field_set(&l, "body", &body.view()).unwrap();
        l
    }

    #[test]
    fn test_alpha_equivalence() {
        let (var_ty, lam_ty) = setup_binding_types();

        // λx.x ≡ λy.y even though the variable names differ
        let x = make_var(var_ty, "x");
        let y = make_var(var_ty, "y");
        let id_x = make_lambda(lam_ty, &x, &x);
        let id_y = make_lambda(lam_ty, &y, &y);
        assert!(structural_equal(&id_x.view(), &id_y.view()));
        assert_eq!(
            structural_hash(&id_x.view()),
            structural_hash(&id_y.view())
        );

        // λx.x ≢ λy.z: the body refers to a different variable
        let z = make_var(var_ty, "z");
        let esc = make_lambda(lam_ty, &y, &z);
        assert!(!structural_equal(&id_x.view(), &esc.view()));
    }

    #[test]
    fn test_free_variables_map_consistently() {
        let (var_ty, _) = setup_binding_types();
        let a = make_var(var_ty, "a");
        let b = make_var(var_ty, "b");

        // two free variables bind to each other on first encounter
        assert!(structural_equal(&a.view(), &b.view()));

        // within one comparison the mapping must stay consistent:
        // [a, a] vs [b, c] fails on the second element
        let (l1, l2) = (crate::containers::ListObj::new(), crate::containers::ListObj::new());
        let c = make_var(var_ty, "c");
        unsafe {
            l1.as_mut().push(a.clone());
            l1.as_mut().push(a.clone());
            l2.as_mut().push(b.clone());
            l2.as_mut().push(c.clone());
        }
        assert!(!structural_equal(&l1.into_any().view(), &l2.into_any().view()));
    }

    #[test]
    fn test_opaque_fields_are_skipped() {
        let table = TypeTable::global();
        let ty = table
            .register(type_index::OBJECT, "test.rf.Opaque", None)
            .unwrap();
        define_reflection(
            ty.type_index(),
            vec![
                int_field("value", 0, 0),
                cell_field("cache", 1, 8, None), // opaque
            ],
            vec![],
            StructureKind::NoBind,
        )
        .unwrap();

        let a = ext_obj_create(HDR + 24, ty.type_index()).unwrap();
        let b = ext_obj_create(HDR + 24, ty.type_index()).unwrap();
        field_set(&a, "value", &AnyView::int(1)).unwrap();
        field_set(&b, "value", &AnyView::int(1)).unwrap();
        field_set(&a, "cache", &Any::str("left").view()).unwrap();
        field_set(&b, "cache", &Any::str("right").view()).unwrap();

        assert!(structural_equal(&a.view(), &b.view()));
        assert_eq!(structural_hash(&a.view()), structural_hash(&b.view()));

        field_set(&b, "value", &AnyView::int(2)).unwrap();
        assert!(!structural_equal(&a.view(), &b.view()));
    }
}
