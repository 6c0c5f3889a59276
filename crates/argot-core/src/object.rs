//! Object header, reference counting, and the `Ref<T>` smart pointer
//!
//! Every heap object starts with an [`ObjHeader`]. The first 8 bytes (type
//! tag plus reference count) are the cross-module ABI prefix; the deleter
//! slot completes the fixed header region. Subtype fields follow the header
//! immediately, and reflected field offsets are measured from its end.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ ObjHeader (tag, refcount, deleter)       │
//! ├──────────────────────────────────────────┤  ← reflected offset 0
//! │ subtype fields                           │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Ownership is strictly refcount-based: [`inc_ref`] on every new owning
//! reference, [`dec_ref`] on every release, and the registered deleter runs
//! exactly once, when the count transitions to zero.

use crate::types::registry::TypeTable;
use crate::value::Any;
use crate::{RtResult, RuntimeError};
use std::ffi::c_void;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicI32, Ordering};

/// Destructor installed in an object header; receives the header pointer.
pub type DeleterFn = unsafe extern "C" fn(*mut c_void);

/// Common prefix of every heap object.
#[repr(C)]
pub struct ObjHeader {
    type_index: i32,
    ref_cnt: AtomicI32,
    deleter: Option<DeleterFn>,
}

impl ObjHeader {
    /// Header for a Rust-allocated object of type `T`, refcount 1.
    pub(crate) fn for_type<T: ObjectRepr>() -> Self {
        ObjHeader {
            type_index: T::TYPE_INDEX,
            ref_cnt: AtomicI32::new(1),
            deleter: Some(drop_boxed::<T>),
        }
    }

    /// Header with an explicit tag and deleter (external-object path).
    pub(crate) fn with_deleter(type_index: i32, deleter: Option<DeleterFn>) -> Self {
        ObjHeader {
            type_index,
            ref_cnt: AtomicI32::new(1),
            deleter,
        }
    }

    /// Type tag of the object
    #[inline]
    pub fn type_index(&self) -> i32 {
        self.type_index
    }

    /// Current reference count
    #[inline]
    pub fn ref_count(&self) -> i32 {
        self.ref_cnt.load(Ordering::Relaxed)
    }

    /// Replace the deleter, e.g. when a foreign memory manager takes over
    /// storage release for a co-owned object.
    ///
    /// # Safety
    /// Must happen before the object is shared with other threads.
    pub unsafe fn set_deleter(&mut self, deleter: Option<DeleterFn>) {
        self.deleter = deleter;
    }
}

/// Increment the reference count. Returns the new count.
///
/// # Safety
/// `ptr` must point to a live object header.
#[inline]
pub unsafe fn inc_ref(ptr: *mut ObjHeader) -> i32 {
    (*ptr).ref_cnt.fetch_add(1, Ordering::Relaxed) + 1
}

/// Decrement the reference count; when it reaches zero, run the deleter.
/// Returns the new count.
///
/// Two threads releasing their last references concurrently destroy the
/// object exactly once: the release/acquire pair orders all prior payload
/// writes before the deleter runs.
///
/// # Safety
/// `ptr` must point to a live object header and the caller must own the
/// reference being released.
#[inline]
pub unsafe fn dec_ref(ptr: *mut ObjHeader) -> i32 {
    let prev = (*ptr).ref_cnt.fetch_sub(1, Ordering::Release);
    debug_assert!(prev > 0, "refcount underflow");
    if prev == 1 {
        fence(Ordering::Acquire);
        if let Some(deleter) = (*ptr).deleter {
            deleter(ptr as *mut c_void);
        }
    }
    prev - 1
}

unsafe extern "C" fn drop_boxed<T>(ptr: *mut c_void) {
    drop(Box::from_raw(ptr as *mut T));
}

/// Implemented by heap object representations.
///
/// # Safety
/// The struct must be `#[repr(C)]` with an [`ObjHeader`] as its first
/// field, and `TYPE_INDEX` must be the type's registered index.
pub unsafe trait ObjectRepr: Sized + Send + Sync + 'static {
    /// Registered type index of this representation
    const TYPE_INDEX: i32;
}

// ============================================================================
// Ref<T>: typed owning handle
// ============================================================================

/// Owning, typed handle to a refcounted heap object.
///
/// Cloning increments the count, dropping decrements it and destroys the
/// object on the zero transition. Erasable to [`Any`] without a copy.
pub struct Ref<T: ObjectRepr> {
    ptr: NonNull<T>,
}

unsafe impl<T: ObjectRepr> Send for Ref<T> {}
unsafe impl<T: ObjectRepr> Sync for Ref<T> {}

impl<T: ObjectRepr> Ref<T> {
    /// Move `value` to the heap with refcount 1. The caller passes the
    /// object body with its header already in place.
    pub(crate) fn alloc(value: T) -> Self {
        let ptr = Box::into_raw(Box::new(value));
        Ref {
            ptr: unsafe { NonNull::new_unchecked(ptr) },
        }
    }

    /// Take ownership of one reference to `ptr`.
    ///
    /// # Safety
    /// `ptr` must point to a live `T` and the caller must transfer exactly
    /// one reference.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Ref {
            ptr: NonNull::new_unchecked(ptr),
        }
    }

    /// Header pointer of the referenced object
    #[inline]
    pub fn header_ptr(&self) -> *mut ObjHeader {
        self.ptr.as_ptr() as *mut ObjHeader
    }

    /// Current reference count
    pub fn ref_count(&self) -> i32 {
        unsafe { (*self.header_ptr()).ref_count() }
    }

    /// Erase to an owning [`Any`], transferring this handle's reference.
    pub fn into_any(self) -> Any {
        let ptr = self.header_ptr();
        std::mem::forget(self);
        unsafe { Any::from_obj_ptr_owned(ptr) }
    }

    /// Erase to an owning [`Any`], leaving this handle in place.
    pub fn to_any(&self) -> Any {
        self.clone().into_any()
    }

    /// Checked downcast from an owning cell; increments on success.
    ///
    /// Succeeds when the cell's type is `T` or any descendant of `T`.
    pub fn from_any(any: &Any) -> RtResult<Self> {
        let Some(ptr) = any.obj_ptr() else {
            return Err(RuntimeError::TypeError(format!(
                "cannot convert `{}` to an object reference",
                any.type_key().unwrap_or_else(|| any.type_index().to_string())
            )));
        };
        if !TypeTable::global().is_instance(any.type_index(), T::TYPE_INDEX) {
            return Err(RuntimeError::TypeError(format!(
                "cannot convert `{}` to `{}`",
                any.type_key().unwrap_or_else(|| any.type_index().to_string()),
                TypeTable::global()
                    .info_by_index(T::TYPE_INDEX)
                    .map(|r| r.type_key().to_string())
                    .unwrap_or_else(|| T::TYPE_INDEX.to_string()),
            )));
        }
        unsafe {
            inc_ref(ptr);
            Ok(Ref::from_raw(ptr as *mut T))
        }
    }

    /// Mutable access to the object body.
    ///
    /// # Safety
    /// The caller must guarantee no other thread or handle accesses the
    /// object for the duration of the borrow.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut(&self) -> &mut T {
        &mut *self.ptr.as_ptr()
    }
}

impl<T: ObjectRepr> Clone for Ref<T> {
    fn clone(&self) -> Self {
        unsafe { inc_ref(self.header_ptr()) };
        Ref { ptr: self.ptr }
    }
}

impl<T: ObjectRepr> Drop for Ref<T> {
    fn drop(&mut self) {
        unsafe { dec_ref(self.header_ptr()) };
    }
}

impl<T: ObjectRepr> Deref for Ref<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

// ============================================================================
// External objects
// ============================================================================

/// Allocate an external object: a zeroed region of `num_bytes` whose first
/// bytes are an initialized header with refcount 1.
///
/// The region comes from the foreign allocator (`malloc`), so a foreign
/// runtime may hold the storage and install its own deleter via
/// [`ObjHeader::set_deleter`]. Liveness stays governed by this runtime's
/// refcount either way: only the zero transition of [`dec_ref`] releases
/// the object, which keeps the two owners from double-freeing.
pub fn ext_obj_create(num_bytes: usize, type_index: i32) -> RtResult<Any> {
    if num_bytes < std::mem::size_of::<ObjHeader>() {
        return Err(RuntimeError::ValueError(format!(
            "external object of {} bytes cannot hold the {}-byte header",
            num_bytes,
            std::mem::size_of::<ObjHeader>()
        )));
    }
    if TypeTable::global().info_by_index(type_index).is_none() {
        return Err(RuntimeError::KeyError(format!(
            "cannot create external object of unregistered type index {}",
            type_index
        )));
    }
    let raw = unsafe { libc::calloc(1, num_bytes) };
    if raw.is_null() {
        return Err(RuntimeError::InternalError(format!(
            "external allocation of {} bytes failed",
            num_bytes
        )));
    }
    let header = raw as *mut ObjHeader;
    unsafe {
        std::ptr::write(header, ObjHeader::with_deleter(type_index, Some(ext_obj_delete)));
        Ok(Any::from_obj_ptr_owned(header))
    }
}

/// Release the storage of an external object created by [`ext_obj_create`].
///
/// # Safety
/// `ptr` must be a region returned by [`ext_obj_create`] whose refcount
/// has reached zero, and must not be used afterwards.
pub unsafe extern "C" fn ext_obj_delete(ptr: *mut c_void) {
    libc::free(ptr);
}
