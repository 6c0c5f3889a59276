//! C FFI bindings for the argot runtime
//!
//! This crate exposes the runtime through a stable C calling convention so
//! that independently compiled modules, possibly written in different
//! host languages, can share values, call functions, and introspect
//! types. The API follows these principles:
//! - ABI-stable (cells are 16-byte `#[repr(C)]` structs, everything else
//!   crosses as opaque pointers or C scalars)
//! - Error handling via status codes: 0 on success, -1 on failure, with
//!   details retrievable from the thread-local last-error slot
//! - Failures cross the boundary as error objects, never as unwinding
//! - Manual reference counting through `argot_any_inc_ref` /
//!   `argot_any_dec_ref`
//!
//! Layout contracts (bit-exact across modules): cells are 16 bytes with
//! the type tag in the first 4 bytes, and every heap object starts with
//! the 8-byte tag + refcount prefix.

use argot_core::error::traceback_frame;
use argot_core::func;
use argot_core::object;
use argot_core::reflect::{
    define_reflection, FieldDesc, FieldStructureKind, MethodDesc, StructureKind,
};
use argot_core::types::registry::{TypeRecord, TypeTable};
use argot_core::value::view_to_owned_inplace;
use argot_core::vtable::VTable;
use argot_core::{Any, AnyView, ErrorObj, FuncObj, RuntimeError};
use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Arc;

// ============================================================================
// ABI Types
// ============================================================================

/// Opaque handle to a registered type record.
///
/// Records are append-only and live for the process lifetime, so handles
/// never dangle and need no release call.
#[repr(C)]
pub struct ArgotTypeInfo {
    _private: [u8; 0],
}

/// Field definition consumed by `argot_type_def_reflection`.
#[repr(C)]
pub struct ArgotFieldDef {
    /// Field name (NUL-terminated)
    pub name: *const c_char,
    /// Logical position in the field list
    pub index: i32,
    /// Byte offset past the object header
    pub offset: i64,
    /// Slot width in bytes
    pub num_bytes: i32,
    /// Non-zero marks the field frozen (readable, not generically settable)
    pub frozen: i32,
    /// Cell holding the slot's type-descriptor object
    pub ty: *const Any,
}

/// Method definition consumed by `argot_type_def_reflection`.
#[repr(C)]
pub struct ArgotMethodDef {
    /// Method name (NUL-terminated)
    pub name: *const c_char,
    /// Cell holding the bound function object
    pub func: *const Any,
    /// 0: member method; 1: static method
    pub kind: i32,
}

/// Length-prefixed byte region returned by `argot_traceback`.
///
/// The bytes stay valid until the calling thread's next `argot_traceback`
/// call.
#[repr(C)]
pub struct ArgotByteArray {
    /// Number of bytes
    pub num_bytes: i64,
    /// Byte pointer (not NUL-terminated)
    pub bytes: *const c_char,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert a Rust string to a C string (caller must free via
/// `argot_string_free`)
unsafe fn rust_to_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn record_error(err: RuntimeError) -> c_int {
    func::set_last_error(ErrorObj::from_runtime_error(&err).into_any());
    -1
}

fn null_argument(what: &str) -> c_int {
    record_error(RuntimeError::ValueError(format!(
        "invalid argument: {} is null",
        what
    )))
}

unsafe fn c_str<'a>(ptr: *const c_char) -> Result<&'a str, RuntimeError> {
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| RuntimeError::ValueError("invalid UTF-8 in string argument".to_string()))
}

unsafe fn record_handle(record: Arc<TypeRecord>) -> *const ArgotTypeInfo {
    // the registry keeps its own Arc alive forever; the raw pointer is a
    // stable borrow, not a transferred reference
    let raw = Arc::as_ptr(&record) as *const ArgotTypeInfo;
    drop(record);
    raw
}

unsafe fn record_from_handle<'a>(info: *const ArgotTypeInfo) -> &'a TypeRecord {
    &*(info as *const TypeRecord)
}

// ============================================================================
// Last Error
// ============================================================================

/// Take the calling thread's last error, clearing the slot.
///
/// # Arguments
/// * `ret` - Receives the error cell, or the `None` cell when the slot is
///   empty
///
/// # Returns
/// * 0 on success, -1 when `ret` is null
///
/// # Safety
/// `ret` must point to writable, uninitialized-or-`None` cell storage.
#[no_mangle]
pub unsafe extern "C" fn argot_get_last_error(ret: *mut Any) -> c_int {
    if ret.is_null() {
        return -1;
    }
    ptr::write(ret, func::take_last_error().unwrap_or_default());
    0
}

// ============================================================================
// Reference Counting
// ============================================================================

/// Increment the reference count of the object held by `cell`.
///
/// POD-tagged cells are left untouched.
///
/// # Safety
/// `cell` must point to a valid cell; an object payload must be live.
#[no_mangle]
pub unsafe extern "C" fn argot_any_inc_ref(cell: *mut Any) -> c_int {
    if cell.is_null() {
        return null_argument("cell");
    }
    if let Some(obj) = (*cell).obj_ptr() {
        object::inc_ref(obj);
    }
    0
}

/// Decrement the reference count of the object held by `cell`,
/// destroying the object when the count reaches zero.
///
/// # Safety
/// `cell` must point to a valid cell whose reference the caller owns; the
/// cell must not be released again afterwards.
#[no_mangle]
pub unsafe extern "C" fn argot_any_dec_ref(cell: *mut Any) -> c_int {
    if cell.is_null() {
        return null_argument("cell");
    }
    if let Some(obj) = (*cell).obj_ptr() {
        object::dec_ref(obj);
    }
    0
}

/// Promote the view behind `cell` into an owned value, in place.
///
/// A borrowed raw string is replaced by a freshly allocated owned string
/// with identical bytes; object tags gain one reference; POD tags are
/// untouched.
///
/// # Safety
/// `cell` must point to a valid, initialized cell.
#[no_mangle]
pub unsafe extern "C" fn argot_any_view_to_owned(cell: *mut AnyView) -> c_int {
    if cell.is_null() {
        return null_argument("cell");
    }
    view_to_owned_inplace(cell);
    0
}

// ============================================================================
// Function Objects
// ============================================================================

/// Create a function object from a foreign callable.
///
/// # Arguments
/// * `self_ptr` - Closure state passed back on every invocation
/// * `deleter` - Runs on `self_ptr` when the function object is destroyed
/// * `safe_call` - Status-returning entry point (must not unwind)
/// * `ret` - Receives the owning function cell
///
/// # Safety
/// `safe_call` must follow the safe-call convention and `self_ptr` must
/// stay valid until `deleter` runs.
#[no_mangle]
pub unsafe extern "C" fn argot_func_create(
    self_ptr: *mut c_void,
    deleter: Option<object::DeleterFn>,
    safe_call: Option<func::SafeCallFn>,
    ret: *mut Any,
) -> c_int {
    if ret.is_null() {
        return -1;
    }
    let Some(safe_call) = safe_call else {
        return null_argument("safe_call");
    };
    let func_obj = FuncObj::from_raw_parts(self_ptr, deleter, safe_call);
    ptr::write(ret, func_obj.into_any());
    0
}

/// Publish a function under a global name.
///
/// # Arguments
/// * `name` - NUL-terminated function name
/// * `func` - Cell holding a function object (the table takes its own
///   reference)
/// * `allow_override` - Non-zero allows replacing an existing entry
///
/// # Safety
/// `name` and `func` must be valid pointers.
#[no_mangle]
pub unsafe extern "C" fn argot_func_set_global(
    name: *const c_char,
    func: *const Any,
    allow_override: c_int,
) -> c_int {
    if name.is_null() || func.is_null() {
        return null_argument("name/func");
    }
    let name = match c_str(name) {
        Ok(s) => s,
        Err(e) => return record_error(e),
    };
    match func::set_global(name, (*func).clone(), allow_override != 0) {
        Ok(()) => 0,
        Err(e) => record_error(e),
    }
}

/// Look up a global function by name.
///
/// A missing name is not an error: `ret` receives the `None` cell and the
/// call returns 0.
///
/// # Safety
/// `name` must be NUL-terminated; `ret` must be writable cell storage.
#[no_mangle]
pub unsafe extern "C" fn argot_func_get_global(name: *const c_char, ret: *mut Any) -> c_int {
    if name.is_null() || ret.is_null() {
        return null_argument("name/ret");
    }
    let name = match c_str(name) {
        Ok(s) => s,
        Err(e) => return record_error(e),
    };
    ptr::write(ret, func::get_global(name).unwrap_or_default());
    0
}

/// Invoke a function through the safe, status-returning convention.
///
/// # Arguments
/// * `func` - Cell holding the function object
/// * `num_args` / `args` - Argument cells (borrowed, not consumed)
/// * `ret` - Receives the result cell on success
///
/// # Returns
/// * 0 on success; non-zero on failure with the error object retrievable
///   via `argot_get_last_error`
///
/// # Safety
/// `args` must point to `num_args` valid cells; `ret` must be writable.
#[no_mangle]
pub unsafe extern "C" fn argot_func_safe_call(
    func: *const Any,
    num_args: i32,
    args: *const AnyView,
    ret: *mut Any,
) -> c_int {
    if func.is_null() || ret.is_null() {
        return null_argument("func/ret");
    }
    let Some(func_obj) = (*func).as_func() else {
        return record_error(RuntimeError::TypeError(format!(
            "safe call target has tag {}, expected a function",
            (*func).type_index()
        )));
    };
    let arg_slice = if num_args <= 0 || args.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(args, num_args as usize)
    };
    match func_obj.safe_call(arg_slice) {
        Ok(value) => {
            ptr::write(ret, value);
            0
        }
        // the callee already recorded the error object
        Err(_) => -1,
    }
}

// ============================================================================
// Type Registry
// ============================================================================

/// Look up the type record for `index`.
///
/// # Returns
/// * 0 with `out` set on success; -1 for an unknown index
///
/// # Safety
/// `out` must be a writable pointer slot.
#[no_mangle]
pub unsafe extern "C" fn argot_type_index_to_info(
    index: i32,
    out: *mut *const ArgotTypeInfo,
) -> c_int {
    if out.is_null() {
        return null_argument("out");
    }
    match TypeTable::global().info_by_index(index) {
        Some(record) => {
            *out = record_handle(record);
            0
        }
        None => record_error(RuntimeError::KeyError(format!(
            "unknown type index {}",
            index
        ))),
    }
}

/// Look up the type record for a type key.
///
/// # Safety
/// `key` must be NUL-terminated; `out` must be a writable pointer slot.
#[no_mangle]
pub unsafe extern "C" fn argot_type_key_to_info(
    key: *const c_char,
    out: *mut *const ArgotTypeInfo,
) -> c_int {
    if key.is_null() || out.is_null() {
        return null_argument("key/out");
    }
    let key = match c_str(key) {
        Ok(s) => s,
        Err(e) => return record_error(e),
    };
    match TypeTable::global().info_by_key(key) {
        Some(record) => {
            *out = record_handle(record);
            0
        }
        None => record_error(RuntimeError::KeyError(format!("unknown type key `{}`", key))),
    }
}

/// Register a type (idempotent per key).
///
/// # Arguments
/// * `parent_index` - Index of the registered parent type
/// * `type_key` - Unique NUL-terminated key
/// * `proposed_index` - Reserved static slot, or any negative value to
///   allocate the next dynamic index
/// * `out` - Receives the record handle (existing record when the key was
///   already registered)
///
/// # Safety
/// `type_key` must be NUL-terminated; `out` must be a writable pointer
/// slot (or null when the handle is not needed).
#[no_mangle]
pub unsafe extern "C" fn argot_type_register(
    parent_index: i32,
    type_key: *const c_char,
    proposed_index: i32,
    out: *mut *const ArgotTypeInfo,
) -> c_int {
    if type_key.is_null() {
        return null_argument("type_key");
    }
    let key = match c_str(type_key) {
        Ok(s) => s,
        Err(e) => return record_error(e),
    };
    let proposed = (proposed_index >= 0).then_some(proposed_index);
    match TypeTable::global().register(parent_index, key, proposed) {
        Ok(record) => {
            if !out.is_null() {
                *out = record_handle(record);
            }
            0
        }
        Err(e) => record_error(e),
    }
}

/// Attach reflection metadata to a registered type. Callable once per
/// type; a second call fails with a state error.
///
/// # Arguments
/// * `index` - Target type index
/// * `num_fields` / `fields` - Field definitions
/// * `num_methods` / `methods` - Method definitions
/// * `structure_kind` - 0 none, 1 no-bind, 2 bind, 3 var
/// * `num_subs` / `sub_indices` / `sub_kinds` - Per-field structural
///   classification (fields not listed stay opaque); kinds: 0 no-bind,
///   1 bind
///
/// # Safety
/// The arrays must hold the advertised number of valid entries.
#[no_mangle]
pub unsafe extern "C" fn argot_type_def_reflection(
    index: i32,
    num_fields: i64,
    fields: *const ArgotFieldDef,
    num_methods: i64,
    methods: *const ArgotMethodDef,
    structure_kind: i32,
    num_subs: i64,
    sub_indices: *const i32,
    sub_kinds: *const i32,
) -> c_int {
    let Some(structure) = StructureKind::from_i32(structure_kind) else {
        return record_error(RuntimeError::ValueError(format!(
            "invalid structure kind {}",
            structure_kind
        )));
    };

    let field_defs = if num_fields <= 0 || fields.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(fields, num_fields as usize)
    };
    let mut field_descs = Vec::with_capacity(field_defs.len());
    for def in field_defs {
        let name = match c_str(def.name) {
            Ok(s) => s.to_string(),
            Err(e) => return record_error(e),
        };
        if def.ty.is_null() {
            return record_error(RuntimeError::ValueError(format!(
                "field `{}` has no type descriptor",
                name
            )));
        }
        field_descs.push(FieldDesc {
            name,
            index: def.index,
            offset: def.offset as usize,
            num_bytes: def.num_bytes as usize,
            frozen: def.frozen != 0,
            ty: (*def.ty).clone(),
            structure: None,
        });
    }

    if num_subs > 0 && !sub_indices.is_null() && !sub_kinds.is_null() {
        let indices = std::slice::from_raw_parts(sub_indices, num_subs as usize);
        let kinds = std::slice::from_raw_parts(sub_kinds, num_subs as usize);
        for (&field_idx, &kind) in indices.iter().zip(kinds) {
            let Some(kind) = FieldStructureKind::from_i32(kind) else {
                return record_error(RuntimeError::ValueError(format!(
                    "invalid field structure kind {}",
                    kind
                )));
            };
            let Some(desc) = field_descs.iter_mut().find(|f| f.index == field_idx) else {
                return record_error(RuntimeError::ValueError(format!(
                    "structural classification names unknown field index {}",
                    field_idx
                )));
            };
            desc.structure = Some(kind);
        }
    }

    let method_defs = if num_methods <= 0 || methods.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(methods, num_methods as usize)
    };
    let mut method_descs = Vec::with_capacity(method_defs.len());
    for def in method_defs {
        let name = match c_str(def.name) {
            Ok(s) => s.to_string(),
            Err(e) => return record_error(e),
        };
        if def.func.is_null() {
            return record_error(RuntimeError::ValueError(format!(
                "method `{}` has no function",
                name
            )));
        }
        method_descs.push(MethodDesc {
            name,
            func: (*def.func).clone(),
            is_static: def.kind != 0,
        });
    }

    match define_reflection(index, field_descs, method_descs, structure) {
        Ok(()) => 0,
        Err(e) => record_error(e),
    }
}

// ============================================================================
// VTable
// ============================================================================

/// Attach `value` to a type under a string key in the dynamic method
/// table (the table takes its own reference).
///
/// # Safety
/// `key` must be NUL-terminated; `value` must point to a valid cell.
#[no_mangle]
pub unsafe extern "C" fn argot_vtable_set(
    index: i32,
    key: *const c_char,
    value: *const Any,
) -> c_int {
    if key.is_null() || value.is_null() {
        return null_argument("key/value");
    }
    let key = match c_str(key) {
        Ok(s) => s,
        Err(e) => return record_error(e),
    };
    match VTable::global().set(index, key, (*value).clone()) {
        Ok(()) => 0,
        Err(e) => record_error(e),
    }
}

/// Look up a vtable entry for a type, falling back through its ancestor
/// chain (nearest ancestor wins).
///
/// A miss is not an error: `ret` receives the `None` cell and the call
/// returns 0.
///
/// # Safety
/// `key` must be NUL-terminated; `ret` must be writable cell storage.
#[no_mangle]
pub unsafe extern "C" fn argot_vtable_get(index: i32, key: *const c_char, ret: *mut Any) -> c_int {
    if key.is_null() || ret.is_null() {
        return null_argument("key/ret");
    }
    let key = match c_str(key) {
        Ok(s) => s,
        Err(e) => return record_error(e),
    };
    ptr::write(ret, VTable::global().get(index, key).unwrap_or_default());
    0
}

// ============================================================================
// Errors and Traceback
// ============================================================================

/// Create an error object carrying a `kind` string and message bytes.
///
/// # Safety
/// `kind` must be NUL-terminated; `bytes` must hold `num_bytes` valid
/// bytes; `ret` must be writable cell storage.
#[no_mangle]
pub unsafe extern "C" fn argot_error_create(
    kind: *const c_char,
    num_bytes: i64,
    bytes: *const c_char,
    ret: *mut Any,
) -> c_int {
    if kind.is_null() || ret.is_null() {
        return null_argument("kind/ret");
    }
    let kind = match c_str(kind) {
        Ok(s) => s,
        Err(e) => return record_error(e),
    };
    let message = if num_bytes <= 0 || bytes.is_null() {
        String::new()
    } else {
        let slice = std::slice::from_raw_parts(bytes as *const u8, num_bytes as usize);
        String::from_utf8_lossy(slice).into_owned()
    };
    ptr::write(ret, ErrorObj::new(kind, message).into_any());
    0
}

thread_local! {
    // backing storage for the string pointers handed out by
    // argot_error_get_info; valid until the thread's next call
    static ERROR_INFO: RefCell<(Vec<CString>, Vec<*const c_char>)> =
        const { RefCell::new((Vec::new(), Vec::new())) };
}

/// Retrieve the structured info of an error object:
/// `[kind, message, frame, ...]` with frames most-recent-last.
///
/// The returned pointers stay valid until the calling thread's next
/// `argot_error_get_info` call.
///
/// # Safety
/// `error` must hold an error object; `num_strs` and `strs` must be
/// writable.
#[no_mangle]
pub unsafe extern "C" fn argot_error_get_info(
    error: *const Any,
    num_strs: *mut i32,
    strs: *mut *const *const c_char,
) -> c_int {
    if error.is_null() || num_strs.is_null() || strs.is_null() {
        return null_argument("error/num_strs/strs");
    }
    let Some(err) = (*error).as_error() else {
        return record_error(RuntimeError::TypeError(format!(
            "tag {} is not an error object",
            (*error).type_index()
        )));
    };
    let info = err.info();
    ERROR_INFO.with(|slot| {
        let mut slot = slot.borrow_mut();
        slot.0 = info
            .iter()
            .map(|s| CString::new(s.replace('\0', "\u{FFFD}")).expect("no interior NUL"))
            .collect();
        slot.1 = slot.0.iter().map(|c| c.as_ptr()).collect();
        *num_strs = slot.1.len() as i32;
        *strs = slot.1.as_ptr();
    });
    0
}

/// Append one boundary frame to an error object's traceback.
///
/// Each boundary crossing that observes a failure records its own frame,
/// building one traceback across runtimes that share no native stack.
///
/// # Safety
/// `error` must hold an error object; the strings must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn argot_error_append_frame(
    error: *const Any,
    filename: *const c_char,
    lineno: i64,
    func_name: *const c_char,
) -> c_int {
    if error.is_null() || filename.is_null() || func_name.is_null() {
        return null_argument("error/filename/func_name");
    }
    let Some(err) = (*error).as_error() else {
        return record_error(RuntimeError::TypeError(format!(
            "tag {} is not an error object",
            (*error).type_index()
        )));
    };
    let (filename, func_name) = match (c_str(filename), c_str(func_name)) {
        (Ok(f), Ok(n)) => (f, n),
        (Err(e), _) | (_, Err(e)) => return record_error(e),
    };
    err.push_frame(traceback_frame(filename, lineno, func_name));
    0
}

thread_local! {
    static TRACEBACK: RefCell<CString> = RefCell::new(CString::default());
}

/// Format one stack frame for traceback accumulation.
///
/// The returned bytes stay valid until the calling thread's next
/// `argot_traceback` call.
///
/// # Safety
/// `filename` and `func_name` must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn argot_traceback(
    filename: *const c_char,
    lineno: i64,
    func_name: *const c_char,
) -> ArgotByteArray {
    let empty = ArgotByteArray {
        num_bytes: 0,
        bytes: ptr::null(),
    };
    if filename.is_null() || func_name.is_null() {
        return empty;
    }
    let (Ok(filename), Ok(func_name)) = (c_str(filename), c_str(func_name)) else {
        return empty;
    };
    let frame = traceback_frame(filename, lineno, func_name);
    TRACEBACK.with(|slot| {
        let mut slot = slot.borrow_mut();
        *slot = CString::new(frame).unwrap_or_default();
        ArgotByteArray {
            num_bytes: slot.as_bytes().len() as i64,
            bytes: slot.as_ptr(),
        }
    })
}

// ============================================================================
// External Objects
// ============================================================================

/// Allocate an external object: `num_bytes` of zeroed, header-initialized
/// storage for a registered type, refcount 1.
///
/// # Safety
/// `ret` must be writable cell storage.
#[no_mangle]
pub unsafe extern "C" fn argot_ext_obj_create(num_bytes: i32, index: i32, ret: *mut Any) -> c_int {
    if ret.is_null() {
        return -1;
    }
    match object::ext_obj_create(num_bytes.max(0) as usize, index) {
        Ok(obj) => {
            ptr::write(ret, obj);
            0
        }
        Err(e) => record_error(e),
    }
}

/// Release the storage of an external object whose refcount has reached
/// zero.
///
/// # Safety
/// `obj_ptr` must be a region returned by `argot_ext_obj_create` and must
/// not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn argot_ext_obj_delete(obj_ptr: *mut c_void) {
    if !obj_ptr.is_null() {
        object::ext_obj_delete(obj_ptr);
    }
}

// ============================================================================
// Type Info Accessors
// ============================================================================

/// Type index of a record handle.
///
/// # Safety
/// `info` must be a handle returned by a registry call.
#[no_mangle]
pub unsafe extern "C" fn argot_type_info_index(info: *const ArgotTypeInfo) -> i32 {
    if info.is_null() {
        return -1;
    }
    record_from_handle(info).type_index()
}

/// Type key of a record handle (caller frees via `argot_string_free`).
///
/// # Safety
/// `info` must be a handle returned by a registry call.
#[no_mangle]
pub unsafe extern "C" fn argot_type_info_key(info: *const ArgotTypeInfo) -> *mut c_char {
    if info.is_null() {
        return ptr::null_mut();
    }
    rust_to_c_string(record_from_handle(info).type_key())
}

/// Depth of a record handle in the ancestry tree.
///
/// # Safety
/// `info` must be a handle returned by a registry call.
#[no_mangle]
pub unsafe extern "C" fn argot_type_info_depth(info: *const ArgotTypeInfo) -> i32 {
    if info.is_null() {
        return -1;
    }
    record_from_handle(info).depth() as i32
}

/// Ancestor chain of a record handle, root first.
///
/// The pointer stays valid for the process lifetime (records are
/// append-only).
///
/// # Safety
/// `info` must be a handle returned by a registry call; `out_len` must be
/// writable.
#[no_mangle]
pub unsafe extern "C" fn argot_type_info_ancestors(
    info: *const ArgotTypeInfo,
    out_len: *mut i32,
) -> *const i32 {
    if info.is_null() || out_len.is_null() {
        return ptr::null();
    }
    let ancestors = record_from_handle(info).ancestors();
    *out_len = ancestors.len() as i32;
    ancestors.as_ptr()
}

/// Free a string returned by this API.
///
/// # Safety
/// `s` must originate from an argot FFI call and must not be used
/// afterwards.
#[no_mangle]
pub unsafe extern "C" fn argot_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use argot_core::value::type_index;

    unsafe fn register(parent: i32, key: &str) -> (i32, *const ArgotTypeInfo) {
        let key = CString::new(key).unwrap();
        let mut info: *const ArgotTypeInfo = ptr::null();
        let status = argot_type_register(parent, key.as_ptr(), -1, &mut info);
        assert_eq!(status, 0);
        (argot_type_info_index(info), info)
    }

    #[test]
    fn test_refcount_roundtrip() {
        unsafe {
            let mut cell = Any::str("ffi");
            let obj = cell.obj_ptr().unwrap();
            assert_eq!((*obj).ref_count(), 1);

            assert_eq!(argot_any_inc_ref(&mut cell), 0);
            assert_eq!((*obj).ref_count(), 2);
            assert_eq!(argot_any_dec_ref(&mut cell), 0);
            assert_eq!((*obj).ref_count(), 1);
        }
    }

    #[test]
    fn test_view_to_owned_promotes_raw_string() {
        unsafe {
            let c = CString::new("promoted").unwrap();
            let mut cell = AnyView::raw_str(&c);
            assert_eq!(argot_any_view_to_owned(&mut cell), 0);
            assert_eq!(cell.type_index, type_index::STR);

            // take over the owned reference and let Drop release it
            let owned = Any::from_raw_parts(cell.type_index, cell.small_len, cell.v);
            assert_eq!(owned.as_str_obj().unwrap().as_bytes(), b"promoted");
        }
    }

    #[test]
    fn test_type_register_and_info() {
        unsafe {
            let (animal_idx, animal_info) = register(type_index::OBJECT, "ffi.Animal");
            let (dog_idx, dog_info) = register(animal_idx, "ffi.Dog");

            assert!(animal_idx >= type_index::DYN_OBJECT_BEGIN);
            assert_eq!(argot_type_info_depth(animal_info), 1);
            assert_eq!(argot_type_info_depth(dog_info), 2);

            let mut len = 0;
            let ancestors = argot_type_info_ancestors(dog_info, &mut len);
            assert_eq!(len, 2);
            assert_eq!(*ancestors, type_index::OBJECT);
            assert_eq!(*ancestors.add(1), animal_idx);

            // re-registration converges on the same index
            let key = CString::new("ffi.Animal").unwrap();
            let mut again: *const ArgotTypeInfo = ptr::null();
            assert_eq!(argot_type_register(type_index::OBJECT, key.as_ptr(), -1, &mut again), 0);
            assert_eq!(argot_type_info_index(again), animal_idx);

            // key lookup round-trips
            let mut by_key: *const ArgotTypeInfo = ptr::null();
            assert_eq!(argot_type_key_to_info(key.as_ptr(), &mut by_key), 0);
            assert_eq!(argot_type_info_index(by_key), animal_idx);

            let name = argot_type_info_key(dog_info);
            assert_eq!(CStr::from_ptr(name).to_str().unwrap(), "ffi.Dog");
            argot_string_free(name);

            let _ = dog_idx;
        }
    }

    #[test]
    fn test_unknown_type_lookup_sets_last_error() {
        unsafe {
            let mut info: *const ArgotTypeInfo = ptr::null();
            assert_eq!(argot_type_index_to_info(31_337_000, &mut info), -1);

            let mut err = Any::none();
            assert_eq!(argot_get_last_error(&mut err), 0);
            assert_eq!(err.as_error().unwrap().kind(), "KeyError");
        }
    }

    #[test]
    fn test_error_create_get_info_roundtrip() {
        unsafe {
            let kind = CString::new("ValueError").unwrap();
            let message = b"bad input";
            let mut err = Any::none();
            assert_eq!(
                argot_error_create(
                    kind.as_ptr(),
                    message.len() as i64,
                    message.as_ptr() as *const c_char,
                    &mut err,
                ),
                0
            );

            let file = CString::new("binding.c").unwrap();
            let func_name = CString::new("call_site").unwrap();
            assert_eq!(
                argot_error_append_frame(&err, file.as_ptr(), 12, func_name.as_ptr()),
                0
            );

            let mut count = 0i32;
            let mut strs: *const *const c_char = ptr::null();
            assert_eq!(argot_error_get_info(&err, &mut count, &mut strs), 0);
            assert_eq!(count, 3);
            assert_eq!(CStr::from_ptr(*strs).to_str().unwrap(), "ValueError");
            assert!(CStr::from_ptr(*strs.add(1)).to_str().unwrap().contains("bad input"));
            assert!(CStr::from_ptr(*strs.add(2)).to_str().unwrap().contains("binding.c"));
        }
    }

    #[test]
    fn test_traceback_format() {
        unsafe {
            let file = CString::new("loader.py").unwrap();
            let func_name = CString::new("load_module").unwrap();
            let frame = argot_traceback(file.as_ptr(), 88, func_name.as_ptr());
            assert!(frame.num_bytes > 0);
            let bytes =
                std::slice::from_raw_parts(frame.bytes as *const u8, frame.num_bytes as usize);
            assert_eq!(
                std::str::from_utf8(bytes).unwrap(),
                "  File \"loader.py\", line 88, in load_module"
            );
        }
    }

    #[test]
    fn test_safe_call_across_boundary() {
        unsafe {
            let double = FuncObj::new(|args| {
                let x = args[0].as_int().ok_or_else(|| {
                    RuntimeError::TypeError("expected int".to_string())
                })?;
                Ok(Any::int(x * 2))
            })
            .into_any();

            let args = [AnyView::int(21)];
            let mut ret = Any::none();
            assert_eq!(argot_func_safe_call(&double, 1, args.as_ptr(), &mut ret), 0);
            assert_eq!(ret.as_int(), Some(42));

            // failure path: status is non-zero and the error is retrievable
            let bad_args = [AnyView::float(1.0)];
            let mut ret = Any::none();
            assert_eq!(argot_func_safe_call(&double, 1, bad_args.as_ptr(), &mut ret), -1);

            let mut err = Any::none();
            assert_eq!(argot_get_last_error(&mut err), 0);
            assert_eq!(err.as_error().unwrap().kind(), "TypeError");
        }
    }

    #[test]
    fn test_global_function_table() {
        unsafe {
            let id = FuncObj::new(|args| Ok(args.first().map(|v| v.to_any()).unwrap_or_default()))
                .into_any();
            let name = CString::new("ffi.identity").unwrap();
            assert_eq!(argot_func_set_global(name.as_ptr(), &id, 0), 0);

            let mut found = Any::none();
            assert_eq!(argot_func_get_global(name.as_ptr(), &mut found), 0);
            assert!(found.as_func().is_some());

            // a miss is a sentinel, not an error
            let missing = CString::new("ffi.missing").unwrap();
            let mut not_found = Any::none();
            assert_eq!(argot_func_get_global(missing.as_ptr(), &mut not_found), 0);
            assert!(not_found.is_none());
        }
    }

    #[test]
    fn test_vtable_ancestor_fallback() {
        unsafe {
            let (base_idx, _) = register(type_index::OBJECT, "ffi.vt.Base");
            let (leaf_idx, _) = register(base_idx, "ffi.vt.Leaf");

            let key = CString::new("describe").unwrap();
            let marker = Any::int(7);
            assert_eq!(argot_vtable_set(base_idx, key.as_ptr(), &marker), 0);

            let mut found = Any::none();
            assert_eq!(argot_vtable_get(leaf_idx, key.as_ptr(), &mut found), 0);
            assert_eq!(found.as_int(), Some(7));

            let other = CString::new("undefine").unwrap();
            let mut miss = Any::none();
            assert_eq!(argot_vtable_get(leaf_idx, other.as_ptr(), &mut miss), 0);
            assert!(miss.is_none());
        }
    }

    #[test]
    fn test_ext_obj_create_delete() {
        unsafe {
            let mut obj = Any::none();
            assert_eq!(argot_ext_obj_create(64, type_index::OBJECT, &mut obj), 0);
            let header = obj.obj_ptr().unwrap();
            assert_eq!((*header).type_index(), type_index::OBJECT);
            // dropping the owning cell releases the region through the
            // header deleter
            drop(obj);
        }
    }
}
