//! Tagged 16-byte value cells (`AnyView` / `Any`)
//!
//! Every value in the runtime, primitive or heap object, travels in a
//! fixed 16-byte cell: a 4-byte type tag, a 4-byte auxiliary field, and an
//! 8-byte payload union. Cells with a tag below
//! [`type_index::STATIC_OBJECT_BEGIN`] hold plain-old-data payloads and can
//! be moved by raw copy; cells at or above it hold a pointer to a
//! reference-counted heap object.
//!
//! # Layout (ABI, bit-exact across modules)
//!
//! ```text
//! ┌────────────┬────────────┬──────────────────────┐
//! │ type_index │ small_len  │ payload union        │
//! │ 4 bytes    │ 4 bytes    │ 8 bytes              │
//! └────────────┴────────────┴──────────────────────┘
//! ```
//!
//! [`AnyView`] never owns its payload. [`Any`] owns it: cloning increments
//! the payload's reference count and dropping decrements it. An `Any` never
//! carries the [`type_index::RAW_STR`] tag; promoting a borrowed raw
//! string allocates an owned [`StrObj`](crate::containers::StrObj) instead.

use crate::containers::{DictObj, ListObj, StrObj};
use crate::error::ErrorObj;
use crate::func::FuncObj;
use crate::object::{self, DeleterFn, ObjHeader};
use crate::types::registry::TypeTable;
use std::ffi::{c_void, CStr};
use std::fmt;
use std::os::raw::c_char;

/// Static type indices shared by all modules (ABI constants).
///
/// Indices below [`STATIC_OBJECT_BEGIN`](type_index::STATIC_OBJECT_BEGIN)
/// are on-stack POD tags; the rest identify heap object types. Dynamic
/// types are assigned indices starting at
/// [`DYN_OBJECT_BEGIN`](type_index::DYN_OBJECT_BEGIN).
pub mod type_index {
    /// Missing value
    pub const NONE: i32 = 0;
    /// 64-bit signed integer
    pub const INT: i32 = 1;
    /// 64-bit float
    pub const FLOAT: i32 = 2;
    /// Typeless pointer
    pub const PTR: i32 = 3;
    /// Opaque data-type descriptor (consumed as POD)
    pub const DATA_TYPE: i32 = 4;
    /// Opaque device descriptor (consumed as POD)
    pub const DEVICE: i32 = 5;
    /// Borrowed NUL-terminated string. Valid only in `AnyView`, never `Any`.
    pub const RAW_STR: i32 = 6;

    /// First heap-object tag
    pub const STATIC_OBJECT_BEGIN: i32 = 1000;
    /// Root object type
    pub const OBJECT: i32 = 1000;
    /// Contiguous sequence of cells
    pub const LIST: i32 = 1001;
    /// Associative cell-to-cell mapping
    pub const DICT: i32 = 1002;
    /// Structured boundary error
    pub const ERROR: i32 = 1003;
    /// Boxed callable
    pub const FUNC: i32 = 1004;
    /// Owned immutable byte string
    pub const STR: i32 = 1005;

    /// Base of the type-descriptor family
    pub const TYPE: i32 = 1100;
    /// `Any` type descriptor
    pub const TYPE_ANY: i32 = 1101;
    /// `Atomic<tag>` type descriptor
    pub const TYPE_ATOMIC: i32 = 1102;
    /// `Ptr<T>` type descriptor
    pub const TYPE_PTR: i32 = 1103;
    /// `Optional<T>` type descriptor
    pub const TYPE_OPTIONAL: i32 = 1104;
    /// `List<T>` type descriptor
    pub const TYPE_LIST: i32 = 1105;
    /// `Dict<K, V>` type descriptor
    pub const TYPE_DICT: i32 = 1106;

    /// First runtime-assigned dynamic type index
    pub const DYN_OBJECT_BEGIN: i32 = 100_000;
}

/// Opaque numeric data-type descriptor (code, bit width, lanes).
///
/// Carried through the runtime in the payload slot as POD; the runtime
/// attaches no interpretation to the fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataType {
    /// Type code
    pub code: u8,
    /// Bits per lane
    pub bits: u8,
    /// Vector lanes
    pub lanes: u16,
}

/// Opaque device descriptor (kind, ordinal). Carried as POD.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    /// Device kind
    pub device_type: i32,
    /// Device ordinal
    pub device_id: i32,
}

/// 8-byte payload union of a cell.
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawValue {
    /// Integer payload
    pub v_int64: i64,
    /// Float payload
    pub v_float64: f64,
    /// Data-type payload
    pub v_dtype: DataType,
    /// Device payload
    pub v_device: Device,
    /// Typeless pointer payload
    pub v_ptr: *mut c_void,
    /// Borrowed NUL-terminated string payload
    pub v_str: *const c_char,
    /// Heap object payload
    pub v_obj: *mut ObjHeader,
    /// Deleter slot (used by the object header, not by cells)
    pub deleter: Option<DeleterFn>,
    /// Inline small-string bytes
    pub v_bytes: [u8; 8],
}

impl RawValue {
    /// Zeroed payload
    #[inline]
    pub const fn zero() -> Self {
        RawValue { v_int64: 0 }
    }
}

#[inline]
fn is_obj_index(type_index: i32) -> bool {
    type_index >= type_index::STATIC_OBJECT_BEGIN
}

// ============================================================================
// AnyView: non-owning cell
// ============================================================================

/// Non-owning 16-byte value cell.
///
/// `AnyView` is `Copy`: it borrows its payload and never touches reference
/// counts. The payload of an object-tagged view must outlive the view; that
/// is the caller's contract, checked nowhere.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct AnyView {
    /// Type tag; see [`type_index`]
    pub type_index: i32,
    /// Auxiliary length for on-stack values (byte length of a raw string)
    pub small_len: i32,
    /// Payload
    pub v: RawValue,
}

impl AnyView {
    /// The `None` cell
    #[inline]
    pub const fn none() -> Self {
        AnyView {
            type_index: type_index::NONE,
            small_len: 0,
            v: RawValue::zero(),
        }
    }

    /// Integer cell
    #[inline]
    pub const fn int(i: i64) -> Self {
        AnyView {
            type_index: type_index::INT,
            small_len: 0,
            v: RawValue { v_int64: i },
        }
    }

    /// Float cell
    #[inline]
    pub const fn float(f: f64) -> Self {
        AnyView {
            type_index: type_index::FLOAT,
            small_len: 0,
            v: RawValue { v_float64: f },
        }
    }

    /// Typeless pointer cell
    #[inline]
    pub fn ptr(p: *mut c_void) -> Self {
        AnyView {
            type_index: type_index::PTR,
            small_len: 0,
            v: RawValue { v_ptr: p },
        }
    }

    /// Data-type cell
    #[inline]
    pub const fn dtype(dt: DataType) -> Self {
        AnyView {
            type_index: type_index::DATA_TYPE,
            small_len: 0,
            v: RawValue { v_dtype: dt },
        }
    }

    /// Device cell
    #[inline]
    pub const fn device(dev: Device) -> Self {
        AnyView {
            type_index: type_index::DEVICE,
            small_len: 0,
            v: RawValue { v_device: dev },
        }
    }

    /// Borrowed raw-string cell. The bytes are not copied; the view must
    /// not outlive `s`.
    #[inline]
    pub fn raw_str(s: &CStr) -> Self {
        AnyView {
            type_index: type_index::RAW_STR,
            small_len: s.to_bytes().len() as i32,
            v: RawValue { v_str: s.as_ptr() },
        }
    }

    /// Borrowed view of a heap object.
    ///
    /// # Safety
    /// `ptr` must point to a live object whose header tag is accurate.
    #[inline]
    pub unsafe fn from_obj_ptr(ptr: *mut ObjHeader) -> Self {
        AnyView {
            type_index: (*ptr).type_index(),
            small_len: 0,
            v: RawValue { v_obj: ptr },
        }
    }

    /// True for the `None` tag
    #[inline]
    pub fn is_none(&self) -> bool {
        self.type_index == type_index::NONE
    }

    /// True when the payload is a heap object pointer
    #[inline]
    pub fn is_obj(&self) -> bool {
        is_obj_index(self.type_index)
    }

    /// Extract an integer
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        if self.type_index == type_index::INT {
            Some(unsafe { self.v.v_int64 })
        } else {
            None
        }
    }

    /// Extract a float (an integer cell converts losslessly)
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self.type_index {
            type_index::FLOAT => Some(unsafe { self.v.v_float64 }),
            type_index::INT => Some(unsafe { self.v.v_int64 } as f64),
            _ => None,
        }
    }

    /// Extract a typeless pointer
    #[inline]
    pub fn as_ptr(&self) -> Option<*mut c_void> {
        if self.type_index == type_index::PTR {
            Some(unsafe { self.v.v_ptr })
        } else {
            None
        }
    }

    /// Extract a data-type descriptor
    #[inline]
    pub fn as_dtype(&self) -> Option<DataType> {
        if self.type_index == type_index::DATA_TYPE {
            Some(unsafe { self.v.v_dtype })
        } else {
            None
        }
    }

    /// Extract a device descriptor
    #[inline]
    pub fn as_device(&self) -> Option<Device> {
        if self.type_index == type_index::DEVICE {
            Some(unsafe { self.v.v_device })
        } else {
            None
        }
    }

    /// Extract a borrowed raw string.
    ///
    /// # Safety
    /// The pointee must still be live and NUL-terminated.
    #[inline]
    pub unsafe fn as_raw_str(&self) -> Option<&CStr> {
        if self.type_index == type_index::RAW_STR {
            Some(CStr::from_ptr(self.v.v_str))
        } else {
            None
        }
    }

    /// Raw object header pointer, when object-tagged
    #[inline]
    pub fn obj_ptr(&self) -> Option<*mut ObjHeader> {
        if self.is_obj() {
            Some(unsafe { self.v.v_obj })
        } else {
            None
        }
    }

    /// Reinterpret the object payload as `T` without any check.
    ///
    /// # Safety
    /// The tag must match `T`'s representation and the pointee must be
    /// live for the returned lifetime.
    #[inline]
    pub unsafe fn obj_unchecked<T>(&self) -> &T {
        debug_assert!(self.is_obj(), "POD cell read under an object tag");
        &*(self.v.v_obj as *const T)
    }

    /// Promote this view into an owning [`Any`].
    ///
    /// Representation-preserving for every tag except `RAW_STR`, which
    /// allocates an owned [`StrObj`] with the same bytes (the view itself
    /// is left untouched).
    pub fn to_any(&self) -> Any {
        if self.type_index == type_index::RAW_STR {
            let bytes = unsafe { CStr::from_ptr(self.v.v_str) }.to_bytes();
            return StrObj::new(bytes).into_any();
        }
        if self.is_obj() {
            unsafe { object::inc_ref(self.v.v_obj) };
        }
        Any {
            type_index: self.type_index,
            small_len: self.small_len,
            v: self.v,
        }
    }

    /// Key of the registered type behind this cell's tag, if any
    pub fn type_key(&self) -> Option<String> {
        TypeTable::global()
            .info_by_index(self.type_index)
            .map(|rec| rec.type_key().to_string())
    }
}

impl Default for AnyView {
    fn default() -> Self {
        AnyView::none()
    }
}

// ============================================================================
// Any: owning cell
// ============================================================================

/// Owning 16-byte value cell.
///
/// Layout-identical to [`AnyView`]. `Clone` increments the payload's
/// reference count; `Drop` decrements it and destroys the object when the
/// count reaches zero. POD tags are unaffected by either.
#[repr(C)]
pub struct Any {
    type_index: i32,
    small_len: i32,
    v: RawValue,
}

// Payload refcounts are atomic and the stored pointer graph is reachable
// from any thread; payload mutation remains the caller's contract.
unsafe impl Send for Any {}
unsafe impl Sync for Any {}

impl Any {
    /// The `None` cell
    #[inline]
    pub const fn none() -> Self {
        Any {
            type_index: type_index::NONE,
            small_len: 0,
            v: RawValue::zero(),
        }
    }

    /// Integer cell
    #[inline]
    pub const fn int(i: i64) -> Self {
        Any {
            type_index: type_index::INT,
            small_len: 0,
            v: RawValue { v_int64: i },
        }
    }

    /// Float cell
    #[inline]
    pub const fn float(f: f64) -> Self {
        Any {
            type_index: type_index::FLOAT,
            small_len: 0,
            v: RawValue { v_float64: f },
        }
    }

    /// Typeless pointer cell
    #[inline]
    pub fn ptr(p: *mut c_void) -> Self {
        Any {
            type_index: type_index::PTR,
            small_len: 0,
            v: RawValue { v_ptr: p },
        }
    }

    /// Data-type cell
    #[inline]
    pub const fn dtype(dt: DataType) -> Self {
        Any {
            type_index: type_index::DATA_TYPE,
            small_len: 0,
            v: RawValue { v_dtype: dt },
        }
    }

    /// Device cell
    #[inline]
    pub const fn device(dev: Device) -> Self {
        Any {
            type_index: type_index::DEVICE,
            small_len: 0,
            v: RawValue { v_device: dev },
        }
    }

    /// Owned string cell (allocates a [`StrObj`])
    pub fn str(s: &str) -> Self {
        StrObj::new(s.as_bytes()).into_any()
    }

    /// Take ownership of one reference to `ptr`.
    ///
    /// # Safety
    /// `ptr` must point to a live object and the caller must transfer
    /// exactly one reference (no increment is performed).
    #[inline]
    pub unsafe fn from_obj_ptr_owned(ptr: *mut ObjHeader) -> Self {
        Any {
            type_index: (*ptr).type_index(),
            small_len: 0,
            v: RawValue { v_obj: ptr },
        }
    }

    /// Rebuild a cell from raw parts.
    ///
    /// # Safety
    /// The parts must describe a valid cell and, for object tags, carry
    /// exactly one reference. The tag must not be `RAW_STR`.
    #[inline]
    pub unsafe fn from_raw_parts(type_index: i32, small_len: i32, v: RawValue) -> Self {
        debug_assert_ne!(type_index, type_index::RAW_STR, "Any cannot borrow a raw string");
        Any {
            type_index,
            small_len,
            v,
        }
    }

    /// Disassemble into raw parts without releasing the payload reference.
    #[inline]
    pub fn into_raw_parts(self) -> (i32, i32, RawValue) {
        let parts = (self.type_index, self.small_len, self.v);
        std::mem::forget(self);
        parts
    }

    /// Type tag
    #[inline]
    pub fn type_index(&self) -> i32 {
        self.type_index
    }

    /// Auxiliary length field
    #[inline]
    pub fn small_len(&self) -> i32 {
        self.small_len
    }

    /// Non-owning view of this cell
    #[inline]
    pub fn view(&self) -> AnyView {
        AnyView {
            type_index: self.type_index,
            small_len: self.small_len,
            v: self.v,
        }
    }

    /// True for the `None` tag
    #[inline]
    pub fn is_none(&self) -> bool {
        self.type_index == type_index::NONE
    }

    /// True when the payload is a heap object
    #[inline]
    pub fn is_obj(&self) -> bool {
        is_obj_index(self.type_index)
    }

    /// Extract an integer
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        self.view().as_int()
    }

    /// Extract a float
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        self.view().as_float()
    }

    /// Extract a typeless pointer
    #[inline]
    pub fn as_ptr(&self) -> Option<*mut c_void> {
        self.view().as_ptr()
    }

    /// Raw object header pointer, when object-tagged
    #[inline]
    pub fn obj_ptr(&self) -> Option<*mut ObjHeader> {
        self.view().obj_ptr()
    }

    /// Borrow the payload as a [`ListObj`]
    pub fn as_list(&self) -> Option<&ListObj> {
        if self.type_index == type_index::LIST {
            Some(unsafe { &*(self.v.v_obj as *const ListObj) })
        } else {
            None
        }
    }

    /// Borrow the payload as a [`DictObj`]
    pub fn as_dict(&self) -> Option<&DictObj> {
        if self.type_index == type_index::DICT {
            Some(unsafe { &*(self.v.v_obj as *const DictObj) })
        } else {
            None
        }
    }

    /// Borrow the payload as a [`StrObj`]
    pub fn as_str_obj(&self) -> Option<&StrObj> {
        if self.type_index == type_index::STR {
            Some(unsafe { &*(self.v.v_obj as *const StrObj) })
        } else {
            None
        }
    }

    /// Borrow the payload as a [`FuncObj`]
    pub fn as_func(&self) -> Option<&FuncObj> {
        if self.type_index == type_index::FUNC {
            Some(unsafe { &*(self.v.v_obj as *const FuncObj) })
        } else {
            None
        }
    }

    /// Borrow the payload as an [`ErrorObj`]
    pub fn as_error(&self) -> Option<&ErrorObj> {
        if self.type_index == type_index::ERROR {
            Some(unsafe { &*(self.v.v_obj as *const ErrorObj) })
        } else {
            None
        }
    }

    /// Key of the registered type behind this cell's tag, if any
    pub fn type_key(&self) -> Option<String> {
        self.view().type_key()
    }
}

impl Default for Any {
    fn default() -> Self {
        Any::none()
    }
}

impl Clone for Any {
    fn clone(&self) -> Self {
        if self.is_obj() {
            unsafe { object::inc_ref(self.v.v_obj) };
        }
        Any {
            type_index: self.type_index,
            small_len: self.small_len,
            v: self.v,
        }
    }
}

impl Drop for Any {
    fn drop(&mut self) {
        if self.is_obj() {
            unsafe { object::dec_ref(self.v.v_obj) };
        }
    }
}

impl From<AnyView> for Any {
    fn from(view: AnyView) -> Self {
        view.to_any()
    }
}

impl From<i64> for Any {
    fn from(i: i64) -> Self {
        Any::int(i)
    }
}

impl From<f64> for Any {
    fn from(f: f64) -> Self {
        Any::float(f)
    }
}

impl From<&str> for Any {
    fn from(s: &str) -> Self {
        Any::str(s)
    }
}

// ============================================================================
// In-place promotion (ABI entry)
// ============================================================================

/// Promote the cell behind `cell` from a view into an owned value, in place.
///
/// Raw strings are replaced by a freshly allocated [`StrObj`] with the same
/// bytes; object tags gain one reference; POD tags are untouched. Promoting
/// a cell that already went through promotion changes neither its tag nor
/// its payload pointer.
///
/// # Safety
/// `cell` must point to a valid, initialized cell. For object tags the
/// pointee must be live.
pub unsafe fn view_to_owned_inplace(cell: *mut AnyView) {
    let view = &mut *cell;
    match view.type_index {
        type_index::RAW_STR => {
            let bytes = CStr::from_ptr(view.v.v_str).to_bytes();
            let owned = StrObj::new(bytes).into_any();
            let (ti, len, v) = owned.into_raw_parts();
            view.type_index = ti;
            view.small_len = len;
            view.v = v;
        }
        ti if is_obj_index(ti) => {
            object::inc_ref(view.v.v_obj);
        }
        _ => {}
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Render a cell for diagnostics.
///
/// Heap objects first consult the type's vtable for a `__str__` entry
/// (nearest ancestor wins); without one, the registered type key and the
/// payload address are printed.
pub fn any_repr(view: &AnyView) -> String {
    match view.type_index {
        type_index::NONE => "None".to_string(),
        type_index::INT => unsafe { view.v.v_int64 }.to_string(),
        type_index::FLOAT => {
            let f = unsafe { view.v.v_float64 };
            if f == f.trunc() && f.is_finite() {
                format!("{:.1}", f)
            } else {
                f.to_string()
            }
        }
        type_index::PTR => format!("Ptr({:p})", unsafe { view.v.v_ptr }),
        type_index::DATA_TYPE => {
            let dt = unsafe { view.v.v_dtype };
            format!("dtype(code={}, bits={}, lanes={})", dt.code, dt.bits, dt.lanes)
        }
        type_index::DEVICE => {
            let dev = unsafe { view.v.v_device };
            format!("device({}:{})", dev.device_type, dev.device_id)
        }
        type_index::RAW_STR => unsafe { CStr::from_ptr(view.v.v_str) }
            .to_string_lossy()
            .into_owned(),
        type_index::STR => {
            let s: &StrObj = unsafe { view.obj_unchecked() };
            s.to_string_lossy()
        }
        type_index::LIST => {
            let list: &ListObj = unsafe { view.obj_unchecked() };
            let items: Vec<String> = list.iter().map(|i| any_repr(&i.view())).collect();
            format!("[{}]", items.join(", "))
        }
        type_index::DICT => {
            let dict: &DictObj = unsafe { view.obj_unchecked() };
            let items: Vec<String> = dict
                .iter()
                .map(|(k, v)| format!("{}: {}", any_repr(&k.view()), any_repr(&v.view())))
                .collect();
            format!("{{{}}}", items.join(", "))
        }
        type_index::ERROR => {
            let err: &ErrorObj = unsafe { view.obj_unchecked() };
            format!("{}: {}", err.kind(), err.message())
        }
        _ => obj_repr(view),
    }
}

fn obj_repr(view: &AnyView) -> String {
    if let Some(printer) = crate::vtable::VTable::global().get(view.type_index, "__str__") {
        if let Some(func) = printer.as_func() {
            if let Ok(out) = func.safe_call(&[*view]) {
                if let Some(s) = out.as_str_obj() {
                    return s.to_string_lossy();
                }
            }
        }
    }
    let key = view
        .type_key()
        .unwrap_or_else(|| format!("type#{}", view.type_index));
    format!("<{}@{:p}>", key, unsafe { view.v.v_obj })
}

impl fmt::Debug for AnyView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyView({})", any_repr(self))
    }
}

impl fmt::Display for AnyView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", any_repr(self))
    }
}

impl fmt::Debug for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Any({})", any_repr(&self.view()))
    }
}

impl fmt::Display for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", any_repr(&self.view()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_cell_size() {
        // The cell layout is ABI: exactly 16 bytes, tag first.
        assert_eq!(std::mem::size_of::<AnyView>(), 16);
        assert_eq!(std::mem::size_of::<Any>(), 16);
        assert_eq!(std::mem::size_of::<RawValue>(), 8);
    }

    #[test]
    fn test_pod_cells() {
        let i = AnyView::int(42);
        assert_eq!(i.as_int(), Some(42));
        assert_eq!(i.as_ptr(), None);

        let f = AnyView::float(1.5);
        assert_eq!(f.as_float(), Some(1.5));
        assert_eq!(f.as_int(), None);

        // int converts to float, not the other way around
        assert_eq!(AnyView::int(3).as_float(), Some(3.0));

        assert!(AnyView::none().is_none());
    }

    #[test]
    fn test_pod_promotion_is_copy() {
        let view = AnyView::int(7);
        let owned = view.to_any();
        assert_eq!(owned.as_int(), Some(7));
        assert_eq!(owned.type_index(), type_index::INT);
    }

    #[test]
    fn test_raw_str_promotion_allocates_owned_str() {
        let c = CString::new("hello").unwrap();
        let view = AnyView::raw_str(&c);
        assert_eq!(view.small_len, 5);

        let owned = view.to_any();
        assert_eq!(owned.type_index(), type_index::STR);
        assert_eq!(owned.as_str_obj().unwrap().as_bytes(), b"hello");

        // the original view is untouched
        assert_eq!(view.type_index, type_index::RAW_STR);
    }

    #[test]
    fn test_inplace_promotion_idempotent_payload() {
        let c = CString::new("abc").unwrap();
        let mut cell = AnyView::raw_str(&c);
        unsafe { view_to_owned_inplace(&mut cell) };
        assert_eq!(cell.type_index, type_index::STR);
        let first_ptr = cell.obj_ptr().unwrap();

        // promoting again keeps the same owned object
        unsafe { view_to_owned_inplace(&mut cell) };
        assert_eq!(cell.obj_ptr().unwrap(), first_ptr);

        // release both references taken above
        unsafe {
            crate::object::dec_ref(first_ptr);
            crate::object::dec_ref(first_ptr);
        }
    }

    #[test]
    fn test_any_clone_drop_refcount() {
        let s = Any::str("payload");
        let ptr = s.obj_ptr().unwrap();
        assert_eq!(unsafe { (*ptr).ref_count() }, 1);

        let s2 = s.clone();
        assert_eq!(unsafe { (*ptr).ref_count() }, 2);
        drop(s2);
        assert_eq!(unsafe { (*ptr).ref_count() }, 1);
        drop(s);
    }

    #[test]
    fn test_repr() {
        assert_eq!(any_repr(&AnyView::none()), "None");
        assert_eq!(any_repr(&AnyView::int(-3)), "-3");
        assert_eq!(any_repr(&AnyView::float(2.0)), "2.0");
        let s = Any::str("hi");
        assert_eq!(any_repr(&s.view()), "hi");
    }

    #[test]
    fn test_dtype_device_roundtrip() {
        let dt = DataType { code: 2, bits: 32, lanes: 1 };
        let cell = AnyView::dtype(dt);
        assert_eq!(cell.as_dtype(), Some(dt));

        let dev = Device { device_type: 1, device_id: 0 };
        let cell = AnyView::device(dev);
        assert_eq!(cell.as_device(), Some(dev));
        assert_eq!(cell.as_dtype(), None);
    }
}
