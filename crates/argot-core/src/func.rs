//! Function objects and the safe-call convention
//!
//! A [`FuncObj`] boxes a callable behind two entry points:
//!
//! - an **unchecked call**: the caller guarantees argument count and
//!   types; violations are undefined behavior. Trusted in-process use only.
//! - a **safe call**: returns an integer status (0 success, non-zero
//!   failure). Every failure inside the callee, including a panic, is
//!   caught at the outermost point still inside this runtime and converted
//!   into an [`ErrorObj`] stored in the thread-local last-error slot. This
//!   is the only convention that may cross language boundaries.
//!
//! The last-error slot is thread-local on purpose: with concurrent safe
//! calls a process-global slot would let one thread read another thread's
//! failure.

use crate::error::ErrorObj;
use crate::object::{DeleterFn, ObjHeader, ObjectRepr, Ref};
use crate::value::{type_index, Any, AnyView};
use crate::{RtResult, RuntimeError};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::cell::RefCell;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Unchecked call entry: `(self, argc, argv, ret)`.
pub type CallFn = unsafe extern "C" fn(*const c_void, i32, *const AnyView, *mut Any);

/// Safe call entry: `(self, argc, argv, ret) -> status`.
pub type SafeCallFn = unsafe extern "C" fn(*const c_void, i32, *const AnyView, *mut Any) -> i32;

// ============================================================================
// Last-error slot (thread-local)
// ============================================================================

thread_local! {
    static LAST_ERROR: RefCell<Option<Any>> = const { RefCell::new(None) };
}

/// Record `err` as the calling thread's last error.
pub fn set_last_error(err: Any) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(err));
}

/// Take the calling thread's last error, clearing the slot.
pub fn take_last_error() -> Option<Any> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}

/// Copy of the calling thread's last error, leaving the slot set.
pub fn peek_last_error() -> Option<Any> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

// ============================================================================
// Function object
// ============================================================================

/// Boxed callable with unchecked and safe entry points.
#[repr(C)]
pub struct FuncObj {
    header: ObjHeader,
    self_ptr: *mut c_void,
    self_deleter: Option<DeleterFn>,
    call_fn: Option<CallFn>,
    safe_call_fn: SafeCallFn,
}

// The closure payload is Send + Sync by construction; for foreign
// callables thread-safety is part of the registration contract.
unsafe impl Send for FuncObj {}
unsafe impl Sync for FuncObj {}

unsafe impl ObjectRepr for FuncObj {
    const TYPE_INDEX: i32 = type_index::FUNC;
}

struct NativeClosure {
    f: Box<dyn Fn(&[AnyView]) -> RtResult<Any> + Send + Sync>,
}

unsafe fn arg_slice<'a>(num_args: i32, args: *const AnyView) -> &'a [AnyView] {
    if num_args <= 0 || args.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(args, num_args as usize)
    }
}

unsafe extern "C" fn native_call(
    self_ptr: *const c_void,
    num_args: i32,
    args: *const AnyView,
    ret: *mut Any,
) {
    let closure = &*(self_ptr as *const NativeClosure);
    match (closure.f)(arg_slice(num_args, args)) {
        Ok(value) => std::ptr::write(ret, value),
        // the unchecked contract was violated; there is no status channel
        Err(err) => panic!("unchecked call failed: {}", err),
    }
}

unsafe extern "C" fn native_safe_call(
    self_ptr: *const c_void,
    num_args: i32,
    args: *const AnyView,
    ret: *mut Any,
) -> i32 {
    let closure = &*(self_ptr as *const NativeClosure);
    let result = catch_unwind(AssertUnwindSafe(|| (closure.f)(arg_slice(num_args, args))));
    match result {
        Ok(Ok(value)) => {
            std::ptr::write(ret, value);
            0
        }
        Ok(Err(err)) => {
            log::debug!("safe call failed: {}", err);
            set_last_error(ErrorObj::from_runtime_error(&err).into_any());
            -1
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "callee panicked".to_string());
            log::debug!("safe call panicked: {}", message);
            set_last_error(ErrorObj::new("InternalError", message).into_any());
            -1
        }
    }
}

unsafe extern "C" fn drop_native_closure(self_ptr: *mut c_void) {
    drop(Box::from_raw(self_ptr as *mut NativeClosure));
}

impl FuncObj {
    /// Box a Rust closure as a function object. The safe entry catches
    /// both `Err` returns and panics.
    pub fn new<F>(f: F) -> Ref<FuncObj>
    where
        F: Fn(&[AnyView]) -> RtResult<Any> + Send + Sync + 'static,
    {
        let closure = Box::new(NativeClosure { f: Box::new(f) });
        Ref::alloc(FuncObj {
            header: ObjHeader::for_type::<FuncObj>(),
            self_ptr: Box::into_raw(closure) as *mut c_void,
            self_deleter: Some(drop_native_closure),
            call_fn: Some(native_call),
            safe_call_fn: native_safe_call,
        })
    }

    /// Wrap a foreign callable given its closure pointer, deleter, and
    /// safe entry point. The unchecked entry routes through the safe one.
    ///
    /// # Safety
    /// `safe_call` must follow the safe-call convention, and `self_ptr`
    /// must stay valid until `deleter` runs.
    pub unsafe fn from_raw_parts(
        self_ptr: *mut c_void,
        deleter: Option<DeleterFn>,
        safe_call: SafeCallFn,
    ) -> Ref<FuncObj> {
        Ref::alloc(FuncObj {
            header: ObjHeader::for_type::<FuncObj>(),
            self_ptr,
            self_deleter: deleter,
            call_fn: None,
            safe_call_fn: safe_call,
        })
    }

    /// Invoke without any checking.
    ///
    /// # Safety
    /// The caller guarantees argument count and types match the callee's
    /// expectation; any violation is undefined behavior.
    pub unsafe fn call_unchecked(&self, args: &[AnyView]) -> Any {
        let mut ret = Any::none();
        match self.call_fn {
            Some(call) => call(self.self_ptr, args.len() as i32, args.as_ptr(), &mut ret),
            None => {
                let status =
                    (self.safe_call_fn)(self.self_ptr, args.len() as i32, args.as_ptr(), &mut ret);
                debug_assert_eq!(status, 0, "unchecked call through safe entry failed");
            }
        }
        ret
    }

    /// Invoke through the status-returning convention.
    ///
    /// On failure the error object stays in the last-error slot (for ABI
    /// callers) and is surfaced here as [`RuntimeError::Raised`].
    pub fn safe_call(&self, args: &[AnyView]) -> RtResult<Any> {
        let mut ret = Any::none();
        let status = unsafe {
            (self.safe_call_fn)(self.self_ptr, args.len() as i32, args.as_ptr(), &mut ret)
        };
        if status == 0 {
            return Ok(ret);
        }
        match peek_last_error().as_ref().and_then(|e| e.as_error()) {
            Some(err) => Err(err.to_runtime_error()),
            None => Err(RuntimeError::InternalError(format!(
                "safe call failed with status {} but recorded no error",
                status
            ))),
        }
    }
}

impl Drop for FuncObj {
    fn drop(&mut self) {
        if let Some(deleter) = self.self_deleter {
            unsafe { deleter(self.self_ptr) };
        }
    }
}

// ============================================================================
// Global function table
// ============================================================================

static GLOBAL_FUNCS: Lazy<DashMap<String, Any>> = Lazy::new(DashMap::new);

/// Publish `func` under `name` in the process-wide function table.
pub fn set_global(name: &str, func: Any, allow_override: bool) -> RtResult<()> {
    if func.as_func().is_none() {
        return Err(RuntimeError::TypeError(format!(
            "global `{}` must be a function, got `{}`",
            name,
            func.type_key().unwrap_or_else(|| func.type_index().to_string())
        )));
    }
    if !allow_override && GLOBAL_FUNCS.contains_key(name) {
        return Err(RuntimeError::StateError(format!(
            "global function `{}` is already registered",
            name
        )));
    }
    log::trace!("registered global function `{}`", name);
    GLOBAL_FUNCS.insert(name.to_string(), func);
    Ok(())
}

/// Look up a global function; `None` when unregistered.
pub fn get_global(name: &str) -> Option<Any> {
    GLOBAL_FUNCS.get(name).map(|f| f.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adder() -> Ref<FuncObj> {
        FuncObj::new(|args| {
            let mut sum = 0;
            for arg in args {
                sum += arg.as_int().ok_or_else(|| {
                    RuntimeError::TypeError("adder takes integer arguments".into())
                })?;
            }
            Ok(Any::int(sum))
        })
    }

    #[test]
    fn test_safe_call_success() {
        let f = adder();
        let out = f.safe_call(&[AnyView::int(1), AnyView::int(2), AnyView::int(3)]).unwrap();
        assert_eq!(out.as_int(), Some(6));
    }

    #[test]
    fn test_unchecked_call() {
        let f = adder();
        let out = unsafe { f.call_unchecked(&[AnyView::int(40), AnyView::int(2)]) };
        assert_eq!(out.as_int(), Some(42));
    }

    #[test]
    fn test_safe_call_failure_sets_last_error() {
        let f = adder();
        let err = f.safe_call(&[AnyView::float(1.0)]).unwrap_err();
        assert_eq!(err.kind(), "TypeError");

        let last = take_last_error().expect("error recorded");
        assert_eq!(last.as_error().unwrap().kind(), "TypeError");
        assert!(take_last_error().is_none());
    }

    #[test]
    fn test_safe_call_catches_panic() {
        let f = FuncObj::new(|_| panic!("deliberate"));
        let err = f.safe_call(&[]).unwrap_err();
        assert_eq!(err.kind(), "InternalError");

        let last = take_last_error().unwrap();
        assert!(last.as_error().unwrap().message().contains("deliberate"));
    }

    #[test]
    fn test_global_function_table() {
        let f = adder().into_any();
        set_global("test.func.add", f, false).unwrap();

        let looked_up = get_global("test.func.add").unwrap();
        let out = looked_up.as_func().unwrap().safe_call(&[AnyView::int(5)]).unwrap();
        assert_eq!(out.as_int(), Some(5));

        // re-registration needs the override flag
        let again = adder().into_any();
        assert!(set_global("test.func.add", again.clone(), false).is_err());
        assert!(set_global("test.func.add", again, true).is_ok());

        assert!(get_global("test.func.missing").is_none());
    }

    #[test]
    fn test_set_global_rejects_non_function() {
        assert!(set_global("test.func.notafunc", Any::int(3), false).is_err());
    }
}
