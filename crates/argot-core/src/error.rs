//! Error objects and traceback accumulation
//!
//! Failures cross the call boundary as data, never as native unwinding: a
//! callee packages its failure into an [`ErrorObj`] carrying an error
//! `kind` (class) and message, the safe call returns a non-zero status,
//! and the caller retrieves the object from the thread-local last-error
//! slot. Each boundary crossing that observes the failure appends its own
//! frame, building one traceback across runtimes that share no native
//! call stack.

use crate::object::{ObjHeader, ObjectRepr, Ref};
use crate::value::type_index;
use crate::RuntimeError;
use parking_lot::Mutex;

/// Structured boundary error: `kind` + message + accumulated frames.
#[repr(C)]
pub struct ErrorObj {
    header: ObjHeader,
    kind: String,
    message: String,
    frames: Mutex<Vec<String>>,
}

unsafe impl ObjectRepr for ErrorObj {
    const TYPE_INDEX: i32 = type_index::ERROR;
}

impl ErrorObj {
    /// New error with an empty traceback.
    pub fn new(kind: &str, message: impl Into<String>) -> Ref<ErrorObj> {
        Ref::alloc(ErrorObj {
            header: ObjHeader::for_type::<ErrorObj>(),
            kind: kind.to_string(),
            message: message.into(),
            frames: Mutex::new(Vec::new()),
        })
    }

    /// Package a [`RuntimeError`], mapping the variant to the `kind` string.
    pub fn from_runtime_error(err: &RuntimeError) -> Ref<ErrorObj> {
        ErrorObj::new(err.kind(), err.message())
    }

    /// Error class
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Accumulated frames, oldest first
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// Append one frame (most recent last).
    pub fn push_frame(&self, frame: impl Into<String>) {
        self.frames.lock().push(frame.into());
    }

    /// Structured info: `[kind, message, frame, ...]`.
    pub fn info(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(2 + self.frames.lock().len());
        out.push(self.kind.clone());
        out.push(self.message.clone());
        out.extend(self.frames.lock().iter().cloned());
        out
    }

    /// Surface this error back into Rust control flow.
    pub fn to_runtime_error(&self) -> RuntimeError {
        RuntimeError::Raised {
            kind: self.kind.clone(),
            message: self.message.clone(),
        }
    }
}

impl std::fmt::Display for ErrorObj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Format one stack frame for traceback accumulation.
pub fn traceback_frame(filename: &str, lineno: i64, func_name: &str) -> String {
    format!("  File \"{}\", line {}, in {}", filename, lineno, func_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_roundtrip() {
        let err = ErrorObj::new("ValueError", "bad input");
        assert_eq!(err.kind(), "ValueError");
        let info = err.info();
        assert_eq!(info[0], "ValueError");
        assert!(info[1].contains("bad input"));
    }

    #[test]
    fn test_frames_accumulate_in_order() {
        let err = ErrorObj::new("TypeError", "boom");
        err.push_frame(traceback_frame("a.rs", 10, "inner"));
        err.push_frame(traceback_frame("b.py", 20, "outer"));

        let info = err.info();
        assert_eq!(info.len(), 4);
        assert!(info[2].contains("a.rs"));
        assert!(info[3].contains("b.py"));
    }

    #[test]
    fn test_from_runtime_error_kind() {
        let err = ErrorObj::from_runtime_error(&RuntimeError::KeyError("missing".into()));
        assert_eq!(err.kind(), "KeyError");
        assert_eq!(err.message(), "missing");
    }

    #[test]
    fn test_traceback_format() {
        let frame = traceback_frame("mod.rs", 42, "call_site");
        assert_eq!(frame, "  File \"mod.rs\", line 42, in call_site");
    }

    #[test]
    fn test_erase_and_downcast() {
        let any = ErrorObj::new("ValueError", "x").into_any();
        assert_eq!(any.type_index(), type_index::ERROR);
        assert_eq!(any.as_error().unwrap().kind(), "ValueError");
    }
}
