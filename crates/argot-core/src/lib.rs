//! argot core runtime
//!
//! This crate provides the cross-language object runtime:
//! - 16-byte tagged-union value cells (`AnyView` / `Any`)
//! - Reference-counted heap objects with a shared header prefix
//! - Global type registry with ancestor-chain `is_instance`
//! - Reflection metadata and structural equality
//! - Per-type dynamic method table (vtable)
//! - Function objects with a safe, status-returning call convention
//! - Core containers (List, Dict, Str) and type-descriptor objects

#![warn(rust_2018_idioms)]

pub mod value;
pub mod object;
pub mod types;
pub mod reflect;
pub mod vtable;
pub mod func;
pub mod error;
pub mod containers;

pub use value::{Any, AnyView, DataType, Device, RawValue};
pub use object::{ext_obj_create, ObjHeader, Ref};
pub use types::registry::{TypeRecord, TypeTable};
pub use reflect::{structural_equal, structural_hash};
pub use func::{set_last_error, take_last_error, FuncObj};
pub use error::ErrorObj;
pub use containers::{DictObj, ListObj, StrObj};

/// Runtime errors raised at conversion, call, and lookup boundaries.
///
/// Variant names double as the `kind` string carried by [`ErrorObj`] when an
/// error crosses the C boundary as data.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// Wrong or incompatible type at a conversion or call boundary
    #[error("{0}")]
    TypeError(String),

    /// Unknown type key/index, missing vtable entry, missing global function
    #[error("{0}")]
    KeyError(String),

    /// Out-of-bounds container access
    #[error("{0}")]
    IndexError(String),

    /// Malformed input value
    #[error("{0}")]
    ValueError(String),

    /// Generic write to a frozen field
    #[error("{0}")]
    AttributeError(String),

    /// Invalid runtime state (e.g. reflection redefined)
    #[error("{0}")]
    StateError(String),

    /// Panic or invariant violation caught at the call boundary
    #[error("{0}")]
    InternalError(String),

    /// Failure raised by a callee and propagated through the safe-call
    /// status channel
    #[error("{kind}: {message}")]
    Raised {
        /// Error class reported by the callee
        kind: String,
        /// Message reported by the callee
        message: String,
    },
}

impl RuntimeError {
    /// Error class string used as the `kind` of the boundary error object.
    pub fn kind(&self) -> &str {
        match self {
            RuntimeError::TypeError(_) => "TypeError",
            RuntimeError::KeyError(_) => "KeyError",
            RuntimeError::IndexError(_) => "IndexError",
            RuntimeError::ValueError(_) => "ValueError",
            RuntimeError::AttributeError(_) => "AttributeError",
            RuntimeError::StateError(_) => "StateError",
            RuntimeError::InternalError(_) => "InternalError",
            RuntimeError::Raised { kind, .. } => kind,
        }
    }

    /// Message without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            RuntimeError::Raised { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Runtime operation result
pub type RtResult<T> = Result<T, RuntimeError>;
