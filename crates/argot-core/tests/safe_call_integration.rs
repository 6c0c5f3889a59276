//! Integration tests for the call ABI and error propagation
//!
//! Tests cover:
//! - Safe calls through the global function table
//! - Error objects crossing the boundary as data, with frames
//!   accumulating per boundary
//! - VTable-attached behavior (custom printer) resolved by rendering

use argot_core::error::traceback_frame;
use argot_core::func::{self, take_last_error};
use argot_core::object::ext_obj_create;
use argot_core::types::registry::TypeTable;
use argot_core::value::{any_repr, type_index, AnyView};
use argot_core::vtable::VTable;
use argot_core::{Any, ErrorObj, FuncObj, RuntimeError};

fn register_div() {
    let div = FuncObj::new(|args| {
        let (a, b) = match (args.first().and_then(|v| v.as_int()), args.get(1).and_then(|v| v.as_int())) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(RuntimeError::TypeError("div takes two ints".into())),
        };
        if b == 0 {
            return Err(RuntimeError::ValueError("division by zero".into()));
        }
        Ok(Any::int(a / b))
    });
    func::set_global("itest.div", div.into_any(), true).unwrap();
}

#[test]
fn test_safe_call_through_global_table() {
    register_div();
    let cell = func::get_global("itest.div").unwrap();
    let div = cell.as_func().unwrap();

    let out = div.safe_call(&[AnyView::int(84), AnyView::int(2)]).unwrap();
    assert_eq!(out.as_int(), Some(42));

    let err = div.safe_call(&[AnyView::int(1), AnyView::int(0)]).unwrap_err();
    assert_eq!(err.kind(), "ValueError");

    let last = take_last_error().unwrap();
    let info = last.as_error().unwrap().info();
    assert_eq!(info[0], "ValueError");
    assert!(info[1].contains("division by zero"));
}

#[test]
fn test_frames_accumulate_across_boundaries() {
    register_div();
    let cell = func::get_global("itest.div").unwrap();
    let div = cell.as_func().unwrap();

    assert!(div.safe_call(&[AnyView::int(1), AnyView::int(0)]).is_err());
    let last = take_last_error().unwrap();
    let err = last.as_error().unwrap();

    // each runtime that observes the failure appends its own frame before
    // re-raising; no single native stack spans them all
    err.push_frame(traceback_frame("argot/host.rs", 120, "dispatch"));
    err.push_frame(traceback_frame("binding.py", 7, "main"));

    let info = err.info();
    assert_eq!(info.len(), 4);
    assert!(info[2].contains("host.rs"));
    assert!(info[3].contains("binding.py"));
}

#[test]
fn test_error_object_roundtrip() {
    let err = ErrorObj::new("ValueError", "bad input");
    let cell = err.into_any();
    assert_eq!(cell.type_index(), type_index::ERROR);

    let back = cell.as_error().unwrap();
    assert_eq!(back.kind(), "ValueError");
    assert!(back.message().contains("bad input"));
}

#[test]
fn test_vtable_printer_drives_rendering() {
    let table = TypeTable::global();
    let ty = table
        .register(type_index::OBJECT, "itest.Pretty", None)
        .unwrap();

    let obj = ext_obj_create(
        std::mem::size_of::<argot_core::ObjHeader>(),
        ty.type_index(),
    )
    .unwrap();

    // without a printer the type key shows up
    assert!(any_repr(&obj.view()).contains("itest.Pretty"));

    let printer = FuncObj::new(|_args| Ok(Any::str("<pretty>")));
    VTable::global()
        .set(ty.type_index(), "__str__", printer.into_any())
        .unwrap();
    assert_eq!(any_repr(&obj.view()), "<pretty>");
}
