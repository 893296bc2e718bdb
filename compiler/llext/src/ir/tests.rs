#![allow(clippy::unwrap_used, reason = "tests use unwrap for brevity")]

use pretty_assertions::assert_eq;

use crate::{ErrorKind, Session, ShimError};

#[test]
fn builds_and_prints_a_function() {
    let mut s = Session::new();
    let m = s.create_module("sum").unwrap();
    let i32_ty = s.int_type(32).unwrap();
    let fn_ty = s.function_type(i32_ty, &[i32_ty, i32_ty], false).unwrap();
    let f = s.add_function(m, "sum", fn_ty).unwrap();
    let entry = s.append_basic_block(f, "entry").unwrap();
    let b = s.create_builder();
    s.position_at_end(b, entry).unwrap();
    let x = s.get_param(f, 0).unwrap();
    let y = s.get_param(f, 1).unwrap();
    let total = s.build_add(b, x, y, "total").unwrap();
    s.build_ret(b, total).unwrap();

    assert_eq!(
        s.print_module_to_string(m).unwrap(),
        "; ModuleID = 'sum'\n\
         source_filename = \"sum\"\n\
         \n\
         define i32 @sum(i32 %0, i32 %1) {\n\
         entry:\n\
         \x20 %total = add i32 %0, %1\n\
         \x20 ret i32 %total\n\
         }\n"
    );
    assert_eq!(s.get_named_function(m, "sum").unwrap(), Some(f));
    assert_eq!(s.get_named_function(m, "nope").unwrap(), None);
    assert_eq!(s.get_insert_block(b).unwrap(), Some(entry));
}

#[test]
fn memory_round_trip_through_a_slot() {
    let mut s = Session::new();
    let m = s.create_module("mem").unwrap();
    let i64_ty = s.int_type(64).unwrap();
    let fn_ty = s.function_type(i64_ty, &[], false).unwrap();
    let f = s.add_function(m, "load", fn_ty).unwrap();
    let entry = s.append_basic_block(f, "entry").unwrap();
    let b = s.create_builder();
    s.position_at_end(b, entry).unwrap();
    let slot = s.build_alloca(b, i64_ty, "slot").unwrap();
    let seven = s.const_int(i64_ty, 7).unwrap();
    s.build_store(b, seven, slot).unwrap();
    let loaded = s.build_load(b, i64_ty, slot, "v").unwrap();
    s.build_ret(b, loaded).unwrap();

    let ir = s.print_module_to_string(m).unwrap();
    assert!(ir.contains("%slot = alloca i64"), "{ir}");
    assert!(ir.contains("store i64 7, ptr %slot"), "{ir}");
    assert!(ir.contains("%v = load i64, ptr %slot"), "{ir}");

    assert!(matches!(
        s.build_load(b, i64_ty, seven, "bad"),
        Err(ShimError::InvalidOperand { .. })
    ));
}

#[test]
fn set_target_normalizes() {
    let mut s = Session::new();
    let m = s.create_module("m").unwrap();
    s.set_target(m, "x86_64-linux").unwrap();
    s.set_data_layout(m, "e-m:e-i64:64").unwrap();
    let ir = s.print_module_to_string(m).unwrap();
    assert!(ir.contains("target triple = \"x86_64-unknown-linux-gnu\""), "{ir}");
    assert!(ir.contains("target datalayout = \"e-m:e-i64:64\""), "{ir}");
}

#[test]
fn disposed_module_is_stale() {
    let mut s = Session::new();
    let m = s.create_module("gone").unwrap();
    let void = s.void_type();
    let fn_ty = s.function_type(void, &[], false).unwrap();
    let f = s.add_function(m, "f", fn_ty).unwrap();
    s.dispose_module(m).unwrap();

    let err = s.print_module_to_string(m).unwrap_err();
    assert_eq!(err, ShimError::StaleHandle { kind: "module" });
    assert_eq!(err.kind(), ErrorKind::StructuralMisuse);
    assert!(s.append_basic_block(f, "entry").is_err());
    assert!(s.dispose_module(m).is_err());
    assert!(s.get_named_function(m, "f").is_err());
}

#[test]
fn disposed_builder_is_stale() {
    let mut s = Session::new();
    let b = s.create_builder();
    s.dispose_builder(b).unwrap();
    assert_eq!(
        s.build_unreachable(b),
        Err(ShimError::StaleHandle { kind: "IR builder" })
    );
}

#[test]
fn unpositioned_builder_fails() {
    let mut s = Session::new();
    let b = s.create_builder();
    assert_eq!(s.build_ret_void(b), Err(ShimError::Unpositioned));
    assert_eq!(s.get_insert_block(b).unwrap(), None);
}

#[test]
fn branch_stays_in_its_function() {
    let mut s = Session::new();
    let m = s.create_module("m").unwrap();
    let void = s.void_type();
    let fn_ty = s.function_type(void, &[], false).unwrap();
    let f = s.add_function(m, "f", fn_ty).unwrap();
    let g = s.add_function(m, "g", fn_ty).unwrap();
    let f_entry = s.append_basic_block(f, "entry").unwrap();
    let f_exit = s.append_basic_block(f, "exit").unwrap();
    let g_entry = s.append_basic_block(g, "entry").unwrap();
    let b = s.create_builder();
    s.position_at_end(b, f_entry).unwrap();

    assert!(matches!(
        s.build_br(b, g_entry),
        Err(ShimError::InvalidOperand { .. })
    ));
    s.build_br(b, f_exit).unwrap();
    assert!(s.print_module_to_string(m).unwrap().contains("br label %exit"));
}

#[test]
fn types_are_interned() {
    let mut s = Session::new();
    let a = s.int_type(64).unwrap();
    let b = s.int_type(64).unwrap();
    assert_eq!(a, b);
    let ptr = s.pointer_type(0);
    let pair = s.struct_type(&[a, ptr]).unwrap();
    assert_ne!(pair, a);
    let arr = s.array_type(a, 4).unwrap();
    assert_ne!(arr, pair);
    assert_ne!(s.float_type(), s.double_type());
}

#[test]
fn integer_width_is_bounded() {
    let mut s = Session::new();
    assert!(s.int_type(0).is_err());
    assert!(s.int_type(1 << 24).is_err());
    assert!(s.int_type(1 << 23).is_ok());
}

#[test]
fn non_function_type_is_rejected() {
    let mut s = Session::new();
    let m = s.create_module("m").unwrap();
    let i8_ty = s.int_type(8).unwrap();
    assert!(matches!(
        s.add_function(m, "f", i8_ty),
        Err(ShimError::InvalidOperand { .. })
    ));
    assert_eq!(
        s.create_module("a\0b"),
        Err(ShimError::InteriorNul {
            what: "module name"
        })
    );
}
