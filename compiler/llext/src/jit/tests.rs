#![allow(clippy::unwrap_used, reason = "tests use unwrap for brevity")]

use std::mem::offset_of;

use llvm_sys::core::{LLVMGetStringAttributeAtIndex, LLVMGetStringAttributeValue};
use pretty_assertions::assert_eq;

use super::*;
use crate::{ErrorKind, Generation, SessionConfig};

/// `i32 answer()` and `i32 add(i32, i32)` defined, `void ext()` declared.
fn session(generation: Generation) -> (Session, ModuleHandle) {
    let mut s = Session::with_config(SessionConfig::new().with_generation(generation));
    let m = s.create_module("jit").unwrap();
    let i32_ty = s.int_type(32).unwrap();
    let void = s.void_type();
    let answer_ty = s.function_type(i32_ty, &[], false).unwrap();
    let add_ty = s.function_type(i32_ty, &[i32_ty, i32_ty], false).unwrap();
    let ext_ty = s.function_type(void, &[], false).unwrap();
    let answer = s.add_function(m, "answer", answer_ty).unwrap();
    let add = s.add_function(m, "add", add_ty).unwrap();
    s.add_function(m, "ext", ext_ty).unwrap();
    let b = s.create_builder();

    let entry = s.append_basic_block(answer, "entry").unwrap();
    s.position_at_end(b, entry).unwrap();
    let forty_two = s.const_int(i32_ty, 42).unwrap();
    s.build_ret(b, forty_two).unwrap();

    let entry = s.append_basic_block(add, "entry").unwrap();
    s.position_at_end(b, entry).unwrap();
    let lhs = s.get_param(add, 0).unwrap();
    let rhs = s.get_param(add, 1).unwrap();
    let sum = s.build_add(b, lhs, rhs, "sum").unwrap();
    s.build_ret(b, sum).unwrap();
    (s, m)
}

/// String attribute `key` on function `name` of the engine's module.
fn attribute(s: &Session, engine: ExecutionEngineHandle, name: &str, key: &str) -> Option<String> {
    let module = s.engine(engine).unwrap().module_raw;
    let name = c_string("function name", name).unwrap();
    unsafe {
        let func = LLVMGetNamedFunction(module, name.as_ptr());
        let attr = LLVMGetStringAttributeAtIndex(
            func,
            LLVMAttributeFunctionIndex,
            key.as_ptr().cast(),
            key.len() as u32,
        );
        if attr.is_null() {
            return None;
        }
        let mut len = 0;
        let value = LLVMGetStringAttributeValue(attr, &mut len);
        Some(String::from_utf8_lossy(std::slice::from_raw_parts(value.cast(), len as usize)).into_owned())
    }
}

fn keep_frame_pointer() -> JitOptions {
    JitOptions {
        no_frame_pointer_elim: 1,
        ..JitOptions::default()
    }
}

#[test]
fn layout_matches_c_structure() {
    assert_eq!(offset_of!(JitOptions, opt_level), 0);
    assert_eq!(offset_of!(JitOptions, code_model), 4);
    assert_eq!(offset_of!(JitOptions, no_frame_pointer_elim), 8);
    assert_eq!(offset_of!(JitOptions, enable_fast_isel), 12);
    assert_eq!(offset_of!(JitOptions, mcjmm), 16);
    assert_eq!(JIT_OPTIONS_SIZE, size_of::<LLVMMCJITCompilerOptions>());
}

#[test]
fn short_prefix_zero_fills() {
    let options = JitOptions {
        opt_level: 2,
        code_model: 3,
        no_frame_pointer_elim: 1,
        enable_fast_isel: 1,
        mcjmm: 0xdead,
    };
    let bytes = options.to_bytes();
    assert_eq!(JitOptions::from_prefix(&bytes), options);
    assert_eq!(
        JitOptions::from_prefix(&bytes[..8]),
        JitOptions {
            opt_level: 2,
            code_model: 3,
            ..JitOptions::default()
        }
    );
    assert_eq!(JitOptions::from_prefix(&[]), JitOptions::default());
}

#[test]
fn oversized_options_leave_module_untouched() {
    let (mut s, m) = session(Generation::LATEST);
    let err = s
        .create_jit_compiler(m, &keep_frame_pointer(), JIT_OPTIONS_SIZE + 8, false)
        .unwrap_err();
    assert_eq!(
        err,
        ShimError::OversizedJitOptions {
            declared: JIT_OPTIONS_SIZE + 8,
            known: JIT_OPTIONS_SIZE,
        }
    );
    assert_eq!(err.kind(), ErrorKind::EnvironmentFailure);
    assert!(s.engines.is_empty());
    let ir = s.print_module_to_string(m).unwrap();
    assert!(!ir.contains("frame-pointer"), "{ir}");
}

#[test]
fn invalid_raw_options_leave_module_untouched() {
    let (mut s, m) = session(Generation::LATEST);
    let bad_level = JitOptions {
        opt_level: 9,
        ..keep_frame_pointer()
    };
    let err = s
        .create_jit_compiler(m, &bad_level, JIT_OPTIONS_SIZE, false)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StructuralMisuse);

    let bad_model = JitOptions {
        code_model: 42,
        ..keep_frame_pointer()
    };
    assert_eq!(
        s.create_jit_compiler(m, &bad_model, JIT_OPTIONS_SIZE, false),
        Err(ShimError::InvalidEnumValue {
            what: "code model",
            value: 42
        })
    );
    let ir = s.print_module_to_string(m).unwrap();
    assert!(!ir.contains("frame-pointer"), "{ir}");
    assert!(s.get_named_function(m, "answer").unwrap().is_some());
}

#[test]
fn engine_takes_module_ownership() {
    let (mut s, m) = session(Generation::LATEST);
    let add = s.get_named_function(m, "add").unwrap().unwrap();
    let engine = s
        .create_jit_compiler(m, &JitOptions::default(), JIT_OPTIONS_SIZE, false)
        .unwrap();

    assert_eq!(
        s.print_module_to_string(m),
        Err(ShimError::StaleHandle { kind: "module" })
    );
    assert_eq!(s.type_of(add), Err(ShimError::StaleHandle { kind: "value" }));
    assert!(matches!(s.modules[m.slot()], ModuleSlot::OwnedByEngine(e) if e == engine));

    let applied = s.engine(engine).unwrap().applied;
    assert_eq!(applied.code_model, CodeModel::JitDefault);
    assert_eq!(applied.opt_level, CodeGenOptLevel::None);

    s.dispose_execution_engine(engine).unwrap();
    assert!(matches!(s.modules[m.slot()], ModuleSlot::Disposed));
    assert_eq!(
        s.get_function_address(engine, "add"),
        Err(ShimError::StaleHandle {
            kind: "execution engine"
        })
    );
}

#[test]
fn compiled_functions_run() {
    let (mut s, m) = session(Generation::LATEST);
    let engine = s
        .create_jit_compiler(m, &JitOptions::default(), JIT_OPTIONS_SIZE, false)
        .unwrap();

    let add = s.get_function_address(engine, "add").unwrap();
    assert_ne!(add, 0);
    let add: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(add as usize) };
    assert_eq!(add(2, 3), 5);

    let answer = s.get_function_address(engine, "answer").unwrap();
    let answer: extern "C" fn() -> i32 = unsafe { std::mem::transmute(answer as usize) };
    assert_eq!(answer(), 42);

    assert_eq!(s.get_function_address(engine, "ext").unwrap(), 0);
    assert_eq!(s.get_function_address(engine, "missing").unwrap(), 0);
}

#[test]
fn frame_pointer_attribute_by_generation() {
    let (mut s, m) = session(Generation::V8_0);
    let engine = s
        .create_jit_compiler(m, &keep_frame_pointer(), JIT_OPTIONS_SIZE, false)
        .unwrap();
    assert_eq!(attribute(&s, engine, "add", "frame-pointer").as_deref(), Some("all"));
    assert_eq!(attribute(&s, engine, "add", "no-frame-pointer-elim"), None);

    let (mut s, m) = session(Generation::V5_0);
    let engine = s
        .create_jit_compiler(m, &keep_frame_pointer(), JIT_OPTIONS_SIZE, false)
        .unwrap();
    assert_eq!(
        attribute(&s, engine, "answer", "no-frame-pointer-elim").as_deref(),
        Some("true")
    );

    let (mut s, m) = session(Generation::LATEST);
    let engine = s
        .create_jit_compiler(m, &JitOptions::default(), JIT_OPTIONS_SIZE, false)
        .unwrap();
    assert_eq!(attribute(&s, engine, "answer", "frame-pointer").as_deref(), Some("none"));
}

#[test]
fn truncated_declared_size_drops_trailing_fields() {
    let (mut s, m) = session(Generation::LATEST);
    let options = JitOptions {
        opt_level: 3,
        code_model: 3,
        no_frame_pointer_elim: 1,
        enable_fast_isel: 1,
        mcjmm: 0,
    };
    let engine = s.create_jit_compiler(m, &options, 8, false).unwrap();
    let applied = s.engine(engine).unwrap().applied;
    assert_eq!(applied.opt_level, CodeGenOptLevel::Aggressive);
    assert_eq!(applied.code_model, CodeModel::Small);
    assert!(!applied.no_frame_pointer_elim);
    assert!(!applied.enable_fast_isel);
    assert_eq!(attribute(&s, engine, "add", "frame-pointer").as_deref(), Some("none"));
}

#[test]
fn global_isel_follows_capabilities() {
    let (mut s, m) = session(Generation::V5_0);
    let engine = s
        .create_jit_compiler(m, &JitOptions::default(), JIT_OPTIONS_SIZE, true)
        .unwrap();
    assert!(!s.engine(engine).unwrap().applied.global_isel);

    let (mut s, m) = session(Generation::LATEST);
    let expected = s.capabilities().global_instruction_selection;
    let engine = s
        .create_jit_compiler(m, &JitOptions::default(), JIT_OPTIONS_SIZE, true)
        .unwrap();
    assert_eq!(s.engine(engine).unwrap().applied.global_isel, expected);
    assert_ne!(s.get_function_address(engine, "add").unwrap(), 0);
}
