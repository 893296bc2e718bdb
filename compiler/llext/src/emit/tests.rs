#![allow(clippy::unwrap_used, reason = "tests use unwrap for brevity")]

use pretty_assertions::assert_eq;

use crate::{
    ordering_from_raw, AtomicOrdering, ErrorKind, Generation, IrBuilderHandle, ModuleHandle,
    Session, SessionConfig, ShimError, ValueHandle,
};

struct Fixture {
    s: Session,
    m: ModuleHandle,
    f: ValueHandle,
    b: IrBuilderHandle,
}

/// `i32 f(i32)` with a positioned builder in `entry`.
fn fixture(generation: Generation) -> Fixture {
    let mut s = Session::with_config(SessionConfig::new().with_generation(generation));
    let m = s.create_module("emit").unwrap();
    let i32_ty = s.int_type(32).unwrap();
    let fn_ty = s.function_type(i32_ty, &[i32_ty], false).unwrap();
    let f = s.add_function(m, "f", fn_ty).unwrap();
    let entry = s.append_basic_block(f, "entry").unwrap();
    let b = s.create_builder();
    s.position_at_end(b, entry).unwrap();
    Fixture { s, m, f, b }
}

impl Fixture {
    fn ir(&mut self) -> String {
        self.s.print_module_to_string(self.m).unwrap()
    }
}

#[test]
fn cmpxchg_carries_both_orderings() {
    let mut fx = fixture(Generation::ACTIVE);
    let i32_ty = fx.s.int_type(32).unwrap();
    let p = fx.s.build_alloca(fx.b, i32_ty, "p").unwrap();
    let x = fx.s.get_param(fx.f, 0).unwrap();
    let one = fx.s.const_int(i32_ty, 1).unwrap();

    fx.s.build_atomic_cmpxchg(
        fx.b,
        p,
        x,
        one,
        AtomicOrdering::SequentiallyConsistent,
        AtomicOrdering::Acquire,
    )
    .unwrap();

    let ir = fx.ir();
    assert!(ir.contains("cmpxchg ptr %p, i32 %0, i32 1 seq_cst acquire"), "{ir}");
}

#[test]
fn cmpxchg_rejects_releasing_failure() {
    let mut fx = fixture(Generation::ACTIVE);
    let i32_ty = fx.s.int_type(32).unwrap();
    let p = fx.s.build_alloca(fx.b, i32_ty, "p").unwrap();
    let x = fx.s.get_param(fx.f, 0).unwrap();
    for (success, failure) in [
        (AtomicOrdering::AcquireRelease, AtomicOrdering::Release),
        (AtomicOrdering::SequentiallyConsistent, AtomicOrdering::AcquireRelease),
        (AtomicOrdering::Unordered, AtomicOrdering::Monotonic),
        (AtomicOrdering::Monotonic, AtomicOrdering::NotAtomic),
    ] {
        assert_eq!(
            fx.s.build_atomic_cmpxchg(fx.b, p, x, x, success, failure),
            Err(ShimError::InvalidOrdering),
            "{success:?}/{failure:?}"
        );
    }
    assert!(!fx.ir().contains("cmpxchg"));
}

#[test]
fn cmpxchg_operands_share_a_type() {
    let mut fx = fixture(Generation::ACTIVE);
    let i32_ty = fx.s.int_type(32).unwrap();
    let i64_ty = fx.s.int_type(64).unwrap();
    let p = fx.s.build_alloca(fx.b, i32_ty, "p").unwrap();
    let x = fx.s.get_param(fx.f, 0).unwrap();
    let wide = fx.s.const_int(i64_ty, 1).unwrap();
    let err = fx
        .s
        .build_atomic_cmpxchg(
            fx.b,
            p,
            x,
            wide,
            AtomicOrdering::Monotonic,
            AtomicOrdering::Monotonic,
        )
        .unwrap_err();
    assert!(matches!(err, ShimError::InvalidOperand { .. }), "{err}");
}

#[test]
fn raw_orderings_use_c_numbering() {
    assert_eq!(ordering_from_raw(4).unwrap(), AtomicOrdering::Acquire);
    assert_eq!(
        ordering_from_raw(7).unwrap(),
        AtomicOrdering::SequentiallyConsistent
    );
    for raw in [0, 1, 2, 4, 5, 6, 7] {
        assert_eq!(ordering_from_raw(raw).unwrap() as u32, raw);
    }
    let err = ordering_from_raw(3).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StructuralMisuse);
}

#[test]
fn memory_ordering_only_on_loads_and_stores() {
    let mut fx = fixture(Generation::ACTIVE);
    let i32_ty = fx.s.int_type(32).unwrap();
    let p = fx.s.build_alloca(fx.b, i32_ty, "p").unwrap();
    let v = fx.s.build_load(fx.b, i32_ty, p, "v").unwrap();
    let st = fx.s.build_store(fx.b, v, p).unwrap();

    fx.s.set_memory_ordering(v, AtomicOrdering::Acquire).unwrap();
    fx.s.set_memory_ordering(st, AtomicOrdering::Release).unwrap();
    let ir = fx.ir();
    assert!(ir.contains("load atomic i32, ptr %p acquire"), "{ir}");
    assert!(ir.contains("store atomic i32 %v, ptr %p release"), "{ir}");

    assert_eq!(
        fx.s.set_memory_ordering(p, AtomicOrdering::Acquire),
        Err(ShimError::InvalidOrdering)
    );
    assert_eq!(
        fx.s.set_memory_ordering(v, AtomicOrdering::Release),
        Err(ShimError::InvalidOrdering)
    );
    assert_eq!(
        fx.s.set_memory_ordering(st, AtomicOrdering::Acquire),
        Err(ShimError::InvalidOrdering)
    );
}

#[test]
fn catch_pads_unavailable_before_three_eight() {
    let Fixture { mut s, f, b, .. } = fixture(Generation::V3_6);
    let handler = s.append_basic_block(f, "handler").unwrap();
    assert_eq!(s.build_catch_switch(b, None, None, 1, "cs").unwrap(), None);
    assert_eq!(s.build_catch_pad(b, None, &[], "pad").unwrap(), None);
    let x = s.get_param(f, 0).unwrap();
    assert_eq!(s.build_catch_ret(b, x, handler).unwrap(), None);
}

#[test]
fn catch_switch_with_null_parent() {
    let mut fx = fixture(Generation::ACTIVE);
    let handler = fx.s.append_basic_block(fx.f, "handler").unwrap();
    let ok = fx.s.append_basic_block(fx.f, "ok").unwrap();
    let cs = fx
        .s
        .build_catch_switch(fx.b, None, None, 1, "cs")
        .unwrap()
        .unwrap();
    fx.s.add_handler(cs, handler).unwrap();

    let hb = fx.s.create_builder();
    fx.s.position_at_end(hb, handler).unwrap();
    let pad = fx.s.build_catch_pad(hb, Some(cs), &[], "pad").unwrap().unwrap();
    fx.s.build_catch_ret(hb, pad, ok).unwrap().unwrap();

    let ir = fx.ir();
    assert!(
        ir.contains("%cs = catchswitch within none [label %handler] unwind to caller"),
        "{ir}"
    );
    assert!(ir.contains("%pad = catchpad within %cs []"), "{ir}");
    assert!(ir.contains("catchret from %pad to label %ok"), "{ir}");
}

#[test]
fn catch_ret_needs_a_catch_pad() {
    let Fixture { mut s, f, b, .. } = fixture(Generation::ACTIVE);
    let ok = s.append_basic_block(f, "ok").unwrap();
    let x = s.get_param(f, 0).unwrap();
    let err = s.build_catch_ret(b, x, ok).unwrap_err();
    assert!(matches!(err, ShimError::InvalidOperand { .. }), "{err}");
}

#[test]
fn handlers_attach_only_to_catch_switches() {
    let Fixture { mut s, f, .. } = fixture(Generation::ACTIVE);
    let handler = s.append_basic_block(f, "handler").unwrap();
    let x = s.get_param(f, 0).unwrap();
    let err = s.add_handler(x, handler).unwrap_err();
    assert!(matches!(err, ShimError::InvalidOperand { .. }), "{err}");
}

#[test]
fn bundles_unavailable_on_three_six() {
    let Fixture { mut s, f, .. } = fixture(Generation::V3_6);
    let x = s.get_param(f, 0).unwrap();
    assert_eq!(s.create_operand_bundle("deopt", &[x]).unwrap(), None);
    assert_eq!(s.create_operand_bundle("funclet", &[]).unwrap(), None);
}

#[test]
fn bundle_creation_follows_capabilities() {
    let Fixture { mut s, .. } = fixture(Generation::LATEST);
    let bundle = s.create_operand_bundle("funclet", &[]).unwrap();
    assert_eq!(bundle.is_some(), s.capabilities().operand_bundles);
}

#[test]
fn call_checks_argument_count() {
    let Fixture { mut s, f, b, .. } = fixture(Generation::ACTIVE);
    assert_eq!(
        s.build_call(b, f, &[], &[], "r"),
        Err(ShimError::ArgumentCount {
            expected: 1,
            found: 0
        })
    );
}

#[test]
fn callee_must_be_in_the_builder_module() {
    let mut fx = fixture(Generation::ACTIVE);
    let other = fx.s.create_module("other").unwrap();
    let void = fx.s.void_type();
    let fn_ty = fx.s.function_type(void, &[], false).unwrap();
    let g = fx.s.add_function(other, "g", fn_ty).unwrap();
    let err = fx.s.build_call(fx.b, g, &[], &[], "").unwrap_err();
    assert!(matches!(err, ShimError::InvalidOperand { .. }), "{err}");
}

#[test]
fn void_calls_drop_the_name() {
    let mut fx = fixture(Generation::ACTIVE);
    let void = fx.s.void_type();
    let fn_ty = fx.s.function_type(void, &[], false).unwrap();
    let g = fx.s.add_function(fx.m, "g", fn_ty).unwrap();
    fx.s.build_call(fx.b, g, &[], &[], "ignored").unwrap();
    let ir = fx.ir();
    assert!(ir.contains("  call void @g()"), "{ir}");
    assert!(!ir.contains("%ignored"), "{ir}");
}

#[test]
fn invoke_without_bundles() {
    let mut fx = fixture(Generation::ACTIVE);
    let ok = fx.s.append_basic_block(fx.f, "ok").unwrap();
    let lpad = fx.s.append_basic_block(fx.f, "lpad").unwrap();
    let x = fx.s.get_param(fx.f, 0).unwrap();

    fx.s.build_invoke(fx.b, fx.f, &[x], ok, lpad, &[], "r").unwrap();

    let ir = fx.ir();
    assert!(ir.contains("%r = invoke i32 @f(i32 %0)"), "{ir}");
    assert!(ir.contains("to label %ok unwind label %lpad"), "{ir}");
}

#[cfg(feature = "llvm18-1")]
mod bundles {
    use super::*;

    #[test]
    fn bundle_attaches_once() {
        let mut fx = fixture(Generation::V18_0);
        let x = fx.s.get_param(fx.f, 0).unwrap();
        let deopt = fx.s.create_operand_bundle("deopt", &[x]).unwrap().unwrap();

        fx.s.build_call(fx.b, fx.f, &[x], &[deopt], "r").unwrap();
        let ir = fx.ir();
        assert!(ir.contains(r#"[ "deopt"(i32 %0) ]"#), "{ir}");

        assert_eq!(
            fx.s.build_call(fx.b, fx.f, &[x], &[deopt], "again"),
            Err(ShimError::BundleReused)
        );
        fx.s.dispose_operand_bundle(deopt).unwrap();
    }

    #[test]
    fn same_bundle_twice_in_one_call_is_reuse() {
        let Fixture { mut s, f, b, .. } = fixture(Generation::V18_0);
        let x = s.get_param(f, 0).unwrap();
        let deopt = s.create_operand_bundle("deopt", &[x]).unwrap().unwrap();
        assert_eq!(
            s.build_call(b, f, &[x], &[deopt, deopt], "r"),
            Err(ShimError::BundleReused)
        );
    }

    #[test]
    fn disposed_bundle_is_stale() {
        let Fixture { mut s, f, b, .. } = fixture(Generation::V18_0);
        let x = s.get_param(f, 0).unwrap();
        let deopt = s.create_operand_bundle("deopt", &[]).unwrap().unwrap();
        s.dispose_operand_bundle(deopt).unwrap();

        let stale = ShimError::StaleHandle {
            kind: "operand bundle",
        };
        assert_eq!(s.build_call(b, f, &[x], &[deopt], "r"), Err(stale.clone()));
        assert_eq!(s.dispose_operand_bundle(deopt), Err(stale));
    }

    #[test]
    fn failed_call_leaves_bundle_available() {
        let Fixture { mut s, f, b, .. } = fixture(Generation::V18_0);
        let x = s.get_param(f, 0).unwrap();
        let deopt = s.create_operand_bundle("deopt", &[]).unwrap().unwrap();

        assert!(s.build_call(b, f, &[], &[deopt], "bad").is_err());
        s.build_call(b, f, &[x], &[deopt], "good").unwrap();
    }

    #[test]
    fn invoke_carries_bundles() {
        let mut fx = fixture(Generation::V18_0);
        let ok = fx.s.append_basic_block(fx.f, "ok").unwrap();
        let lpad = fx.s.append_basic_block(fx.f, "lpad").unwrap();
        let x = fx.s.get_param(fx.f, 0).unwrap();
        let funclet = fx.s.create_operand_bundle("funclet", &[]).unwrap().unwrap();

        fx.s.build_invoke(fx.b, fx.f, &[x], ok, lpad, &[funclet], "r").unwrap();

        let ir = fx.ir();
        assert!(ir.contains(r#"[ "funclet"() ]"#), "{ir}");
        assert!(ir.contains("to label %ok unwind label %lpad"), "{ir}");
    }
}
