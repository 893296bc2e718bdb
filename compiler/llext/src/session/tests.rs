#![allow(clippy::unwrap_used, reason = "tests use unwrap for brevity")]

use pretty_assertions::assert_eq;

use super::*;

#[test]
fn default_session_uses_active_generation() {
    let s = Session::default();
    assert_eq!(s.generation(), Generation::ACTIVE);
    assert_eq!(s.capabilities(), linked::restrict(Generation::ACTIVE.capabilities()));
    assert_eq!(s.config().dwarf_version(), 4);
    assert!(s.config().producer().starts_with("llext "));
}

#[test]
fn capabilities_follow_configured_generation() {
    let s = Session::with_config(SessionConfig::new().with_generation(Generation::V3_6));
    assert!(!s.capabilities().exception_pads);
    assert!(!s.capabilities().operand_bundles);

    let s = Session::with_config(SessionConfig::new().with_generation(Generation::V8_0));
    assert!(s.capabilities().frame_pointer_attribute);
    assert!(!s.capabilities().codegen_opt_level_enum);
    assert!(!s.capabilities().emulated_tls_option);
}

#[test]
fn released_metadata_resolves_as_stale() {
    let mut s = Session::new();
    let temp = s.create_temporary_node(&[]).unwrap();
    let real = s.create_temporary_node(&[None]).unwrap();
    let raw = s.metadata(temp).unwrap();
    assert!(!raw.is_null());

    s.replace_all_uses_with(temp, real).unwrap();
    assert_eq!(
        s.metadata(temp),
        Err(ShimError::StaleHandle { kind: "metadata" })
    );
    assert!(s.opt_metadata(None).unwrap().is_null());
}

#[test]
fn interning_is_stable() {
    let mut s = Session::new();
    let m = s.create_module("m").unwrap();
    let void = s.void_type();
    let fn_ty = s.function_type(void, &[], false).unwrap();
    let f = s.add_function(m, "f", fn_ty).unwrap();
    let raw = s.value(f).unwrap();
    assert_eq!(s.intern_value(raw, Some(m)), f);
    assert_eq!(s.value_entry(f).unwrap().module, Some(m));
}

#[test]
fn out_of_range_handles_are_stale() {
    let s = Session::new();
    assert_eq!(
        s.machine(TargetMachineHandle::from_slot(0)).unwrap_err(),
        ShimError::StaleHandle {
            kind: "target machine"
        }
    );
    assert!(s.engine(ExecutionEngineHandle::from_slot(3)).is_err());
    assert!(s.ir_builder(IrBuilderHandle::from_slot(0)).is_err());
    assert!(s.bundle_state(OperandBundleHandle::from_slot(0)).is_err());
    assert!(s.live_module(ModuleHandle::from_slot(0)).is_err());
    assert!(s.metadata(MetadataHandle::from_slot(0)).is_err());
}

#[test]
fn disposed_module_releases_its_tables() {
    let mut s = Session::new();
    let m = s.create_module("gone").unwrap();
    let void = s.void_type();
    let fn_ty = s.function_type(void, &[], false).unwrap();
    let f = s.add_function(m, "f", fn_ty).unwrap();
    let entry = s.append_basic_block(f, "entry").unwrap();
    assert!(s.live_module(m).is_ok());

    s.dispose_module(m).unwrap();
    assert!(matches!(s.modules[m.slot()], ModuleSlot::Disposed));
    assert!(s.live_module(m).is_err());
    assert!(s.values.get(f).is_none());
    assert!(s.blocks.get(entry).is_none());
    // Context-level objects survive.
    assert!(s.ty(void).is_ok());
}

#[test]
fn dropping_a_busy_session_releases_everything() {
    let mut s = Session::new();
    let m = s.create_module("busy").unwrap();
    let dib = s.new_di_builder(m).unwrap();
    s.di_create_file(dib, "a.c", "/src").unwrap();
    s.create_temporary_node(&[]).unwrap();
    s.create_builder();
    drop(s);
}
