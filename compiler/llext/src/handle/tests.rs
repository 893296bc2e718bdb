#![allow(clippy::unwrap_used, reason = "tests use unwrap for brevity")]

use proptest::prelude::*;

use super::*;

#[test]
fn null_is_zero() {
    assert_eq!(to_raw::<ValueHandle>(None), 0);
    assert_eq!(from_raw::<ValueHandle>(0).unwrap(), None);
}

#[test]
fn tag_lives_in_high_byte() {
    let raw = to_raw(Some(MetadataHandle::from_index(0)));
    assert_eq!(raw, (3 << 56) | 1);
}

#[test]
fn wrong_kind_is_reported() {
    let raw = to_raw(Some(ValueHandle::from_index(7)));
    assert_eq!(
        from_raw::<MetadataHandle>(raw),
        Err(ShimError::WrongHandleKind {
            expected: "metadata",
            found: "value",
        })
    );
    assert!(matches!(
        from_raw::<MetadataHandle>(0xDEAD),
        Err(ShimError::WrongHandleKind {
            found: "an untagged value",
            ..
        })
    ));
}

#[test]
fn tagged_zero_index_is_stale() {
    let raw = u64::from(HandleKind::Module as u8) << 56;
    assert_eq!(
        from_raw::<ModuleHandle>(raw),
        Err(ShimError::StaleHandle { kind: "module" })
    );
}

#[test]
fn slots_roundtrip_through_indices() {
    let handle = TypeHandle::from_slot(41);
    assert_eq!(handle.slot(), 41);
    assert_eq!(handle.index(), 41);
    assert_eq!(TypeHandle::from_index(41), handle);
}

proptest! {
    #[test]
    fn encoding_roundtrips(index in 0u32..u32::MAX) {
        let handle = BasicBlockHandle::from_index(index);
        prop_assert_eq!(from_raw::<BasicBlockHandle>(to_raw(Some(handle))).unwrap(), Some(handle));
    }
}
