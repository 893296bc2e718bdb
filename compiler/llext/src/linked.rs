//! The linked LLVM release.
//!
//! Holds the calls whose LLVM-C entry points exist only on some releases,
//! and the narrowing of a generation's capability row to what the linked
//! C API can express. Everything else calls `llvm_sys` directly.

use std::ffi::{c_char, CStr, CString};

use llext_caps::{Capabilities, Generation};
use llvm_sys::core::LLVMDisposeMessage;
use llvm_sys::prelude::{LLVMBasicBlockRef, LLVMBool, LLVMBuilderRef, LLVMTypeRef, LLVMValueRef};
use llvm_sys::target_machine::LLVMTargetMachineRef;
use smallvec::SmallVec;

use crate::error::ShimError;

/// Generation row of the LLVM release this build links.
#[cfg(feature = "llvm17-0")]
pub const LINKED_GENERATION: Generation = Generation::V17_0;
#[cfg(feature = "llvm18-1")]
pub const LINKED_GENERATION: Generation = Generation::V18_0;

/// One operand bundle resolved for a call site: tag and input values.
pub(crate) type BundleInputs<'a> = (&'a str, SmallVec<[LLVMValueRef; 2]>);

/// Narrow `caps` to what the linked LLVM-C API can express.
pub(crate) fn restrict(mut caps: Capabilities) -> Capabilities {
    // No LLVM-C release exposes TargetOptions::EmulatedTLS.
    caps.emulated_tls_option = false;
    if !LINKED_GENERATION.at_least(18, 0) {
        // LLVMCreateOperandBundle and LLVMSetTargetMachineGlobalISel arrived in 18.
        caps.operand_bundles = false;
        caps.global_instruction_selection = false;
    }
    caps
}

pub(crate) fn llvm_bool(value: bool) -> LLVMBool {
    LLVMBool::from(value)
}

/// NUL-terminated copy of `text` for LLVM-C parameters without a length.
pub(crate) fn c_string(what: &'static str, text: &str) -> Result<CString, ShimError> {
    CString::new(text).map_err(|_| ShimError::InteriorNul { what })
}

/// Copy and release a message LLVM allocated for the caller.
pub(crate) unsafe fn take_message(message: *mut c_char) -> String {
    if message.is_null() {
        return "unknown error".to_string();
    }
    let text = CStr::from_ptr(message).to_string_lossy().into_owned();
    LLVMDisposeMessage(message);
    text
}

// -- Calls and invokes --

#[cfg(feature = "llvm18-1")]
mod bundles {
    use llvm_sys::core::{LLVMCreateOperandBundle, LLVMDisposeOperandBundle};
    use llvm_sys::prelude::LLVMOperandBundleRef;

    use super::BundleInputs;

    /// RAII guard for `LLVMOperandBundleRef`s copied into one instruction.
    pub(super) struct OwnedBundles(Vec<LLVMOperandBundleRef>);

    impl OwnedBundles {
        pub(super) fn new(bundles: &mut [BundleInputs<'_>]) -> Self {
            let refs = bundles
                .iter_mut()
                .map(|(tag, inputs)| unsafe {
                    LLVMCreateOperandBundle(
                        tag.as_ptr().cast(),
                        tag.len(),
                        inputs.as_mut_ptr(),
                        inputs.len() as u32,
                    )
                })
                .collect();
            Self(refs)
        }

        pub(super) fn as_mut_ptr(&mut self) -> *mut LLVMOperandBundleRef {
            self.0.as_mut_ptr()
        }

        pub(super) fn len(&self) -> u32 {
            self.0.len() as u32
        }
    }

    impl Drop for OwnedBundles {
        fn drop(&mut self) {
            for bundle in self.0.drain(..) {
                unsafe { LLVMDisposeOperandBundle(bundle) };
            }
        }
    }
}

/// `call` with operand bundles. No bundles builds the plain call.
#[cfg(feature = "llvm18-1")]
pub(crate) unsafe fn build_call(
    builder: LLVMBuilderRef,
    fn_ty: LLVMTypeRef,
    func: LLVMValueRef,
    args: &mut [LLVMValueRef],
    bundles: &mut [BundleInputs<'_>],
    name: &CStr,
) -> LLVMValueRef {
    use llvm_sys::core::{LLVMBuildCall2, LLVMBuildCallWithOperandBundles};

    if bundles.is_empty() {
        return LLVMBuildCall2(
            builder,
            fn_ty,
            func,
            args.as_mut_ptr(),
            args.len() as u32,
            name.as_ptr(),
        );
    }
    let mut owned = bundles::OwnedBundles::new(bundles);
    LLVMBuildCallWithOperandBundles(
        builder,
        fn_ty,
        func,
        args.as_mut_ptr(),
        args.len() as u32,
        owned.as_mut_ptr(),
        owned.len(),
        name.as_ptr(),
    )
}

#[cfg(not(feature = "llvm18-1"))]
pub(crate) unsafe fn build_call(
    builder: LLVMBuilderRef,
    fn_ty: LLVMTypeRef,
    func: LLVMValueRef,
    args: &mut [LLVMValueRef],
    bundles: &mut [BundleInputs<'_>],
    name: &CStr,
) -> LLVMValueRef {
    debug_assert!(bundles.is_empty(), "operand bundles need LLVM 18");
    llvm_sys::core::LLVMBuildCall2(
        builder,
        fn_ty,
        func,
        args.as_mut_ptr(),
        args.len() as u32,
        name.as_ptr(),
    )
}

/// `invoke` with operand bundles. No bundles builds the plain invoke.
#[cfg(feature = "llvm18-1")]
pub(crate) unsafe fn build_invoke(
    builder: LLVMBuilderRef,
    fn_ty: LLVMTypeRef,
    func: LLVMValueRef,
    args: &mut [LLVMValueRef],
    then: LLVMBasicBlockRef,
    catch: LLVMBasicBlockRef,
    bundles: &mut [BundleInputs<'_>],
    name: &CStr,
) -> LLVMValueRef {
    use llvm_sys::core::{LLVMBuildInvoke2, LLVMBuildInvokeWithOperandBundles};

    if bundles.is_empty() {
        return LLVMBuildInvoke2(
            builder,
            fn_ty,
            func,
            args.as_mut_ptr(),
            args.len() as u32,
            then,
            catch,
            name.as_ptr(),
        );
    }
    let mut owned = bundles::OwnedBundles::new(bundles);
    LLVMBuildInvokeWithOperandBundles(
        builder,
        fn_ty,
        func,
        args.as_mut_ptr(),
        args.len() as u32,
        then,
        catch,
        owned.as_mut_ptr(),
        owned.len(),
        name.as_ptr(),
    )
}

#[cfg(not(feature = "llvm18-1"))]
pub(crate) unsafe fn build_invoke(
    builder: LLVMBuilderRef,
    fn_ty: LLVMTypeRef,
    func: LLVMValueRef,
    args: &mut [LLVMValueRef],
    then: LLVMBasicBlockRef,
    catch: LLVMBasicBlockRef,
    bundles: &mut [BundleInputs<'_>],
    name: &CStr,
) -> LLVMValueRef {
    debug_assert!(bundles.is_empty(), "operand bundles need LLVM 18");
    llvm_sys::core::LLVMBuildInvoke2(
        builder,
        fn_ty,
        func,
        args.as_mut_ptr(),
        args.len() as u32,
        then,
        catch,
        name.as_ptr(),
    )
}

// -- Target machines --

#[cfg(feature = "llvm18-1")]
pub(crate) unsafe fn set_global_isel(machine: LLVMTargetMachineRef, enabled: bool) {
    llvm_sys::target_machine::LLVMSetTargetMachineGlobalISel(machine, llvm_bool(enabled));
}

/// Unreachable through [`restrict`]; LLVM 17's C API has no toggle.
#[cfg(not(feature = "llvm18-1"))]
pub(crate) unsafe fn set_global_isel(_machine: LLVMTargetMachineRef, _enabled: bool) {}
