//! Code emission façade: atomics, exception-handling pads, operand bundles,
//! and call/invoke.

use llvm_sys::core::{
    LLVMAddHandler, LLVMBuildAtomicCmpXchg, LLVMBuildCatchPad, LLVMBuildCatchRet,
    LLVMBuildCatchSwitch, LLVMConstNull, LLVMCountParamTypes, LLVMGetReturnType,
    LLVMGlobalGetValueType, LLVMIsACatchPadInst, LLVMIsACatchSwitchInst, LLVMIsAFunction,
    LLVMIsALoadInst, LLVMIsAStoreInst, LLVMIsFunctionVarArg, LLVMSetOrdering,
    LLVMTokenTypeInContext, LLVMTypeOf,
};
use llvm_sys::prelude::{LLVMTypeRef, LLVMValueRef};
use llvm_sys::{LLVMAtomicOrdering, LLVMTypeKind};
use smallvec::SmallVec;

use crate::error::ShimError;
use crate::handle::{
    BasicBlockHandle, Handle, IrBuilderHandle, ModuleHandle, OperandBundleHandle, Slot,
    ValueHandle,
};
use crate::linked::{self, c_string, llvm_bool, BundleInputs};
use crate::session::{BundleState, Session};

/// Memory ordering of an atomic operation, in LLVM-C numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AtomicOrdering {
    NotAtomic = 0,
    Unordered = 1,
    Monotonic = 2,
    Acquire = 4,
    Release = 5,
    AcquireRelease = 6,
    SequentiallyConsistent = 7,
}

impl AtomicOrdering {
    fn to_llvm(self) -> LLVMAtomicOrdering {
        match self {
            Self::NotAtomic => LLVMAtomicOrdering::LLVMAtomicOrderingNotAtomic,
            Self::Unordered => LLVMAtomicOrdering::LLVMAtomicOrderingUnordered,
            Self::Monotonic => LLVMAtomicOrdering::LLVMAtomicOrderingMonotonic,
            Self::Acquire => LLVMAtomicOrdering::LLVMAtomicOrderingAcquire,
            Self::Release => LLVMAtomicOrdering::LLVMAtomicOrderingRelease,
            Self::AcquireRelease => LLVMAtomicOrdering::LLVMAtomicOrderingAcquireRelease,
            Self::SequentiallyConsistent => {
                LLVMAtomicOrdering::LLVMAtomicOrderingSequentiallyConsistent
            }
        }
    }
}

/// Decode an ordering in LLVM-C numbering. `3` is unused.
pub fn ordering_from_raw(raw: u32) -> Result<AtomicOrdering, ShimError> {
    Ok(match raw {
        0 => AtomicOrdering::NotAtomic,
        1 => AtomicOrdering::Unordered,
        2 => AtomicOrdering::Monotonic,
        4 => AtomicOrdering::Acquire,
        5 => AtomicOrdering::Release,
        6 => AtomicOrdering::AcquireRelease,
        7 => AtomicOrdering::SequentiallyConsistent,
        _ => {
            return Err(ShimError::InvalidEnumValue {
                what: "atomic ordering",
                value: raw,
            })
        }
    })
}

/// A bundle resolved for one call site.
type ResolvedBundle = (String, SmallVec<[LLVMValueRef; 2]>);

impl Session {
    // -- Atomics --

    /// Compare-exchange yielding `{ T, i1 }`. The failure ordering cannot
    /// release.
    pub fn build_atomic_cmpxchg(
        &mut self,
        builder: IrBuilderHandle,
        ptr: ValueHandle,
        cmp: ValueHandle,
        new: ValueHandle,
        success: AtomicOrdering,
        failure: AtomicOrdering,
    ) -> Result<ValueHandle, ShimError> {
        use AtomicOrdering::{AcquireRelease, NotAtomic, Release, Unordered};

        let (b, module) = self.positioned(builder)?;
        if matches!(success, NotAtomic | Unordered)
            || matches!(failure, NotAtomic | Unordered | Release | AcquireRelease)
        {
            return Err(ShimError::InvalidOrdering);
        }
        let ptr = self.pointer_operand("build_atomic_cmpxchg", ptr)?;
        let cmp = self.value(cmp)?;
        let new = self.value(new)?;
        // SAFETY: both values are live.
        if unsafe { LLVMTypeOf(cmp) != LLVMTypeOf(new) } {
            return Err(ShimError::operand(
                "build_atomic_cmpxchg",
                "expected and new values differ in type",
            ));
        }
        // SAFETY: the builder is positioned in a live module; operands checked above.
        let inst = unsafe {
            LLVMBuildAtomicCmpXchg(
                b,
                ptr,
                cmp,
                new,
                success.to_llvm(),
                failure.to_llvm(),
                llvm_bool(false),
            )
        };
        Ok(self.built(inst, module))
    }

    /// Change the ordering of an existing load or store in place. Loads
    /// cannot release and stores cannot acquire.
    pub fn set_memory_ordering(
        &mut self,
        inst: ValueHandle,
        ordering: AtomicOrdering,
    ) -> Result<(), ShimError> {
        use AtomicOrdering::{Acquire, AcquireRelease, Release};

        let inst = self.value(inst)?;
        // SAFETY: `inst` is a live value.
        let (is_load, is_store) =
            unsafe { (!LLVMIsALoadInst(inst).is_null(), !LLVMIsAStoreInst(inst).is_null()) };
        let allowed = (is_load && !matches!(ordering, Release | AcquireRelease))
            || (is_store && !matches!(ordering, Acquire | AcquireRelease));
        if !allowed {
            return Err(ShimError::InvalidOrdering);
        }
        // SAFETY: `inst` is a load or store.
        unsafe { LLVMSetOrdering(inst, ordering.to_llvm()) };
        Ok(())
    }

    // -- Exception handling pads --

    /// A missing parent pad is the `none` token.
    fn parent_pad(&self, parent: Option<ValueHandle>) -> Result<LLVMValueRef, ShimError> {
        match parent {
            Some(parent) => self.value(parent),
            // SAFETY: the null token is `none`, a context-level constant.
            None => Ok(unsafe { LLVMConstNull(LLVMTokenTypeInContext(self.llvm_context())) }),
        }
    }

    fn exception_pads_available(&self, operation: &'static str) -> bool {
        if !self.caps.exception_pads {
            tracing::debug!(
                operation,
                generation = %self.generation(),
                "exception pads unavailable"
            );
        }
        self.caps.exception_pads
    }

    /// `Ok(None)` when the generation has no exception pads.
    pub fn build_catch_pad(
        &mut self,
        builder: IrBuilderHandle,
        parent_pad: Option<ValueHandle>,
        args: &[ValueHandle],
        name: &str,
    ) -> Result<Option<ValueHandle>, ShimError> {
        if !self.exception_pads_available("catchpad") {
            return Ok(None);
        }
        let (b, module) = self.positioned(builder)?;
        let mut args = self.values(args)?;
        let parent = self.parent_pad(parent_pad)?;
        let name = c_string("value name", name)?;
        // SAFETY: the builder is positioned; `parent` and `args` are live.
        let pad = unsafe {
            LLVMBuildCatchPad(b, parent, args.as_mut_ptr(), args.len() as u32, name.as_ptr())
        };
        Ok(Some(self.built(pad, module)))
    }

    /// `Ok(None)` when the generation has no exception pads.
    pub fn build_catch_ret(
        &mut self,
        builder: IrBuilderHandle,
        pad: ValueHandle,
        target: BasicBlockHandle,
    ) -> Result<Option<ValueHandle>, ShimError> {
        if !self.exception_pads_available("catchret") {
            return Ok(None);
        }
        let (b, module) = self.positioned(builder)?;
        let pad = self.value(pad)?;
        // SAFETY: `pad` is a live value.
        if unsafe { LLVMIsACatchPadInst(pad) }.is_null() {
            return Err(ShimError::operand("build_catch_ret", "value is not a catchpad"));
        }
        let target = self.same_function_block(builder, target)?;
        // SAFETY: the builder is positioned; `pad` and `target` are live.
        let ret = unsafe { LLVMBuildCatchRet(b, pad, target) };
        Ok(Some(self.built(ret, module)))
    }

    /// `Ok(None)` when the generation has no exception pads. A missing
    /// unwind block unwinds to the caller.
    pub fn build_catch_switch(
        &mut self,
        builder: IrBuilderHandle,
        parent_pad: Option<ValueHandle>,
        unwind: Option<BasicBlockHandle>,
        num_handlers: u32,
        name: &str,
    ) -> Result<Option<ValueHandle>, ShimError> {
        if !self.exception_pads_available("catchswitch") {
            return Ok(None);
        }
        let (b, module) = self.positioned(builder)?;
        let unwind = match unwind {
            Some(block) => self.same_function_block(builder, block)?,
            None => std::ptr::null_mut(),
        };
        let parent = self.parent_pad(parent_pad)?;
        let name = c_string("value name", name)?;
        // SAFETY: the builder is positioned; `unwind` is live or null.
        let switch =
            unsafe { LLVMBuildCatchSwitch(b, parent, unwind, num_handlers, name.as_ptr()) };
        Ok(Some(self.built(switch, module)))
    }

    pub fn add_handler(
        &mut self,
        catch_switch: ValueHandle,
        handler: BasicBlockHandle,
    ) -> Result<(), ShimError> {
        let entry = self.value_entry(catch_switch)?;
        // SAFETY: `entry.raw` is a live value.
        if unsafe { LLVMIsACatchSwitchInst(entry.raw) }.is_null() {
            return Err(ShimError::operand("add_handler", "value is not a catchswitch"));
        }
        let handler = self.block_entry(handler)?;
        if handler.module != entry.module {
            return Err(ShimError::operand(
                "add_handler",
                "handler block belongs to another module",
            ));
        }
        // SAFETY: both live in the same module.
        unsafe { LLVMAddHandler(entry.raw, handler.raw) };
        Ok(())
    }

    // -- Operand bundles --

    /// Caller-owned bundle; release it with
    /// [`dispose_operand_bundle`](Self::dispose_operand_bundle).
    ///
    /// `Ok(None)` when the session cannot attach bundles to calls.
    pub fn create_operand_bundle(
        &mut self,
        tag: &str,
        args: &[ValueHandle],
    ) -> Result<Option<OperandBundleHandle>, ShimError> {
        if !self.caps.operand_bundles {
            tracing::debug!(
                tag,
                generation = %self.generation(),
                "operand bundles unavailable"
            );
            return Ok(None);
        }
        let inputs = args
            .iter()
            .map(|&a| self.value(a).map(|_| a))
            .collect::<Result<_, _>>()?;
        let handle = OperandBundleHandle::from_slot(self.bundles.len());
        self.bundles.push(BundleState::Available {
            tag: tag.to_string(),
            inputs,
        });
        Ok(Some(handle))
    }

    pub fn dispose_operand_bundle(&mut self, bundle: OperandBundleHandle) -> Result<(), ShimError> {
        if *self.bundle_state(bundle)? == BundleState::Disposed {
            return Err(ShimError::stale(OperandBundleHandle::KIND.name()));
        }
        self.bundles[bundle.slot()] = BundleState::Disposed;
        Ok(())
    }

    /// Resolve bundles for one call site without consuming them yet.
    fn resolve_bundles(
        &self,
        bundles: &[OperandBundleHandle],
    ) -> Result<Vec<ResolvedBundle>, ShimError> {
        let mut out = Vec::with_capacity(bundles.len());
        for (i, &handle) in bundles.iter().enumerate() {
            if bundles[..i].contains(&handle) {
                return Err(ShimError::BundleReused);
            }
            match self.bundle_state(handle)? {
                BundleState::Available { tag, inputs } => {
                    let inputs = inputs
                        .iter()
                        .map(|&v| self.value(v))
                        .collect::<Result<_, _>>()?;
                    out.push((tag.clone(), inputs));
                }
                BundleState::Attached => return Err(ShimError::BundleReused),
                BundleState::Disposed => {
                    return Err(ShimError::stale(OperandBundleHandle::KIND.name()))
                }
            }
        }
        Ok(out)
    }

    fn mark_attached(&mut self, bundles: &[OperandBundleHandle]) {
        for handle in bundles {
            self.bundles[handle.slot()] = BundleState::Attached;
        }
    }

    // -- Calls --

    /// A function defined or declared in `module`, its function type, and
    /// the call's arguments checked against it.
    fn callee(
        &self,
        operation: &'static str,
        func: ValueHandle,
        module: ModuleHandle,
        args: &[ValueHandle],
    ) -> Result<(LLVMValueRef, LLVMTypeRef, SmallVec<[LLVMValueRef; 4]>), ShimError> {
        let entry = self.value_entry(func)?;
        // SAFETY: `entry.raw` is a live value.
        if entry.module != Some(module) || unsafe { LLVMIsAFunction(entry.raw) }.is_null() {
            return Err(ShimError::operand(
                operation,
                "callee is not a function of the builder's module",
            ));
        }
        // SAFETY: `entry.raw` is a function.
        let (fn_ty, params, varargs) = unsafe {
            let fn_ty = LLVMGlobalGetValueType(entry.raw);
            (fn_ty, LLVMCountParamTypes(fn_ty), LLVMIsFunctionVarArg(fn_ty) != 0)
        };
        let short = args.len() < params as usize;
        if short || (!varargs && args.len() != params as usize) {
            return Err(ShimError::ArgumentCount {
                expected: params,
                found: args.len(),
            });
        }
        Ok((entry.raw, fn_ty, self.values(args)?))
    }

    /// Void results cannot be named.
    fn result_name(fn_ty: LLVMTypeRef, name: &str) -> Result<std::ffi::CString, ShimError> {
        // SAFETY: `fn_ty` is a function type.
        let ret = unsafe { LLVMGetReturnType(fn_ty) };
        let name = if Self::type_kind(ret) == LLVMTypeKind::LLVMVoidTypeKind {
            ""
        } else {
            name
        };
        c_string("value name", name)
    }

    /// Call `func`. With no bundles the result is identical to a plain call.
    pub fn build_call(
        &mut self,
        builder: IrBuilderHandle,
        func: ValueHandle,
        args: &[ValueHandle],
        bundles: &[OperandBundleHandle],
        name: &str,
    ) -> Result<ValueHandle, ShimError> {
        let (b, module) = self.positioned(builder)?;
        let (func, fn_ty, mut args) = self.callee("build_call", func, module, args)?;
        let resolved = self.resolve_bundles(bundles)?;
        let mut inputs: Vec<BundleInputs<'_>> = resolved
            .iter()
            .map(|(tag, values)| (tag.as_str(), values.clone()))
            .collect();
        let name = Self::result_name(fn_ty, name)?;
        // SAFETY: callee, arguments and bundle inputs are live in `module`;
        // the argument count matches the function type.
        let call =
            unsafe { linked::build_call(b, fn_ty, func, &mut args, &mut inputs, &name) };
        self.mark_attached(bundles);
        Ok(self.built(call, module))
    }

    pub fn build_invoke(
        &mut self,
        builder: IrBuilderHandle,
        func: ValueHandle,
        args: &[ValueHandle],
        then: BasicBlockHandle,
        catch: BasicBlockHandle,
        bundles: &[OperandBundleHandle],
        name: &str,
    ) -> Result<ValueHandle, ShimError> {
        let (b, module) = self.positioned(builder)?;
        let (func, fn_ty, mut args) = self.callee("build_invoke", func, module, args)?;
        let then = self.same_function_block(builder, then)?;
        let catch = self.same_function_block(builder, catch)?;
        let resolved = self.resolve_bundles(bundles)?;
        let mut inputs: Vec<BundleInputs<'_>> = resolved
            .iter()
            .map(|(tag, values)| (tag.as_str(), values.clone()))
            .collect();
        let name = Self::result_name(fn_ty, name)?;
        // SAFETY: as for `build_call`; both successors are in the current function.
        let invoke = unsafe {
            linked::build_invoke(b, fn_ty, func, &mut args, then, catch, &mut inputs, &name)
        };
        self.mark_attached(bundles);
        Ok(self.built(invoke, module))
    }
}

#[cfg(test)]
mod tests;
