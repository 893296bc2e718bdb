//! The session: owner of the LLVM context and every handle table.
//!
//! Handles index into the tables below. Tables for values, blocks, types and
//! targets deduplicate by LLVM pointer, so asking twice for the same object
//! yields the same handle. Entries whose module leaves the caller's
//! ownership are cleared, and a pointer LLVM later reuses gets a new handle.

use std::fmt;
use std::hash::Hash;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use llext_caps::{Capabilities, Generation};
use llvm_sys::prelude::{
    LLVMBasicBlockRef, LLVMBuilderRef, LLVMContextRef, LLVMMetadataRef, LLVMModuleRef,
    LLVMTypeRef, LLVMValueRef,
};
use llvm_sys::target_machine::LLVMTargetRef;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::config::SessionConfig;
use crate::debug_info::DiBuilderSlot;
use crate::error::ShimError;
use crate::handle::{
    BasicBlockHandle, DIBuilderHandle, ExecutionEngineHandle, Handle, IrBuilderHandle,
    MetadataHandle, ModuleHandle, OperandBundleHandle, Slot, TargetHandle, TargetMachineHandle,
    TypeHandle, ValueHandle,
};
use crate::jit::Engine;
use crate::linked;
use crate::target::OwnedTargetMachine;

/// Ownership state of a module handle.
#[derive(Debug)]
pub(crate) enum ModuleSlot {
    Live(Module<'static>),
    /// Ownership moved into an execution engine.
    OwnedByEngine(ExecutionEngineHandle),
    Disposed,
}

/// An LLVM object plus the module it lives in. Context-level objects
/// (types, constants, targets) have no module.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Entry<R> {
    pub(crate) raw: R,
    pub(crate) module: Option<ModuleHandle>,
}

/// Handle table keyed by LLVM pointer.
#[derive(Debug)]
pub(crate) struct RefTable<R, H> {
    entries: Vec<Option<Entry<R>>>,
    index: FxHashMap<R, H>,
}

impl<R, H> Default for RefTable<R, H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: FxHashMap::default(),
        }
    }
}

impl<R: Copy + Eq + Hash, H: Slot> RefTable<R, H> {
    pub(crate) fn intern(&mut self, raw: R, module: Option<ModuleHandle>) -> H {
        if let Some(&handle) = self.index.get(&raw) {
            return handle;
        }
        let handle = H::from_slot(self.entries.len());
        self.entries.push(Some(Entry { raw, module }));
        self.index.insert(raw, handle);
        handle
    }

    pub(crate) fn get(&self, handle: H) -> Option<Entry<R>> {
        self.entries.get(handle.slot()).copied().flatten()
    }

    /// Forget every entry living in `module`.
    fn release_module(&mut self, module: ModuleHandle) {
        for slot in &mut self.entries {
            if slot.is_some_and(|entry| entry.module == Some(module)) {
                if let Some(entry) = slot.take() {
                    self.index.remove(&entry.raw);
                }
            }
        }
    }
}

/// One metadata node known to the session.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MetadataEntry {
    pub(crate) raw: LLVMMetadataRef,
    /// Created as a temporary; must be replaced before it is emitted.
    pub(crate) temporary: bool,
    /// Set when the node was replaced; the handle is stale from then on.
    pub(crate) replaced_by: Option<MetadataHandle>,
}

/// An instruction builder and the block it appends to.
#[derive(Debug)]
pub(crate) struct IrBuilderSlot {
    pub(crate) builder: Builder<'static>,
    pub(crate) block: Option<BasicBlockHandle>,
}

/// Lifecycle of a caller-owned operand bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum BundleState {
    Available {
        tag: String,
        inputs: SmallVec<[ValueHandle; 2]>,
    },
    /// Copied into exactly one call or invoke; still awaiting dispose.
    Attached,
    Disposed,
}

/// One LLVM context plus the tables behind every opaque handle.
///
/// Mutating operations take `&mut self`, so a session is never mutated from
/// two places at once. Dropping the session releases everything it owns.
pub struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) caps: Capabilities,
    /// Leaked on creation and reclaimed in `Drop`, after every module,
    /// builder and engine borrowing it.
    pub(crate) ctx: &'static Context,
    pub(crate) modules: Vec<ModuleSlot>,
    pub(crate) values: RefTable<LLVMValueRef, ValueHandle>,
    pub(crate) blocks: RefTable<LLVMBasicBlockRef, BasicBlockHandle>,
    pub(crate) types: RefTable<LLVMTypeRef, TypeHandle>,
    pub(crate) targets: RefTable<LLVMTargetRef, TargetHandle>,
    pub(crate) metadata: Vec<MetadataEntry>,
    pub(crate) metadata_index: FxHashMap<LLVMMetadataRef, MetadataHandle>,
    /// Replacements recorded but not yet applied, in recording order.
    pub(crate) pending_redirects: Vec<(MetadataHandle, MetadataHandle)>,
    pub(crate) di_builders: Vec<Option<DiBuilderSlot>>,
    pub(crate) di_builder_of: FxHashMap<ModuleHandle, DIBuilderHandle>,
    pub(crate) ir_builders: Vec<Option<IrBuilderSlot>>,
    pub(crate) machines: Vec<Option<OwnedTargetMachine>>,
    pub(crate) engines: Vec<Option<Engine>>,
    pub(crate) bundles: Vec<BundleState>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation())
            .field("modules", &self.modules.len())
            .field("metadata", &self.metadata.len())
            .field("pending_redirects", &self.pending_redirects.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.engines.clear();
        self.ir_builders.clear();
        self.di_builders.clear();
        self.modules.clear();
        self.machines.clear();
        // Unreplaced temporaries are left to the context; disposing one that
        // still has uses would leave dangling operands behind.
        // SAFETY: `ctx` came from `Box::leak` in `with_config`, and nothing
        // that borrows it is left.
        drop(unsafe { Box::from_raw(std::ptr::from_ref(self.ctx).cast_mut()) });
    }
}

impl Session {
    /// Session on the build's active generation.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let caps = linked::restrict(config.generation().capabilities());
        tracing::debug!(
            generation = %config.generation(),
            linked = %linked::LINKED_GENERATION,
            "session created"
        );
        Self {
            config,
            caps,
            ctx: Box::leak(Box::new(Context::create())),
            modules: Vec::new(),
            values: RefTable::default(),
            blocks: RefTable::default(),
            types: RefTable::default(),
            targets: RefTable::default(),
            metadata: Vec::new(),
            metadata_index: FxHashMap::default(),
            pending_redirects: Vec::new(),
            di_builders: Vec::new(),
            di_builder_of: FxHashMap::default(),
            ir_builders: Vec::new(),
            machines: Vec::new(),
            engines: Vec::new(),
            bundles: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn generation(&self) -> Generation {
        self.config.generation()
    }

    /// The configured generation's row, narrowed to what the linked LLVM
    /// can express.
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub(crate) fn llvm_context(&self) -> LLVMContextRef {
        self.ctx.raw()
    }

    // -- Handle resolution --

    /// A module the caller still owns.
    pub(crate) fn live_module(&self, module: ModuleHandle) -> Result<&Module<'static>, ShimError> {
        match self.modules.get(module.slot()) {
            Some(ModuleSlot::Live(m)) => Ok(m),
            _ => Err(ShimError::stale(ModuleHandle::KIND.name())),
        }
    }

    pub(crate) fn module_ref(&self, module: ModuleHandle) -> Result<LLVMModuleRef, ShimError> {
        Ok(self.live_module(module)?.as_mut_ptr())
    }

    /// `Ok` for context-level objects and objects of a live module.
    fn check_owner(&self, owner: Option<ModuleHandle>, kind: &'static str) -> Result<(), ShimError> {
        match owner {
            Some(module) if self.live_module(module).is_err() => Err(ShimError::stale(kind)),
            _ => Ok(()),
        }
    }

    pub(crate) fn value_entry(&self, value: ValueHandle) -> Result<Entry<LLVMValueRef>, ShimError> {
        let entry = self
            .values
            .get(value)
            .ok_or_else(|| ShimError::stale(ValueHandle::KIND.name()))?;
        self.check_owner(entry.module, ValueHandle::KIND.name())?;
        Ok(entry)
    }

    pub(crate) fn value(&self, value: ValueHandle) -> Result<LLVMValueRef, ShimError> {
        Ok(self.value_entry(value)?.raw)
    }

    pub(crate) fn values(
        &self,
        values: &[ValueHandle],
    ) -> Result<SmallVec<[LLVMValueRef; 4]>, ShimError> {
        values.iter().map(|&v| self.value(v)).collect()
    }

    pub(crate) fn ty(&self, ty: TypeHandle) -> Result<LLVMTypeRef, ShimError> {
        self.types
            .get(ty)
            .map(|entry| entry.raw)
            .ok_or_else(|| ShimError::stale(TypeHandle::KIND.name()))
    }

    pub(crate) fn block_entry(
        &self,
        block: BasicBlockHandle,
    ) -> Result<Entry<LLVMBasicBlockRef>, ShimError> {
        let entry = self
            .blocks
            .get(block)
            .ok_or_else(|| ShimError::stale(BasicBlockHandle::KIND.name()))?;
        self.check_owner(entry.module, BasicBlockHandle::KIND.name())?;
        Ok(entry)
    }

    pub(crate) fn block(&self, block: BasicBlockHandle) -> Result<LLVMBasicBlockRef, ShimError> {
        Ok(self.block_entry(block)?.raw)
    }

    /// A metadata node that exists and was not released by a replacement.
    pub(crate) fn metadata(&self, md: MetadataHandle) -> Result<LLVMMetadataRef, ShimError> {
        match self.metadata.get(md.slot()) {
            Some(entry) if entry.replaced_by.is_none() => Ok(entry.raw),
            _ => Err(ShimError::stale(MetadataHandle::KIND.name())),
        }
    }

    /// `None` becomes the null metadata reference.
    pub(crate) fn opt_metadata(
        &self,
        md: Option<MetadataHandle>,
    ) -> Result<LLVMMetadataRef, ShimError> {
        md.map_or(Ok(std::ptr::null_mut()), |md| self.metadata(md))
    }

    pub(crate) fn metadata_list(
        &self,
        handles: &[MetadataHandle],
    ) -> Result<Vec<LLVMMetadataRef>, ShimError> {
        handles.iter().map(|&h| self.metadata(h)).collect()
    }

    pub(crate) fn ir_builder(&self, builder: IrBuilderHandle) -> Result<&IrBuilderSlot, ShimError> {
        self.ir_builders
            .get(builder.slot())
            .and_then(Option::as_ref)
            .ok_or_else(|| ShimError::stale(IrBuilderHandle::KIND.name()))
    }

    pub(crate) fn ir_builder_mut(
        &mut self,
        builder: IrBuilderHandle,
    ) -> Result<&mut IrBuilderSlot, ShimError> {
        self.ir_builders
            .get_mut(builder.slot())
            .and_then(Option::as_mut)
            .ok_or_else(|| ShimError::stale(IrBuilderHandle::KIND.name()))
    }

    /// A builder positioned in a block of a live module, and that module.
    pub(crate) fn positioned(
        &self,
        builder: IrBuilderHandle,
    ) -> Result<(LLVMBuilderRef, ModuleHandle), ShimError> {
        let slot = self.ir_builder(builder)?;
        let block = slot.block.ok_or(ShimError::Unpositioned)?;
        let module = self
            .block_entry(block)
            .ok()
            .and_then(|entry| entry.module)
            .ok_or(ShimError::Unpositioned)?;
        Ok((slot.builder.as_mut_ptr(), module))
    }

    pub(crate) fn bundle_state(
        &self,
        bundle: OperandBundleHandle,
    ) -> Result<&BundleState, ShimError> {
        self.bundles
            .get(bundle.slot())
            .ok_or_else(|| ShimError::stale(OperandBundleHandle::KIND.name()))
    }

    pub(crate) fn machine(
        &self,
        machine: TargetMachineHandle,
    ) -> Result<&OwnedTargetMachine, ShimError> {
        self.machines
            .get(machine.slot())
            .and_then(Option::as_ref)
            .ok_or_else(|| ShimError::stale(TargetMachineHandle::KIND.name()))
    }

    pub(crate) fn engine(&self, engine: ExecutionEngineHandle) -> Result<&Engine, ShimError> {
        self.engines
            .get(engine.slot())
            .and_then(Option::as_ref)
            .ok_or_else(|| ShimError::stale(ExecutionEngineHandle::KIND.name()))
    }

    // -- Interning --

    pub(crate) fn intern_value(
        &mut self,
        raw: LLVMValueRef,
        module: Option<ModuleHandle>,
    ) -> ValueHandle {
        self.values.intern(raw, module)
    }

    pub(crate) fn intern_type(&mut self, raw: LLVMTypeRef) -> TypeHandle {
        self.types.intern(raw, None)
    }

    pub(crate) fn intern_metadata(&mut self, raw: LLVMMetadataRef, temporary: bool) -> MetadataHandle {
        if let Some(&handle) = self.metadata_index.get(&raw) {
            return handle;
        }
        let handle = MetadataHandle::from_slot(self.metadata.len());
        self.metadata.push(MetadataEntry {
            raw,
            temporary,
            replaced_by: None,
        });
        self.metadata_index.insert(raw, handle);
        tracing::trace!(?handle, temporary, "metadata node recorded");
        handle
    }

    // -- Module ownership --

    /// Forget everything that lives in `module` before it leaves the
    /// caller's ownership. The debug builder goes first; it refers to the
    /// module.
    pub(crate) fn release_module_tables(&mut self, module: ModuleHandle) {
        if let Some(builder) = self.di_builder_of.get(&module) {
            if let Some(slot) = self.di_builders.get_mut(builder.slot()) {
                *slot = None;
            }
        }
        self.values.release_module(module);
        self.blocks.release_module(module);
    }
}

#[cfg(test)]
mod tests;
