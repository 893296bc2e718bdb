//! Metadata lifecycle: temporary nodes and replacement.
//!
//! A temporary may be referenced before its definition exists. Replacing it
//! records a redirection and releases the handle at once; LLVM rewrites the
//! uses when the redirections are flushed. Flushing happens before anything
//! reads the module (printing, finalize, emission, bitcode, JIT) and applies
//! redirections in the order they were recorded, so chains resolve.

use llvm_sys::core::{
    LLVMGetMDNodeNumOperands, LLVMGetMDNodeOperands, LLVMIsAMDNode, LLVMMetadataAsValue,
    LLVMMetadataReplaceAllUsesWith, LLVMTemporaryMDNode, LLVMValueAsMetadata,
};
use llvm_sys::prelude::LLVMMetadataRef;
use rustc_hash::FxHashSet;

use crate::error::ShimError;
use crate::handle::{MetadataHandle, Slot};
use crate::session::Session;

impl Session {
    /// Unresolved tuple node. `None` operands are null.
    pub fn create_temporary_node(
        &mut self,
        operands: &[Option<MetadataHandle>],
    ) -> Result<MetadataHandle, ShimError> {
        let mut operands = operands
            .iter()
            .map(|&op| self.opt_metadata(op))
            .collect::<Result<Vec<_>, _>>()?;
        // SAFETY: every operand is a live node of this context, or null.
        let raw = unsafe {
            LLVMTemporaryMDNode(self.llvm_context(), operands.as_mut_ptr(), operands.len())
        };
        Ok(self.intern_metadata(raw, true))
    }

    /// True while `md` is a temporary that has not been replaced.
    pub fn is_temporary(&self, md: MetadataHandle) -> Result<bool, ShimError> {
        self.metadata(md)?;
        Ok(self.metadata[md.slot()].temporary)
    }

    /// Redirect every reference to temporary `old` to `new` and release
    /// `old`. Each temporary is replaced exactly once.
    pub fn replace_all_uses_with(
        &mut self,
        old: MetadataHandle,
        new: MetadataHandle,
    ) -> Result<(), ShimError> {
        self.metadata(old)?;
        self.metadata(new)?;
        if !self.metadata[old.slot()].temporary {
            return Err(ShimError::NotTemporary);
        }
        if old == new {
            return Err(ShimError::SelfReplacement);
        }
        self.metadata[old.slot()].replaced_by = Some(new);
        self.pending_redirects.push((old, new));
        tracing::trace!(?old, ?new, "temporary replaced");
        Ok(())
    }

    /// Apply every recorded replacement. Replaced temporaries are freed by
    /// LLVM, so their pointers leave the index.
    pub(crate) fn flush_redirects(&mut self) {
        for (old, new) in std::mem::take(&mut self.pending_redirects) {
            let old_raw = self.metadata[old.slot()].raw;
            let new_raw = self.metadata[new.slot()].raw;
            // SAFETY: `old_raw` is a temporary that has not been replaced yet;
            // recording order guarantees `new_raw` is still alive.
            unsafe { LLVMMetadataReplaceAllUsesWith(old_raw, new_raw) };
            self.metadata_index.remove(&old_raw);
        }
    }

    /// Count the unreplaced temporaries reachable from `roots`, following
    /// recorded replacements as if they had been applied.
    pub(crate) fn unresolved_temporaries(&self, roots: &[LLVMMetadataRef]) -> usize {
        let ctx = self.llvm_context();
        let mut seen = FxHashSet::default();
        let mut unresolved = 0;
        let mut stack = roots.to_vec();
        while let Some(md) = stack.pop() {
            if md.is_null() || !seen.insert(md) {
                continue;
            }
            if let Some(entry) = self
                .metadata_index
                .get(&md)
                .map(|handle| self.metadata[handle.slot()])
                .filter(|entry| entry.temporary)
            {
                match entry.replaced_by {
                    Some(next) => stack.push(self.metadata[next.slot()].raw),
                    None => unresolved += 1,
                }
                continue;
            }
            // SAFETY: `md` is reachable from a live node of this context.
            unsafe {
                let node = LLVMMetadataAsValue(ctx, md);
                if LLVMIsAMDNode(node).is_null() {
                    continue;
                }
                let count = LLVMGetMDNodeNumOperands(node) as usize;
                let mut operands = vec![std::ptr::null_mut(); count];
                LLVMGetMDNodeOperands(node, operands.as_mut_ptr());
                for operand in operands {
                    if !operand.is_null() && !LLVMIsAMDNode(operand).is_null() {
                        stack.push(LLVMValueAsMetadata(operand));
                    }
                }
            }
        }
        if unresolved > 0 {
            tracing::debug!(unresolved, "unresolved temporaries reachable from roots");
        }
        unresolved
    }
}
