//! Bitcode writer with an optional link-time summary index.
//!
//! # File Layout
//!
//! Without a summary the file is plain LLVM bitcode. With one, the bitcode
//! sits inside LLVM's wrapper header and the summary follows it, so LLVM
//! tools still read the module and skip the trailer:
//!
//! ```text
//! ┌──────────────────── wrapper (5 × u32 LE) ────────────────────┐
//! │ 0x0B17C0DE │ version 0 │ offset 20 │ bitcode size │ cpu 0    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ bitcode ("BC\xC0\xDE" ...)                                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ ModuleSummary (bincode)                                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Summary GUIDs are the `FxHash` of the symbol name, so they are stable
//! across runs and across modules.

use std::hash::{Hash, Hasher};
use std::path::Path;

use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Module;
use llvm_sys::core::{
    LLVMGetCalledValue, LLVMGetFirstBasicBlock, LLVMGetFirstFunction, LLVMGetFirstInstruction,
    LLVMGetLinkage, LLVMGetModuleIdentifier, LLVMGetNextBasicBlock, LLVMGetNextFunction,
    LLVMGetNextInstruction, LLVMGetIntrinsicID, LLVMIsACallInst, LLVMIsAFunction,
    LLVMIsAInvokeInst, LLVMIsDeclaration,
};
use llvm_sys::prelude::LLVMValueRef;
use llvm_sys::LLVMLinkage;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::error::ShimError;
use crate::handle::ModuleHandle;
use crate::session::Session;

/// Leading bytes of raw bitcode.
pub const BITCODE_MAGIC: [u8; 4] = *b"BC\xC0\xDE";

/// Leading word of a wrapped bitcode file.
pub const WRAPPER_MAGIC: u32 = 0x0B17_C0DE;

/// Size of the wrapper header; the bitcode starts right after it.
const WRAPPER_HEADER_LEN: usize = 20;

/// A bitcode file read back from disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitcodeFile {
    /// The module's bitcode, without wrapper or trailer.
    pub bitcode: Vec<u8>,
    pub summary: Option<ModuleSummary>,
}

/// Per-module summary index consumed by link-time optimization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub module: String,
    pub functions: Vec<FunctionSummary>,
}

impl ModuleSummary {
    pub fn function(&self, name: &str) -> Option<&FunctionSummary> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SummaryLinkage {
    External,
    Internal,
}

impl From<LLVMLinkage> for SummaryLinkage {
    fn from(linkage: LLVMLinkage) -> Self {
        match linkage {
            LLVMLinkage::LLVMInternalLinkage | LLVMLinkage::LLVMPrivateLinkage => Self::Internal,
            _ => Self::External,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSummary {
    pub name: String,
    pub guid: u64,
    pub linkage: SummaryLinkage,
    pub is_declaration: bool,
    pub instruction_count: u32,
    /// GUIDs of direct callees, first call first, without repeats.
    /// Intrinsics are left out.
    pub calls: Vec<u64>,
}

/// Stable identifier of a global symbol.
pub fn guid(name: &str) -> u64 {
    let mut hasher = FxHasher::default();
    name.hash(&mut hasher);
    hasher.finish()
}

fn word(bytes: &[u8], index: usize) -> Option<u32> {
    let start = index * 4;
    let chunk = bytes.get(start..start + 4)?;
    Some(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Load a file written by [`Session::write_bitcode_with_summary`].
///
/// The bitcode is parsed once in a scratch context, so a file that LLVM
/// would refuse is reported here as [`ShimError::MalformedBitcode`].
pub fn read_bitcode(path: &Path) -> Result<BitcodeFile, ShimError> {
    let bytes = std::fs::read(path).map_err(|e| ShimError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let malformed = |message: String| ShimError::MalformedBitcode {
        path: path.display().to_string(),
        message,
    };

    let (bitcode, summary) = if word(&bytes, 0) == Some(WRAPPER_MAGIC) {
        let offset = word(&bytes, 2).ok_or_else(|| malformed("truncated wrapper".into()))? as usize;
        let size = word(&bytes, 3).ok_or_else(|| malformed("truncated wrapper".into()))? as usize;
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| malformed(format!("wrapper claims {size} bytes at {offset}")))?;
        let trailer = &bytes[end..];
        let summary = if trailer.is_empty() {
            None
        } else {
            Some(
                bincode::deserialize(trailer)
                    .map_err(|e| malformed(format!("failed to decode summary: {e}")))?,
            )
        };
        (bytes[offset..end].to_vec(), summary)
    } else if bytes.starts_with(&BITCODE_MAGIC) {
        (bytes, None)
    } else {
        let head = &bytes[..bytes.len().min(4)];
        return Err(malformed(format!("bad magic {head:02x?}")));
    };

    let context = Context::create();
    let buffer = MemoryBuffer::create_from_memory_range_copy(&bitcode, "bitcode");
    Module::parse_bitcode_from_buffer(&buffer, &context)
        .map_err(|e| malformed(e.to_string()))?;
    Ok(BitcodeFile { bitcode, summary })
}

impl Session {
    /// Bitcode of `module`, with every recorded replacement applied.
    pub fn write_bitcode_to_memory(&mut self, module: ModuleHandle) -> Result<Vec<u8>, ShimError> {
        self.live_module(module)?;
        self.flush_redirects();
        Ok(self
            .live_module(module)?
            .write_bitcode_to_memory()
            .as_slice()
            .to_vec())
    }

    /// Serialize `module` to `path`, with a summary index on generations
    /// that support one.
    pub fn write_bitcode_with_summary(
        &mut self,
        module: ModuleHandle,
        path: &Path,
    ) -> Result<(), ShimError> {
        let bitcode = self.write_bitcode_to_memory(module)?;
        let io_error = |message: String| ShimError::Io {
            path: path.display().to_string(),
            message,
        };
        let data = if self.caps.module_summary {
            let summary = bincode::serialize(&self.module_summary(module)?)
                .map_err(|e| io_error(format!("failed to serialize summary: {e}")))?;
            let mut data = Vec::with_capacity(WRAPPER_HEADER_LEN + bitcode.len() + summary.len());
            for field in [
                WRAPPER_MAGIC,
                0,
                WRAPPER_HEADER_LEN as u32,
                bitcode.len() as u32,
                0,
            ] {
                data.extend_from_slice(&field.to_le_bytes());
            }
            data.extend_from_slice(&bitcode);
            data.extend_from_slice(&summary);
            data
        } else {
            tracing::debug!(generation = %self.generation(), "bitcode written without summary");
            bitcode
        };
        std::fs::write(path, data).map_err(|e| io_error(e.to_string()))?;
        tracing::debug!(path = %path.display(), "bitcode written");
        Ok(())
    }

    /// Build the summary index of `module`.
    pub fn module_summary(&self, module: ModuleHandle) -> Result<ModuleSummary, ShimError> {
        let m = self.module_ref(module)?;
        let mut functions = Vec::new();
        // SAFETY: `m` is live; iteration only reads the module.
        let name = unsafe {
            let mut len = 0;
            let ptr = LLVMGetModuleIdentifier(m, &mut len);
            String::from_utf8_lossy(std::slice::from_raw_parts(ptr.cast::<u8>(), len)).into_owned()
        };
        let mut func = unsafe { LLVMGetFirstFunction(m) };
        while !func.is_null() {
            functions.push(self.function_summary(func));
            func = unsafe { LLVMGetNextFunction(func) };
        }
        Ok(ModuleSummary {
            module: name,
            functions,
        })
    }

    fn function_summary(&self, func: LLVMValueRef) -> FunctionSummary {
        let name = self.value_name(func);
        let mut instruction_count = 0u32;
        let mut calls = Vec::new();
        // SAFETY: `func` belongs to a live module; iteration only reads it.
        unsafe {
            let mut block = LLVMGetFirstBasicBlock(func);
            while !block.is_null() {
                let mut inst = LLVMGetFirstInstruction(block);
                while !inst.is_null() {
                    instruction_count += 1;
                    let is_call =
                        !LLVMIsACallInst(inst).is_null() || !LLVMIsAInvokeInst(inst).is_null();
                    if is_call {
                        let callee = LLVMGetCalledValue(inst);
                        let direct = !LLVMIsAFunction(callee).is_null()
                            && LLVMGetIntrinsicID(callee) == 0;
                        if direct {
                            let callee_guid = guid(&self.value_name(callee));
                            if !calls.contains(&callee_guid) {
                                calls.push(callee_guid);
                            }
                        }
                    }
                    inst = LLVMGetNextInstruction(inst);
                }
                block = LLVMGetNextBasicBlock(block);
            }
        }
        FunctionSummary {
            guid: guid(&name),
            name,
            linkage: unsafe { LLVMGetLinkage(func) }.into(),
            is_declaration: unsafe { LLVMIsDeclaration(func) } != 0,
            instruction_count,
            calls,
        }
    }
}
