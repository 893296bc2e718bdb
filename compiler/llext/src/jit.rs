//! Execution engine construction.
//!
//! Callers hand over an options structure together with the size they
//! believe it has. Older callers pass a shorter prefix; the remaining
//! fields keep their zero defaults. A caller claiming a larger structure
//! than this build knows is rejected before anything is built.

use std::mem::{offset_of, size_of, ManuallyDrop};
use std::sync::Once;

use inkwell::targets::{InitializationConfig, Target};
use llvm_sys::core::{
    LLVMAddAttributeAtIndex, LLVMCreateStringAttribute, LLVMGetFirstFunction,
    LLVMGetNamedFunction, LLVMGetNextFunction, LLVMIsDeclaration,
};
use llvm_sys::execution_engine::{
    LLVMCreateMCJITCompilerForModule, LLVMDisposeExecutionEngine, LLVMExecutionEngineRef,
    LLVMGetExecutionEngineTargetMachine, LLVMGetFunctionAddress,
    LLVMInitializeMCJITCompilerOptions, LLVMLinkInMCJIT, LLVMMCJITCompilerOptions,
};
use llvm_sys::prelude::LLVMModuleRef;
use llvm_sys::LLVMAttributeFunctionIndex;

use crate::error::ShimError;
use crate::handle::{ExecutionEngineHandle, ModuleHandle, Slot};
use crate::linked::{self, c_string, llvm_bool, take_message};
use crate::session::{ModuleSlot, Session};
use crate::target::{code_model_from_raw, CodeGenOptLevel, CodeModel};

/// Environment variable that dumps module IR to stderr before JIT construction.
const DEBUG_IR_ENV: &str = "LLEXT_DEBUG_IR";

/// JIT compiler options, laid out like `LLVMMCJITCompilerOptions`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JitOptions {
    /// Legacy numbering, `0..=3`.
    pub opt_level: u32,
    /// Raw code model; `0` selects the JIT default.
    pub code_model: u32,
    pub no_frame_pointer_elim: i32,
    pub enable_fast_isel: i32,
    /// Opaque memory manager pointer. Carried for layout only.
    pub mcjmm: usize,
}

/// Size in bytes of [`JitOptions`] as this build knows it.
pub const JIT_OPTIONS_SIZE: usize = size_of::<JitOptions>();

impl JitOptions {
    /// Native-endian image of the structure, padding zeroed.
    pub fn to_bytes(&self) -> [u8; JIT_OPTIONS_SIZE] {
        let mut buf = [0u8; JIT_OPTIONS_SIZE];
        put(&mut buf, offset_of!(Self, opt_level), &self.opt_level.to_ne_bytes());
        put(&mut buf, offset_of!(Self, code_model), &self.code_model.to_ne_bytes());
        put(
            &mut buf,
            offset_of!(Self, no_frame_pointer_elim),
            &self.no_frame_pointer_elim.to_ne_bytes(),
        );
        put(
            &mut buf,
            offset_of!(Self, enable_fast_isel),
            &self.enable_fast_isel.to_ne_bytes(),
        );
        put(&mut buf, offset_of!(Self, mcjmm), &self.mcjmm.to_ne_bytes());
        buf
    }

    /// Decode a caller prefix over a zero-filled structure.
    ///
    /// Bytes past [`JIT_OPTIONS_SIZE`] are ignored; reject oversized input
    /// before calling this.
    pub fn from_prefix(prefix: &[u8]) -> Self {
        let mut buf = [0u8; JIT_OPTIONS_SIZE];
        let len = prefix.len().min(JIT_OPTIONS_SIZE);
        buf[..len].copy_from_slice(&prefix[..len]);
        Self {
            opt_level: u32::from_ne_bytes(take(&buf, offset_of!(Self, opt_level))),
            code_model: u32::from_ne_bytes(take(&buf, offset_of!(Self, code_model))),
            no_frame_pointer_elim: i32::from_ne_bytes(take(
                &buf,
                offset_of!(Self, no_frame_pointer_elim),
            )),
            enable_fast_isel: i32::from_ne_bytes(take(&buf, offset_of!(Self, enable_fast_isel))),
            mcjmm: usize::from_ne_bytes(take(&buf, offset_of!(Self, mcjmm))),
        }
    }
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn take<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

static NATIVE_TARGET_INIT: Once = Once::new();

/// Register the host target and link MCJIT in. Idempotent.
fn initialize_native() -> Result<(), ShimError> {
    let mut result = Ok(());
    NATIVE_TARGET_INIT.call_once(|| {
        result = Target::initialize_native(&InitializationConfig::default());
        // SAFETY: no preconditions; forces MCJIT into the link.
        unsafe { LLVMLinkInMCJIT() };
    });
    result.map_err(|message| ShimError::Llvm {
        operation: "initialize_native",
        message,
    })
}

/// Options an engine was actually built with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AppliedOptions {
    pub(crate) opt_level: CodeGenOptLevel,
    pub(crate) code_model: CodeModel,
    pub(crate) no_frame_pointer_elim: bool,
    pub(crate) enable_fast_isel: bool,
    pub(crate) global_isel: bool,
}

/// An MCJIT engine and the module it owns.
#[derive(Debug)]
pub(crate) struct Engine {
    raw: LLVMExecutionEngineRef,
    /// Owned by the engine; disposed together with it.
    pub(crate) module_raw: LLVMModuleRef,
    pub(crate) module: ModuleHandle,
    pub(crate) applied: AppliedOptions,
}

impl Drop for Engine {
    fn drop(&mut self) {
        // SAFETY: created by LLVMCreateMCJITCompilerForModule and disposed
        // exactly once; this also frees the module.
        unsafe { LLVMDisposeExecutionEngine(self.raw) };
    }
}

impl Session {
    /// Build an MCJIT engine that takes ownership of `module`.
    ///
    /// `declared_size` is the size of the caller's options structure; only
    /// that many bytes of `options` are honoured. Once LLVM has been asked
    /// to build the engine the module handle is no longer usable, whether
    /// or not construction succeeded. Rejected options leave the module
    /// untouched.
    #[tracing::instrument(level = "debug", skip(self, options))]
    pub fn create_jit_compiler(
        &mut self,
        module: ModuleHandle,
        options: &JitOptions,
        declared_size: usize,
        enable_global_isel: bool,
    ) -> Result<ExecutionEngineHandle, ShimError> {
        if declared_size > JIT_OPTIONS_SIZE {
            tracing::warn!(
                declared = declared_size,
                known = JIT_OPTIONS_SIZE,
                "JIT options larger than known layout"
            );
            return Err(ShimError::OversizedJitOptions {
                declared: declared_size,
                known: JIT_OPTIONS_SIZE,
            });
        }
        self.live_module(module)?;
        let options = JitOptions::from_prefix(&options.to_bytes()[..declared_size]);
        if options.opt_level > 3 {
            return Err(ShimError::InvalidEnumValue {
                what: "optimization level",
                value: options.opt_level,
            });
        }
        let code_model = match options.code_model {
            0 => CodeModel::JitDefault,
            raw => code_model_from_raw(raw)?,
        };
        let applied = AppliedOptions {
            opt_level: CodeGenOptLevel::from_legacy(options.opt_level),
            code_model,
            no_frame_pointer_elim: options.no_frame_pointer_elim != 0,
            enable_fast_isel: options.enable_fast_isel != 0,
            global_isel: enable_global_isel && self.caps.global_instruction_selection,
        };
        initialize_native()?;

        if std::env::var(DEBUG_IR_ENV).is_ok_and(|v| v == "1") {
            eprintln!("{}", self.print_module_to_string(module)?);
        }
        self.flush_redirects();
        self.release_module_tables(module);
        let ModuleSlot::Live(owned) =
            std::mem::replace(&mut self.modules[module.slot()], ModuleSlot::Disposed)
        else {
            return Err(ShimError::stale("module"));
        };
        // LLVM owns the module from here on, engine or not.
        let owned = ManuallyDrop::new(owned);
        let module_raw = owned.as_mut_ptr();

        // SAFETY: the options struct is initialized by LLVM before use; the
        // out-pointers are valid for the call.
        let (engine, failed, message) = unsafe {
            let mut raw_options = std::mem::MaybeUninit::<LLVMMCJITCompilerOptions>::uninit();
            LLVMInitializeMCJITCompilerOptions(
                raw_options.as_mut_ptr(),
                size_of::<LLVMMCJITCompilerOptions>(),
            );
            let mut raw_options = raw_options.assume_init();
            raw_options.OptLevel = applied.opt_level.as_legacy();
            raw_options.CodeModel = applied.code_model.to_llvm();
            raw_options.NoFramePointerElim = llvm_bool(applied.no_frame_pointer_elim);
            raw_options.EnableFastISel = llvm_bool(applied.enable_fast_isel);
            let mut engine: LLVMExecutionEngineRef = std::ptr::null_mut();
            let mut message = std::ptr::null_mut();
            let failed = LLVMCreateMCJITCompilerForModule(
                &mut engine,
                module_raw,
                &mut raw_options,
                size_of::<LLVMMCJITCompilerOptions>(),
                &mut message,
            ) != 0;
            (engine, failed, message)
        };
        if failed || engine.is_null() {
            let message = unsafe { take_message(message) };
            tracing::warn!(?module, %message, "execution engine construction failed");
            return Err(ShimError::Llvm {
                operation: "create_jit_compiler",
                message,
            });
        }

        // MCJIT compiles on first lookup, so attributes added now still apply.
        self.tag_frame_pointer(module_raw, applied.no_frame_pointer_elim);
        if applied.global_isel {
            // SAFETY: the engine is live and owns its target machine.
            unsafe {
                linked::set_global_isel(LLVMGetExecutionEngineTargetMachine(engine), true);
            }
        }
        let handle = ExecutionEngineHandle::from_slot(self.engines.len());
        self.engines.push(Some(Engine {
            raw: engine,
            module_raw,
            module,
            applied,
        }));
        self.modules[module.slot()] = ModuleSlot::OwnedByEngine(handle);
        tracing::debug!(?module, ?handle, "module moved into execution engine");
        Ok(handle)
    }

    /// Attach the frame pointer policy to every function of `module`.
    fn tag_frame_pointer(&self, module: LLVMModuleRef, keep: bool) {
        let (key, value) = if self.caps.frame_pointer_attribute {
            ("frame-pointer", if keep { "all" } else { "none" })
        } else {
            ("no-frame-pointer-elim", if keep { "true" } else { "false" })
        };
        // SAFETY: `module` is owned by a live engine; the attribute copies
        // its strings.
        unsafe {
            let mut func = LLVMGetFirstFunction(module);
            while !func.is_null() {
                let attribute = LLVMCreateStringAttribute(
                    self.llvm_context(),
                    key.as_ptr().cast(),
                    key.len() as u32,
                    value.as_ptr().cast(),
                    value.len() as u32,
                );
                LLVMAddAttributeAtIndex(func, LLVMAttributeFunctionIndex, attribute);
                func = LLVMGetNextFunction(func);
            }
        }
    }

    /// Address of a compiled function; `0` when the engine's module has no
    /// definition by that name.
    pub fn get_function_address(
        &self,
        engine: ExecutionEngineHandle,
        name: &str,
    ) -> Result<u64, ShimError> {
        let engine = self.engine(engine)?;
        let cname = c_string("function name", name)?;
        // SAFETY: the engine and its module are live.
        let address = unsafe {
            let func = LLVMGetNamedFunction(engine.module_raw, cname.as_ptr());
            if func.is_null() || LLVMIsDeclaration(func) != 0 {
                return Ok(0);
            }
            LLVMGetFunctionAddress(engine.raw, cname.as_ptr())
        };
        tracing::trace!(name, address, "function address");
        Ok(address)
    }

    /// Release an engine together with the module it owns.
    pub fn dispose_execution_engine(
        &mut self,
        engine: ExecutionEngineHandle,
    ) -> Result<(), ShimError> {
        let module = self.engine(engine)?.module;
        self.engines[engine.slot()] = None;
        self.modules[module.slot()] = ModuleSlot::Disposed;
        tracing::debug!(?module, "execution engine disposed");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
