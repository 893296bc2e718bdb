//! Target façade: triples, targets, target machines, and file emission.

use std::ffi::CStr;
use std::path::Path;
use std::sync::Once;

use inkwell::targets::{InitializationConfig, Target, TargetMachine, TargetTriple};
use llvm_sys::core::{
    LLVMCloneModule, LLVMDisposeMemoryBuffer, LLVMDisposeModule, LLVMGetBufferSize,
    LLVMGetBufferStart,
};
use llvm_sys::prelude::{LLVMMemoryBufferRef, LLVMModuleRef};
use llvm_sys::target::{LLVMCopyStringRepOfTargetData, LLVMDisposeTargetData};
use llvm_sys::target_machine::{
    LLVMCodeGenFileType, LLVMCodeGenOptLevel, LLVMCodeModel, LLVMCreateTargetDataLayout,
    LLVMCreateTargetMachine, LLVMDisposeTargetMachine, LLVMGetTargetFromTriple,
    LLVMGetTargetName, LLVMRelocMode, LLVMTargetMachineEmitToFile,
    LLVMTargetMachineEmitToMemoryBuffer, LLVMTargetMachineRef, LLVMTargetRef,
};

use crate::error::ShimError;
use crate::handle::{Handle, ModuleHandle, Slot, TargetHandle, TargetMachineHandle};
use crate::linked::{self, c_string, take_message};
use crate::session::Session;

static ALL_TARGETS_INIT: Once = Once::new();

/// Register every target the linked LLVM was built with.
fn initialize_all_targets() {
    ALL_TARGETS_INIT.call_once(|| {
        Target::initialize_all(&InitializationConfig::default());
    });
}

/// Reorder a triple into `arch-vendor-os-environment`, filling every part.
///
/// Text after a NUL byte is ignored. Missing parts become `unknown`; a
/// missing environment follows the OS (`gnu` on Linux, `msvc` on Windows).
///
/// ```
/// assert_eq!(llext::normalize_triple("x86_64-pc-linux"), "x86_64-pc-linux-gnu");
/// ```
pub fn normalize_triple(raw: &str) -> String {
    let raw = raw.split('\0').next().unwrap_or_default();
    let normalized = TargetMachine::normalize_triple(&TargetTriple::create(raw));
    let normalized = normalized.as_str().to_string_lossy();
    let mut parts: Vec<&str> = normalized
        .split('-')
        .map(|part| if part.is_empty() { "unknown" } else { part })
        .collect();
    while parts.len() < 3 {
        parts.push("unknown");
    }
    if parts.len() == 3 {
        let env = if parts[2].starts_with("linux") {
            "gnu"
        } else if parts[2].starts_with("windows") {
            "msvc"
        } else {
            "unknown"
        };
        parts.push(env);
    }
    parts.join("-")
}

/// Validate a comma-separated `+feature,-feature` list.
pub(crate) fn parse_features(features: &str) -> Result<Vec<(&str, bool)>, ShimError> {
    let mut result = Vec::new();
    for feature in features.split(',') {
        let feature = feature.trim();
        if feature.is_empty() {
            continue;
        }
        if let Some(name) = feature.strip_prefix('+') {
            result.push((name, true));
        } else if let Some(name) = feature.strip_prefix('-') {
            result.push((name, false));
        } else {
            return Err(ShimError::InvalidFeature {
                feature: feature.to_string(),
                reason: "feature must start with '+' (enable) or '-' (disable)".to_string(),
            });
        }
    }
    Ok(result)
}

// -- Codegen enums --

/// Code generation optimization level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CodeGenOptLevel {
    None,
    Less,
    #[default]
    Default,
    Aggressive,
}

impl CodeGenOptLevel {
    /// Legacy integer level. Values above 3 saturate.
    pub fn from_legacy(level: u32) -> Self {
        match level {
            0 => Self::None,
            1 => Self::Less,
            2 => Self::Default,
            _ => Self::Aggressive,
        }
    }

    pub fn as_legacy(self) -> u32 {
        self as u32
    }

    fn to_llvm(self) -> LLVMCodeGenOptLevel {
        match self {
            Self::None => LLVMCodeGenOptLevel::LLVMCodeGenLevelNone,
            Self::Less => LLVMCodeGenOptLevel::LLVMCodeGenLevelLess,
            Self::Default => LLVMCodeGenOptLevel::LLVMCodeGenLevelDefault,
            Self::Aggressive => LLVMCodeGenOptLevel::LLVMCodeGenLevelAggressive,
        }
    }
}

/// Relocation model, in LLVM-C numbering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RelocMode {
    #[default]
    Default,
    Static,
    Pic,
    DynamicNoPic,
    Ropi,
    Rwpi,
    RopiRwpi,
}

impl RelocMode {
    /// Position-independent read-only data or read-write data.
    pub fn is_ropi_rwpi(self) -> bool {
        matches!(self, Self::Ropi | Self::Rwpi | Self::RopiRwpi)
    }

    fn to_llvm(self) -> LLVMRelocMode {
        match self {
            Self::Default => LLVMRelocMode::LLVMRelocDefault,
            Self::Static => LLVMRelocMode::LLVMRelocStatic,
            Self::Pic => LLVMRelocMode::LLVMRelocPIC,
            Self::DynamicNoPic => LLVMRelocMode::LLVMRelocDynamicNoPic,
            Self::Ropi => LLVMRelocMode::LLVMRelocROPI,
            Self::Rwpi => LLVMRelocMode::LLVMRelocRWPI,
            Self::RopiRwpi => LLVMRelocMode::LLVMRelocROPI_RWPI,
        }
    }
}

/// Code model, in LLVM-C numbering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CodeModel {
    #[default]
    Default,
    JitDefault,
    Tiny,
    Small,
    Kernel,
    Medium,
    Large,
}

impl CodeModel {
    pub(crate) fn to_llvm(self) -> LLVMCodeModel {
        match self {
            Self::Default => LLVMCodeModel::LLVMCodeModelDefault,
            Self::JitDefault => LLVMCodeModel::LLVMCodeModelJITDefault,
            Self::Tiny => LLVMCodeModel::LLVMCodeModelTiny,
            Self::Small => LLVMCodeModel::LLVMCodeModelSmall,
            Self::Kernel => LLVMCodeModel::LLVMCodeModelKernel,
            Self::Medium => LLVMCodeModel::LLVMCodeModelMedium,
            Self::Large => LLVMCodeModel::LLVMCodeModelLarge,
        }
    }
}

/// Output file kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    Assembly,
    Object,
}

impl FileType {
    fn to_llvm(self) -> LLVMCodeGenFileType {
        match self {
            Self::Assembly => LLVMCodeGenFileType::LLVMAssemblyFile,
            Self::Object => LLVMCodeGenFileType::LLVMObjectFile,
        }
    }
}

// -- C numbering --

pub fn opt_level_from_raw(raw: u32) -> Result<CodeGenOptLevel, ShimError> {
    match raw {
        0..=3 => Ok(CodeGenOptLevel::from_legacy(raw)),
        _ => Err(invalid("optimization level", raw)),
    }
}

pub fn reloc_mode_from_raw(raw: u32) -> Result<RelocMode, ShimError> {
    Ok(match raw {
        0 => RelocMode::Default,
        1 => RelocMode::Static,
        2 => RelocMode::Pic,
        3 => RelocMode::DynamicNoPic,
        4 => RelocMode::Ropi,
        5 => RelocMode::Rwpi,
        6 => RelocMode::RopiRwpi,
        _ => return Err(invalid("relocation model", raw)),
    })
}

pub fn code_model_from_raw(raw: u32) -> Result<CodeModel, ShimError> {
    Ok(match raw {
        0 => CodeModel::Default,
        1 => CodeModel::JitDefault,
        2 => CodeModel::Tiny,
        3 => CodeModel::Small,
        4 => CodeModel::Kernel,
        5 => CodeModel::Medium,
        6 => CodeModel::Large,
        _ => return Err(invalid("code model", raw)),
    })
}

pub fn file_type_from_raw(raw: u32) -> Result<FileType, ShimError> {
    match raw {
        0 => Ok(FileType::Assembly),
        1 => Ok(FileType::Object),
        _ => Err(invalid("file type", raw)),
    }
}

fn invalid(what: &'static str, value: u32) -> ShimError {
    ShimError::InvalidEnumValue { what, value }
}

// -- Owned LLVM objects --

/// Owns an `LLVMTargetMachineRef`.
#[derive(Debug)]
pub(crate) struct OwnedTargetMachine(LLVMTargetMachineRef);

impl OwnedTargetMachine {
    pub(crate) fn raw(&self) -> LLVMTargetMachineRef {
        self.0
    }
}

impl Drop for OwnedTargetMachine {
    fn drop(&mut self) {
        // SAFETY: created by LLVMCreateTargetMachine and disposed exactly once.
        unsafe { LLVMDisposeTargetMachine(self.0) };
    }
}

/// Throwaway copy of a module for code generation, which rewrites the
/// module it runs on.
struct ScratchModule(LLVMModuleRef);

impl Drop for ScratchModule {
    fn drop(&mut self) {
        // SAFETY: created by LLVMCloneModule and owned by nobody else.
        unsafe { LLVMDisposeModule(self.0) };
    }
}

impl Session {
    /// The configured host triple, or the triple of the running host.
    pub fn default_target_triple(&self) -> String {
        match self.config.host_triple() {
            Some(triple) => normalize_triple(triple),
            None => normalize_triple(
                &TargetMachine::get_default_triple()
                    .as_str()
                    .to_string_lossy(),
            ),
        }
    }

    pub fn target_from_triple(&mut self, triple: &str) -> Result<TargetHandle, ShimError> {
        initialize_all_targets();
        let c_triple = c_string("target triple", triple)?;
        let mut target: LLVMTargetRef = std::ptr::null_mut();
        let mut message = std::ptr::null_mut();
        // SAFETY: out-pointers are valid; a returned message is ours to free.
        let failed =
            unsafe { LLVMGetTargetFromTriple(c_triple.as_ptr(), &mut target, &mut message) } != 0;
        if failed || target.is_null() {
            let message = unsafe { take_message(message) };
            tracing::debug!(triple, %message, "no target for triple");
            return Err(ShimError::UnknownTarget {
                triple: triple.to_string(),
                message,
            });
        }
        Ok(self.targets.intern(target, None))
    }

    pub(crate) fn target(&self, target: TargetHandle) -> Result<LLVMTargetRef, ShimError> {
        self.targets
            .get(target)
            .map(|entry| entry.raw)
            .ok_or_else(|| ShimError::stale(TargetHandle::KIND.name()))
    }

    pub fn target_name(&self, target: TargetHandle) -> Result<String, ShimError> {
        let target = self.target(target)?;
        // SAFETY: target names are static strings owned by the registry.
        let name = unsafe { CStr::from_ptr(LLVMGetTargetName(target)) };
        Ok(name.to_string_lossy().into_owned())
    }

    /// Configure a code generator.
    ///
    /// ROPI/RWPI relocation is [`ShimError::Unsupported`] before 4.0.
    /// `emulated_tls` is ignored: LLVM-C has no such option.
    pub fn create_target_machine(
        &mut self,
        target: TargetHandle,
        triple: &str,
        cpu: &str,
        features: &str,
        opt_level: CodeGenOptLevel,
        reloc: RelocMode,
        code_model: CodeModel,
        emulated_tls: bool,
    ) -> Result<TargetMachineHandle, ShimError> {
        let target = self.target(target)?;
        if reloc.is_ropi_rwpi() && !self.caps.ropi_rwpi_relocation {
            tracing::warn!(
                ?reloc,
                generation = %self.generation(),
                "relocation model unsupported"
            );
            return Err(ShimError::Unsupported {
                operation: "ROPI/RWPI relocation",
                generation: self.generation(),
            });
        }
        parse_features(features)?;
        if emulated_tls && !self.caps.emulated_tls_option {
            tracing::warn!(generation = %self.generation(), "emulated TLS option ignored");
        }
        let triple = c_string("target triple", triple)?;
        let cpu = c_string("CPU name", cpu)?;
        let features = c_string("feature string", features)?;
        // SAFETY: `target` came from the registry; strings are NUL-terminated.
        let raw = unsafe {
            LLVMCreateTargetMachine(
                target,
                triple.as_ptr(),
                cpu.as_ptr(),
                features.as_ptr(),
                opt_level.to_llvm(),
                reloc.to_llvm(),
                code_model.to_llvm(),
            )
        };
        if raw.is_null() {
            return Err(ShimError::Llvm {
                operation: "create_target_machine",
                message: "target refused the configuration".to_string(),
            });
        }
        let handle = TargetMachineHandle::from_slot(self.machines.len());
        self.machines.push(Some(OwnedTargetMachine(raw)));
        tracing::debug!(?handle, ?opt_level, ?reloc, ?code_model, "target machine created");
        Ok(handle)
    }

    /// Toggle the global instruction selector. A silent no-op on
    /// generations without it.
    pub fn enable_global_isel(
        &mut self,
        machine: TargetMachineHandle,
        enabled: bool,
    ) -> Result<(), ShimError> {
        let raw = self.machine(machine)?.raw();
        if self.caps.global_instruction_selection {
            // SAFETY: `raw` is a live target machine.
            unsafe { linked::set_global_isel(raw, enabled) };
        }
        Ok(())
    }

    /// Copy of `module` with every recorded replacement applied.
    fn scratch_module(&mut self, module: ModuleHandle) -> Result<ScratchModule, ShimError> {
        let m = self.module_ref(module)?;
        self.flush_redirects();
        // SAFETY: `m` is a live module of this session.
        Ok(ScratchModule(unsafe { LLVMCloneModule(m) }))
    }

    /// Render `module` with `machine` into memory. The module itself is not
    /// changed.
    pub fn emit_to_memory(
        &mut self,
        machine: TargetMachineHandle,
        module: ModuleHandle,
        file_type: FileType,
    ) -> Result<Vec<u8>, ShimError> {
        let machine = self.machine(machine)?.raw();
        let scratch = self.scratch_module(module)?;
        let mut message = std::ptr::null_mut();
        let mut buffer: LLVMMemoryBufferRef = std::ptr::null_mut();
        // SAFETY: `machine` and `scratch` are live; out-pointers are valid.
        let failed = unsafe {
            LLVMTargetMachineEmitToMemoryBuffer(
                machine,
                scratch.0,
                file_type.to_llvm(),
                &mut message,
                &mut buffer,
            )
        } != 0;
        if failed {
            return Err(ShimError::Llvm {
                operation: "emit_to_memory",
                message: unsafe { take_message(message) },
            });
        }
        // SAFETY: `buffer` holds the emitted bytes until disposed here.
        let bytes = unsafe {
            let start = LLVMGetBufferStart(buffer).cast::<u8>();
            let bytes = std::slice::from_raw_parts(start, LLVMGetBufferSize(buffer)).to_vec();
            LLVMDisposeMemoryBuffer(buffer);
            bytes
        };
        tracing::debug!(len = bytes.len(), ?file_type, "emitted to memory");
        Ok(bytes)
    }

    /// Write `module` to `path`. An interrupted write may leave a partial
    /// file behind.
    #[tracing::instrument(level = "debug", skip(self, path), fields(path = %path.display()))]
    pub fn emit_to_file(
        &mut self,
        machine: TargetMachineHandle,
        module: ModuleHandle,
        path: &Path,
        file_type: FileType,
    ) -> Result<(), ShimError> {
        let machine = self.machine(machine)?.raw();
        let cpath = c_string("output path", &path.to_string_lossy())?;
        let scratch = self.scratch_module(module)?;
        let mut message = std::ptr::null_mut();
        // SAFETY: `machine` and `scratch` are live; LLVM does not write
        // through the file name.
        let failed = unsafe {
            LLVMTargetMachineEmitToFile(
                machine,
                scratch.0,
                cpath.as_ptr().cast_mut(),
                file_type.to_llvm(),
                &mut message,
            )
        } != 0;
        if failed {
            return Err(ShimError::Llvm {
                operation: "emit_to_file",
                message: unsafe { take_message(message) },
            });
        }
        Ok(())
    }

    pub fn target_machine_data_layout(
        &self,
        machine: TargetMachineHandle,
    ) -> Result<String, ShimError> {
        let machine = self.machine(machine)?.raw();
        // SAFETY: the layout and its string are freed before returning.
        Ok(unsafe {
            let layout = LLVMCreateTargetDataLayout(machine);
            let text = take_message(LLVMCopyStringRepOfTargetData(layout));
            LLVMDisposeTargetData(layout);
            text
        })
    }

    pub fn dispose_target_machine(&mut self, machine: TargetMachineHandle) -> Result<(), ShimError> {
        self.machine(machine)?;
        self.machines[machine.slot()] = None;
        Ok(())
    }
}
