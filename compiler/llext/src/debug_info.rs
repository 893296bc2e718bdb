//! Debug-info façade.
//!
//! One [`DIBuilder`](DIBuilderHandle) per module. Entry points take the same
//! arguments on every generation; the capability flags decide what reaches
//! LLVM:
//!
//! | concern | flag | older shape | newer shape |
//! |---|---|---|---|
//! | basic type alignment | `basic_type_alignment` | accepted, unused | accepted, unused |
//! | variable alignment | `basic_type_alignment` | dropped | kept |
//! | debug flags | `debug_flag_bitset` | raw `u32` | known bits only |
//! | unresolved temporaries | `detects_unresolved_temporaries` | finalized | error |
//!
//! LLVM-C always takes a `DIFile` for the compile unit and an address space
//! for pointers, so those shapes are the same on every generation.

use std::ffi::c_char;

use bitflags::bitflags;
use inkwell::module::FlagBehavior;
use llvm_sys::core::LLVMSetCurrentDebugLocation2;
use llvm_sys::debuginfo::{
    LLVMCreateDIBuilder, LLVMDIBuilderCreateArrayType, LLVMDIBuilderCreateAutoVariable,
    LLVMDIBuilderCreateBasicType, LLVMDIBuilderCreateCompileUnit,
    LLVMDIBuilderCreateDebugLocation, LLVMDIBuilderCreateEnumerationType,
    LLVMDIBuilderCreateEnumerator, LLVMDIBuilderCreateExpression, LLVMDIBuilderCreateFile,
    LLVMDIBuilderCreateFunction, LLVMDIBuilderCreateLexicalBlock,
    LLVMDIBuilderCreateMemberType, LLVMDIBuilderCreateParameterVariable,
    LLVMDIBuilderCreatePointerType, LLVMDIBuilderCreateReplaceableCompositeType,
    LLVMDIBuilderCreateStructType, LLVMDIBuilderCreateSubroutineType,
    LLVMDIBuilderCreateUnionType, LLVMDIBuilderFinalize, LLVMDIBuilderGetOrCreateArray,
    LLVMDIBuilderGetOrCreateSubrange, LLVMDIBuilderGetOrCreateTypeArray,
    LLVMDIBuilderInsertDeclareAtEnd, LLVMDIFlags, LLVMDWARFEmissionKind,
    LLVMDWARFSourceLanguage, LLVMDisposeDIBuilder, LLVMGetMetadataKind, LLVMGetSubprogram,
    LLVMMetadataKind, LLVMSetSubprogram,
};
use llvm_sys::prelude::{LLVMDIBuilderRef, LLVMMetadataRef};

use crate::error::ShimError;
use crate::handle::{
    BasicBlockHandle, DIBuilderHandle, Handle, IrBuilderHandle, MetadataHandle, ModuleHandle,
    Slot, ValueHandle,
};
use crate::linked::llvm_bool;
use crate::session::Session;

/// `DW_TAG_structure_type`.
const DW_TAG_STRUCTURE_TYPE: u32 = 0x13;

bitflags! {
    /// Debug-info flags known to generations with a typed flag set.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DIFlags: u32 {
        const PRIVATE = 1;
        const PROTECTED = 2;
        const PUBLIC = 3;
        const FWD_DECL = 1 << 2;
        const APPLE_BLOCK = 1 << 3;
        const VIRTUAL = 1 << 5;
        const ARTIFICIAL = 1 << 6;
        const EXPLICIT = 1 << 7;
        const PROTOTYPED = 1 << 8;
        const OBJC_CLASS_COMPLETE = 1 << 9;
        const OBJECT_POINTER = 1 << 10;
        const VECTOR = 1 << 11;
        const STATIC_MEMBER = 1 << 12;
        const LVALUE_REFERENCE = 1 << 13;
        const RVALUE_REFERENCE = 1 << 14;
    }
}

/// Owns an `LLVMDIBuilderRef`.
#[derive(Debug)]
pub(crate) struct OwnedDIBuilder(LLVMDIBuilderRef);

impl Drop for OwnedDIBuilder {
    fn drop(&mut self) {
        // SAFETY: created by LLVMCreateDIBuilder and disposed exactly once.
        unsafe { LLVMDisposeDIBuilder(self.0) };
    }
}

/// A debug-info builder and what it has created so far.
#[derive(Debug)]
pub(crate) struct DiBuilderSlot {
    raw: OwnedDIBuilder,
    module: ModuleHandle,
    finalized: bool,
    has_unit: bool,
    /// Compile units, subprograms and variables: where the search for
    /// unresolved temporaries starts.
    roots: Vec<LLVMMetadataRef>,
}

/// DWARF `DW_LANG_*` code to the LLVM-C enumerator.
#[allow(clippy::enum_glob_use, reason = "one arm per DW_LANG code")]
fn dwarf_language(code: u32) -> Option<LLVMDWARFSourceLanguage> {
    use LLVMDWARFSourceLanguage::*;
    Some(match code {
        0x01 => LLVMDWARFSourceLanguageC89,
        0x02 => LLVMDWARFSourceLanguageC,
        0x03 => LLVMDWARFSourceLanguageAda83,
        0x04 => LLVMDWARFSourceLanguageC_plus_plus,
        0x05 => LLVMDWARFSourceLanguageCobol74,
        0x06 => LLVMDWARFSourceLanguageCobol85,
        0x07 => LLVMDWARFSourceLanguageFortran77,
        0x08 => LLVMDWARFSourceLanguageFortran90,
        0x09 => LLVMDWARFSourceLanguagePascal83,
        0x0a => LLVMDWARFSourceLanguageModula2,
        0x0b => LLVMDWARFSourceLanguageJava,
        0x0c => LLVMDWARFSourceLanguageC99,
        0x0d => LLVMDWARFSourceLanguageAda95,
        0x0e => LLVMDWARFSourceLanguageFortran95,
        0x0f => LLVMDWARFSourceLanguagePLI,
        0x10 => LLVMDWARFSourceLanguageObjC,
        0x11 => LLVMDWARFSourceLanguageObjC_plus_plus,
        0x12 => LLVMDWARFSourceLanguageUPC,
        0x13 => LLVMDWARFSourceLanguageD,
        0x14 => LLVMDWARFSourceLanguagePython,
        0x15 => LLVMDWARFSourceLanguageOpenCL,
        0x16 => LLVMDWARFSourceLanguageGo,
        0x17 => LLVMDWARFSourceLanguageModula3,
        0x18 => LLVMDWARFSourceLanguageHaskell,
        0x19 => LLVMDWARFSourceLanguageC_plus_plus_03,
        0x1a => LLVMDWARFSourceLanguageC_plus_plus_11,
        0x1b => LLVMDWARFSourceLanguageOCaml,
        0x1c => LLVMDWARFSourceLanguageRust,
        0x1d => LLVMDWARFSourceLanguageC11,
        0x1e => LLVMDWARFSourceLanguageSwift,
        0x1f => LLVMDWARFSourceLanguageJulia,
        0x20 => LLVMDWARFSourceLanguageDylan,
        0x21 => LLVMDWARFSourceLanguageC_plus_plus_14,
        0x22 => LLVMDWARFSourceLanguageFortran03,
        0x23 => LLVMDWARFSourceLanguageFortran08,
        0x24 => LLVMDWARFSourceLanguageRenderScript,
        0x25 => LLVMDWARFSourceLanguageBLISS,
        _ => return None,
    })
}

/// Pointer and length of a string argument; LLVM copies it.
fn text(s: &str) -> (*const c_char, usize) {
    (s.as_ptr().cast(), s.len())
}

impl Session {
    /// Create the debug-info builder for `module`. Each module gets one.
    pub fn new_di_builder(&mut self, module: ModuleHandle) -> Result<DIBuilderHandle, ShimError> {
        let raw_module = self.module_ref(module)?;
        if self.di_builder_of.contains_key(&module) {
            return Err(ShimError::DuplicateDIBuilder);
        }
        // SAFETY: `raw_module` is live and outlives the builder; the builder
        // is dropped when the module leaves the caller's ownership.
        let raw = OwnedDIBuilder(unsafe { LLVMCreateDIBuilder(raw_module) });
        let handle = DIBuilderHandle::from_slot(self.di_builders.len());
        self.di_builders.push(Some(DiBuilderSlot {
            raw,
            module,
            finalized: false,
            has_unit: false,
            roots: Vec::new(),
        }));
        self.di_builder_of.insert(module, handle);
        tracing::debug!(?module, "debug info builder created");
        Ok(handle)
    }

    fn di_slot(&self, builder: DIBuilderHandle) -> Result<&DiBuilderSlot, ShimError> {
        let slot = self
            .di_builders
            .get(builder.slot())
            .and_then(Option::as_ref)
            .ok_or_else(|| ShimError::stale(DIBuilderHandle::KIND.name()))?;
        self.live_module(slot.module)?;
        Ok(slot)
    }

    /// The raw builder, if its module is still live.
    fn dib(&self, builder: DIBuilderHandle) -> Result<LLVMDIBuilderRef, ShimError> {
        Ok(self.di_slot(builder)?.raw.0)
    }

    fn add_root(&mut self, builder: DIBuilderHandle, md: LLVMMetadataRef) {
        if let Some(Some(slot)) = self.di_builders.get_mut(builder.slot()) {
            slot.roots.push(md);
        }
    }

    /// Caller flags in the shape the active generation takes.
    pub(crate) fn di_flags(&self, raw: u32) -> LLVMDIFlags {
        if !self.caps.debug_flag_bitset {
            return raw as LLVMDIFlags;
        }
        let typed = DIFlags::from_bits_truncate(raw);
        if typed.bits() != raw {
            tracing::warn!(
                raw,
                dropped = raw & !typed.bits(),
                "unknown debug flag bits dropped"
            );
        }
        typed.bits() as LLVMDIFlags
    }

    fn require_kind(
        &self,
        md: MetadataHandle,
        operation: &'static str,
        kinds: &[LLVMMetadataKind],
        what: &str,
    ) -> Result<LLVMMetadataRef, ShimError> {
        let raw = self.metadata(md)?;
        // SAFETY: `raw` is a live node of this context.
        let kind = unsafe { LLVMGetMetadataKind(raw) };
        if kinds.contains(&kind) {
            Ok(raw)
        } else {
            Err(ShimError::operand(operation, format!("expected {what}")))
        }
    }

    // -- Files and units --

    pub fn di_create_file(
        &mut self,
        builder: DIBuilderHandle,
        filename: &str,
        directory: &str,
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let (name, name_len) = text(filename);
        let (dir, dir_len) = text(directory);
        // SAFETY: `dib` is live; LLVM copies both strings.
        let raw = unsafe { LLVMDIBuilderCreateFile(dib, name, name_len, dir, dir_len) };
        Ok(self.intern_metadata(raw, false))
    }

    /// Create the builder's compile unit. An empty `producer` falls back to
    /// the session's configured producer.
    pub fn di_create_compile_unit(
        &mut self,
        builder: DIBuilderHandle,
        language: u32,
        filename: &str,
        directory: &str,
        producer: &str,
        optimized: bool,
        flags: &str,
        runtime_version: u32,
    ) -> Result<MetadataHandle, ShimError> {
        let lang = dwarf_language(language).ok_or(ShimError::InvalidEnumValue {
            what: "DWARF source language",
            value: language,
        })?;
        if self.di_slot(builder)?.has_unit {
            return Err(ShimError::operand(
                "di_create_compile_unit",
                "builder already has a compile unit",
            ));
        }
        let file = self.di_create_file(builder, filename, directory)?;
        let file = self.metadata(file)?;
        let dib = self.dib(builder)?;
        let producer = if producer.is_empty() {
            self.config.producer().to_string()
        } else {
            producer.to_string()
        };
        let (producer, producer_len) = text(&producer);
        let (flags, flags_len) = text(flags);
        // SAFETY: `dib` and `file` are live; string arguments are copied.
        let raw = unsafe {
            LLVMDIBuilderCreateCompileUnit(
                dib,
                lang,
                file,
                producer,
                producer_len,
                llvm_bool(optimized),
                flags,
                flags_len,
                runtime_version,
                std::ptr::null(),
                0,
                LLVMDWARFEmissionKind::LLVMDWARFEmissionKindFull,
                0,
                llvm_bool(true),
                llvm_bool(false),
                std::ptr::null(),
                0,
                std::ptr::null(),
                0,
            )
        };
        if let Some(Some(slot)) = self.di_builders.get_mut(builder.slot()) {
            slot.has_unit = true;
        }
        self.add_root(builder, raw);
        Ok(self.intern_metadata(raw, false))
    }

    // -- Scopes --

    /// Create a subprogram and attach it to `func`.
    pub fn di_create_function(
        &mut self,
        builder: DIBuilderHandle,
        scope: MetadataHandle,
        name: &str,
        linkage_name: &str,
        file: MetadataHandle,
        line: u32,
        ty: MetadataHandle,
        is_local: bool,
        is_definition: bool,
        scope_line: u32,
        flags: u32,
        is_optimized: bool,
        func: ValueHandle,
    ) -> Result<MetadataHandle, ShimError> {
        let slot = self.di_slot(builder)?;
        let (dib, builder_module) = (slot.raw.0, slot.module);
        let (func_raw, func_module) = self.live_function(func)?;
        if func_module != builder_module {
            return Err(ShimError::operand(
                "di_create_function",
                "function belongs to another module",
            ));
        }
        // SAFETY: `func_raw` is a function of a live module.
        if !unsafe { LLVMGetSubprogram(func_raw) }.is_null() {
            return Err(ShimError::SubprogramAlreadyAttached {
                function: self.value_name(func_raw),
            });
        }
        let scope = self.metadata(scope)?;
        let file = self.metadata(file)?;
        let ty = self.require_kind(
            ty,
            "di_create_function",
            &[LLVMMetadataKind::LLVMDISubroutineTypeMetadataKind],
            "a subroutine type",
        )?;
        let flags = self.di_flags(flags);
        let (name, name_len) = text(name);
        let (linkage, linkage_len) = text(linkage_name);
        // SAFETY: every metadata argument is a live node of this context.
        let raw = unsafe {
            let sp = LLVMDIBuilderCreateFunction(
                dib,
                scope,
                name,
                name_len,
                linkage,
                linkage_len,
                file,
                line,
                ty,
                llvm_bool(is_local),
                llvm_bool(is_definition),
                scope_line,
                flags,
                llvm_bool(is_optimized),
            );
            LLVMSetSubprogram(func_raw, sp);
            sp
        };
        self.add_root(builder, raw);
        Ok(self.intern_metadata(raw, false))
    }

    pub fn di_create_lexical_block(
        &mut self,
        builder: DIBuilderHandle,
        scope: MetadataHandle,
        file: MetadataHandle,
        line: u32,
        column: u32,
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let scope = self.require_kind(
            scope,
            "di_create_lexical_block",
            &[
                LLVMMetadataKind::LLVMDISubprogramMetadataKind,
                LLVMMetadataKind::LLVMDILexicalBlockMetadataKind,
                LLVMMetadataKind::LLVMDILexicalBlockFileMetadataKind,
            ],
            "a local scope",
        )?;
        let file = self.metadata(file)?;
        // SAFETY: `scope` and `file` are live nodes of this context.
        let raw = unsafe { LLVMDIBuilderCreateLexicalBlock(dib, scope, file, line, column) };
        Ok(self.intern_metadata(raw, false))
    }

    // -- Types --

    /// Basic type. The LLVM-C entry carries no alignment, so `align_bits`
    /// is accepted and dropped on every generation.
    pub fn di_create_basic_type(
        &mut self,
        builder: DIBuilderHandle,
        name: &str,
        size_bits: u64,
        align_bits: u32,
        encoding: u32,
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        if align_bits != 0 && self.caps.basic_type_alignment {
            tracing::debug!(align_bits, name, "basic type alignment not expressible");
        }
        let flags = self.di_flags(0);
        let (name, name_len) = text(name);
        // SAFETY: `dib` is live; the name is copied.
        let raw =
            unsafe { LLVMDIBuilderCreateBasicType(dib, name, name_len, size_bits, encoding, flags) };
        Ok(self.intern_metadata(raw, false))
    }

    /// Struct type with `members` in declaration order. An empty member
    /// list is a valid, complete type.
    pub fn di_create_struct_type(
        &mut self,
        builder: DIBuilderHandle,
        scope: MetadataHandle,
        name: &str,
        file: MetadataHandle,
        line: u32,
        size_bits: u64,
        align_bits: u32,
        flags: u32,
        derived_from: Option<MetadataHandle>,
        members: &[MetadataHandle],
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let scope = self.metadata(scope)?;
        let file = self.metadata(file)?;
        let derived_from = self.opt_metadata(derived_from)?;
        let mut members = self.metadata_list(members)?;
        let flags = self.di_flags(flags);
        let (name, name_len) = text(name);
        // SAFETY: all metadata arguments are live or null.
        let raw = unsafe {
            LLVMDIBuilderCreateStructType(
                dib,
                scope,
                name,
                name_len,
                file,
                line,
                size_bits,
                align_bits,
                flags,
                derived_from,
                members.as_mut_ptr(),
                members.len() as u32,
                0,
                std::ptr::null_mut(),
                std::ptr::null(),
                0,
            )
        };
        Ok(self.intern_metadata(raw, false))
    }

    pub fn di_create_union_type(
        &mut self,
        builder: DIBuilderHandle,
        scope: MetadataHandle,
        name: &str,
        file: MetadataHandle,
        line: u32,
        size_bits: u64,
        align_bits: u32,
        flags: u32,
        elements: &[MetadataHandle],
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let scope = self.metadata(scope)?;
        let file = self.metadata(file)?;
        let mut elements = self.metadata_list(elements)?;
        let flags = self.di_flags(flags);
        let (name, name_len) = text(name);
        // SAFETY: all metadata arguments are live.
        let raw = unsafe {
            LLVMDIBuilderCreateUnionType(
                dib,
                scope,
                name,
                name_len,
                file,
                line,
                size_bits,
                align_bits,
                flags,
                elements.as_mut_ptr(),
                elements.len() as u32,
                0,
                std::ptr::null(),
                0,
            )
        };
        Ok(self.intern_metadata(raw, false))
    }

    /// Array type; `subscripts` are subrange nodes, outermost first.
    pub fn di_create_array_type(
        &mut self,
        builder: DIBuilderHandle,
        size_bits: u64,
        align_bits: u32,
        element_type: MetadataHandle,
        subscripts: &[MetadataHandle],
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let element_type = self.metadata(element_type)?;
        let mut subscripts = self.metadata_list(subscripts)?;
        // SAFETY: all metadata arguments are live.
        let raw = unsafe {
            LLVMDIBuilderCreateArrayType(
                dib,
                size_bits,
                align_bits,
                element_type,
                subscripts.as_mut_ptr(),
                subscripts.len() as u32,
            )
        };
        Ok(self.intern_metadata(raw, false))
    }

    pub fn di_create_enumeration_type(
        &mut self,
        builder: DIBuilderHandle,
        scope: MetadataHandle,
        name: &str,
        file: MetadataHandle,
        line: u32,
        size_bits: u64,
        align_bits: u32,
        enumerators: &[MetadataHandle],
        underlying_type: Option<MetadataHandle>,
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let scope = self.metadata(scope)?;
        let file = self.metadata(file)?;
        let mut enumerators = self.metadata_list(enumerators)?;
        let underlying_type = self.opt_metadata(underlying_type)?;
        let (name, name_len) = text(name);
        // SAFETY: all metadata arguments are live or null.
        let raw = unsafe {
            LLVMDIBuilderCreateEnumerationType(
                dib,
                scope,
                name,
                name_len,
                file,
                line,
                size_bits,
                align_bits,
                enumerators.as_mut_ptr(),
                enumerators.len() as u32,
                underlying_type,
            )
        };
        Ok(self.intern_metadata(raw, false))
    }

    pub fn di_create_member_type(
        &mut self,
        builder: DIBuilderHandle,
        scope: MetadataHandle,
        name: &str,
        file: MetadataHandle,
        line: u32,
        size_bits: u64,
        align_bits: u32,
        offset_bits: u64,
        flags: u32,
        ty: MetadataHandle,
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let scope = self.metadata(scope)?;
        let file = self.metadata(file)?;
        let ty = self.metadata(ty)?;
        let flags = self.di_flags(flags);
        let (name, name_len) = text(name);
        // SAFETY: all metadata arguments are live.
        let raw = unsafe {
            LLVMDIBuilderCreateMemberType(
                dib,
                scope,
                name,
                name_len,
                file,
                line,
                size_bits,
                align_bits,
                offset_bits,
                flags,
                ty,
            )
        };
        Ok(self.intern_metadata(raw, false))
    }

    /// Pointer type in the default address space.
    pub fn di_create_pointer_type(
        &mut self,
        builder: DIBuilderHandle,
        pointee: MetadataHandle,
        size_bits: u64,
        align_bits: u32,
        name: &str,
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let pointee = self.metadata(pointee)?;
        let (name, name_len) = text(name);
        // SAFETY: `pointee` is live; the name is copied.
        let raw = unsafe {
            LLVMDIBuilderCreatePointerType(dib, pointee, size_bits, align_bits, 0, name, name_len)
        };
        Ok(self.intern_metadata(raw, false))
    }

    /// Forward-declared struct, to be merged into its definition with
    /// [`di_replace_temporary`](Self::di_replace_temporary).
    pub fn di_create_replaceable_composite_type(
        &mut self,
        builder: DIBuilderHandle,
        scope: MetadataHandle,
        name: &str,
        file: MetadataHandle,
        line: u32,
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let scope = self.metadata(scope)?;
        let file = self.metadata(file)?;
        let flags = self.di_flags(DIFlags::FWD_DECL.bits());
        let (name, name_len) = text(name);
        // SAFETY: `scope` and `file` are live; the name is copied.
        let raw = unsafe {
            LLVMDIBuilderCreateReplaceableCompositeType(
                dib,
                DW_TAG_STRUCTURE_TYPE,
                name,
                name_len,
                scope,
                file,
                line,
                0,
                0,
                0,
                flags,
                std::ptr::null(),
                0,
            )
        };
        Ok(self.intern_metadata(raw, true))
    }

    /// Replace a forward declaration made by this builder's module.
    pub fn di_replace_temporary(
        &mut self,
        builder: DIBuilderHandle,
        placeholder: MetadataHandle,
        replacement: MetadataHandle,
    ) -> Result<(), ShimError> {
        self.dib(builder)?;
        self.replace_all_uses_with(placeholder, replacement)
    }

    /// Subroutine type from its signature. The first entry is the return
    /// type; `None` stands for `void`.
    pub fn di_create_subroutine_type(
        &mut self,
        builder: DIBuilderHandle,
        file: Option<MetadataHandle>,
        parameter_types: &[Option<MetadataHandle>],
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let file = self.opt_metadata(file)?;
        let mut types = parameter_types
            .iter()
            .map(|&t| self.opt_metadata(t))
            .collect::<Result<Vec<_>, _>>()?;
        let flags = self.di_flags(0);
        // SAFETY: every entry is live or null.
        let raw = unsafe {
            LLVMDIBuilderCreateSubroutineType(
                dib,
                file,
                types.as_mut_ptr(),
                types.len() as u32,
                flags,
            )
        };
        Ok(self.intern_metadata(raw, false))
    }

    pub fn di_get_or_create_subrange(
        &mut self,
        builder: DIBuilderHandle,
        lower_bound: i64,
        count: i64,
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        // SAFETY: `dib` is live.
        let raw = unsafe { LLVMDIBuilderGetOrCreateSubrange(dib, lower_bound, count) };
        Ok(self.intern_metadata(raw, false))
    }

    pub fn di_create_enumerator(
        &mut self,
        builder: DIBuilderHandle,
        name: &str,
        value: i64,
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let (name, name_len) = text(name);
        // SAFETY: `dib` is live; the name is copied.
        let raw =
            unsafe { LLVMDIBuilderCreateEnumerator(dib, name, name_len, value, llvm_bool(false)) };
        Ok(self.intern_metadata(raw, false))
    }

    /// Tuple of types. `None` entries stand for `void`.
    pub fn di_get_or_create_type_array(
        &mut self,
        builder: DIBuilderHandle,
        types: &[Option<MetadataHandle>],
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let mut types = types
            .iter()
            .map(|&t| self.opt_metadata(t))
            .collect::<Result<Vec<_>, _>>()?;
        // SAFETY: every entry is live or null.
        let raw = unsafe { LLVMDIBuilderGetOrCreateTypeArray(dib, types.as_mut_ptr(), types.len()) };
        Ok(self.intern_metadata(raw, false))
    }

    pub fn di_get_or_create_array(
        &mut self,
        builder: DIBuilderHandle,
        elements: &[MetadataHandle],
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let mut elements = self.metadata_list(elements)?;
        // SAFETY: every entry is live.
        let raw =
            unsafe { LLVMDIBuilderGetOrCreateArray(dib, elements.as_mut_ptr(), elements.len()) };
        Ok(self.intern_metadata(raw, false))
    }

    // -- Variables --

    /// Local variable. `align_bits` only reaches generations whose
    /// variables carry an alignment.
    pub fn di_create_auto_variable(
        &mut self,
        builder: DIBuilderHandle,
        scope: MetadataHandle,
        name: &str,
        file: MetadataHandle,
        line: u32,
        ty: MetadataHandle,
        always_preserve: bool,
        flags: u32,
        align_bits: u32,
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        // Alignment moved from basic types to variables in the same release.
        let align_bits = if self.caps.basic_type_alignment {
            0
        } else {
            align_bits
        };
        let scope = self.metadata(scope)?;
        let file = self.metadata(file)?;
        let ty = self.metadata(ty)?;
        let flags = self.di_flags(flags);
        let (name, name_len) = text(name);
        // SAFETY: all metadata arguments are live.
        let raw = unsafe {
            LLVMDIBuilderCreateAutoVariable(
                dib,
                scope,
                name,
                name_len,
                file,
                line,
                ty,
                llvm_bool(always_preserve),
                flags,
                align_bits,
            )
        };
        self.add_root(builder, raw);
        Ok(self.intern_metadata(raw, false))
    }

    /// Parameter variable; `arg_no` is 1-based.
    pub fn di_create_parameter_variable(
        &mut self,
        builder: DIBuilderHandle,
        scope: MetadataHandle,
        name: &str,
        arg_no: u32,
        file: MetadataHandle,
        line: u32,
        ty: MetadataHandle,
        always_preserve: bool,
        flags: u32,
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        if arg_no == 0 {
            return Err(ShimError::operand(
                "di_create_parameter_variable",
                "argument numbers start at 1",
            ));
        }
        let scope = self.metadata(scope)?;
        let file = self.metadata(file)?;
        let ty = self.metadata(ty)?;
        let flags = self.di_flags(flags);
        let (name, name_len) = text(name);
        // SAFETY: all metadata arguments are live.
        let raw = unsafe {
            LLVMDIBuilderCreateParameterVariable(
                dib,
                scope,
                name,
                name_len,
                arg_no,
                file,
                line,
                ty,
                llvm_bool(always_preserve),
                flags,
            )
        };
        self.add_root(builder, raw);
        Ok(self.intern_metadata(raw, false))
    }

    pub fn di_create_expression(
        &mut self,
        builder: DIBuilderHandle,
        address_ops: &[i64],
    ) -> Result<MetadataHandle, ShimError> {
        let dib = self.dib(builder)?;
        let mut ops: Vec<u64> = address_ops.iter().map(|&op| op as u64).collect();
        // SAFETY: `ops` outlives the call; LLVM copies it.
        let raw = unsafe { LLVMDIBuilderCreateExpression(dib, ops.as_mut_ptr(), ops.len()) };
        Ok(self.intern_metadata(raw, false))
    }

    /// Append a declare marker binding `storage` to `variable`.
    pub fn di_insert_declare_at_end(
        &mut self,
        builder: DIBuilderHandle,
        storage: ValueHandle,
        variable: MetadataHandle,
        expression: MetadataHandle,
        location: MetadataHandle,
        block: BasicBlockHandle,
    ) -> Result<ValueHandle, ShimError> {
        let slot = self.di_slot(builder)?;
        let (dib, module) = (slot.raw.0, slot.module);
        let storage = self.value(storage)?;
        let variable = self.require_kind(
            variable,
            "di_insert_declare_at_end",
            &[LLVMMetadataKind::LLVMDILocalVariableMetadataKind],
            "a local variable",
        )?;
        let expression = self.require_kind(
            expression,
            "di_insert_declare_at_end",
            &[LLVMMetadataKind::LLVMDIExpressionMetadataKind],
            "an expression",
        )?;
        let location = self.require_kind(
            location,
            "di_insert_declare_at_end",
            &[LLVMMetadataKind::LLVMDILocationMetadataKind],
            "a debug location",
        )?;
        let block = self.block_entry(block)?;
        if block.module != Some(module) {
            return Err(ShimError::operand(
                "di_insert_declare_at_end",
                "block belongs to another module",
            ));
        }
        // SAFETY: every argument is live and belongs to the builder's module.
        let raw = unsafe {
            LLVMDIBuilderInsertDeclareAtEnd(dib, storage, variable, expression, location, block.raw)
        };
        Ok(self.intern_value(raw, Some(module)))
    }

    // -- Locations --

    pub fn create_debug_location(
        &mut self,
        line: u32,
        column: u32,
        scope: MetadataHandle,
        inlined_at: Option<MetadataHandle>,
    ) -> Result<MetadataHandle, ShimError> {
        let scope = self.require_kind(
            scope,
            "create_debug_location",
            &[
                LLVMMetadataKind::LLVMDISubprogramMetadataKind,
                LLVMMetadataKind::LLVMDILexicalBlockMetadataKind,
                LLVMMetadataKind::LLVMDILexicalBlockFileMetadataKind,
            ],
            "a local scope",
        )?;
        let inlined_at = match inlined_at {
            Some(at) => self.require_kind(
                at,
                "create_debug_location",
                &[LLVMMetadataKind::LLVMDILocationMetadataKind],
                "a debug location",
            )?,
            None => std::ptr::null_mut(),
        };
        // SAFETY: `scope` is a live local scope; `inlined_at` is a location or null.
        let raw = unsafe {
            LLVMDIBuilderCreateDebugLocation(self.llvm_context(), line, column, scope, inlined_at)
        };
        Ok(self.intern_metadata(raw, false))
    }

    /// Attach a location to every instruction `builder` builds from now on.
    /// A `None` scope clears it.
    pub fn set_current_debug_location(
        &mut self,
        builder: IrBuilderHandle,
        line: u32,
        column: u32,
        scope: Option<MetadataHandle>,
        inlined_at: Option<MetadataHandle>,
    ) -> Result<(), ShimError> {
        let raw_builder = self.ir_builder(builder)?.builder.as_mut_ptr();
        let loc = match scope {
            Some(scope) => {
                let loc = self.create_debug_location(line, column, scope, inlined_at)?;
                self.metadata(loc)?
            }
            None => std::ptr::null_mut(),
        };
        // SAFETY: the builder is live; `loc` is a location or null.
        unsafe { LLVMSetCurrentDebugLocation2(raw_builder, loc) };
        Ok(())
    }

    // -- Finalize --

    /// Emit the builder's metadata into its module. Runs once per builder.
    ///
    /// Adds the `"Dwarf Version"` and `"Debug Info Version"` module flags.
    /// A refused finalize leaves the module untouched.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn di_finalize(&mut self, builder: DIBuilderHandle) -> Result<(), ShimError> {
        let slot = self.di_slot(builder)?;
        if slot.finalized {
            return Err(ShimError::AlreadyFinalized);
        }
        let (dib, module) = (slot.raw.0, slot.module);
        if self.caps.detects_unresolved_temporaries {
            let count = self.unresolved_temporaries(&slot.roots);
            if count > 0 {
                return Err(ShimError::UnresolvedTemporary { count });
            }
        }
        self.flush_redirects();
        // SAFETY: `dib` is live and not yet finalized.
        unsafe { LLVMDIBuilderFinalize(dib) };

        let i32_type = self.ctx.i32_type();
        let dwarf_version = i32_type.const_int(u64::from(self.config.dwarf_version()), false);
        let debug_info_version = i32_type.const_int(self.config.debug_info_version(), false);
        let live = self.live_module(module)?;
        live.add_basic_value_flag("Dwarf Version", FlagBehavior::Warning, dwarf_version);
        live.add_basic_value_flag("Debug Info Version", FlagBehavior::Warning, debug_info_version);
        if let Some(Some(slot)) = self.di_builders.get_mut(builder.slot()) {
            slot.finalized = true;
        }
        Ok(())
    }
}
