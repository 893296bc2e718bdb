//! Module and IR core: the plain entry points that produce the modules,
//! types, functions, blocks, and values the façade operations consume.

use inkwell::targets::TargetTriple;
use llvm_sys::core::{
    LLVMAddFunction, LLVMAppendBasicBlockInContext, LLVMArrayType, LLVMBuildAdd, LLVMBuildAlloca,
    LLVMBuildBr, LLVMBuildLoad2, LLVMBuildRet, LLVMBuildRetVoid, LLVMBuildStore,
    LLVMBuildUnreachable, LLVMConstInt, LLVMConstNull, LLVMCountParams, LLVMDoubleTypeInContext,
    LLVMFloatTypeInContext, LLVMFunctionType, LLVMGetBasicBlockParent, LLVMGetNamedFunction,
    LLVMGetParam, LLVMGetTypeKind, LLVMGetValueName2, LLVMIntTypeInContext, LLVMIsAFunction,
    LLVMPointerTypeInContext, LLVMPositionBuilderAtEnd, LLVMSetDataLayout,
    LLVMStructTypeInContext, LLVMTokenTypeInContext, LLVMTypeOf, LLVMVoidTypeInContext,
};
use llvm_sys::prelude::{LLVMBasicBlockRef, LLVMTypeRef, LLVMValueRef};
use llvm_sys::LLVMTypeKind;

use crate::error::ShimError;
use crate::handle::{BasicBlockHandle, IrBuilderHandle, ModuleHandle, Slot, TypeHandle, ValueHandle};
use crate::linked::{c_string, llvm_bool};
use crate::session::{IrBuilderSlot, ModuleSlot, Session};

/// Widest integer type LLVM accepts.
const MAX_INT_BITS: u32 = 1 << 23;

impl Session {
    // -- Modules --

    pub fn create_module(&mut self, name: &str) -> Result<ModuleHandle, ShimError> {
        c_string("module name", name)?;
        let handle = ModuleHandle::from_slot(self.modules.len());
        self.modules.push(ModuleSlot::Live(self.ctx.create_module(name)));
        tracing::debug!(module = ?handle, name, "module created");
        Ok(handle)
    }

    /// Set the module's target triple, stored normalized.
    pub fn set_target(&mut self, module: ModuleHandle, triple: &str) -> Result<(), ShimError> {
        c_string("target triple", triple)?;
        let normalized = crate::normalize_triple(triple);
        self.live_module(module)?
            .set_triple(&TargetTriple::create(&normalized));
        Ok(())
    }

    pub fn set_data_layout(&mut self, module: ModuleHandle, layout: &str) -> Result<(), ShimError> {
        let layout = c_string("data layout", layout)?;
        let m = self.module_ref(module)?;
        // SAFETY: `m` is a live module of this session.
        unsafe { LLVMSetDataLayout(m, layout.as_ptr()) };
        Ok(())
    }

    /// Textual IR of `module`, with every recorded replacement applied.
    pub fn print_module_to_string(&mut self, module: ModuleHandle) -> Result<String, ShimError> {
        self.live_module(module)?;
        self.flush_redirects();
        Ok(self.live_module(module)?.print_to_string().to_string())
    }

    /// Release a module. Its handle, its values and blocks, and the debug
    /// builder bound to it go stale.
    pub fn dispose_module(&mut self, module: ModuleHandle) -> Result<(), ShimError> {
        self.live_module(module)?;
        self.release_module_tables(module);
        self.modules[module.slot()] = ModuleSlot::Disposed;
        tracing::debug!(?module, "module disposed");
        Ok(())
    }

    // -- Types --

    pub fn void_type(&mut self) -> TypeHandle {
        // SAFETY: the context outlives every type handle.
        let raw = unsafe { LLVMVoidTypeInContext(self.llvm_context()) };
        self.intern_type(raw)
    }

    pub fn int_type(&mut self, bits: u32) -> Result<TypeHandle, ShimError> {
        if bits == 0 || bits > MAX_INT_BITS {
            return Err(ShimError::operand(
                "int_type",
                format!("width {bits} is outside 1..={MAX_INT_BITS}"),
            ));
        }
        let raw = unsafe { LLVMIntTypeInContext(self.llvm_context(), bits) };
        Ok(self.intern_type(raw))
    }

    pub fn float_type(&mut self) -> TypeHandle {
        let raw = unsafe { LLVMFloatTypeInContext(self.llvm_context()) };
        self.intern_type(raw)
    }

    pub fn double_type(&mut self) -> TypeHandle {
        let raw = unsafe { LLVMDoubleTypeInContext(self.llvm_context()) };
        self.intern_type(raw)
    }

    /// Opaque pointer in `address_space`.
    pub fn pointer_type(&mut self, address_space: u32) -> TypeHandle {
        let raw = unsafe { LLVMPointerTypeInContext(self.llvm_context(), address_space) };
        self.intern_type(raw)
    }

    pub fn token_type(&mut self) -> TypeHandle {
        let raw = unsafe { LLVMTokenTypeInContext(self.llvm_context()) };
        self.intern_type(raw)
    }

    pub fn function_type(
        &mut self,
        ret: TypeHandle,
        params: &[TypeHandle],
        varargs: bool,
    ) -> Result<TypeHandle, ShimError> {
        let ret = self.ty(ret)?;
        let mut params = params
            .iter()
            .map(|&p| self.ty(p))
            .collect::<Result<Vec<_>, _>>()?;
        let raw = unsafe {
            LLVMFunctionType(
                ret,
                params.as_mut_ptr(),
                params.len() as u32,
                llvm_bool(varargs),
            )
        };
        Ok(self.intern_type(raw))
    }

    /// Literal, unpacked struct.
    pub fn struct_type(&mut self, fields: &[TypeHandle]) -> Result<TypeHandle, ShimError> {
        let mut fields = fields
            .iter()
            .map(|&f| self.ty(f))
            .collect::<Result<Vec<_>, _>>()?;
        let raw = unsafe {
            LLVMStructTypeInContext(
                self.llvm_context(),
                fields.as_mut_ptr(),
                fields.len() as u32,
                llvm_bool(false),
            )
        };
        Ok(self.intern_type(raw))
    }

    pub fn array_type(&mut self, element: TypeHandle, len: u64) -> Result<TypeHandle, ShimError> {
        let element = self.ty(element)?;
        let len = u32::try_from(len)
            .map_err(|_| ShimError::operand("array_type", format!("length {len} exceeds u32")))?;
        let raw = unsafe { LLVMArrayType(element, len) };
        Ok(self.intern_type(raw))
    }

    pub fn type_of(&mut self, value: ValueHandle) -> Result<TypeHandle, ShimError> {
        let value = self.value(value)?;
        let raw = unsafe { LLVMTypeOf(value) };
        Ok(self.intern_type(raw))
    }

    pub(crate) fn type_kind(ty: LLVMTypeRef) -> LLVMTypeKind {
        // SAFETY: `ty` came out of a session table.
        unsafe { LLVMGetTypeKind(ty) }
    }

    // -- Functions and blocks --

    pub fn add_function(
        &mut self,
        module: ModuleHandle,
        name: &str,
        fn_type: TypeHandle,
    ) -> Result<ValueHandle, ShimError> {
        let m = self.module_ref(module)?;
        let fn_type = self.ty(fn_type)?;
        if Self::type_kind(fn_type) != LLVMTypeKind::LLVMFunctionTypeKind {
            return Err(ShimError::operand("add_function", "type is not a function type"));
        }
        let name = c_string("function name", name)?;
        let func = unsafe { LLVMAddFunction(m, name.as_ptr(), fn_type) };
        Ok(self.intern_value(func, Some(module)))
    }

    pub fn get_named_function(
        &mut self,
        module: ModuleHandle,
        name: &str,
    ) -> Result<Option<ValueHandle>, ShimError> {
        let m = self.module_ref(module)?;
        let name = c_string("function name", name)?;
        let func = unsafe { LLVMGetNamedFunction(m, name.as_ptr()) };
        Ok((!func.is_null()).then(|| self.intern_value(func, Some(module))))
    }

    /// A function of a module the caller still owns, and that module.
    pub(crate) fn live_function(
        &self,
        func: ValueHandle,
    ) -> Result<(LLVMValueRef, ModuleHandle), ShimError> {
        let entry = self.value_entry(func)?;
        let module = match entry.module {
            Some(module) if !unsafe { LLVMIsAFunction(entry.raw) }.is_null() => module,
            _ => return Err(ShimError::operand("function", "value is not a function")),
        };
        Ok((entry.raw, module))
    }

    /// Name of a global or instruction, lossily decoded.
    pub(crate) fn value_name(&self, raw: LLVMValueRef) -> String {
        let mut len = 0;
        // SAFETY: `raw` is live; the returned bytes are owned by LLVM.
        unsafe {
            let ptr = LLVMGetValueName2(raw, &mut len);
            if ptr.is_null() {
                return String::new();
            }
            String::from_utf8_lossy(std::slice::from_raw_parts(ptr.cast::<u8>(), len)).into_owned()
        }
    }

    pub fn get_param(&mut self, func: ValueHandle, index: u32) -> Result<ValueHandle, ShimError> {
        let (func, module) = self.live_function(func)?;
        let count = unsafe { LLVMCountParams(func) };
        if index >= count {
            return Err(ShimError::operand(
                "get_param",
                format!("index {index} with {count} parameter(s)"),
            ));
        }
        let param = unsafe { LLVMGetParam(func, index) };
        Ok(self.intern_value(param, Some(module)))
    }

    pub fn append_basic_block(
        &mut self,
        func: ValueHandle,
        name: &str,
    ) -> Result<BasicBlockHandle, ShimError> {
        let (func, module) = self.live_function(func)?;
        let name = c_string("block name", name)?;
        let block =
            unsafe { LLVMAppendBasicBlockInContext(self.llvm_context(), func, name.as_ptr()) };
        Ok(self.blocks.intern(block, Some(module)))
    }

    // -- Constants --

    pub fn const_int(&mut self, ty: TypeHandle, value: u64) -> Result<ValueHandle, ShimError> {
        let ty = self.ty(ty)?;
        if Self::type_kind(ty) != LLVMTypeKind::LLVMIntegerTypeKind {
            return Err(ShimError::operand("const_int", "type is not an integer type"));
        }
        let raw = unsafe { LLVMConstInt(ty, value, llvm_bool(false)) };
        Ok(self.intern_value(raw, None))
    }

    /// Zero value of `ty`; `none` for the token type.
    pub fn const_null(&mut self, ty: TypeHandle) -> Result<ValueHandle, ShimError> {
        let ty = self.ty(ty)?;
        if matches!(
            Self::type_kind(ty),
            LLVMTypeKind::LLVMVoidTypeKind
                | LLVMTypeKind::LLVMFunctionTypeKind
                | LLVMTypeKind::LLVMLabelTypeKind
                | LLVMTypeKind::LLVMMetadataTypeKind
        ) {
            return Err(ShimError::operand("const_null", "type has no null value"));
        }
        let raw = unsafe { LLVMConstNull(ty) };
        Ok(self.intern_value(raw, None))
    }

    // -- Builders --

    pub fn create_builder(&mut self) -> IrBuilderHandle {
        let handle = IrBuilderHandle::from_slot(self.ir_builders.len());
        self.ir_builders.push(Some(IrBuilderSlot {
            builder: self.ctx.create_builder(),
            block: None,
        }));
        handle
    }

    pub fn dispose_builder(&mut self, builder: IrBuilderHandle) -> Result<(), ShimError> {
        self.ir_builder(builder)?;
        self.ir_builders[builder.slot()] = None;
        Ok(())
    }

    pub fn position_at_end(
        &mut self,
        builder: IrBuilderHandle,
        block: BasicBlockHandle,
    ) -> Result<(), ShimError> {
        let raw = self.block(block)?;
        let slot = self.ir_builder_mut(builder)?;
        // SAFETY: `raw` belongs to a live module.
        unsafe { LLVMPositionBuilderAtEnd(slot.builder.as_mut_ptr(), raw) };
        slot.block = Some(block);
        Ok(())
    }

    pub fn get_insert_block(
        &self,
        builder: IrBuilderHandle,
    ) -> Result<Option<BasicBlockHandle>, ShimError> {
        Ok(self
            .ir_builder(builder)?
            .block
            .filter(|&block| self.block(block).is_ok()))
    }

    /// Record an instruction built into `module`.
    pub(crate) fn built(&mut self, raw: LLVMValueRef, module: ModuleHandle) -> ValueHandle {
        self.intern_value(raw, Some(module))
    }

    // -- Instructions --

    pub fn build_alloca(
        &mut self,
        builder: IrBuilderHandle,
        ty: TypeHandle,
        name: &str,
    ) -> Result<ValueHandle, ShimError> {
        let (b, module) = self.positioned(builder)?;
        let ty = self.ty(ty)?;
        let name = c_string("value name", name)?;
        let inst = unsafe { LLVMBuildAlloca(b, ty, name.as_ptr()) };
        Ok(self.built(inst, module))
    }

    pub fn build_load(
        &mut self,
        builder: IrBuilderHandle,
        ty: TypeHandle,
        ptr: ValueHandle,
        name: &str,
    ) -> Result<ValueHandle, ShimError> {
        let (b, module) = self.positioned(builder)?;
        let ty = self.ty(ty)?;
        let ptr = self.pointer_operand("build_load", ptr)?;
        let name = c_string("value name", name)?;
        let inst = unsafe { LLVMBuildLoad2(b, ty, ptr, name.as_ptr()) };
        Ok(self.built(inst, module))
    }

    pub fn build_store(
        &mut self,
        builder: IrBuilderHandle,
        value: ValueHandle,
        ptr: ValueHandle,
    ) -> Result<ValueHandle, ShimError> {
        let (b, module) = self.positioned(builder)?;
        let value = self.value(value)?;
        let ptr = self.pointer_operand("build_store", ptr)?;
        let inst = unsafe { LLVMBuildStore(b, value, ptr) };
        Ok(self.built(inst, module))
    }

    pub fn build_add(
        &mut self,
        builder: IrBuilderHandle,
        lhs: ValueHandle,
        rhs: ValueHandle,
        name: &str,
    ) -> Result<ValueHandle, ShimError> {
        let (b, module) = self.positioned(builder)?;
        let lhs = self.value(lhs)?;
        let rhs = self.value(rhs)?;
        let (lhs_ty, rhs_ty) = unsafe { (LLVMTypeOf(lhs), LLVMTypeOf(rhs)) };
        if lhs_ty != rhs_ty || Self::type_kind(lhs_ty) != LLVMTypeKind::LLVMIntegerTypeKind {
            return Err(ShimError::operand(
                "build_add",
                "operands must share one integer type",
            ));
        }
        let name = c_string("value name", name)?;
        let inst = unsafe { LLVMBuildAdd(b, lhs, rhs, name.as_ptr()) };
        Ok(self.built(inst, module))
    }

    pub fn build_ret(
        &mut self,
        builder: IrBuilderHandle,
        value: ValueHandle,
    ) -> Result<ValueHandle, ShimError> {
        let (b, module) = self.positioned(builder)?;
        let value = self.value(value)?;
        let inst = unsafe { LLVMBuildRet(b, value) };
        Ok(self.built(inst, module))
    }

    pub fn build_ret_void(&mut self, builder: IrBuilderHandle) -> Result<ValueHandle, ShimError> {
        let (b, module) = self.positioned(builder)?;
        let inst = unsafe { LLVMBuildRetVoid(b) };
        Ok(self.built(inst, module))
    }

    pub fn build_br(
        &mut self,
        builder: IrBuilderHandle,
        dest: BasicBlockHandle,
    ) -> Result<ValueHandle, ShimError> {
        let (b, module) = self.positioned(builder)?;
        let dest = self.same_function_block(builder, dest)?;
        let inst = unsafe { LLVMBuildBr(b, dest) };
        Ok(self.built(inst, module))
    }

    pub fn build_unreachable(&mut self, builder: IrBuilderHandle) -> Result<ValueHandle, ShimError> {
        let (b, module) = self.positioned(builder)?;
        let inst = unsafe { LLVMBuildUnreachable(b) };
        Ok(self.built(inst, module))
    }

    // -- Operand checks --

    pub(crate) fn pointer_operand(
        &self,
        operation: &'static str,
        ptr: ValueHandle,
    ) -> Result<LLVMValueRef, ShimError> {
        let ptr = self.value(ptr)?;
        if Self::type_kind(unsafe { LLVMTypeOf(ptr) }) != LLVMTypeKind::LLVMPointerTypeKind {
            return Err(ShimError::operand(operation, "address is not a pointer"));
        }
        Ok(ptr)
    }

    /// A branch target in the function `builder` is appending to.
    pub(crate) fn same_function_block(
        &self,
        builder: IrBuilderHandle,
        target: BasicBlockHandle,
    ) -> Result<LLVMBasicBlockRef, ShimError> {
        let target = self.block(target)?;
        let current = self
            .ir_builder(builder)?
            .block
            .map(|block| self.block(block))
            .transpose()?
            .ok_or(ShimError::Unpositioned)?;
        // SAFETY: both blocks belong to live modules.
        let same = unsafe { LLVMGetBasicBlockParent(target) == LLVMGetBasicBlockParent(current) };
        if !same {
            return Err(ShimError::operand(
                "branch",
                "target block belongs to another function",
            ));
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests;
