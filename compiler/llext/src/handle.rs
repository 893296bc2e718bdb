//! Opaque handles and their C encoding.
//!
//! In Rust every handle is a `Copy` newtype over a `u32` index into one of
//! the session's tables. A table entry holds the LLVM reference, so a handle
//! never exposes a raw pointer. At the C boundary a handle travels as a
//! `u64`:
//!
//! ```text
//!  63      56 55          32 31                 0
//! ┌──────────┬──────────────┬────────────────────┐
//! │ kind tag │     zero     │     index + 1      │
//! └──────────┴──────────────┴────────────────────┘
//! ```
//!
//! `0` is the null handle. Decoding checks the tag, so a value handle passed
//! where a metadata handle is expected is reported instead of reinterpreted.

use crate::error::ShimError;

/// Kind tag stored in the high byte of an encoded handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandleKind {
    Module = 1,
    DIBuilder = 2,
    Metadata = 3,
    Value = 4,
    Type = 5,
    BasicBlock = 6,
    Target = 7,
    TargetMachine = 8,
    ExecutionEngine = 9,
    OperandBundle = 10,
    IrBuilder = 11,
}

impl HandleKind {
    const ALL: [HandleKind; 11] = [
        Self::Module,
        Self::DIBuilder,
        Self::Metadata,
        Self::Value,
        Self::Type,
        Self::BasicBlock,
        Self::Target,
        Self::TargetMachine,
        Self::ExecutionEngine,
        Self::OperandBundle,
        Self::IrBuilder,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::DIBuilder => "debug info builder",
            Self::Metadata => "metadata",
            Self::Value => "value",
            Self::Type => "type",
            Self::BasicBlock => "basic block",
            Self::Target => "target",
            Self::TargetMachine => "target machine",
            Self::ExecutionEngine => "execution engine",
            Self::OperandBundle => "operand bundle",
            Self::IrBuilder => "IR builder",
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| *kind as u8 == tag)
    }
}

/// A session-scoped opaque handle.
pub trait Handle: Copy {
    const KIND: HandleKind;

    fn from_index(index: u32) -> Self;

    fn index(self) -> u32;
}

/// Table positions for handles, inside the crate only.
pub(crate) trait Slot: Handle {
    /// Position in the owning session table.
    #[inline]
    fn slot(self) -> usize {
        self.index() as usize
    }

    #[inline]
    fn from_slot(slot: usize) -> Self {
        debug_assert!(u32::try_from(slot).is_ok(), "{} table overflow", Self::KIND.name());
        Self::from_index(slot as u32)
    }
}

impl<H: Handle> Slot for H {}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident => $kind:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl Handle for $name {
            const KIND: HandleKind = HandleKind::$kind;

            #[inline]
            fn from_index(index: u32) -> Self {
                Self(index)
            }

            #[inline]
            fn index(self) -> u32 {
                self.0
            }
        }
    };
}

define_handle!(
    /// A module owned by the session.
    ModuleHandle => Module
);
define_handle!(
    /// A debug-info builder bound to one module.
    DIBuilderHandle => DIBuilder
);
define_handle!(
    /// A metadata node.
    MetadataHandle => Metadata
);
define_handle!(
    /// A function, argument, constant, or instruction.
    ValueHandle => Value
);
define_handle!(
    /// An IR type.
    TypeHandle => Type
);
define_handle!(
    /// A basic block.
    BasicBlockHandle => BasicBlock
);
define_handle!(
    /// A registered target.
    TargetHandle => Target
);
define_handle!(
    /// A configured target machine.
    TargetMachineHandle => TargetMachine
);
define_handle!(
    /// A JIT execution engine.
    ExecutionEngineHandle => ExecutionEngine
);
define_handle!(
    /// A caller-owned operand bundle.
    OperandBundleHandle => OperandBundle
);
define_handle!(
    /// An instruction builder.
    IrBuilderHandle => IrBuilder
);

const TAG_SHIFT: u32 = 56;
const INDEX_MASK: u64 = 0xFFFF_FFFF;

/// Encode a handle for the C boundary. `None` encodes as `0`.
pub fn to_raw<H: Handle>(handle: Option<H>) -> u64 {
    match handle {
        Some(handle) => (u64::from(H::KIND as u8) << TAG_SHIFT) | (u64::from(handle.index()) + 1),
        None => 0,
    }
}

/// Decode a handle from the C boundary. `0` decodes as `None`.
pub fn from_raw<H: Handle>(raw: u64) -> Result<Option<H>, ShimError> {
    if raw == 0 {
        return Ok(None);
    }
    let tag = (raw >> TAG_SHIFT) as u8;
    if tag != H::KIND as u8 {
        return Err(ShimError::WrongHandleKind {
            expected: H::KIND.name(),
            found: HandleKind::from_tag(tag).map_or("an untagged value", HandleKind::name),
        });
    }
    let low = raw & INDEX_MASK;
    // Middle bits are never set by `to_raw`.
    if low == 0 || raw & !(INDEX_MASK | (0xFF << TAG_SHIFT)) != 0 {
        return Err(ShimError::stale(H::KIND.name()));
    }
    Ok(Some(H::from_index((low - 1) as u32)))
}

#[cfg(test)]
mod tests;
