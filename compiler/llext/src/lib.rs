//! Stable façade over LLVM's debug-info, emission and target APIs.
//!
//! A frontend talks to one [`Session`] through entry points whose shapes never
//! change. Each entry point asks the session's [`Capabilities`] for the one
//! flag it cares about, adapts its arguments to the API shape of that
//! generation, and hands back an opaque handle.
//!
//! The session's capabilities are the configured generation's row narrowed
//! to what the linked LLVM-C API can express. A session configured for an
//! older generation therefore behaves like that release even when a newer
//! LLVM is linked.
//!
//! # Architecture
//!
//! ```text
//! Session
//!   ├─ ir          modules, types, functions, blocks, plain instructions
//!   ├─ debug_info  DIBuilder façade (one builder per module)
//!   ├─ lifecycle   temporary metadata + replace-all-uses
//!   ├─ emit        atomics, exception pads, operand bundles, call/invoke
//!   ├─ target      triples, target machines, file emission
//!   ├─ jit         MCJIT execution engines
//!   └─ bitcode     bitcode + summary index serialization
//! ```
//!
//! Every `impl Session` block lives in the module named after its concern.
//! `linked` holds the few calls whose LLVM-C signature depends on the
//! linked release.
//!
//! # Unsupported vs. failed
//!
//! An operation the session cannot express returns its documented
//! "unsupported" value: `Ok(None)` for builders, a silent no-op for toggles,
//! or [`ShimError::Unsupported`] where the caller must not proceed. Everything
//! else that goes wrong is an `Err` classified by [`ErrorKind`].
//!
//! # Debug Environment Variables
//!
//! - `LLEXT_DEBUG_IR=1`: Print module IR to stderr before JIT construction.
//!
//! - `RUST_LOG=llext=debug`: Enable debug-level tracing output.
//!   Example: `RUST_LOG=llext=debug cargo tl`
//!
//! # Clippy Configuration
//!
//! LLVM-C takes `u32` counts and `c_uint` enums, so slice lengths and
//! handle indices are narrowed at the FFI edge.

// Crate-level lint configuration for FFI-heavy code
#![allow(
    // LLVM-C counts are `unsigned`; slices here never approach u32::MAX
    clippy::cast_possible_truncation,
    // DWARF expression operands are int64_t on the caller side, uint64_t in LLVM-C
    clippy::cast_sign_loss,
    // LLVMDIFlags is a C `int`; flag words are built as u32
    clippy::cast_possible_wrap,
    reason = "FFI edge narrowing and LLVM-C call sites"
)]

#[cfg(all(feature = "llvm17-0", feature = "llvm18-1"))]
compile_error!("enable exactly one of `llvm17-0` and `llvm18-1`");
#[cfg(not(any(feature = "llvm17-0", feature = "llvm18-1")))]
compile_error!("enable one of `llvm17-0` or `llvm18-1`");

#[cfg(feature = "llvm17-0")]
extern crate llvm_sys_170 as llvm_sys;
#[cfg(feature = "llvm18-1")]
extern crate llvm_sys_181 as llvm_sys;

use std::sync::Once;

pub mod bitcode;
mod config;
mod debug_info;
mod emit;
mod error;
mod handle;
mod ir;
mod jit;
mod lifecycle;
mod linked;
mod session;
mod target;

pub use config::SessionConfig;
pub use debug_info::DIFlags;
pub use emit::{ordering_from_raw, AtomicOrdering};
pub use error::{ErrorKind, ShimError};
pub use handle::{
    from_raw, to_raw, BasicBlockHandle, DIBuilderHandle, ExecutionEngineHandle, Handle,
    HandleKind, IrBuilderHandle, MetadataHandle, ModuleHandle, OperandBundleHandle,
    TargetHandle, TargetMachineHandle, TypeHandle, ValueHandle,
};
pub use jit::{JitOptions, JIT_OPTIONS_SIZE};
pub use linked::LINKED_GENERATION;
pub use session::Session;
pub use target::{
    code_model_from_raw, file_type_from_raw, normalize_triple, opt_level_from_raw,
    reloc_mode_from_raw, CodeGenOptLevel, CodeModel, FileType, RelocMode,
};

pub use llext_caps::{Capabilities, Generation};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Call this once at startup. Safe to call multiple times.
/// Enable with `RUST_LOG=llext=debug`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
