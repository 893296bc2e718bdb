//! Per-session configuration.

use llext_caps::Generation;

/// DWARF version recorded in the `"Dwarf Version"` module flag by default.
const DEFAULT_DWARF_VERSION: u32 = 4;

/// Producer string used when a compile unit is created without one.
const DEFAULT_PRODUCER: &str = concat!("llext ", env!("CARGO_PKG_VERSION"));

/// Configuration for a [`Session`](crate::Session).
///
/// The generation defaults to the one selected by cargo features; tests and
/// embedders can pick another row of the capability matrix explicitly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    generation: Generation,
    dwarf_version: u32,
    debug_info_version: u64,
    host_triple: Option<String>,
    producer: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            generation: Generation::ACTIVE,
            dwarf_version: DEFAULT_DWARF_VERSION,
            // SAFETY: a constant lookup with no preconditions.
            debug_info_version: u64::from(unsafe {
                llvm_sys::debuginfo::LLVMDebugMetadataVersion()
            }),
            host_triple: None,
            producer: DEFAULT_PRODUCER.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_generation(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }

    #[must_use]
    pub fn with_dwarf_version(mut self, version: u32) -> Self {
        self.dwarf_version = version;
        self
    }

    #[must_use]
    pub fn with_debug_info_version(mut self, version: u64) -> Self {
        self.debug_info_version = version;
        self
    }

    /// Override the triple reported as the default target.
    #[must_use]
    pub fn with_host_triple(mut self, triple: impl Into<String>) -> Self {
        self.host_triple = Some(triple.into());
        self
    }

    #[must_use]
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn dwarf_version(&self) -> u32 {
        self.dwarf_version
    }

    pub fn debug_info_version(&self) -> u64 {
        self.debug_info_version
    }

    pub fn host_triple(&self) -> Option<&str> {
        self.host_triple.as_deref()
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }
}
