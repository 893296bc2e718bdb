//! Façade error type and its classification.

use llext_caps::Generation;

/// Coarse classification of a [`ShimError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The session's generation cannot express the request.
    UnsupportedOnGeneration,
    /// The caller broke an ownership or ordering rule.
    StructuralMisuse,
    /// LLVM or the environment refused: file system, target registry,
    /// options layout.
    EnvironmentFailure,
}

/// Errors returned by [`Session`](crate::Session) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShimError {
    #[error("{operation} is not available on generation {generation}")]
    Unsupported {
        operation: &'static str,
        generation: Generation,
    },
    #[error("{kind} handle is stale or was never issued")]
    StaleHandle { kind: &'static str },
    #[error("expected a {expected} handle, found {found}")]
    WrongHandleKind {
        expected: &'static str,
        found: &'static str,
    },
    #[error("module already has a debug info builder")]
    DuplicateDIBuilder,
    #[error("debug info builder was already finalized")]
    AlreadyFinalized,
    #[error("{count} temporary metadata node(s) reachable from the builder were never replaced")]
    UnresolvedTemporary { count: usize },
    #[error("only temporary metadata can be replaced")]
    NotTemporary,
    #[error("a temporary cannot replace itself")]
    SelfReplacement,
    #[error("function '{function}' already has a subprogram")]
    SubprogramAlreadyAttached { function: String },
    #[error("operand bundle was already attached to a call or invoke")]
    BundleReused,
    #[error("{what} value {value} is out of range")]
    InvalidEnumValue { what: &'static str, value: u32 },
    #[error("{operation}: {reason}")]
    InvalidOperand {
        operation: &'static str,
        reason: String,
    },
    #[error("IR builder is not positioned at a block")]
    Unpositioned,
    #[error("call expects {expected} argument(s), found {found}")]
    ArgumentCount { expected: u32, found: usize },
    #[error("ordering applies only to loads and stores")]
    InvalidOrdering,
    #[error("JIT options declare {declared} bytes, but only {known} are known")]
    OversizedJitOptions { declared: usize, known: usize },
    #[error("no registered target for '{triple}': {message}")]
    UnknownTarget { triple: String, message: String },
    #[error("invalid CPU feature '{feature}': {reason}")]
    InvalidFeature { feature: String, reason: String },
    #[error("{what} contains an interior NUL byte")]
    InteriorNul { what: &'static str },
    #[error("LLVM {operation} failed: {message}")]
    Llvm {
        operation: &'static str,
        message: String,
    },
    #[error("malformed bitcode file '{path}': {message}")]
    MalformedBitcode { path: String, message: String },
    #[error("cannot access '{path}': {message}")]
    Io { path: String, message: String },
}

impl ShimError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported { .. } => ErrorKind::UnsupportedOnGeneration,
            Self::OversizedJitOptions { .. }
            | Self::UnknownTarget { .. }
            | Self::InvalidFeature { .. }
            | Self::Llvm { .. }
            | Self::MalformedBitcode { .. }
            | Self::Io { .. } => ErrorKind::EnvironmentFailure,
            Self::StaleHandle { .. }
            | Self::WrongHandleKind { .. }
            | Self::DuplicateDIBuilder
            | Self::AlreadyFinalized
            | Self::UnresolvedTemporary { .. }
            | Self::NotTemporary
            | Self::SelfReplacement
            | Self::SubprogramAlreadyAttached { .. }
            | Self::BundleReused
            | Self::InvalidEnumValue { .. }
            | Self::InvalidOperand { .. }
            | Self::Unpositioned
            | Self::ArgumentCount { .. }
            | Self::InvalidOrdering
            | Self::InteriorNul { .. } => ErrorKind::StructuralMisuse,
        }
    }

    pub(crate) fn stale(kind: &'static str) -> Self {
        Self::StaleHandle { kind }
    }

    pub(crate) fn operand(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOperand {
            operation,
            reason: reason.into(),
        }
    }
}
