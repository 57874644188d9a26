use thiserror::Error;

/// Length of the hybrid key the engine is seeded with.
pub const HYBRID_KEY_LEN: usize = 64;

/// Error taxonomy of the scatter engine.
///
/// Leaf components fail fast with precise kinds; the pipeline either retries
/// locally (collision probing, replica reads) or surfaces the error. Kinds
/// that represent transient conditions answer `true` from [`is_retryable`].
///
/// [`is_retryable`]: VaultError::is_retryable
#[derive(Debug, Error)]
pub enum VaultError {
    /// The hybrid key did not have the expected length or failed to unlock.
    #[error("invalid hybrid key: expected {HYBRID_KEY_LEN} bytes, got {0}")]
    InvalidKey(usize),

    /// A 64-byte coordinate failed decoding or validation.
    #[error("malformed coordinate: {0}")]
    MalformedCoordinate(&'static str),

    /// A manifest record failed decoding or validation.
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    /// Scatter could not complete (addressing saturated, write failure).
    #[error("scatter failed: {0}")]
    Scatter(String),

    /// Gather could not reconstruct every byte even with replica shards.
    #[error("gather failed: {reason} ({unrecoverable} unrecoverable bytes)")]
    Gather { reason: String, unrecoverable: u64 },

    /// The rolling integrity hash did not match the manifest root.
    #[error("integrity check failed for manifest {manifest_id}")]
    Integrity { manifest_id: String },

    /// A write would land past the end of the fixed-size medium.
    #[error("capacity exceeded: offset {offset} + {len} > medium size {size}")]
    CapacityExceeded { offset: u64, len: u64, size: u64 },

    /// An input stream exceeded the caller-imposed bound.
    #[error("input too large: more than {max} bytes")]
    InputTooLarge { max: u64 },

    /// Cooperative cancellation was observed at a chunk boundary.
    #[error("operation cancelled")]
    Cancelled,

    /// Guarded arithmetic would have wrapped.
    #[error("arithmetic overflow")]
    Overflow,

    /// The medium could not be opened or has an unusable geometry.
    #[error("medium unavailable: {0}")]
    MediumUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::Scatter(_) | VaultError::Gather { .. } | VaultError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
