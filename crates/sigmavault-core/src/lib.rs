//! SigmaVault dimensional scatter engine.
//!
//! Stores files on a fixed-size byte medium such that, without the correct
//! key, the medium is indistinguishable from uniform noise and no file can
//! be located, isolated or partially reconstructed. A 64-byte hybrid key
//! (derived externally from passphrase + optional device secret) seeds a
//! hierarchical key state that chooses *where* every byte lives and mixes
//! payload with generated entropy so the two are only separable under the
//! same keys.
//!
//! ```no_run
//! use sigmavault_core::{open_vault, MemoryMedium, VaultConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() -> sigmavault_core::Result<()> {
//! let medium = Arc::new(MemoryMedium::new(1 << 20));
//! let engine = open_vault(medium, &[0x11; 64], VaultConfig::default()).await?;
//!
//! let manifest = engine.scatter("hello.txt", &mut &b"hello world"[..]).await?;
//! let mut out = Vec::new();
//! engine.gather(&manifest, &mut out).await?;
//! assert_eq!(out, b"hello world");
//! engine.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Construction notes: the projection PRF and mixer keystream are BLAKE3
//! keyed hash / keyed XOF; sub-keys come from HKDF-SHA3-256 under the eight
//! dimension labels. Both paths of every operation use the same
//! constructions, so a manifest plus the key state is always sufficient to
//! regenerate a file's topology bit-for-bit.

pub mod advisor;
pub mod coordinate;
pub mod engine;
pub mod error;
pub mod hardening;
pub mod keys;
pub mod manifest;
pub mod medium;
pub mod mixer;
pub mod params;
mod pipeline;
mod rescatter;
pub mod stats;
pub mod topology;

pub use advisor::{AccessEvent, AccessOp, ParameterAdvisor};
pub use coordinate::{Coordinate, COORDINATE_LEN, MAX_FRACTAL_DEPTH};
pub use engine::{
    close_vault, open_vault, Cancellation, Engine, VaultConfig, DEFAULT_MEMORY_CAP,
    DEFAULT_RESCATTER_INTERVAL,
};
pub use error::{Result, VaultError, HYBRID_KEY_LEN};
pub use keys::{HybridKey, KeyState, SUBKEY_LABELS};
pub use manifest::{Manifest, ManifestId, MANIFEST_LEN, MANIFEST_VERSION};
pub use medium::{BlockMedium, FileMedium, MediumCapabilities, MemoryMedium};
pub use mixer::EntropicMixer;
pub use params::{ParameterOverrides, ParameterSet, DEFAULT_CHUNK_SIZE, TEMPORAL_PRIMES};
pub use stats::StatisticsSnapshot;
pub use topology::{content_seed, Topology, CONTENT_PREVIEW_LEN};
