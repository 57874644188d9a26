//! Per-file manifest: the sole handle to a scattered file.
//!
//! Fixed little-endian record, version byte first, length-prefixed parameter
//! block, 32-byte integrity root last. Losing a manifest is equivalent to
//! losing the file. Manifests are not themselves encrypted by this layer;
//! the surrounding filesystem stores them inside the vault.

use crate::error::{Result, VaultError};
use crate::params::ParameterSet;
use std::fmt;

/// Current manifest format version.
pub const MANIFEST_VERSION: u8 = 1;

/// Serialized size of a version-1 manifest.
pub const MANIFEST_LEN: usize = 141;

/// Serialized size of the version-1 parameter block.
const PARAMS_BLOCK_LEN: usize = 34;

/// Random 16-byte manifest identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManifestId(pub [u8; 16]);

impl ManifestId {
    pub fn generate() -> Self {
        let mut id = [0u8; 16];
        crate::hardening::secure_random(&mut id);
        ManifestId(id)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManifestId({})", self)
    }
}

/// Everything needed (together with the key state) to reconstruct a file.
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    pub manifest_id: ManifestId,
    pub logical_size: u64,
    pub content_seed: [u8; 32],
    pub parameters: ParameterSet,
    pub medium_size_at_write: u64,
    /// Creation epoch in milliseconds; its temporal bucket seeds the
    /// topology and drives re-scatter staleness.
    pub created_at: u64,
    pub integrity_root: [u8; 32],
}

impl Manifest {
    /// The temporal bucket this manifest was scattered in.
    pub fn temporal_bucket(&self) -> u64 {
        self.parameters.temporal_bucket(self.created_at)
    }

    /// Semantic validation shared by decode and gather.
    pub fn validate(&self) -> Result<()> {
        self.parameters.validate()?;
        if self.medium_size_at_write == 0 {
            return Err(VaultError::MalformedManifest("zero medium size".into()));
        }
        Ok(())
    }

    /// Fixed-layout encoding, exactly [`MANIFEST_LEN`] bytes.
    pub fn encode(&self) -> [u8; MANIFEST_LEN] {
        let mut out = [0u8; MANIFEST_LEN];
        out[0] = MANIFEST_VERSION;
        out[1..17].copy_from_slice(&self.manifest_id.0);
        out[17..25].copy_from_slice(&self.logical_size.to_le_bytes());
        out[25..57].copy_from_slice(&self.content_seed);
        out[57..59].copy_from_slice(&(PARAMS_BLOCK_LEN as u16).to_le_bytes());
        let p = &self.parameters;
        out[59..67].copy_from_slice(&p.entropy_ratio.to_le_bytes());
        out[67..75].copy_from_slice(&p.phase_scale.to_le_bytes());
        out[75..83].copy_from_slice(&p.temporal_prime.to_le_bytes());
        out[83] = p.scatter_depth;
        out[84] = p.redundancy;
        out[85..89].copy_from_slice(&p.topological_salt.to_le_bytes());
        out[89..93].copy_from_slice(&p.chunk_size.to_le_bytes());
        out[93..101].copy_from_slice(&self.medium_size_at_write.to_le_bytes());
        out[101..109].copy_from_slice(&self.created_at.to_le_bytes());
        out[109..141].copy_from_slice(&self.integrity_root);
        out
    }

    /// Decode and validate a version-1 record.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != MANIFEST_LEN {
            return Err(VaultError::MalformedManifest(format!(
                "length {} is not {}",
                bytes.len(),
                MANIFEST_LEN
            )));
        }
        if bytes[0] != MANIFEST_VERSION {
            return Err(VaultError::MalformedManifest(format!("unknown version {}", bytes[0])));
        }
        let params_len = u16::from_le_bytes(bytes[57..59].try_into().unwrap()) as usize;
        if params_len != PARAMS_BLOCK_LEN {
            return Err(VaultError::MalformedManifest(format!(
                "parameter block length {} is not {}",
                params_len, PARAMS_BLOCK_LEN
            )));
        }

        let parameters = ParameterSet {
            entropy_ratio: f64::from_le_bytes(bytes[59..67].try_into().unwrap()),
            phase_scale: f64::from_le_bytes(bytes[67..75].try_into().unwrap()),
            temporal_prime: u64::from_le_bytes(bytes[75..83].try_into().unwrap()),
            scatter_depth: bytes[83],
            redundancy: bytes[84],
            topological_salt: u32::from_le_bytes(bytes[85..89].try_into().unwrap()),
            chunk_size: u32::from_le_bytes(bytes[89..93].try_into().unwrap()),
        };

        let manifest = Manifest {
            manifest_id: ManifestId(bytes[1..17].try_into().unwrap()),
            logical_size: u64::from_le_bytes(bytes[17..25].try_into().unwrap()),
            content_seed: bytes[25..57].try_into().unwrap(),
            parameters,
            medium_size_at_write: u64::from_le_bytes(bytes[93..101].try_into().unwrap()),
            created_at: u64::from_le_bytes(bytes[101..109].try_into().unwrap()),
            integrity_root: bytes[109..141].try_into().unwrap(),
        };
        manifest.validate()?;
        Ok(manifest)
    }
}
