//! Per-file scatter parameters.
//!
//! Parameters are chosen once at scatter time (engine default, per-file
//! override, or advisor suggestion), validated, recorded in the manifest and
//! immutable for that file until re-scatter. There is no runtime-keyed
//! configuration bag; overrides are an explicit record validated at
//! construction.

use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};

/// Vetted bucket moduli for the temporal dimension, in milliseconds.
///
/// The classic millionth-prime table; the default bucket is about 4.3 hours.
pub const TEMPORAL_PRIMES: [u64; 5] = [15_485_863, 32_452_843, 49_979_687, 67_867_967, 86_028_121];

/// Default streaming chunk, 64 KiB.
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Largest chunk the pipeline will process in one piece.
pub const MAX_CHUNK_SIZE: u32 = 1024 * 1024;

/// The parameter set recorded in every manifest.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Fraction of written cells that are decoy entropy, in `[0.1, 0.9]`.
    pub entropy_ratio: f64,
    /// Collision probe budget and fractal depth modulus, in `[1, 8]`.
    pub scatter_depth: u8,
    /// Temporal bucket modulus in milliseconds; one of [`TEMPORAL_PRIMES`].
    pub temporal_prime: u64,
    /// Scale of the phase rotation, in `[0.1, 10.0]`.
    pub phase_scale: f64,
    /// Shards per logical byte (primary + replicas), in `[1, 4]`.
    pub redundancy: u8,
    /// Per-file topology salt, drawn at scatter time.
    pub topological_salt: u32,
    /// Streaming chunk size; gather re-chunks with the same value.
    pub chunk_size: u32,
}

impl Default for ParameterSet {
    fn default() -> Self {
        ParameterSet {
            entropy_ratio: 0.25,
            scatter_depth: 8,
            temporal_prime: TEMPORAL_PRIMES[0],
            phase_scale: 1.0,
            redundancy: 2,
            topological_salt: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ParameterSet {
    /// Range-check every field.
    pub fn validate(&self) -> Result<()> {
        if !self.entropy_ratio.is_finite() || !(0.1..=0.9).contains(&self.entropy_ratio) {
            return Err(malformed("entropy_ratio outside [0.1, 0.9]"));
        }
        if !(1..=8).contains(&self.scatter_depth) {
            return Err(malformed("scatter_depth outside [1, 8]"));
        }
        if !TEMPORAL_PRIMES.contains(&self.temporal_prime) {
            return Err(malformed("temporal_prime is not a vetted prime"));
        }
        if !self.phase_scale.is_finite() || !(0.1..=10.0).contains(&self.phase_scale) {
            return Err(malformed("phase_scale outside [0.1, 10.0]"));
        }
        if !(1..=4).contains(&self.redundancy) {
            return Err(malformed("redundancy outside [1, 4]"));
        }
        if !(1024..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(malformed("chunk_size outside [1 KiB, 1 MiB]"));
        }
        Ok(())
    }

    /// Temporal bucket for an epoch timestamp in milliseconds.
    pub fn temporal_bucket(&self, epoch_ms: u64) -> u64 {
        epoch_ms / self.temporal_prime
    }

    /// Draw a fresh per-file topology salt.
    pub(crate) fn randomize_salt(&mut self) {
        let mut salt = [0u8; 4];
        crate::hardening::secure_random(&mut salt);
        self.topological_salt = u32::from_le_bytes(salt);
    }
}

/// Explicit per-file override record; unset fields fall back to the engine
/// defaults. Validated at construction into a [`ParameterSet`].
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ParameterOverrides {
    pub entropy_ratio: Option<f64>,
    pub scatter_depth: Option<u8>,
    pub temporal_prime: Option<u64>,
    pub phase_scale: Option<f64>,
    pub redundancy: Option<u8>,
    pub chunk_size: Option<u32>,
}

impl ParameterOverrides {
    /// Merge over `base` and validate the result.
    pub fn apply(&self, base: ParameterSet) -> Result<ParameterSet> {
        let merged = ParameterSet {
            entropy_ratio: self.entropy_ratio.unwrap_or(base.entropy_ratio),
            scatter_depth: self.scatter_depth.unwrap_or(base.scatter_depth),
            temporal_prime: self.temporal_prime.unwrap_or(base.temporal_prime),
            phase_scale: self.phase_scale.unwrap_or(base.phase_scale),
            redundancy: self.redundancy.unwrap_or(base.redundancy),
            topological_salt: base.topological_salt,
            chunk_size: self.chunk_size.unwrap_or(base.chunk_size),
        };
        merged.validate()?;
        Ok(merged)
    }
}

fn malformed(msg: &str) -> VaultError {
    VaultError::MalformedManifest(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ParameterSet::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        let mut p = ParameterSet::default();
        p.entropy_ratio = 0.95;
        assert!(p.validate().is_err());

        let mut p = ParameterSet::default();
        p.entropy_ratio = f64::NAN;
        assert!(p.validate().is_err());

        let mut p = ParameterSet::default();
        p.scatter_depth = 0;
        assert!(p.validate().is_err());

        let mut p = ParameterSet::default();
        p.temporal_prime = 1000;
        assert!(p.validate().is_err());

        let mut p = ParameterSet::default();
        p.phase_scale = 11.0;
        assert!(p.validate().is_err());

        let mut p = ParameterSet::default();
        p.redundancy = 5;
        assert!(p.validate().is_err());

        let mut p = ParameterSet::default();
        p.chunk_size = 512;
        assert!(p.validate().is_err());
    }

    #[test]
    fn overrides_merge_and_validate() {
        let over = ParameterOverrides { redundancy: Some(3), ..Default::default() };
        let merged = over.apply(ParameterSet::default()).unwrap();
        assert_eq!(merged.redundancy, 3);
        assert_eq!(merged.chunk_size, DEFAULT_CHUNK_SIZE);

        let bad = ParameterOverrides { redundancy: Some(9), ..Default::default() };
        assert!(bad.apply(ParameterSet::default()).is_err());
    }

    #[test]
    fn temporal_bucket_is_monotone() {
        let p = ParameterSet::default();
        let a = p.temporal_bucket(0);
        let b = p.temporal_bucket(p.temporal_prime);
        let c = p.temporal_bucket(p.temporal_prime * 10 + 1);
        assert!(a < b && b < c);
    }
}
