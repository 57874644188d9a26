//! Self-referential topology: the content-seeded coordinate sequence.
//!
//! The first bytes of a file (up to 4 KiB) are hashed into a content seed,
//! and the seed drives where every byte of the file lives. The sequence is
//! lazy, finite (`logical_size x redundancy` coordinates) and restartable:
//! manifest + key state regenerate it identically, which is what makes
//! gather and re-scatter possible at all.

use crate::coordinate::Coordinate;
use crate::keys::{KeyState, SubKey};
use crate::params::ParameterSet;

/// How much of the file head seeds the topology.
pub const CONTENT_PREVIEW_LEN: usize = 4096;

/// Hash the content preview into the 32-byte topology seed.
pub fn content_seed(preview: &[u8]) -> [u8; 32] {
    let take = preview.len().min(CONTENT_PREVIEW_LEN);
    *blake3::hash(&preview[..take]).as_bytes()
}

/// Coordinate generator for one file.
///
/// Holds a borrowed view of the key state; the key state is the single owner
/// of all secret material.
pub struct Topology<'k> {
    keys: &'k KeyState,
    params: ParameterSet,
    seed: [u8; 32],
    /// Temporal bucket of the manifest's creation time, shared by every
    /// coordinate of the file.
    temporal: u64,
    logical_size: u64,
}

impl<'k> Topology<'k> {
    pub fn new(
        keys: &'k KeyState,
        params: ParameterSet,
        seed: [u8; 32],
        temporal_bucket: u64,
        logical_size: u64,
    ) -> Self {
        Topology { keys, params, seed, temporal: temporal_bucket, logical_size }
    }

    /// The coordinate of logical byte `index`, shard `shard` (0 = primary).
    ///
    /// The shard index is folded into every PRF input so replicas project to
    /// independent physical addresses.
    pub fn coordinate(&self, index: u64, shard: u8) -> Coordinate {
        let spatial = self.prf(SubKey::Spatial, index, shard, b"");
        let semantic = self.prf(SubKey::Semantic, index, shard, b"");
        let entropic = self.prf(SubKey::Entropic, index, shard, b"e");
        let phase_raw = self.prf(SubKey::Phase, index, shard, b"phase");
        let fractal_raw = self.prf(SubKey::Fractal, index, shard, b"f");

        let phase_unit = u64::from_le_bytes(first8(&phase_raw)) as f64 / 18_446_744_073_709_551_616.0;

        Coordinate {
            spatial: u64::from_le_bytes(first8(&spatial)),
            temporal: self.temporal,
            entropic: u32::from_le_bytes(first4(&entropic)),
            semantic: u64::from_le_bytes(first8(&semantic)),
            fractal: fractal_raw.as_bytes()[0] % (self.params.scatter_depth + 1),
            phase: self.params.phase_scale * phase_unit * std::f64::consts::TAU,
            topological: self.params.topological_salt,
            holographic: shard,
        }
    }

    /// Lazy sequence of all coordinates, shard-major per logical byte.
    pub fn iter(&self) -> impl Iterator<Item = Coordinate> + '_ {
        let redundancy = self.params.redundancy;
        (0..self.logical_size)
            .flat_map(move |i| (0..redundancy).map(move |s| (i, s)))
            .map(|(i, s)| self.coordinate(i, s))
    }

    pub fn logical_size(&self) -> u64 {
        self.logical_size
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn prf(&self, key: SubKey, index: u64, shard: u8, tag: &[u8]) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new_keyed(self.keys.sub_key(key));
        hasher.update(&self.seed);
        hasher.update(&index.to_le_bytes());
        hasher.update(&[shard]);
        hasher.update(tag);
        hasher.finalize()
    }
}

fn first8(hash: &blake3::Hash) -> [u8; 8] {
    hash.as_bytes()[..8].try_into().unwrap()
}

fn first4(hash: &blake3::Hash) -> [u8; 4] {
    hash.as_bytes()[..4].try_into().unwrap()
}
