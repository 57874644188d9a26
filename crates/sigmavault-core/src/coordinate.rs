//! Dimensional coordinates and their projection onto the physical medium.
//!
//! A coordinate is a fixed 64-byte record locating one cell in the
//! eight-dimensional abstract space. [`Coordinate::project`] maps it to a
//! physical address deterministically under the key state; without the
//! spatial and topological sub-keys the mapping is indistinguishable from a
//! random function.

use crate::error::{Result, VaultError};
use crate::keys::{KeyState, SubKey};

/// Serialized size of a coordinate.
pub const COORDINATE_LEN: usize = 64;

/// Maximum recursion depth of the fractal dimension.
pub const MAX_FRACTAL_DEPTH: u8 = 8;

/// `2^63 / pi`, the rotation scale of the phase dimension.
const PHASE_ROTATION_SCALE: f64 = 9_223_372_036_854_775_808.0 / std::f64::consts::PI;

/// One locator in the eight-dimensional addressing space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinate {
    /// Base locator in the permuted address space.
    pub spatial: u64,
    /// Epoch bucket used for re-scatter versioning.
    pub temporal: u64,
    /// Entropy tweak selector.
    pub entropic: u32,
    /// Content-hash slice linking the coordinate to its content.
    pub semantic: u64,
    /// Recursion depth, 0..=8.
    pub fractal: u8,
    /// Continuous rotation applied during projection; always finite.
    pub phase: f64,
    /// Per-file topology salt.
    pub topological: u32,
    /// Redundancy shard index; 0 is the primary.
    pub holographic: u8,
}

impl Coordinate {
    /// Fixed-width little-endian encoding, exactly 64 bytes.
    pub fn encode(&self) -> [u8; COORDINATE_LEN] {
        let mut out = [0u8; COORDINATE_LEN];
        out[0..8].copy_from_slice(&self.spatial.to_le_bytes());
        out[8..16].copy_from_slice(&self.temporal.to_le_bytes());
        out[16..20].copy_from_slice(&self.entropic.to_le_bytes());
        out[20..28].copy_from_slice(&self.semantic.to_le_bytes());
        out[28] = self.fractal;
        out[29..37].copy_from_slice(&self.phase.to_le_bytes());
        out[37..41].copy_from_slice(&self.topological.to_le_bytes());
        out[41] = self.holographic;
        // 42..64 reserved, zero
        out
    }

    /// Decode and validate. The 22 reserved tail bytes are ignored on read.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != COORDINATE_LEN {
            return Err(VaultError::MalformedCoordinate("length is not 64 bytes"));
        }
        let phase = f64::from_le_bytes(bytes[29..37].try_into().unwrap());
        if !phase.is_finite() {
            return Err(VaultError::MalformedCoordinate("non-finite phase"));
        }
        let fractal = bytes[28];
        if fractal > MAX_FRACTAL_DEPTH {
            return Err(VaultError::MalformedCoordinate("fractal depth above 8"));
        }
        Ok(Coordinate {
            spatial: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            temporal: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            entropic: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
            semantic: u64::from_le_bytes(bytes[20..28].try_into().unwrap()),
            fractal,
            phase,
            topological: u32::from_le_bytes(bytes[37..41].try_into().unwrap()),
            holographic: bytes[41],
        })
    }

    /// Project onto a physical address in `[0, medium_size)`.
    ///
    /// Pure in `(self, medium_size, key_state)`; the fractal depth
    /// participates in the PRF input so that collision probing
    /// (`fractal + 1`) lands on an unrelated address. The final reduction is
    /// the widening multiply, which carries no modulo bias.
    pub fn project(&self, medium_size: u64, keys: &KeyState) -> u64 {
        debug_assert!(medium_size > 0, "projection against an empty medium");

        let mut msg = [0u8; 25];
        msg[0..8].copy_from_slice(&self.spatial.to_le_bytes());
        msg[8..16].copy_from_slice(&self.temporal.to_le_bytes());
        msg[16..24].copy_from_slice(&self.semantic.to_le_bytes());
        msg[24] = self.fractal;
        let base_hash = blake3::keyed_hash(keys.sub_key(SubKey::Spatial), &msg);
        let base = u64::from_le_bytes(base_hash.as_bytes()[..8].try_into().unwrap());

        // Continuous rotation: addition in Z_2^64 of floor(phase * 2^63 / pi).
        let rotation = (self.phase * PHASE_ROTATION_SCALE) as u128 as u64;

        let topo_hash =
            blake3::keyed_hash(keys.sub_key(SubKey::Topological), &self.topological.to_le_bytes());
        let topo = u64::from_le_bytes(topo_hash.as_bytes()[..8].try_into().unwrap());

        let mixed = base.wrapping_add(rotation) ^ topo;
        ((mixed as u128 * medium_size as u128) >> 64) as u64
    }

    /// The same coordinate at the next probe depth, wrapping inside
    /// `0..=depth_limit`.
    pub(crate) fn with_probe(&self, probe: u8, depth_limit: u8) -> Coordinate {
        let mut c = *self;
        c.fractal = (self.fractal.wrapping_add(probe)) % (depth_limit + 1);
        c
    }
}
