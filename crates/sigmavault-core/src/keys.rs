//! Hierarchical key state.
//!
//! A 64-byte hybrid key (produced by the external passphrase/device
//! derivation step) is expanded into eight independent 32-byte sub-keys with
//! HKDF-SHA3-256 under domain-separated labels. The derivation is a pure
//! function of the hybrid key; sub-keys never touch the medium and the whole
//! state is zeroized on drop.

use crate::error::{Result, VaultError, HYBRID_KEY_LEN};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, Secret};
use sha3::Sha3_256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed context salt for sub-key extraction.
const SUBKEY_SALT: &[u8] = b"sigmavault/subkey/v1";

/// The eight dimension labels, in coordinate-field order.
pub const SUBKEY_LABELS: [&str; 8] = [
    "spatial",
    "temporal",
    "entropic",
    "semantic",
    "fractal",
    "phase",
    "topological",
    "holographic",
];

/// Opaque 64-byte secret produced by the external key-derivation step.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct HybridKey([u8; HYBRID_KEY_LEN]);

impl HybridKey {
    /// Wrap raw key material; anything but exactly 64 bytes is `InvalidKey`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HYBRID_KEY_LEN {
            return Err(VaultError::InvalidKey(bytes.len()));
        }
        let mut key = [0u8; HYBRID_KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(HybridKey(key))
    }

    /// Fresh random hybrid key (for tests and ephemeral vaults).
    pub fn generate() -> Self {
        let mut key = [0u8; HYBRID_KEY_LEN];
        crate::hardening::secure_random(&mut key);
        HybridKey(key)
    }

    fn as_bytes(&self) -> &[u8; HYBRID_KEY_LEN] {
        &self.0
    }
}

/// Label-addressed sub-key within the derived state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SubKey {
    Spatial,
    Temporal,
    Entropic,
    Semantic,
    Fractal,
    Phase,
    Topological,
    Holographic,
}

impl SubKey {
    fn label(self) -> &'static str {
        match self {
            SubKey::Spatial => "spatial",
            SubKey::Temporal => "temporal",
            SubKey::Entropic => "entropic",
            SubKey::Semantic => "semantic",
            SubKey::Fractal => "fractal",
            SubKey::Phase => "phase",
            SubKey::Topological => "topological",
            SubKey::Holographic => "holographic",
        }
    }
}

/// The derived key state: eight sub-keys, one per dimension.
///
/// No mutable operations; re-keying requires a fresh derivation.
pub struct KeyState {
    keys: [Secret<[u8; 32]>; 8],
}

impl KeyState {
    /// Derive the full state from a hybrid key.
    pub fn derive(hybrid: &HybridKey) -> Self {
        let hk = Hkdf::<Sha3_256>::new(Some(SUBKEY_SALT), hybrid.as_bytes());
        let keys = SUBKEY_LABELS.map(|label| {
            let mut out = [0u8; 32];
            hk.expand(label.as_bytes(), &mut out).expect("HKDF expand");
            let secret = Secret::new(out);
            out.zeroize();
            secret
        });
        KeyState { keys }
    }

    /// Sub-key lookup by label.
    pub(crate) fn sub_key(&self, which: SubKey) -> &[u8; 32] {
        let idx = SUBKEY_LABELS
            .iter()
            .position(|l| *l == which.label())
            .expect("label table covers all sub-keys");
        self.keys[idx].expose_secret()
    }
}
