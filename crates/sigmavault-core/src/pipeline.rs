//! The scatter/gather pipeline: topology -> mixer -> medium.
//!
//! Scatter streams a source in fixed chunks, mixes each chunk against its
//! anchor coordinate, resolves one physical address per cell under the
//! collision policy and writes cells plus decoy entropy to the medium.
//! Gather replays the identical layout from manifest + key state, votes
//! across redundancy shards, unmixes, and proves the full stream against
//! the rolling integrity root before a single byte is emitted; only a
//! validated reconstruction is then streamed in strict logical order.
//!
//! The collision layout is a pure function of (topology, medium size, key
//! state): decoy cells never enter the ledger, so gather reconstructs the
//! exact addresses scatter used without knowing where the noise went.

use crate::coordinate::Coordinate;
use crate::engine::Cancellation;
use crate::error::{Result, VaultError};
use crate::hardening::{ct_equal, ZeroizingBuffer};
use crate::keys::{KeyState, SubKey};
use crate::manifest::{Manifest, ManifestId};
use crate::medium::BlockMedium;
use crate::mixer::EntropicMixer;
use crate::params::ParameterSet;
use crate::stats::Statistics;
use crate::topology::{content_seed, Topology, CONTENT_PREVIEW_LEN};
use rand::Rng;
use std::collections::HashSet;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes of a chunk whose addresses are resolved and flushed together.
const CELL_BATCH: usize = 4096;

/// Shared address layout for one file.
///
/// Owns the collision ledger of the running call; both directions drive it
/// byte-for-byte identically.
struct Layout<'k> {
    topo: Topology<'k>,
    ledger: HashSet<u64>,
    medium_size: u64,
    keys: &'k KeyState,
    params: ParameterSet,
}

impl<'k> Layout<'k> {
    fn new(keys: &'k KeyState, params: ParameterSet, seed: [u8; 32], bucket: u64) -> Self {
        Layout {
            topo: Topology::new(keys, params, seed, bucket, 0),
            ledger: HashSet::new(),
            medium_size: 0,
            keys,
            params,
        }
    }

    /// Shards for the next byte. Near capacity the layout thins to a single
    /// shard instead of failing the write; the rule depends only on the
    /// ledger, so gather replays the same decision.
    // TODO: revisit degraded redundancy near capacity; a thinner file is
    // currently preferred over a failed write.
    fn effective_redundancy(&self) -> u8 {
        if (self.ledger.len() as u64).saturating_mul(2) >= self.medium_size {
            1
        } else {
            self.params.redundancy
        }
    }

    /// Resolve the addresses of logical byte `index` into `addrs`.
    ///
    /// Returns the primary coordinate (pre-probe, the one integrity is
    /// computed over) and the shard count placed.
    fn place(
        &mut self,
        index: u64,
        addrs: &mut Vec<u64>,
        stats: &Statistics,
    ) -> Result<(Coordinate, u8)> {
        let shards = self.effective_redundancy();
        let primary = self.topo.coordinate(index, 0);
        for s in 0..shards {
            let coord = if s == 0 { primary } else { self.topo.coordinate(index, s) };
            let addr = self.resolve(&coord, stats)?;
            self.ledger.insert(addr);
            addrs.push(addr);
        }
        Ok((primary, shards))
    }

    /// Collision probing: bump the fractal depth through its modulus until an
    /// unclaimed cell appears, up to `scatter_depth` retries.
    fn resolve(&self, coord: &Coordinate, stats: &Statistics) -> Result<u64> {
        let depth = self.params.scatter_depth;
        for probe in 0..=depth {
            let candidate = coord.with_probe(probe, depth).project(self.medium_size, self.keys);
            if !self.ledger.contains(&candidate) {
                if probe > 0 {
                    stats.add(&stats.collisions, probe as u64);
                }
                return Ok(candidate);
            }
        }
        stats.add(&stats.saturation_errors, 1);
        Err(VaultError::Scatter("addressing saturated".into()))
    }
}

fn keyed_integrity_hasher(keys: &KeyState) -> blake3::Hasher {
    blake3::Hasher::new_keyed(keys.sub_key(SubKey::Semantic))
}

fn integrity_update(hasher: &mut blake3::Hasher, index: u64, primary: &Coordinate, byte: u8) {
    hasher.update(&index.to_le_bytes());
    hasher.update(&primary.encode());
    hasher.update(&[byte]);
}

/// Read until `buf` is full or the stream ends; returns bytes read.
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        let m = reader.read(&mut buf[n..]).await?;
        if m == 0 {
            break;
        }
        n += m;
    }
    Ok(n)
}

/// Scatter a source stream onto the medium; the returned manifest is the
/// sole handle to the file.
pub(crate) async fn scatter_stream<R: AsyncRead + Unpin>(
    keys: &KeyState,
    medium: &dyn BlockMedium,
    stats: &Statistics,
    mut params: ParameterSet,
    memory_cap: usize,
    cancel: &Cancellation,
    reader: &mut R,
) -> Result<Manifest> {
    params.validate()?;
    let medium_size = medium.size();
    let created_at = epoch_ms();

    // Hold the head of the stream to seed the topology before any
    // coordinate is emitted.
    let mut preview = ZeroizingBuffer::new(CONTENT_PREVIEW_LEN, memory_cap);
    let previewed = fill(reader, preview.as_mut_slice()).await?;
    preview.truncate(previewed);
    let seed = content_seed(preview.as_slice());

    let mut layout =
        Layout::new(keys, params, seed, params.temporal_bucket(created_at));
    layout.medium_size = medium_size;
    let mixer = EntropicMixer::new(keys);
    let mut integrity = keyed_integrity_hasher(keys);

    let chunk_size = params.chunk_size as usize;
    let mut chunk = ZeroizingBuffer::new(chunk_size, memory_cap);
    let mut pending = preview;
    let mut pending_used = 0usize;
    let mut logical = 0u64;

    loop {
        cancel.check()?;

        // Assemble the next chunk: drain the held preview first.
        let head = (pending.len() - pending_used).min(chunk_size);
        chunk.as_mut_slice()[..head]
            .copy_from_slice(&pending.as_slice()[pending_used..pending_used + head]);
        pending_used += head;
        let tail = fill(reader, &mut chunk.as_mut_slice()[head..]).await?;
        let len = head + tail;
        if len == 0 {
            break;
        }

        let chunk_start = logical;
        let anchor = layout.topo.coordinate(chunk_start, 0);
        let mut mixed = ZeroizingBuffer::from_vec(chunk.as_slice()[..len].to_vec(), memory_cap);
        mixer.mix_in_place(mixed.as_mut_slice(), &anchor);

        // Resolve and write in bounded batches.
        let mut offset = 0usize;
        while offset < len {
            let end = (offset + CELL_BATCH).min(len);
            let mut addrs = Vec::with_capacity((end - offset) * params.redundancy as usize);
            let mut cells = Vec::with_capacity(addrs.capacity());
            for j in offset..end {
                let index = chunk_start + j as u64;
                let before = addrs.len();
                let (primary, _shards) = layout.place(index, &mut addrs, stats)?;
                for &addr in &addrs[before..] {
                    cells.push((addr, mixed.as_slice()[j]));
                }
                integrity_update(&mut integrity, index, &primary, chunk.as_slice()[j]);
            }
            medium.write_cells(&cells)?;
            write_decoys(medium, &layout.ledger, medium_size, cells.len(), params, stats)?;
            offset = end;
        }

        stats.add(&stats.bytes_in, len as u64);
        logical += len as u64;
        if len < chunk_size {
            break;
        }
    }

    let manifest = Manifest {
        manifest_id: ManifestId::generate(),
        logical_size: logical,
        content_seed: seed,
        parameters: params,
        medium_size_at_write: medium_size,
        created_at,
        integrity_root: *integrity.finalize().as_bytes(),
    };
    medium.sync()?;
    Ok(manifest)
}

/// Mix decoy entropy between the real cells: `entropy_ratio` of everything
/// written is OS-random noise at OS-random unclaimed addresses.
fn write_decoys(
    medium: &dyn BlockMedium,
    ledger: &HashSet<u64>,
    medium_size: u64,
    real_cells: usize,
    params: ParameterSet,
    stats: &Statistics,
) -> Result<()> {
    let ratio = params.entropy_ratio;
    let wanted = (real_cells as f64 * ratio / (1.0 - ratio)).ceil() as usize;
    if wanted == 0 {
        return Ok(());
    }
    let mut rng = rand::rngs::OsRng;
    let mut cells = Vec::with_capacity(wanted.min(CELL_BATCH));
    let mut written = 0u64;
    for _ in 0..wanted {
        // A decoy must never clobber this call's real cells; on repeated
        // collisions the decoy is skipped.
        let mut addr = None;
        for _ in 0..4 {
            let candidate = rng.gen_range(0..medium_size);
            if !ledger.contains(&candidate) {
                addr = Some(candidate);
                break;
            }
        }
        if let Some(addr) = addr {
            cells.push((addr, rng.gen::<u8>()));
            written += 1;
        }
        if cells.len() == CELL_BATCH {
            medium.write_cells(&cells)?;
            cells.clear();
        }
    }
    if !cells.is_empty() {
        medium.write_cells(&cells)?;
    }
    stats.add(&stats.decoy_cells, written);
    Ok(())
}

/// Plurality vote across the shard cells of one byte; `None` on a tie.
fn vote(cells: &[u8]) -> Option<u8> {
    let mut best = cells[0];
    let mut best_count = 0usize;
    let mut tie = false;
    for &candidate in cells {
        let count = cells.iter().filter(|&&x| x == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
            tie = false;
        } else if count == best_count && candidate != best {
            tie = true;
        }
    }
    if tie {
        None
    } else {
        Some(best)
    }
}

/// Reconstruct a file from its manifest, emitting bytes in logical order.
///
/// Pure with respect to the medium: gather never writes. Reconstruction runs
/// twice: a validate pass that votes, unmixes and checks the full stream
/// against the integrity root without touching `writer`, then an emit pass
/// over the now-proven layout. A byte only reaches the writer after the
/// whole stream has verified, so a failed gather delivers nothing.
pub(crate) async fn gather_stream<W: AsyncWrite + Unpin>(
    keys: &KeyState,
    medium: &dyn BlockMedium,
    stats: &Statistics,
    manifest: &Manifest,
    memory_cap: usize,
    cancel: &Cancellation,
    writer: &mut W,
) -> Result<()> {
    manifest.validate()?;
    let medium_size = medium.size();
    if manifest.medium_size_at_write != medium_size {
        return Err(VaultError::Gather {
            reason: format!(
                "medium size changed since scatter ({} != {})",
                manifest.medium_size_at_write, medium_size
            ),
            unrecoverable: 0,
        });
    }

    // Validate pass: nothing is emitted until every byte has cleared.
    let (root, unrecoverable) =
        reconstruct(keys, medium, stats, manifest, memory_cap, cancel, None::<&mut W>).await?;

    if unrecoverable > 0 {
        return Err(VaultError::Gather {
            reason: "shard voting could not recover every byte".into(),
            unrecoverable,
        });
    }
    if !ct_equal(root.as_bytes(), &manifest.integrity_root) {
        stats.add(&stats.integrity_failures, 1);
        return Err(VaultError::Integrity { manifest_id: manifest.manifest_id.to_string() });
    }

    // Emit pass: the layout is deterministic, so this replays the validated
    // bytes. The root is checked again to catch a concurrent scatter
    // clobbering cells between the passes.
    let (root, unrecoverable) =
        reconstruct(keys, medium, stats, manifest, memory_cap, cancel, Some(writer)).await?;
    if unrecoverable > 0 || !ct_equal(root.as_bytes(), &manifest.integrity_root) {
        stats.add(&stats.integrity_failures, 1);
        return Err(VaultError::Integrity { manifest_id: manifest.manifest_id.to_string() });
    }
    Ok(())
}

/// One reconstruction sweep over a manifest's layout.
///
/// With `sink = None` this only votes, unmixes and hashes; with a sink it
/// also streams each chunk, in strict logical order. Returns the rolling
/// integrity root and the count of shard-vote ties.
async fn reconstruct<W: AsyncWrite + Unpin>(
    keys: &KeyState,
    medium: &dyn BlockMedium,
    stats: &Statistics,
    manifest: &Manifest,
    memory_cap: usize,
    cancel: &Cancellation,
    mut sink: Option<&mut W>,
) -> Result<(blake3::Hash, u64)> {
    let params = manifest.parameters;
    let mut layout =
        Layout::new(keys, params, manifest.content_seed, manifest.temporal_bucket());
    layout.medium_size = medium.size();
    let mixer = EntropicMixer::new(keys);
    let mut integrity = keyed_integrity_hasher(keys);

    let chunk_size = params.chunk_size as usize;
    let mut unrecoverable = 0u64;
    let mut logical = 0u64;

    while logical < manifest.logical_size {
        cancel.check()?;

        let len = ((manifest.logical_size - logical) as usize).min(chunk_size);
        let chunk_start = logical;
        let anchor = layout.topo.coordinate(chunk_start, 0);
        let mut mixed = ZeroizingBuffer::new(len, memory_cap);

        let mut offset = 0usize;
        while offset < len {
            let end = (offset + CELL_BATCH).min(len);
            let mut addrs = Vec::with_capacity((end - offset) * params.redundancy as usize);
            let mut shard_counts = Vec::with_capacity(end - offset);
            for j in offset..end {
                let index = chunk_start + j as u64;
                let (_primary, shards) = layout.place(index, &mut addrs, stats)?;
                shard_counts.push(shards as usize);
            }
            let cells = medium.read_cells(&addrs)?;

            let mut cursor = 0usize;
            for (k, &shards) in shard_counts.iter().enumerate() {
                let group = &cells[cursor..cursor + shards];
                cursor += shards;
                match vote(group) {
                    Some(byte) => mixed.as_mut_slice()[offset + k] = byte,
                    None => {
                        unrecoverable += 1;
                        // Tie: keep the primary's cell so the hash stays
                        // well-defined; the caller never emits it.
                        mixed.as_mut_slice()[offset + k] = group[0];
                    }
                }
            }
            offset = end;
        }

        mixer.mix_in_place(mixed.as_mut_slice(), &anchor);
        for j in 0..len {
            let index = chunk_start + j as u64;
            let primary = layout.topo.coordinate(index, 0);
            integrity_update(&mut integrity, index, &primary, mixed.as_slice()[j]);
        }
        if let Some(writer) = sink.as_deref_mut() {
            writer.write_all(mixed.as_slice()).await?;
            stats.add(&stats.bytes_out, len as u64);
        }
        logical += len as u64;
    }
    if let Some(writer) = sink.as_deref_mut() {
        writer.flush().await?;
    }

    Ok((integrity.finalize(), unrecoverable))
}

pub(crate) fn epoch_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::HybridKey;

    #[test]
    fn vote_prefers_plurality_and_flags_ties() {
        assert_eq!(vote(&[7]), Some(7));
        assert_eq!(vote(&[7, 7]), Some(7));
        assert_eq!(vote(&[7, 9]), None);
        assert_eq!(vote(&[7, 9, 7]), Some(7));
        assert_eq!(vote(&[1, 2, 2, 1]), None);
        assert_eq!(vote(&[3, 3, 3, 9]), Some(3));
    }

    #[test]
    fn layout_replays_identically() {
        let key = HybridKey::from_bytes(&[0x55u8; 64]).unwrap();
        let keys = KeyState::derive(&key);
        let stats = Statistics::default();
        let params = ParameterSet::default();
        let seed = content_seed(b"layout determinism probe");

        let run = |keys: &KeyState| -> Vec<u64> {
            let mut layout = Layout::new(keys, params, seed, 7);
            layout.medium_size = 1 << 16;
            let mut addrs = Vec::new();
            for i in 0..512 {
                layout.place(i, &mut addrs, &stats).unwrap();
            }
            addrs
        };

        assert_eq!(run(&keys), run(&keys));
    }

    #[test]
    fn layout_addresses_are_disjoint_within_a_call() {
        let key = HybridKey::from_bytes(&[0x66u8; 64]).unwrap();
        let keys = KeyState::derive(&key);
        let stats = Statistics::default();
        let params = ParameterSet::default();
        let mut layout = Layout::new(&keys, params, content_seed(b"disjoint"), 0);
        layout.medium_size = 1 << 20;
        let mut addrs = Vec::new();
        for i in 0..1024 {
            layout.place(i, &mut addrs, &stats).unwrap();
        }
        let unique: HashSet<_> = addrs.iter().collect();
        assert_eq!(unique.len(), addrs.len());
    }

    #[test]
    fn layout_thins_redundancy_near_capacity() {
        let key = HybridKey::from_bytes(&[0x42u8; 64]).unwrap();
        let keys = KeyState::derive(&key);
        let params = ParameterSet::default();
        let mut layout = Layout::new(&keys, params, content_seed(b"thin"), 0);
        layout.medium_size = 100;
        layout.ledger.extend(0..50u64);
        assert_eq!(layout.effective_redundancy(), 1);
        layout.ledger.clear();
        assert_eq!(layout.effective_redundancy(), params.redundancy);
    }

    #[test]
    fn tiny_medium_saturates() {
        let key = HybridKey::from_bytes(&[0x24u8; 64]).unwrap();
        let keys = KeyState::derive(&key);
        let stats = Statistics::default();
        let params = ParameterSet::default();
        let mut layout = Layout::new(&keys, params, content_seed(b"full"), 0);
        layout.medium_size = 4;
        let mut addrs = Vec::new();
        let mut result = Ok(());
        for i in 0..64 {
            if let Err(e) = layout.place(i, &mut addrs, &stats) {
                result = Err(e);
                break;
            }
        }
        assert!(matches!(result, Err(VaultError::Scatter(_))));
        assert!(stats.snapshot().saturation_errors >= 1);
    }
}
