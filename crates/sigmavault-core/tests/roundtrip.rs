//! End-to-end scatter/gather scenarios against in-memory media.

use rand::RngCore;
use sigmavault_core::{
    open_vault, BlockMedium, HybridKey, KeyState, Manifest, MemoryMedium, ParameterSet, Topology,
    VaultConfig,
};
use std::collections::HashSet;
use std::sync::Arc;

const TEST_KEY: [u8; 64] = [0x11; 64];

fn config_without_rescatter() -> VaultConfig {
    VaultConfig { rescatter_interval: None, ..Default::default() }
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut data);
    data
}

/// Replay the deterministic cell layout of a manifest: per logical byte, the
/// physical addresses of its shards (primary first). Mirrors the engine's
/// collision policy byte for byte.
fn replay_layout(manifest: &Manifest, keys: &KeyState) -> Vec<Vec<u64>> {
    let p = manifest.parameters;
    let topo = Topology::new(
        keys,
        p,
        manifest.content_seed,
        manifest.temporal_bucket(),
        manifest.logical_size,
    );
    let size = manifest.medium_size_at_write;
    let mut ledger = HashSet::new();
    let mut out = Vec::with_capacity(manifest.logical_size as usize);
    for i in 0..manifest.logical_size {
        let shards = if ledger.len() as u64 * 2 >= size { 1 } else { p.redundancy };
        let mut per_byte = Vec::with_capacity(shards as usize);
        for s in 0..shards {
            let base = topo.coordinate(i, s);
            let addr = (0..=p.scatter_depth)
                .map(|probe| {
                    let mut c = base;
                    c.fractal = (base.fractal + probe) % (p.scatter_depth + 1);
                    c.project(size, keys)
                })
                .find(|a| !ledger.contains(a))
                .expect("layout saturated in test replay");
            ledger.insert(addr);
            per_byte.push(addr);
        }
        out.push(per_byte);
    }
    out
}

#[tokio::test]
async fn hello_world_round_trips() {
    let medium = Arc::new(MemoryMedium::new(1 << 20));
    let engine = open_vault(medium, &TEST_KEY, config_without_rescatter()).await.unwrap();

    let manifest = engine.scatter("hello.txt", &mut &b"hello world"[..]).await.unwrap();
    assert_eq!(manifest.logical_size, 11);

    let mut out = Vec::new();
    engine.gather(&manifest, &mut out).await.unwrap();
    assert_eq!(out, b"hello world");

    engine.close().await.unwrap();
}

#[tokio::test]
async fn quarter_mebibyte_round_trips_and_gather_never_writes() {
    let medium = Arc::new(MemoryMedium::new(4 << 20));
    let engine =
        open_vault(medium.clone(), &TEST_KEY, config_without_rescatter()).await.unwrap();

    // bytes(range(256)) repeated 1024 times.
    let payload: Vec<u8> = (0..256u32 * 1024).map(|i| (i % 256) as u8).collect();
    let manifest = engine.scatter("pattern.bin", &mut payload.as_slice()).await.unwrap();
    assert_eq!(manifest.logical_size, payload.len() as u64);

    let before = medium.raw();
    let mut out = Vec::new();
    engine.gather(&manifest, &mut out).await.unwrap();
    assert_eq!(out, payload);
    // Gather is pure: not a single cell of the medium moved.
    assert_eq!(medium.raw(), before);
}

#[tokio::test]
async fn empty_file_round_trips() {
    let medium = Arc::new(MemoryMedium::new(1 << 16));
    let engine = open_vault(medium, &TEST_KEY, config_without_rescatter()).await.unwrap();

    let manifest = engine.scatter("empty", &mut &b""[..]).await.unwrap();
    assert_eq!(manifest.logical_size, 0);

    let mut out = Vec::new();
    engine.gather(&manifest, &mut out).await.unwrap();
    assert!(out.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_scatters_stay_independent() {
    // Interleaved scatters cannot see each other's cells, so they collide at
    // a rate set by medium fullness; redundancy 3 on a roomy medium lets
    // shard voting absorb the expected handful of cross-file clobbers.
    let mut config = config_without_rescatter();
    config.parameters = ParameterSet { redundancy: 3, ..Default::default() };
    let medium = Arc::new(MemoryMedium::new(64 << 20));
    let engine = open_vault(medium, &TEST_KEY, config).await.unwrap();

    let a = random_payload(4 * 1024);
    let b = random_payload(4 * 1024);

    let (ra, rb) = {
        let (ea, pa) = (engine.clone(), a.clone());
        let (eb, pb) = (engine.clone(), b.clone());
        tokio::join!(
            tokio::spawn(async move { ea.scatter("a.bin", &mut pa.as_slice()).await }),
            tokio::spawn(async move { eb.scatter("b.bin", &mut pb.as_slice()).await }),
        )
    };
    let ma = ra.unwrap().unwrap();
    let mb = rb.unwrap().unwrap();
    assert_ne!(ma.manifest_id, mb.manifest_id);

    let mut out_a = Vec::new();
    engine.gather(&ma, &mut out_a).await.unwrap();
    let mut out_b = Vec::new();
    engine.gather(&mb, &mut out_b).await.unwrap();
    assert_eq!(out_a, a);
    assert_eq!(out_b, b);
}

#[tokio::test]
async fn concurrent_gathers_agree() {
    let medium = Arc::new(MemoryMedium::new(2 << 20));
    let engine = open_vault(medium, &TEST_KEY, config_without_rescatter()).await.unwrap();

    let payload = random_payload(32 * 1024);
    let manifest = engine.scatter("shared.bin", &mut payload.as_slice()).await.unwrap();

    let (x, y) = {
        let (e1, m1) = (engine.clone(), manifest.clone());
        let (e2, m2) = (engine.clone(), manifest.clone());
        tokio::join!(
            async move {
                let mut out = Vec::new();
                e1.gather(&m1, &mut out).await.map(|_| out)
            },
            async move {
                let mut out = Vec::new();
                e2.gather(&m2, &mut out).await.map(|_| out)
            },
        )
    };
    assert_eq!(x.unwrap(), payload);
    assert_eq!(y.unwrap(), payload);
}

#[tokio::test]
async fn replicas_survive_primary_wipe() {
    let mut config = config_without_rescatter();
    config.parameters = ParameterSet { redundancy: 3, ..Default::default() };

    let medium = Arc::new(MemoryMedium::new(2 << 20));
    let engine =
        open_vault(medium.clone(), &TEST_KEY, config).await.unwrap();

    let payload = random_payload(8 * 1024);
    let manifest = engine.scatter("redundant.bin", &mut payload.as_slice()).await.unwrap();
    assert_eq!(manifest.parameters.redundancy, 3);

    // Wipe every primary shard with noise; the two replicas out-vote it.
    let keys = KeyState::derive(&HybridKey::from_bytes(&TEST_KEY).unwrap());
    let layout = replay_layout(&manifest, &keys);
    for per_byte in &layout {
        let mut noise = [0u8; 1];
        rand::rngs::OsRng.fill_bytes(&mut noise);
        medium.write_at(per_byte[0], &noise).unwrap();
    }

    let mut out = Vec::new();
    engine.gather(&manifest, &mut out).await.unwrap();
    assert_eq!(out, payload);
}

#[tokio::test]
async fn heavy_clobber_never_returns_wrong_bytes() {
    let medium = Arc::new(MemoryMedium::new(4 << 20));
    let engine =
        open_vault(medium.clone(), &TEST_KEY, config_without_rescatter()).await.unwrap();

    let payload = random_payload(256 * 1024);
    let manifest = engine.scatter("victim.bin", &mut payload.as_slice()).await.unwrap();

    // Simulate a foreign vault overwriting half the medium.
    medium.clobber(0, 2 << 20);

    let mut out = Vec::new();
    match engine.gather(&manifest, &mut out).await {
        Ok(()) => assert_eq!(out, payload),
        Err(e) => {
            assert!(
                matches!(
                    e,
                    sigmavault_core::VaultError::Gather { .. }
                        | sigmavault_core::VaultError::Integrity { .. }
                ),
                "unexpected failure kind: {e}"
            );
            // A failed gather must not have delivered a single byte.
            assert!(out.is_empty(), "gather failed but wrote {} bytes", out.len());
        }
    }
}

#[tokio::test]
async fn rescatter_publishes_a_fresh_manifest() {
    let medium = Arc::new(MemoryMedium::new(2 << 20));
    let engine = open_vault(medium, &TEST_KEY, config_without_rescatter()).await.unwrap();

    let payload = random_payload(16 * 1024);
    let old = engine.scatter("churn.bin", &mut payload.as_slice()).await.unwrap();

    engine.rescatter_now().await.unwrap();

    assert!(engine.manifest(&old.manifest_id).is_none(), "old manifest still published");
    let manifests = engine.manifests();
    assert_eq!(manifests.len(), 1);
    let new = &manifests[0];
    assert_ne!(new.manifest_id, old.manifest_id);
    assert_eq!(new.logical_size, payload.len() as u64);

    let mut out = Vec::new();
    engine.gather(new, &mut out).await.unwrap();
    assert_eq!(out, payload);
    assert_eq!(engine.statistics().rescatter_count, 1);
}

#[tokio::test]
async fn statistics_track_traffic() {
    let medium = Arc::new(MemoryMedium::new(1 << 20));
    let engine = open_vault(medium, &TEST_KEY, config_without_rescatter()).await.unwrap();

    let payload = random_payload(10_000);
    let manifest = engine.scatter("counted.bin", &mut payload.as_slice()).await.unwrap();
    let mut out = Vec::new();
    engine.gather(&manifest, &mut out).await.unwrap();

    let stats = engine.statistics();
    assert_eq!(stats.bytes_in, 10_000);
    assert_eq!(stats.bytes_out, 10_000);
    assert_eq!(stats.scatter_ops, 1);
    assert_eq!(stats.gather_ops, 1);
    assert!(stats.decoy_cells > 0, "no decoy entropy was written");
}

#[test]
fn projection_addresses_spread_uniformly() {
    let keys = KeyState::derive(&HybridKey::from_bytes(&TEST_KEY).unwrap());
    let params = ParameterSet::default();
    let topo = Topology::new(&keys, params, sigmavault_core::content_seed(b"uniformity"), 0, 0);

    let medium_size: u64 = 1 << 20;
    let mut buckets = [0u32; 256];
    let samples = 65_536u64;
    for i in 0..samples {
        let addr = topo.coordinate(i, 0).project(medium_size, &keys);
        assert!(addr < medium_size);
        buckets[(addr * 256 / medium_size) as usize] += 1;
    }
    // Expected 256 per bucket; a keyed PRF staying within +/-50% across all
    // 256 buckets is a > 9 sigma bound.
    for (i, &count) in buckets.iter().enumerate() {
        assert!((128..=384).contains(&count), "bucket {i} holds {count} addresses");
    }
}

#[test]
fn projection_has_no_modulo_tail() {
    // A non-power-of-two medium: the classic modulo reduction starves the
    // top of the range; the widening multiply must not.
    let keys = KeyState::derive(&HybridKey::from_bytes(&TEST_KEY).unwrap());
    let params = ParameterSet::default();
    let topo = Topology::new(&keys, params, sigmavault_core::content_seed(b"tail"), 0, 0);

    let medium_size: u64 = 1_000_003;
    let top_start = medium_size - medium_size / 32;
    let mut top_hits = 0u64;
    let samples = 65_536u64;
    for i in 0..samples {
        let addr = topo.coordinate(i, 0).project(medium_size, &keys);
        assert!(addr < medium_size);
        if addr >= top_start {
            top_hits += 1;
        }
    }
    let expected = samples / 32;
    assert!(
        top_hits > expected / 2 && top_hits < expected * 2,
        "top-of-range region got {top_hits} of ~{expected} hits"
    );
}
