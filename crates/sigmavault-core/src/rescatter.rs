//! Background re-scatter: temporal variance for static files.
//!
//! A single cooperative task wakes on an interval, picks manifests whose
//! temporal bucket has gone stale, gathers them in memory (files above the
//! buffer cap are skipped for the pass) and re-scatters them under the
//! current bucket. The new manifest is published with an index swap under
//! the write lock; the old one is dropped only after the replacement is
//! durable, so a failed pass never damages anything.

use crate::engine::{Cancellation, EngineInner};
use crate::manifest::Manifest;
use crate::pipeline;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub(crate) fn spawn(
    engine: Weak<EngineInner>,
    shutdown: Arc<Notify>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.notified() => break,
            }
            let Some(inner) = engine.upgrade() else { break };
            if inner.shutdown.is_cancelled() {
                break;
            }
            run_pass(&inner, false).await;
        }
        trace!("re-scatter task exited");
    })
}

/// One pass over the index. `force` re-scatters every tracked file (the
/// manual trigger); otherwise only stale temporal buckets are touched.
pub(crate) async fn run_pass(inner: &EngineInner, force: bool) {
    let stale: Vec<Arc<Manifest>> = {
        let index = inner.index.read();
        index
            .values()
            .filter(|m| {
                force || m.temporal_bucket() < m.parameters.temporal_bucket(pipeline::epoch_ms())
            })
            .cloned()
            .collect()
    };
    if stale.is_empty() {
        return;
    }
    debug!(count = stale.len(), "re-scatter pass starting");

    for old in stale {
        // Shutdown lets the current file finish, not the whole pass.
        if inner.shutdown.is_cancelled() {
            break;
        }
        if old.logical_size > inner.memory_cap as u64 {
            trace!(manifest = %old.manifest_id, "skipping oversized file this pass");
            continue;
        }
        match rescatter_one(inner, &old).await {
            Ok(new_id) => {
                inner.stats.add(&inner.stats.rescatter_count, 1);
                debug!(old = %old.manifest_id, new = %new_id, "re-scattered");
            }
            Err(e) => {
                inner.stats.add(&inner.stats.rescatter_failures, 1);
                warn!(manifest = %old.manifest_id, "re-scatter failed: {e}");
            }
        }
    }
}

async fn rescatter_one(
    inner: &EngineInner,
    old: &Arc<Manifest>,
) -> crate::error::Result<crate::manifest::ManifestId> {
    let cancel = Cancellation::new();
    let started = std::time::Instant::now();

    let mut buffer = Vec::with_capacity(old.logical_size as usize);
    pipeline::gather_stream(
        &inner.keys,
        inner.medium.as_ref(),
        &inner.stats,
        old,
        inner.memory_cap,
        &cancel,
        &mut buffer,
    )
    .await?;

    // Same parameter set, fresh salt; the new creation time moves the
    // temporal bucket and with it the whole physical layout.
    let mut params = old.parameters;
    params.randomize_salt();

    let new = pipeline::scatter_stream(
        &inner.keys,
        inner.medium.as_ref(),
        &inner.stats,
        params,
        inner.memory_cap,
        &cancel,
        &mut buffer.as_slice(),
    )
    .await?;
    let new = Arc::new(new);
    let new_id = new.manifest_id;

    // scatter_stream has already synced; the swap is the publication point.
    {
        let mut index = inner.index.write();
        index.remove(&old.manifest_id);
        index.insert(new_id, new);
    }

    use zeroize::Zeroize;
    buffer.zeroize();

    inner.emit(crate::advisor::AccessEvent {
        manifest_id: new_id,
        op: crate::advisor::AccessOp::Rescatter,
        bytes: old.logical_size,
        latency: started.elapsed(),
    });

    Ok(new_id)
}
