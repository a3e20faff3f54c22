//! Failed-recovery sweeper (C10).
//!
//! The only path that clears a Stream Manager parked in the terminal `failed` state.
//! Without it, a single burst of failures that exhausts a device's restart budget would
//! permanently kill that stream.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::registered_set::RegisteredSet;
use crate::registry::{Registry, ServiceState};

pub struct RecoveryContext {
    pub registry: Arc<Registry>,
    pub registered_set: Arc<RegisteredSet>,
}

async fn sweep_once(ctx: &RecoveryContext) {
    for status in ctx.registry.status().await {
        if status.state != ServiceState::Failed {
            continue;
        }

        tracing::info!(device = %status.name, "sweeping permanently-failed stream");
        ctx.registry.remove(&status.name).await;
        ctx.registered_set.unregister(&status.name).await;
    }
}

pub async fn run(ctx: RecoveryContext, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => sweep_once(&ctx).await,
            _ = cancel.cancelled() => return,
        }
    }
}
