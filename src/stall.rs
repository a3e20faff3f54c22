//! Stall detector (C9).
//!
//! Polls the media router for per-path byte counters and compares against the previous
//! sample. A stream that is not `ready`, or whose byte count hasn't advanced, accrues a
//! consecutive-stall count; once that reaches `maxStallChecks` the stream is torn down so
//! the next discovery tick re-registers it fresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigStore, MonitorConfig};
use crate::mediarouter::MediaRouterClient;
use crate::registered_set::RegisteredSet;
use crate::registry::Registry;
use crate::utils::LogThrottler;

#[derive(Debug, Clone, Copy)]
struct Sample {
    bytes_received: i64,
    consecutive_stalls: u32,
}

pub struct StallDetectorContext {
    pub config_store: Arc<ConfigStore>,
    pub registry: Arc<Registry>,
    pub registered_set: Arc<RegisteredSet>,
    pub client: MediaRouterClient,
    pub query_throttle: LogThrottler,
}

async fn check_once(ctx: &StallDetectorContext, samples: &Mutex<HashMap<String, Sample>>, monitor: &MonitorConfig) {
    let names = ctx.registered_set.registered_names().await;

    for name in names {
        let path = match ctx.client.get_path(&name).await {
            Ok(path) => {
                ctx.query_throttle.clear(&name);
                path
            }
            Err(e) => {
                crate::warn_throttled!(ctx.query_throttle, &name, device = %name, error = %e, "media router query failed");
                continue;
            }
        };

        let (ready, bytes_received) = match path {
            Some(p) => (p.ready, p.bytes_received),
            None => (false, 0),
        };

        let mut samples = samples.lock().await;
        let entry = samples.entry(name.clone()).or_insert(Sample {
            bytes_received: -1,
            consecutive_stalls: 0,
        });

        let should_restart = advance_sample(entry, ready, bytes_received, monitor);
        drop(samples);

        if should_restart {
            let stalls = monitor.max_stall_checks;
            tracing::warn!(device = %name, stalls, "stream stalled, restarting");
            ctx.registry.remove(&name).await;
            ctx.registered_set.unregister(&name).await;
            samples.lock().await.remove(&name);
        }
    }
}

/// Advance one device's sample with a fresh `(ready, bytes_received)` observation. Returns
/// `true` if the stream has now accrued enough consecutive non-advancing samples to be torn
/// down. Pure function of the current sample + observation, split out of `check_once` so
/// the stall-accrual logic can be tested without a media router.
fn advance_sample(entry: &mut Sample, ready: bool, bytes_received: i64, monitor: &MonitorConfig) -> bool {
    let advanced = ready && bytes_received > entry.bytes_received;
    if advanced {
        entry.consecutive_stalls = 0;
        entry.bytes_received = bytes_received;
        return false;
    }

    entry.consecutive_stalls += 1;
    entry.consecutive_stalls >= monitor.max_stall_checks && monitor.restart_unhealthy
}

/// Run the stall detector until `cancel` fires. No-op entirely when `monitor.enabled` is
/// false in the configuration snapshot taken at startup.
pub async fn run(ctx: StallDetectorContext, cancel: CancellationToken) {
    let initial = ctx.config_store.get();
    if !initial.monitor.enabled {
        return;
    }

    let samples: Mutex<HashMap<String, Sample>> = Mutex::new(HashMap::new());
    let mut ticker = tokio::time::interval(interval_from(&initial.monitor));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let monitor = ctx.config_store.get().monitor.clone();
                check_once(&ctx, &samples, &monitor).await;
            }
            _ = cancel.cancelled() => return,
        }
    }
}

fn interval_from(monitor: &MonitorConfig) -> Duration {
    monitor.stall_check_interval()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(max_stall_checks: u32, restart_unhealthy: bool) -> MonitorConfig {
        MonitorConfig {
            max_stall_checks,
            restart_unhealthy,
            ..MonitorConfig::default()
        }
    }

    fn fresh_sample() -> Sample {
        Sample {
            bytes_received: -1,
            consecutive_stalls: 0,
        }
    }

    #[test]
    fn advancing_bytes_resets_stall_count() {
        let monitor = monitor(3, true);
        let mut sample = Sample {
            bytes_received: 100,
            consecutive_stalls: 2,
        };
        let restart = advance_sample(&mut sample, true, 200, &monitor);
        assert!(!restart);
        assert_eq!(sample.consecutive_stalls, 0);
        assert_eq!(sample.bytes_received, 200);
    }

    #[test]
    fn non_advancing_bytes_accrue_until_threshold() {
        let monitor = monitor(3, true);
        let mut sample = fresh_sample();

        assert!(!advance_sample(&mut sample, true, 0, &monitor));
        assert!(!advance_sample(&mut sample, true, 0, &monitor));
        assert!(advance_sample(&mut sample, true, 0, &monitor));
        assert_eq!(sample.consecutive_stalls, 3);
    }

    #[test]
    fn not_ready_counts_as_stalled_even_with_advancing_bytes() {
        let monitor = monitor(1, true);
        let mut sample = fresh_sample();
        let restart = advance_sample(&mut sample, false, 500, &monitor);
        assert!(restart);
    }

    #[test]
    fn restart_unhealthy_disabled_never_signals_restart() {
        let monitor = monitor(1, false);
        let mut sample = fresh_sample();
        let restart = advance_sample(&mut sample, false, 0, &monitor);
        assert!(!restart);
        assert_eq!(sample.consecutive_stalls, 1);
    }
}
