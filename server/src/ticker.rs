//! Fixed-cadence drivers: the session tick and the idle-peer sweeper.

use crate::network::ServerContext;
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

/// Ticks every live session at `tick` intervals until the task is aborted.
pub async fn run_tick_loop(ctx: Arc<ServerContext>, tick: Duration) {
    let mut interval_timer = interval(tick);
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    interval_timer.tick().await;

    loop {
        interval_timer.tick().await;
        let started = Instant::now();
        let ticked = tick_all(&ctx, started).await;

        let spent = started.elapsed();
        if spent > tick {
            warn!(
                "Tick over {} sessions took {:.1}ms (budget {:.1}ms)",
                ticked,
                spent.as_secs_f64() * 1000.0,
                tick.as_secs_f64() * 1000.0
            );
        }
    }
}

/// One pass over a snapshot of the directory. Each session is locked only
/// while it updates; its output is delivered after the lock is released.
/// Returns how many sessions were ticked.
pub async fn tick_all(ctx: &ServerContext, now: Instant) -> usize {
    let sessions = ctx.directory.snapshot();
    let count = sessions.len();

    for (session_id, handle) in sessions {
        let (outbound, ended) = {
            let mut session = handle.lock().await;
            let outbound = session.update(now);
            (outbound, !session.is_active())
        };
        ctx.registry.deliver(outbound);

        if ended {
            ctx.retire_session(&session_id).await;
        }
    }
    count
}

/// Drops peers that have been silent for longer than `timeout`.
pub async fn run_idle_sweeper(ctx: Arc<ServerContext>, timeout: Duration) {
    let mut interval_timer = interval(Duration::from_secs(1));
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval_timer.tick().await;
        let removed = ctx.registry.check_timeouts(timeout);
        if !removed.is_empty() {
            debug!("Idle sweep removed {} peer(s)", removed.len());
        }
    }
}
