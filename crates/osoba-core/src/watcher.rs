//! The watcher loop: polls the ticket tracker on an interval, dispatches a
//! phase action per active ticket, and optionally auto-merges approved pull
//! requests and auto-seeds new work (spec §4.9).

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actions::ActionContext;
use crate::dispatcher;
use crate::error::Result;
use crate::ports::PhaseLaunchConfig;
use crate::ticket::{labels, Phase};

/// Floor enforced on `poll_interval` regardless of what configuration asks
/// for (spec §4.9): polling faster than this risks hammering the ticket
/// tracker's rate limits.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    pub auto_merge: bool,
    pub auto_seed: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            auto_merge: false,
            auto_seed: false,
        }
    }
}

impl WatcherConfig {
    /// Clamps `poll_interval` to [`MIN_POLL_INTERVAL`].
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }
}

/// Runs until `cancellation` fires. Errors from an individual ticket's
/// dispatch, auto-merge check, or auto-seed attempt are logged and do not
/// stop the loop — one bad ticket must never take down the watcher for
/// every other ticket (spec §4.9, §7).
pub async fn run_watcher(
    ctx: &ActionContext<'_>,
    phase_configs: &HashMap<Phase, PhaseLaunchConfig>,
    config: &WatcherConfig,
    cancellation: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(config.effective_poll_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => {
                info!("watcher cancelled, shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(err) = run_tick(ctx, phase_configs, config).await {
                    error!(error = %err, "watcher tick failed");
                }
            }
        }
    }
}

/// Runs a single tick: dispatch, optional auto-merge, optional auto-seed.
/// Public so callers (and tests) can drive one pass without the loop.
pub async fn run_tick(
    ctx: &ActionContext<'_>,
    phase_configs: &HashMap<Phase, PhaseLaunchConfig>,
    config: &WatcherConfig,
) -> Result<()> {
    let tickets = ctx.tickets.list_open_by_labels(labels::ALL).await?;
    debug!(count = tickets.len(), "watcher tick: active tickets");

    for ticket in &tickets {
        match dispatcher::dispatch(ctx, ticket, phase_configs).await {
            Ok(Some(phase)) => info!(issue_id = ticket.id, phase = %phase, "dispatched"),
            Ok(None) => {}
            Err(err) => warn!(issue_id = ticket.id, error = %err, "dispatch failed"),
        }
    }

    if config.auto_merge {
        if let Err(err) = run_auto_merge(ctx, &tickets).await {
            warn!(error = %err, "auto-merge sweep failed");
        }
    }

    if config.auto_seed {
        if let Err(err) = run_auto_seed(ctx).await {
            warn!(error = %err, "auto-seed failed");
        }
    }

    Ok(())
}

async fn run_auto_merge(ctx: &ActionContext<'_>, tickets: &[crate::ticket::Ticket]) -> Result<()> {
    for ticket in tickets.iter().filter(|t| t.has_label(labels::LGTM)) {
        let Some(pr) = ctx.tickets.pull_request_for(ticket.id).await? else {
            continue;
        };
        if ctx.tickets.auto_merge_eligible(&pr).await? {
            ctx.tickets.request_merge(&pr).await?;
            info!(issue_id = ticket.id, pr = pr.number, "auto-merge requested");
        }
    }
    Ok(())
}

/// Only fires when the repository is entirely idle: no open ticket carries
/// any `status:*` label. When it fires, picks the lowest-id open ticket and
/// labels it `status:needs-plan`, giving the watcher something to do on an
/// otherwise-idle repository (spec §4.9).
async fn run_auto_seed(ctx: &ActionContext<'_>) -> Result<()> {
    let all = ctx.tickets.list_all_open().await?;
    if all.iter().any(|t| t.is_active()) {
        return Ok(());
    }

    let Some(candidate) = all.iter().min_by_key(|t| t.id) else {
        return Ok(());
    };

    ctx.tickets.add_label(candidate.id, labels::NEEDS_PLAN).await?;
    info!(issue_id = candidate.id, "auto-seeded needs-plan");
    Ok(())
}
