//! Cleanup sweeper: removes tmux windows, worktrees, branches, and
//! phase-state entries for tickets that are no longer active (spec §4.10).

use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::phase_state::PhaseStateTable;
use crate::ports::{Multiplexer, TicketSource, Worktree};
use crate::ticket::parse_issue_id;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl SweeperConfig {
    pub fn effective_interval(&self) -> Duration {
        self.interval.clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL)
    }
}

pub struct SweeperContext<'a> {
    pub tickets: &'a dyn TicketSource,
    pub multiplexer: &'a dyn Multiplexer,
    pub worktree: &'a dyn Worktree,
    pub phase_state: &'a PhaseStateTable,
    pub session: &'a str,
    pub repo_root: &'a Path,
}

/// Runs the sweep loop until `cancellation` fires. A failure partway through
/// one sweep is logged and the loop continues to the next tick — one bad
/// artifact must never block cleanup of the rest (spec §4.10, §7).
pub async fn run_sweeper(
    ctx: &SweeperContext<'_>,
    config: &SweeperConfig,
    cancellation: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(config.effective_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => {
                info!("sweeper cancelled, shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(err) = run_sweep(ctx).await {
                    warn!(error = %err, "sweep failed");
                }
            }
        }
    }
}

/// Runs a single sweep pass. Public so callers (e.g. the `clean` subcommand)
/// can trigger one on demand outside the loop.
pub async fn run_sweep(ctx: &SweeperContext<'_>) -> Result<()> {
    let active = ctx
        .tickets
        .list_open_by_labels(crate::ticket::labels::ALL)
        .await?
        .into_iter()
        .map(|t| t.id)
        .collect::<std::collections::HashSet<_>>();

    let windows = ctx.multiplexer.list_windows(ctx.session).await?;
    let worktree_ids = ctx.worktree.list_worktree_ids(ctx.repo_root).await?;

    let mut stale_ids = std::collections::HashSet::new();
    for window in &windows {
        if let Some(id) = parse_issue_id(window) {
            if !active.contains(&id) {
                stale_ids.insert(id);
            }
        }
    }
    for id in &worktree_ids {
        if !active.contains(id) {
            stale_ids.insert(*id);
        }
    }

    for id in stale_ids {
        if ctx.phase_state.is_processing(id) {
            info!(issue_id = id, "skipping cleanup, phase in progress");
            continue;
        }
        sweep_one(ctx, id, &windows).await?;
    }

    Ok(())
}

async fn sweep_one(ctx: &SweeperContext<'_>, id: u64, windows: &[String]) -> Result<()> {
    let window = crate::ticket::window_name(id);
    if windows.iter().any(|w| w == &window) {
        ctx.multiplexer.kill_window(ctx.session, &window).await?;
    }

    if ctx.worktree.worktree_exists_for_issue(ctx.repo_root, id).await? {
        ctx.worktree
            .remove_worktree_for_issue(ctx.repo_root, id)
            .await?;
        ctx.worktree.delete_branch_for_issue(ctx.repo_root, id).await?;
    }

    ctx.phase_state.clear(id);
    info!(issue_id = id, "swept stale artifacts");
    Ok(())
}
