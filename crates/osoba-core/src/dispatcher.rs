//! Picks at most one phase action to run per ticket per watcher tick
//! (spec §4.8).

use std::collections::HashMap;

use crate::actions::{self, ActionContext};
use crate::error::Result;
use crate::ports::PhaseLaunchConfig;
use crate::ticket::{Phase, Ticket};

/// Precedence used when a ticket somehow carries more than one trigger
/// label at once. Not expected in normal operation — the single-active-label
/// invariant (spec §3) should prevent it — but the dispatcher must still
/// make a deterministic choice rather than run more than one action (spec
/// §9 Open Question (c)). Revise takes priority since it represents ticket
/// work already in flight that regressed, which should resume before a
/// fresh Plan or Implementation is allowed to start.
const PRECEDENCE: [Phase; 4] = [Phase::Revise, Phase::Review, Phase::Implementation, Phase::Plan];

/// Returns the phase that was dispatched, or `None` if no trigger label
/// matched or the ticket is already processing.
pub async fn dispatch(
    ctx: &ActionContext<'_>,
    ticket: &Ticket,
    phase_configs: &HashMap<Phase, PhaseLaunchConfig>,
) -> Result<Option<Phase>> {
    if ctx.phase_state.is_processing(ticket.id) {
        return Ok(None);
    }

    let Some(phase) = PRECEDENCE
        .into_iter()
        .find(|phase| actions::can_execute(*phase, ticket, ctx.phase_state))
    else {
        return Ok(None);
    };

    let Some(phase_config) = phase_configs.get(&phase) else {
        return Ok(None);
    };

    actions::execute(ctx, phase, ticket, phase_config).await?;
    Ok(Some(phase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase_state::PhaseStateTable;
    use crate::ports::SystemClock;
    use crate::reconciler::{ReconcilerConfig, WorkspaceReconciler};
    use crate::test_support::{FakeAiLauncher, FakeMultiplexer, FakeTicketSource, FakeWorktree};
    use crate::ticket::labels;
    use std::path::PathBuf;

    fn phase_configs() -> HashMap<Phase, PhaseLaunchConfig> {
        Phase::all()
            .into_iter()
            .map(|p| {
                (
                    p,
                    PhaseLaunchConfig {
                        args: vec![],
                        prompt: format!("{p} {{{{issue-number}}}}"),
                        entry_message: None,
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn revise_wins_over_review_when_both_labels_present() {
        let ticket = Ticket::new(1, "x")
            .with_labels([labels::REQUIRES_CHANGES, labels::REVIEW_REQUESTED]);
        let tickets = FakeTicketSource::new([ticket.clone()]);
        let mux = FakeMultiplexer::new();
        let worktree = FakeWorktree::new();
        let ai = FakeAiLauncher::new();
        let clock = SystemClock;
        let recon = WorkspaceReconciler::new(ReconcilerConfig {
            session_prefix: "osoba-".into(),
            limit_panes_enabled: false,
            max_panes_per_window: 3,
            auto_resize_panes: false,
            split_percentage: 50,
        });
        let phase_state = PhaseStateTable::new();

        let ctx = ActionContext {
            tickets: &tickets,
            multiplexer: &mux,
            worktree: &worktree,
            ai: &ai,
            clock: &clock,
            reconciler: &recon,
            phase_state: &phase_state,
            repo: "acme/widgets",
            repo_root: &PathBuf::from("/repo"),
        };

        let dispatched = dispatch(&ctx, &ticket, &phase_configs()).await.unwrap();
        assert_eq!(dispatched, Some(Phase::Revise));
    }

    #[tokio::test]
    async fn no_trigger_label_dispatches_nothing() {
        let ticket = Ticket::new(2, "x").with_labels(["bug"]);
        let tickets = FakeTicketSource::new([ticket.clone()]);
        let mux = FakeMultiplexer::new();
        let worktree = FakeWorktree::new();
        let ai = FakeAiLauncher::new();
        let clock = SystemClock;
        let recon = WorkspaceReconciler::new(ReconcilerConfig {
            session_prefix: "osoba-".into(),
            limit_panes_enabled: false,
            max_panes_per_window: 3,
            auto_resize_panes: false,
            split_percentage: 50,
        });
        let phase_state = PhaseStateTable::new();

        let ctx = ActionContext {
            tickets: &tickets,
            multiplexer: &mux,
            worktree: &worktree,
            ai: &ai,
            clock: &clock,
            reconciler: &recon,
            phase_state: &phase_state,
            repo: "acme/widgets",
            repo_root: &PathBuf::from("/repo"),
        };

        let dispatched = dispatch(&ctx, &ticket, &phase_configs()).await.unwrap();
        assert_eq!(dispatched, None);
    }
}
