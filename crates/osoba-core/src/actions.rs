//! The four phase actions: Plan, Implementation, Review, Revise (spec §4.7).
//!
//! Every action shares the same skeleton: guard against re-entrancy and
//! already-completed work, reconcile the tmux/git workspace, hand the phase
//! off to the AI assistant, and transition the ticket's trigger label to its
//! in-progress counterpart. The AI assistant itself is responsible for
//! setting the *next* trigger label once it finishes (spec §9 Open Question
//! (a): authority over `status:ready` and friends stays with the assistant,
//! not the orchestrator) — `execute` only confirms the launch, it does not
//! wait for the assistant to finish (§9 Open Question (b): fire-and-forget).

use std::path::Path;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::phase_state::{PhaseStateTable, PhaseStatus};
use crate::ports::{AiLauncher, Clock, Multiplexer, PhaseLaunchConfig, TemplateVars, TicketSource, Worktree};
use crate::reconciler::WorkspaceReconciler;
use crate::ticket::{labels, Phase, Ticket};

/// Everything a phase action needs to reach the outside world. Grouped so
/// `dispatcher` can build it once per watcher tick and hand it to whichever
/// action fires.
pub struct ActionContext<'a> {
    pub tickets: &'a dyn TicketSource,
    pub multiplexer: &'a dyn Multiplexer,
    pub worktree: &'a dyn Worktree,
    pub ai: &'a dyn AiLauncher,
    pub clock: &'a dyn Clock,
    pub reconciler: &'a WorkspaceReconciler,
    pub phase_state: &'a PhaseStateTable,
    pub repo: &'a str,
    pub repo_root: &'a Path,
}

fn in_progress_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Plan => labels::PLANNING,
        Phase::Implementation => labels::IMPLEMENTING,
        Phase::Review => labels::REVIEWING,
        Phase::Revise => labels::REVISING,
    }
}

/// True iff `phase`'s trigger label is present and no earlier run of this
/// phase for this ticket has already completed (spec §4.7 guard clause).
pub fn can_execute(phase: Phase, ticket: &Ticket, phase_state: &PhaseStateTable) -> bool {
    ticket.has_label(phase.trigger_label()) && !phase_state.has_been_processed(ticket.id, phase)
}

/// Runs `phase` for `ticket`: reconciles the workspace, transitions the
/// trigger label to its in-progress counterpart, and launches the AI
/// assistant in the reconciled pane. Returns `Error::AlreadyProcessing` if
/// another tick is already running a phase for this ticket.
pub async fn execute(
    ctx: &ActionContext<'_>,
    phase: Phase,
    ticket: &Ticket,
    phase_config: &PhaseLaunchConfig,
) -> Result<()> {
    if ctx.phase_state.is_processing(ticket.id) {
        return Err(Error::AlreadyProcessing(ticket.id));
    }

    let now = ctx.clock.now();
    ctx.phase_state.set(ticket.id, phase, PhaseStatus::Processing, now);

    let result = run_phase(ctx, phase, ticket, phase_config).await;

    let now = ctx.clock.now();
    match &result {
        Ok(()) => ctx.phase_state.mark_completed(ticket.id, phase, now),
        Err(err) => {
            warn!(issue_id = ticket.id, phase = %phase, error = %err, "phase action failed");
            ctx.phase_state.mark_failed(ticket.id, phase, now);
        }
    }

    result
}

async fn run_phase(
    ctx: &ActionContext<'_>,
    phase: Phase,
    ticket: &Ticket,
    phase_config: &PhaseLaunchConfig,
) -> Result<()> {
    if phase == Phase::Revise {
        // The requires-changes verdict lives on the PR, not the ticket; best
        // effort since the PR may already have been closed or merged.
        if let Some(pr) = ctx.tickets.pull_request_for(ticket.id).await? {
            if let Err(err) = ctx.tickets.remove_label(pr.number, labels::REQUIRES_CHANGES).await {
                warn!(issue_id = ticket.id, pr = pr.number, error = %err, "failed to strip requires-changes from PR");
            }
        }
    }

    let workspace = ctx
        .reconciler
        .prepare_workspace(
            ctx.multiplexer,
            ctx.worktree,
            ctx.repo,
            ctx.repo_root,
            ticket.id,
            phase,
        )
        .await?;

    ctx.tickets
        .transition_label(ticket.id, phase.trigger_label(), in_progress_label(phase))
        .await?;

    if phase == Phase::Revise {
        // Revise's trigger is requires-changes, but a ticket can still carry
        // the stale reviewing label from the Review run that rejected it.
        ctx.tickets.remove_label(ticket.id, labels::REVIEWING).await?;
    }

    let template_vars = TemplateVars {
        issue_number: ticket.id,
        issue_title: ticket.title.clone(),
        repo_name: ctx.repo.to_string(),
    };

    if let Some(message) = &phase_config.entry_message {
        ctx.tickets
            .comment(ticket.id, &template_vars.expand(message))
            .await?;
    }

    ctx.ai
        .execute_in_pane(
            ctx.multiplexer,
            phase_config,
            &template_vars,
            &workspace.session,
            &workspace.window,
            &workspace.worktree_path,
        )
        .await?;

    info!(issue_id = ticket.id, phase = %phase, "phase launched");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PullRequest;
    use crate::test_support::{FakeAiLauncher, FakeMultiplexer, FakeTicketSource, FakeWorktree, FixedClock};
    use std::path::PathBuf;

    fn reconciler() -> WorkspaceReconciler {
        WorkspaceReconciler::new(crate::reconciler::ReconcilerConfig {
            session_prefix: "osoba-".into(),
            limit_panes_enabled: false,
            max_panes_per_window: 3,
            auto_resize_panes: false,
            split_percentage: 50,
        })
    }

    #[tokio::test]
    async fn plan_transitions_label_and_launches_ai() {
        let ticket = Ticket::new(1, "fix the bug").with_labels([labels::NEEDS_PLAN]);
        let tickets = FakeTicketSource::new([ticket.clone()]);
        let mux = FakeMultiplexer::new();
        let worktree = FakeWorktree::new();
        let ai = FakeAiLauncher::new();
        let clock = FixedClock(chrono::Utc::now());
        let recon = reconciler();
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

        let phase_config = PhaseLaunchConfig {
            args: vec!["--dangerously-skip-permissions".into()],
            prompt: "plan issue {{issue-number}}".into(),
            entry_message: None,
        };

        execute(&ctx, Phase::Plan, &ticket, &phase_config).await.unwrap();

        let updated = tickets.ticket(1).unwrap();
        assert!(updated.has_label(labels::PLANNING));
        assert!(!updated.has_label(labels::NEEDS_PLAN));
        assert!(phase_state.has_been_processed(1, Phase::Plan));
        assert_eq!(ai.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn revise_clears_stale_review_labels_and_strips_requires_changes_from_the_pr() {
        let ticket = Ticket::new(2, "needs rework")
            .with_labels([labels::REQUIRES_CHANGES, labels::REVIEWING]);
        let tickets = FakeTicketSource::new([ticket.clone()]);
        tickets.link_pull_request(
            2,
            PullRequest {
                number: 457,
                labels: vec![labels::REQUIRES_CHANGES.to_string()],
                checks_passing: true,
                mergeable: false,
            },
        );
        let mux = FakeMultiplexer::new();
        let worktree = FakeWorktree::new();
        let ai = FakeAiLauncher::new();
        let clock = FixedClock(chrono::Utc::now());
        let recon = reconciler();
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

        let phase_config = PhaseLaunchConfig {
            args: vec![],
            prompt: "revise issue {{issue-number}}".into(),
            entry_message: None,
        };

        execute(&ctx, Phase::Revise, &ticket, &phase_config).await.unwrap();

        let updated = tickets.ticket(2).unwrap();
        assert!(!updated.has_label(labels::REQUIRES_CHANGES));
        assert!(!updated.has_label(labels::REVIEWING));
        assert!(updated.has_label(labels::REVISING));
        assert!(!tickets
            .pull_request_for(2)
            .await
            .unwrap()
            .unwrap()
            .labels
            .contains(&labels::REQUIRES_CHANGES.to_string()));
    }

    #[tokio::test]
    async fn entry_message_is_posted_as_comment() {
        let ticket = Ticket::new(4, "x").with_labels([labels::NEEDS_PLAN]);
        let tickets = FakeTicketSource::new([ticket.clone()]);
        let mux = FakeMultiplexer::new();
        let worktree = FakeWorktree::new();
        let ai = FakeAiLauncher::new();
        let clock = FixedClock(chrono::Utc::now());
        let recon = reconciler();
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

        let phase_config = PhaseLaunchConfig {
            args: vec![],
            prompt: "plan issue {{issue-number}}".into(),
            entry_message: Some("starting plan for #{{issue-number}}".into()),
        };

        execute(&ctx, Phase::Plan, &ticket, &phase_config).await.unwrap();

        assert_eq!(tickets.comments_for(4), vec!["starting plan for #4".to_string()]);
    }

    #[tokio::test]
    async fn already_processing_is_rejected() {
        let ticket = Ticket::new(3, "x").with_labels([labels::READY]);
        let tickets = FakeTicketSource::new([ticket.clone()]);
        let mux = FakeMultiplexer::new();
        let worktree = FakeWorktree::new();
        let ai = FakeAiLauncher::new();
        let clock = FixedClock(chrono::Utc::now());
        let recon = reconciler();
        let phase_state = PhaseStateTable::new();
        phase_state.set(3, Phase::Implementation, PhaseStatus::Processing, clock.now());

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

        let phase_config = PhaseLaunchConfig {
            args: vec![],
            prompt: "implement {{issue-number}}".into(),
            entry_message: None,
        };

        let err = execute(&ctx, Phase::Implementation, &ticket, &phase_config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyProcessing(3)));
    }
}
