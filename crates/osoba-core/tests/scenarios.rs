//! End-to-end scenarios against the in-memory fakes (spec §8): a fresh Plan
//! dispatch, Ready -> Implement, Review under a pane-count limit, Revise from
//! requires-changes, the cleanup sweep, and auto-seed on an idle repo.

use std::collections::HashMap;
use std::path::PathBuf;

use osoba_core::actions::ActionContext;
use osoba_core::dispatcher;
use osoba_core::phase_state::PhaseStateTable;
use osoba_core::ports::{Multiplexer, PhaseLaunchConfig, SystemClock, TicketSource, Worktree};
use osoba_core::reconciler::{ReconcilerConfig, WorkspaceReconciler};
use osoba_core::sweeper::{self, SweeperContext};
use osoba_core::test_support::{FakeAiLauncher, FakeMultiplexer, FakeTicketSource, FakeWorktree};
use osoba_core::ticket::{labels, Phase, Ticket};
use osoba_core::watcher::{self, WatcherConfig};

fn phase_configs() -> HashMap<Phase, PhaseLaunchConfig> {
    Phase::all()
        .into_iter()
        .map(|p| {
            (
                p,
                PhaseLaunchConfig {
                    args: vec!["--dangerously-skip-permissions".into()],
                    prompt: format!("{p} {{{{issue-number}}}} in {{{{repo-name}}}}"),
                    entry_message: None,
                },
            )
        })
        .collect()
}

fn reconciler(max_panes_per_window: u32, limit_panes_enabled: bool) -> WorkspaceReconciler {
    WorkspaceReconciler::new(ReconcilerConfig {
        session_prefix: "osoba-".into(),
        limit_panes_enabled,
        max_panes_per_window,
        auto_resize_panes: false,
        split_percentage: 50,
    })
}

struct Harness {
    tickets: FakeTicketSource,
    mux: FakeMultiplexer,
    worktree: FakeWorktree,
    ai: FakeAiLauncher,
    clock: SystemClock,
    recon: WorkspaceReconciler,
    phase_state: PhaseStateTable,
    repo_root: PathBuf,
}

impl Harness {
    fn new(tickets: impl IntoIterator<Item = Ticket>, max_panes: u32, limit_panes: bool) -> Self {
        Self {
            tickets: FakeTicketSource::new(tickets),
            mux: FakeMultiplexer::new(),
            worktree: FakeWorktree::new(),
            ai: FakeAiLauncher::new(),
            clock: SystemClock,
            recon: reconciler(max_panes, limit_panes),
            phase_state: PhaseStateTable::new(),
            repo_root: PathBuf::from("/repo"),
        }
    }

    fn ctx(&self) -> ActionContext<'_> {
        ActionContext {
            tickets: &self.tickets,
            multiplexer: &self.mux,
            worktree: &self.worktree,
            ai: &self.ai,
            clock: &self.clock,
            reconciler: &self.recon,
            phase_state: &self.phase_state,
            repo: "widgets",
            repo_root: &self.repo_root,
        }
    }
}

#[tokio::test]
async fn fresh_plan_creates_session_window_worktree_and_launches_ai() {
    let ticket = Ticket::new(10, "add widgets").with_labels([labels::NEEDS_PLAN]);
    let harness = Harness::new([ticket.clone()], 3, false);
    let ctx = harness.ctx();

    let dispatched = dispatcher::dispatch(&ctx, &ticket, &phase_configs()).await.unwrap();
    assert_eq!(dispatched, Some(Phase::Plan));

    let updated = harness.tickets.ticket(10).unwrap();
    assert!(updated.has_label(labels::PLANNING));
    assert!(!updated.has_label(labels::NEEDS_PLAN));

    assert!(harness.mux.session_exists("osoba-widgets").await.unwrap());
    assert!(harness
        .mux
        .window_exists("osoba-widgets", "issue-10")
        .await
        .unwrap());
    assert!(harness
        .worktree
        .worktree_exists_for_issue(&harness.repo_root, 10)
        .await
        .unwrap());
    assert_eq!(harness.ai.calls.lock().unwrap().len(), 1);
    assert!(harness.phase_state.has_been_processed(10, Phase::Plan));
}

#[tokio::test]
async fn ready_dispatches_implement_into_the_same_window_as_an_earlier_plan() {
    let ticket = Ticket::new(11, "add widgets").with_labels([labels::NEEDS_PLAN]);
    let harness = Harness::new([ticket.clone()], 3, false);
    let ctx = harness.ctx();
    let configs = phase_configs();

    dispatcher::dispatch(&ctx, &ticket, &configs).await.unwrap();

    // The AI sets status:ready once planning finishes; the fake ticket
    // source plays that role for the test.
    harness
        .tickets
        .transition_label(11, labels::PLANNING, labels::READY)
        .await
        .unwrap();
    let ready_ticket = harness.tickets.ticket(11).unwrap();

    let dispatched = dispatcher::dispatch(&ctx, &ready_ticket, &configs).await.unwrap();
    assert_eq!(dispatched, Some(Phase::Implementation));

    let panes = harness.mux.panes_in("osoba-widgets", "issue-11");
    // Plan reused the base-index pane; Implementation is a second pane in
    // the same window since it is not a new window and not the Plan phase.
    assert_eq!(panes.len(), 2);
    let updated = harness.tickets.ticket(11).unwrap();
    assert!(updated.has_label(labels::IMPLEMENTING));
}

#[tokio::test]
async fn review_honors_the_pane_limit_and_evicts_the_oldest_inactive_pane() {
    let ticket = Ticket::new(12, "add widgets").with_labels([labels::REVIEW_REQUESTED]);
    let harness = Harness::new([ticket.clone()], 2, true);
    let ctx = harness.ctx();

    // Open the window with two panes (a tmux window only ever has one
    // active/focused pane at a time) so the max-panes-per-window limit (2)
    // is already at capacity, with exactly one evictable pane, before
    // Review runs.
    harness.mux.ensure_session("osoba-widgets").await.unwrap();
    harness
        .mux
        .create_window_for_issue("osoba-widgets", 12)
        .await
        .unwrap();
    harness
        .mux
        .set_pane_title("osoba-widgets", "issue-12", 0, "Plan")
        .await
        .unwrap();
    harness
        .mux
        .create_pane(
            "osoba-widgets",
            "issue-12",
            &osoba_core::ports::PaneOpts {
                split_horizontal: true,
                percentage: 50,
                title: "Extra".into(),
            },
            false,
            0,
        )
        .await
        .unwrap();

    let dispatched = dispatcher::dispatch(&ctx, &ticket, &phase_configs()).await.unwrap();
    assert_eq!(dispatched, Some(Phase::Review));

    let panes = harness.mux.panes_in("osoba-widgets", "issue-12");
    assert_eq!(panes.len(), 2);
    assert!(!panes.iter().any(|p| p.title == "Plan"));
    assert!(panes.iter().any(|p| p.title == "Extra"));
    assert!(panes.iter().any(|p| p.title == "Review"));
}

#[tokio::test]
async fn revise_strips_requires_changes_and_stale_review_labels() {
    let ticket = Ticket::new(13, "add widgets")
        .with_labels([labels::REQUIRES_CHANGES, labels::REVIEWING]);
    let harness = Harness::new([ticket.clone()], 3, false);
    harness.tickets.link_pull_request(
        13,
        osoba_core::ports::PullRequest {
            number: 457,
            labels: vec![labels::REQUIRES_CHANGES.to_string()],
            checks_passing: true,
            mergeable: false,
        },
    );
    let ctx = harness.ctx();

    let dispatched = dispatcher::dispatch(&ctx, &ticket, &phase_configs()).await.unwrap();
    assert_eq!(dispatched, Some(Phase::Revise));

    let updated = harness.tickets.ticket(13).unwrap();
    assert!(updated.has_label(labels::REVISING));
    assert!(!updated.has_label(labels::REQUIRES_CHANGES));
    assert!(!updated.has_label(labels::REVIEWING));
    assert!(!harness
        .tickets
        .pull_request_for(13)
        .await
        .unwrap()
        .unwrap()
        .labels
        .contains(&labels::REQUIRES_CHANGES.to_string()));
}

#[tokio::test]
async fn cleanup_sweeps_artifacts_with_no_matching_active_ticket() {
    let harness = Harness::new(
        [Ticket::new(20, "alive").with_labels([labels::READY])],
        3,
        false,
    );

    harness.mux.ensure_session("osoba-widgets").await.unwrap();
    harness
        .mux
        .create_window_for_issue("osoba-widgets", 20)
        .await
        .unwrap();
    harness
        .mux
        .create_window_for_issue("osoba-widgets", 21)
        .await
        .unwrap();
    harness
        .worktree
        .ensure_worktree_for_issue(&harness.repo_root, 20)
        .await
        .unwrap();
    harness
        .worktree
        .ensure_worktree_for_issue(&harness.repo_root, 21)
        .await
        .unwrap();

    let sweeper_ctx = SweeperContext {
        tickets: &harness.tickets,
        multiplexer: &harness.mux,
        worktree: &harness.worktree,
        phase_state: &harness.phase_state,
        session: "osoba-widgets",
        repo_root: &harness.repo_root,
    };

    sweeper::run_sweep(&sweeper_ctx).await.unwrap();

    let windows = harness.mux.list_windows("osoba-widgets").await.unwrap();
    assert!(windows.contains(&"issue-20".to_string()));
    assert!(!windows.contains(&"issue-21".to_string()));
    assert!(!harness
        .worktree
        .worktree_exists_for_issue(&harness.repo_root, 21)
        .await
        .unwrap());
    assert!(harness.worktree.branch_deleted(21));
}

#[tokio::test]
async fn auto_seed_only_fires_when_the_repo_is_entirely_idle() {
    let busy = Harness::new(
        [
            Ticket::new(30, "busy").with_labels([labels::READY]),
            Ticket::new(31, "idle").with_labels(Vec::<String>::new()),
        ],
        3,
        false,
    );
    let configs = phase_configs();
    let watcher_config = WatcherConfig {
        poll_interval: watcher::MIN_POLL_INTERVAL,
        auto_merge: false,
        auto_seed: true,
    };
    watcher::run_tick(&busy.ctx(), &configs, &watcher_config)
        .await
        .unwrap();
    assert!(!busy.tickets.ticket(31).unwrap().has_label(labels::NEEDS_PLAN));

    let idle = Harness::new(
        [
            Ticket::new(40, "lower id").with_labels(Vec::<String>::new()),
            Ticket::new(41, "higher id").with_labels(Vec::<String>::new()),
        ],
        3,
        false,
    );
    watcher::run_tick(&idle.ctx(), &configs, &watcher_config)
        .await
        .unwrap();
    assert!(idle.tickets.ticket(40).unwrap().has_label(labels::NEEDS_PLAN));
    assert!(!idle.tickets.ticket(41).unwrap().has_label(labels::NEEDS_PLAN));
}
