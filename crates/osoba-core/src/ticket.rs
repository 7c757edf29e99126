//! Data model shared by every component: tickets, phases, and the fixed
//! label vocabulary (spec §3).

use std::collections::HashSet;
use std::fmt;

/// A trigger or transit label recognized by the core. Only the `status:*`
/// vocabulary is meaningful here — arbitrary labels pass through untouched.
pub mod labels {
    pub const NEEDS_PLAN: &str = "status:needs-plan";
    pub const PLANNING: &str = "status:planning";
    pub const READY: &str = "status:ready";
    pub const IMPLEMENTING: &str = "status:implementing";
    pub const REVIEW_REQUESTED: &str = "status:review-requested";
    pub const REVIEWING: &str = "status:reviewing";
    pub const REQUIRES_CHANGES: &str = "status:requires-changes";
    pub const REVISING: &str = "status:revising";
    pub const REVIEWED: &str = "status:reviewed";
    pub const COMPLETED: &str = "status:completed";
    pub const LGTM: &str = "status:lgtm";

    pub const ALL: &[&str] = &[
        NEEDS_PLAN,
        PLANNING,
        READY,
        IMPLEMENTING,
        REVIEW_REQUESTED,
        REVIEWING,
        REQUIRES_CHANGES,
        REVISING,
        REVIEWED,
        COMPLETED,
        LGTM,
    ];

    pub fn is_status_label(label: &str) -> bool {
        label.starts_with("status:")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Open,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: u64,
    pub title: String,
    pub labels: HashSet<String>,
    pub state: TicketState,
}

impl Ticket {
    pub fn new(id: u64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            labels: HashSet::new(),
            state: TicketState::Open,
        }
    }

    pub fn with_labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// A ticket is active iff it carries any `status:*` label (spec §3).
    pub fn is_active(&self) -> bool {
        self.labels.iter().any(|l| labels::is_status_label(l))
    }

    /// All `status:*` labels currently on the ticket. Under the single-label
    /// invariant this has at most one element after a successful action.
    pub fn status_labels(&self) -> Vec<&str> {
        self.labels
            .iter()
            .filter(|l| labels::is_status_label(l))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Plan,
    Implementation,
    Review,
    Revise,
}

impl Phase {
    /// Canonical trigger label that admits this phase's action (spec §4.7).
    pub fn trigger_label(self) -> &'static str {
        match self {
            Phase::Plan => labels::NEEDS_PLAN,
            Phase::Implementation => labels::READY,
            Phase::Review => labels::REVIEW_REQUESTED,
            Phase::Revise => labels::REQUIRES_CHANGES,
        }
    }

    /// Human pane title used as reconciler identity (spec §3).
    pub fn pane_title(self) -> &'static str {
        match self {
            Phase::Plan => "Plan",
            Phase::Implementation => "Implementation",
            Phase::Review => "Review",
            Phase::Revise => "Revise",
        }
    }

    pub fn all() -> [Phase; 4] {
        [Phase::Plan, Phase::Implementation, Phase::Review, Phase::Revise]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pane_title())
    }
}

/// Canonical window name for a ticket's workspace (spec §3).
pub fn window_name(issue_id: u64) -> String {
    format!("issue-{issue_id}")
}

/// Canonical branch name for a ticket (spec §3).
pub fn branch_name(issue_id: u64) -> String {
    format!("osoba/#{issue_id}")
}

/// Canonical worktree path under the repo root (spec §3).
pub fn worktree_path(repo_root: &std::path::Path, issue_id: u64) -> std::path::PathBuf {
    repo_root
        .join(".git")
        .join("osoba")
        .join("worktrees")
        .join(format!("issue-{issue_id}"))
}

/// Extracts the ticket id embedded in a canonical window/worktree name, e.g.
/// `issue-123` -> `123`. The sweeper uses this to recognize artifacts it owns
/// and must never touch anything it cannot parse an id from (spec §4.10).
pub fn parse_issue_id(name: &str) -> Option<u64> {
    name.strip_prefix("issue-")?.parse().ok()
}
