//! The external-collaborator interfaces the core depends on (spec §1, §4,
//! §6). Each is a trait so the watcher/dispatcher/reconciler can be exercised
//! against in-memory fakes in tests without touching a real ticket tracker,
//! terminal multiplexer, or git checkout.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::ticket::Ticket;

#[derive(Debug, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub labels: Vec<String>,
    pub checks_passing: bool,
    pub mergeable: bool,
}

/// Ticket-source client (spec §4.1).
#[async_trait]
pub trait TicketSource: Send + Sync {
    async fn list_open_by_labels(&self, labels: &[&str]) -> Result<Vec<Ticket>>;
    async fn list_all_open(&self) -> Result<Vec<Ticket>>;
    async fn transition_label(&self, id: u64, from: &str, to: &str) -> Result<()>;
    async fn add_label(&self, id: u64, label: &str) -> Result<()>;
    async fn remove_label(&self, id: u64, label: &str) -> Result<()>;
    async fn comment(&self, id: u64, text: &str) -> Result<()>;
    async fn pull_request_for(&self, id: u64) -> Result<Option<PullRequest>>;
    async fn auto_merge_eligible(&self, pr: &PullRequest) -> Result<bool>;
    async fn request_merge(&self, pr: &PullRequest) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneInfo {
    pub index: u32,
    pub title: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct PaneOpts {
    pub split_horizontal: bool,
    pub percentage: u8,
    pub title: String,
}

/// Terminal-multiplexer driver (spec §4.2).
#[async_trait]
pub trait Multiplexer: Send + Sync {
    async fn session_exists(&self, name: &str) -> Result<bool>;
    async fn ensure_session(&self, name: &str) -> Result<()>;
    async fn window_exists(&self, session: &str, name: &str) -> Result<bool>;
    /// Returns the window name and whether it was newly created.
    async fn create_window_for_issue(&self, session: &str, id: u64) -> Result<(String, bool)>;
    /// Lists every window currently open in `session`, used by the cleanup
    /// sweeper to find artifacts with no corresponding active ticket.
    async fn list_windows(&self, session: &str) -> Result<Vec<String>>;
    async fn list_panes(&self, session: &str, window: &str) -> Result<Vec<PaneInfo>>;
    async fn get_pane_by_title(
        &self,
        session: &str,
        window: &str,
        title: &str,
    ) -> Result<Option<PaneInfo>>;
    async fn create_pane(
        &self,
        session: &str,
        window: &str,
        opts: &PaneOpts,
        limit_panes_enabled: bool,
        max_panes_per_window: u32,
    ) -> Result<PaneInfo>;
    async fn set_pane_title(&self, session: &str, window: &str, index: u32, title: &str) -> Result<()>;
    async fn select_pane(&self, session: &str, window: &str, index: u32) -> Result<()>;
    async fn kill_pane(&self, session: &str, window: &str, index: u32) -> Result<()>;
    async fn kill_window(&self, session: &str, window: &str) -> Result<()>;
    async fn get_pane_base_index(&self, session: &str) -> Result<u32>;
    async fn resize_panes_evenly(&self, session: &str, window: &str) -> Result<()>;
    /// Sends `cmd` followed by a carriage return to the focused pane of `window`.
    async fn run_in_window(&self, session: &str, window: &str, cmd: &str) -> Result<()>;
}

/// Version-control driver (spec §4.3).
#[async_trait]
pub trait Worktree: Send + Sync {
    async fn ensure_worktree_for_issue(&self, repo_root: &Path, id: u64) -> Result<std::path::PathBuf>;
    async fn remove_worktree_for_issue(&self, repo_root: &Path, id: u64) -> Result<()>;
    async fn worktree_exists_for_issue(&self, repo_root: &Path, id: u64) -> Result<bool>;
    async fn update_main_branch(&self, repo_root: &Path) -> Result<()>;
    /// Ticket ids of every worktree this driver currently owns under
    /// `repo_root`, used by the cleanup sweeper.
    async fn list_worktree_ids(&self, repo_root: &Path) -> Result<Vec<u64>>;
    /// Deletes the branch associated with a ticket's worktree, if present.
    async fn delete_branch_for_issue(&self, repo_root: &Path, id: u64) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PhaseLaunchConfig {
    pub args: Vec<String>,
    pub prompt: String,
    /// Comment posted on the ticket when this phase is entered (§6
    /// `github.messages.*`), if configured.
    pub entry_message: Option<String>,
}

/// AI-assistant launcher (spec §4.4).
#[async_trait]
pub trait AiLauncher: Send + Sync {
    async fn execute_in_pane(
        &self,
        multiplexer: &dyn Multiplexer,
        phase_config: &PhaseLaunchConfig,
        template_vars: &TemplateVars,
        session: &str,
        window: &str,
        workdir: &Path,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct TemplateVars {
    pub issue_number: u64,
    pub issue_title: String,
    pub repo_name: String,
}

impl TemplateVars {
    /// Substitutes `{{issue-number}}`, `{{issue-title}}`, `{{repo-name}}`
    /// verbatim (spec §4.4).
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{{issue-number}}", &self.issue_number.to_string())
            .replace("{{issue-title}}", &self.issue_title)
            .replace("{{repo-name}}", &self.repo_name)
    }
}

/// Wall-clock source, mockable in tests (grounded on a clock port pattern
/// common to schedulers that must not call `Utc::now()` directly).
pub trait Clock: Send + Sync {
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}
