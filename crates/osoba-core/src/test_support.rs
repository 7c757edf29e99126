//! In-memory fake adapters implementing the port traits, used by this
//! crate's own tests and exported (behind `test-support`) for integration
//! tests that exercise the dispatcher/reconciler end to end without a real
//! ticket tracker, tmux, or git checkout.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::ports::{
    AiLauncher, Clock, Multiplexer, PaneInfo, PaneOpts, PhaseLaunchConfig, PullRequest,
    TemplateVars, TicketSource, Worktree,
};
use crate::ticket::Ticket;

#[derive(Default)]
struct MuxState {
    sessions: HashSet<String>,
    windows: HashMap<String, Vec<String>>,
    panes: HashMap<(String, String), Vec<PaneInfo>>,
    next_pane_index: HashMap<(String, String), u32>,
    resize_calls: HashMap<String, u32>,
    sent_commands: Vec<(String, String, String)>,
    base_index: u32,
}

pub struct FakeMultiplexer {
    state: Mutex<MuxState>,
}

impl FakeMultiplexer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MuxState {
                base_index: 0,
                ..Default::default()
            }),
        }
    }

    pub fn resize_calls(&self, window: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .resize_calls
            .get(window)
            .copied()
            .unwrap_or(0)
    }

    pub fn sent_commands(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().sent_commands.clone()
    }

    pub fn panes_in(&self, session: &str, window: &str) -> Vec<PaneInfo> {
        self.state
            .lock()
            .unwrap()
            .panes
            .get(&(session.to_string(), window.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for FakeMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Multiplexer for FakeMultiplexer {
    async fn session_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().sessions.contains(name))
    }

    async fn ensure_session(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().sessions.insert(name.to_string());
        Ok(())
    }

    async fn window_exists(&self, session: &str, name: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .windows
            .get(session)
            .is_some_and(|ws| ws.iter().any(|w| w == name)))
    }

    async fn create_window_for_issue(&self, session: &str, id: u64) -> Result<(String, bool)> {
        let name = crate::ticket::window_name(id);
        let mut state = self.state.lock().unwrap();
        let windows = state.windows.entry(session.to_string()).or_default();
        if windows.iter().any(|w| w == &name) {
            return Ok((name, false));
        }
        windows.push(name.clone());
        let base = state.base_index;
        state
            .next_pane_index
            .insert((session.to_string(), name.clone()), base + 1);
        Ok((name, true))
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .windows
            .get(session)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_panes(&self, session: &str, window: &str) -> Result<Vec<PaneInfo>> {
        Ok(self.panes_in(session, window))
    }

    async fn get_pane_by_title(
        &self,
        session: &str,
        window: &str,
        title: &str,
    ) -> Result<Option<PaneInfo>> {
        Ok(self
            .panes_in(session, window)
            .into_iter()
            .find(|p| p.title == title))
    }

    async fn create_pane(
        &self,
        session: &str,
        window: &str,
        opts: &PaneOpts,
        limit_panes_enabled: bool,
        max_panes_per_window: u32,
    ) -> Result<PaneInfo> {
        let mut state = self.state.lock().unwrap();
        let key = (session.to_string(), window.to_string());
        let panes = state.panes.entry(key.clone()).or_default();

        if limit_panes_enabled && panes.len() as u32 >= max_panes_per_window {
            if let Some(pos) = panes.iter().position(|p| !p.active) {
                panes.remove(pos);
            }
        }

        let index = *state.next_pane_index.entry(key.clone()).or_insert(0);
        state.next_pane_index.insert(key.clone(), index + 1);

        let pane = PaneInfo {
            index,
            title: opts.title.clone(),
            active: true,
        };
        let panes = state.panes.entry(key).or_default();
        for existing in panes.iter_mut() {
            existing.active = false;
        }
        panes.push(pane);
        Ok(pane)
    }

    async fn set_pane_title(&self, session: &str, window: &str, index: u32, title: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = (session.to_string(), window.to_string());
        let panes = state.panes.entry(key).or_default();
        if let Some(pane) = panes.iter_mut().find(|p| p.index == index) {
            pane.title = title.to_string();
        } else {
            panes.push(PaneInfo {
                index,
                title: title.to_string(),
                active: true,
            });
        }
        Ok(())
    }

    async fn select_pane(&self, session: &str, window: &str, index: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(panes) = state.panes.get_mut(&(session.to_string(), window.to_string())) {
            for pane in panes.iter_mut() {
                pane.active = pane.index == index;
            }
        }
        Ok(())
    }

    async fn kill_pane(&self, session: &str, window: &str, index: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(panes) = state.panes.get_mut(&(session.to_string(), window.to_string())) {
            panes.retain(|p| p.index != index);
        }
        Ok(())
    }

    async fn kill_window(&self, session: &str, window: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(windows) = state.windows.get_mut(session) {
            windows.retain(|w| w != window);
        }
        state.panes.remove(&(session.to_string(), window.to_string()));
        Ok(())
    }

    async fn get_pane_base_index(&self, _session: &str) -> Result<u32> {
        Ok(self.state.lock().unwrap().base_index)
    }

    async fn resize_panes_evenly(&self, _session: &str, window: &str) -> Result<()> {
        *self
            .state
            .lock()
            .unwrap()
            .resize_calls
            .entry(window.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn run_in_window(&self, session: &str, window: &str, cmd: &str) -> Result<()> {
        self.state.lock().unwrap().sent_commands.push((
            session.to_string(),
            window.to_string(),
            cmd.to_string(),
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeWorktree {
    existing: Mutex<HashSet<u64>>,
    deleted_branches: Mutex<HashSet<u64>>,
    pub fail_on: Mutex<HashSet<u64>>,
}

impl FakeWorktree {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Worktree for FakeWorktree {
    async fn ensure_worktree_for_issue(&self, repo_root: &Path, id: u64) -> Result<PathBuf> {
        if self.fail_on.lock().unwrap().contains(&id) {
            return Err(Error::transient("worktree creation failed"));
        }
        self.existing.lock().unwrap().insert(id);
        Ok(crate::ticket::worktree_path(repo_root, id))
    }

    async fn remove_worktree_for_issue(&self, _repo_root: &Path, id: u64) -> Result<()> {
        self.existing.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn worktree_exists_for_issue(&self, _repo_root: &Path, id: u64) -> Result<bool> {
        Ok(self.existing.lock().unwrap().contains(&id))
    }

    async fn update_main_branch(&self, _repo_root: &Path) -> Result<()> {
        Ok(())
    }

    async fn list_worktree_ids(&self, _repo_root: &Path) -> Result<Vec<u64>> {
        Ok(self.existing.lock().unwrap().iter().copied().collect())
    }

    async fn delete_branch_for_issue(&self, _repo_root: &Path, id: u64) -> Result<()> {
        self.deleted_branches.lock().unwrap().insert(id);
        Ok(())
    }
}

impl FakeWorktree {
    pub fn branch_deleted(&self, id: u64) -> bool {
        self.deleted_branches.lock().unwrap().contains(&id)
    }
}

#[derive(Default)]
struct TicketSourceState {
    tickets: HashMap<u64, Ticket>,
    pull_requests: HashMap<u64, PullRequest>,
    comments: Vec<(u64, String)>,
    merge_requests: Vec<u64>,
}

pub struct FakeTicketSource {
    state: Mutex<TicketSourceState>,
}

impl FakeTicketSource {
    pub fn new(tickets: impl IntoIterator<Item = Ticket>) -> Self {
        let mut state = TicketSourceState::default();
        for t in tickets {
            state.tickets.insert(t.id, t);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn link_pull_request(&self, issue_id: u64, pr: PullRequest) {
        self.state.lock().unwrap().pull_requests.insert(issue_id, pr);
    }

    pub fn ticket(&self, id: u64) -> Option<Ticket> {
        self.state.lock().unwrap().tickets.get(&id).cloned()
    }

    pub fn comments_for(&self, id: u64) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .comments
            .iter()
            .filter(|(tid, _)| *tid == id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn merge_requests(&self) -> Vec<u64> {
        self.state.lock().unwrap().merge_requests.clone()
    }
}

#[async_trait]
impl TicketSource for FakeTicketSource {
    async fn list_open_by_labels(&self, labels: &[&str]) -> Result<Vec<Ticket>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tickets
            .values()
            .filter(|t| {
                matches!(t.state, crate::ticket::TicketState::Open)
                    && labels.iter().any(|l| t.has_label(l))
            })
            .cloned()
            .collect())
    }

    async fn list_all_open(&self) -> Result<Vec<Ticket>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tickets
            .values()
            .filter(|t| matches!(t.state, crate::ticket::TicketState::Open))
            .cloned()
            .collect())
    }

    async fn transition_label(&self, id: u64, from: &str, to: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let ticket = state
            .tickets
            .get_mut(&id)
            .ok_or_else(|| Error::invariant(format!("ticket {id} not found")))?;
        ticket.labels.remove(from);
        ticket.labels.insert(to.to_string());
        Ok(())
    }

    async fn add_label(&self, id: u64, label: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(ticket) = state.tickets.get_mut(&id) {
            ticket.labels.insert(label.to_string());
            return Ok(());
        }
        if let Some(pr) = state.pull_requests.values_mut().find(|pr| pr.number == id) {
            if !pr.labels.iter().any(|l| l == label) {
                pr.labels.push(label.to_string());
            }
            return Ok(());
        }
        Err(Error::invariant(format!("ticket {id} not found")))
    }

    // Real issue trackers (e.g. GitHub) share one id space between issues and
    // pull requests, so a label mutation by id may land on either; this fake
    // checks both maps to match that.
    async fn remove_label(&self, id: u64, label: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(ticket) = state.tickets.get_mut(&id) {
            ticket.labels.remove(label);
        }
        if let Some(pr) = state.pull_requests.values_mut().find(|pr| pr.number == id) {
            pr.labels.retain(|l| l != label);
        }
        Ok(())
    }

    async fn comment(&self, id: u64, text: &str) -> Result<()> {
        self.state.lock().unwrap().comments.push((id, text.to_string()));
        Ok(())
    }

    async fn pull_request_for(&self, id: u64) -> Result<Option<PullRequest>> {
        Ok(self.state.lock().unwrap().pull_requests.get(&id).cloned())
    }

    async fn auto_merge_eligible(&self, pr: &PullRequest) -> Result<bool> {
        Ok(pr.labels.iter().any(|l| l == crate::ticket::labels::LGTM)
            && pr.checks_passing
            && pr.mergeable)
    }

    async fn request_merge(&self, pr: &PullRequest) -> Result<()> {
        self.state.lock().unwrap().merge_requests.push(pr.number);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAiLauncher {
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeAiLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AiLauncher for FakeAiLauncher {
    async fn execute_in_pane(
        &self,
        multiplexer: &dyn Multiplexer,
        phase_config: &PhaseLaunchConfig,
        template_vars: &TemplateVars,
        session: &str,
        window: &str,
        workdir: &Path,
    ) -> Result<()> {
        let prompt = template_vars.expand(&phase_config.prompt);
        let cmd = format!(
            "cd {} && claude {} '{}'",
            workdir.display(),
            phase_config.args.join(" "),
            prompt
        );
        self.calls
            .lock()
            .unwrap()
            .push((window.to_string(), cmd.clone()));
        multiplexer.run_in_window(session, window, &cmd).await
    }
}

pub struct FixedClock(pub chrono::DateTime<chrono::Utc>);

impl Clock for FixedClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.0
    }
}
