//! The idempotent "ensure session, window, worktree, pane-for-phase"
//! primitive shared by every phase action (spec §4.6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::Result;
use crate::ports::{Multiplexer, PaneOpts, Worktree};
use crate::ticket::{window_name, Phase};

const RESIZE_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub session_prefix: String,
    pub limit_panes_enabled: bool,
    pub max_panes_per_window: u32,
    pub auto_resize_panes: bool,
    pub split_percentage: u8,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub session: String,
    pub window: String,
    pub worktree_path: PathBuf,
    pub pane_index: u32,
    pub pane_title: String,
}

/// Shared across every reconciliation call for a repo; owns the per-window
/// resize debounce map (spec §4.6 step 5, §5 "shared resources").
pub struct WorkspaceReconciler {
    config: ReconcilerConfig,
    last_resize: Mutex<HashMap<String, Instant>>,
}

impl WorkspaceReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            last_resize: Mutex::new(HashMap::new()),
        }
    }

    pub fn session_name(&self, repo: &str) -> String {
        format!("{}{}", self.config.session_prefix, repo)
    }

    pub async fn prepare_workspace(
        &self,
        multiplexer: &dyn Multiplexer,
        worktree: &dyn Worktree,
        repo: &str,
        repo_root: &Path,
        issue_id: u64,
        phase: Phase,
    ) -> Result<Workspace> {
        let session = self.session_name(repo);
        multiplexer.ensure_session(&session).await?;

        let window = window_name(issue_id);
        let (window, is_new_window) = if multiplexer.window_exists(&session, &window).await? {
            (window, false)
        } else {
            multiplexer.create_window_for_issue(&session, issue_id).await?
        };

        let worktree_path = worktree.ensure_worktree_for_issue(repo_root, issue_id).await?;

        let phase_title = phase.pane_title();
        let pane = if let Some(existing) = multiplexer
            .get_pane_by_title(&session, &window, phase_title)
            .await?
        {
            multiplexer
                .select_pane(&session, &window, existing.index)
                .await?;
            existing
        } else if is_new_window || phase == Phase::Plan {
            let base_index = multiplexer.get_pane_base_index(&session).await?;
            multiplexer
                .set_pane_title(&session, &window, base_index, phase_title)
                .await?;
            crate::ports::PaneInfo {
                index: base_index,
                title: phase_title.to_string(),
                active: true,
            }
        } else {
            let opts = PaneOpts {
                split_horizontal: true,
                percentage: self.config.split_percentage,
                title: phase_title.to_string(),
            };
            multiplexer
                .create_pane(
                    &session,
                    &window,
                    &opts,
                    self.config.limit_panes_enabled,
                    self.config.max_panes_per_window,
                )
                .await?
        };

        self.maybe_resize(multiplexer, &session, &window).await?;

        info!(
            issue_id,
            phase = %phase,
            window = %window,
            pane_index = pane.index,
            "workspace reconciled"
        );

        Ok(Workspace {
            session,
            window,
            worktree_path,
            pane_index: pane.index,
            pane_title: pane.title,
        })
    }

    async fn maybe_resize(
        &self,
        multiplexer: &dyn Multiplexer,
        session: &str,
        window: &str,
    ) -> Result<()> {
        if !self.config.auto_resize_panes {
            return Ok(());
        }

        let key = format!("{session}/{window}");
        let should_resize = {
            let mut last = self.last_resize.lock().expect("resize debounce mutex poisoned");
            let now = Instant::now();
            match last.get(&key) {
                Some(prev) if now.duration_since(*prev) < RESIZE_DEBOUNCE => false,
                _ => {
                    last.insert(key, now);
                    true
                }
            }
        };

        if should_resize {
            multiplexer.resize_panes_evenly(session, window).await?;
        } else {
            debug!(window, "resize debounced");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeMultiplexer;

    #[tokio::test]
    async fn resize_debounce_bounds_calls_within_window() {
        let config = ReconcilerConfig {
            session_prefix: "osoba-".into(),
            limit_panes_enabled: false,
            max_panes_per_window: 3,
            auto_resize_panes: true,
            split_percentage: 50,
        };
        let reconciler = WorkspaceReconciler::new(config);
        let mux = FakeMultiplexer::new();

        reconciler.maybe_resize(&mux, "osoba-repo", "issue-1").await.unwrap();
        reconciler.maybe_resize(&mux, "osoba-repo", "issue-1").await.unwrap();
        reconciler.maybe_resize(&mux, "osoba-repo", "issue-1").await.unwrap();

        assert_eq!(mux.resize_calls("issue-1"), 1);
    }
}
