//! Multiplexer adapter: drives the `tmux` binary via `tokio::process::Command`
//! (spec §4.2). Request/response shape follows the teacher's
//! `supervisor::tmux::run_tmux` helper, extended with pane CRUD and layout
//! queries the orchestrator needs.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use osoba_core::ports::{Multiplexer, PaneInfo, PaneOpts};
use osoba_core::ticket::window_name;

#[derive(Error, Debug)]
pub enum Error {
    #[error("tmux binary not found or failed to spawn: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("tmux command failed: {0}")]
    Command(String),
    #[error("unexpected tmux output: {0}")]
    Parse(String),
}

impl From<Error> for osoba_core::Error {
    fn from(err: Error) -> Self {
        match &err {
            Error::Spawn(_) => osoba_core::Error::ToolUnavailable(err.to_string()),
            Error::Command(_) | Error::Parse(_) => osoba_core::Error::transient(err.to_string()),
        }
    }
}

type Result<T> = std::result::Result<T, osoba_core::Error>;

async fn run_tmux(args: &[&str]) -> std::result::Result<String, Error> {
    let output = Command::new("tmux")
        .args(args)
        .output()
        .await
        .map_err(Error::Spawn)?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(Error::Command(String::from_utf8_lossy(&output.stderr).into_owned()))
    }
}

pub struct TmuxMultiplexer;

impl TmuxMultiplexer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TmuxMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

fn target(session: &str, window: &str) -> String {
    format!("{session}:{window}")
}

fn parse_pane_line(line: &str) -> Option<PaneInfo> {
    let mut parts = line.splitn(3, '\t');
    let index: u32 = parts.next()?.parse().ok()?;
    let title = parts.next()?.to_string();
    let active = parts.next()? == "1";
    Some(PaneInfo { index, title, active })
}

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    async fn session_exists(&self, name: &str) -> Result<bool> {
        Ok(run_tmux(&["has-session", "-t", name]).await.is_ok())
    }

    async fn ensure_session(&self, name: &str) -> Result<()> {
        if self.session_exists(name).await? {
            return Ok(());
        }
        run_tmux(&["new-session", "-d", "-s", name]).await?;
        debug!(session = name, "created tmux session");
        Ok(())
    }

    async fn window_exists(&self, session: &str, name: &str) -> Result<bool> {
        let out = run_tmux(&["list-windows", "-t", session, "-F", "#{window_name}"]).await?;
        Ok(out.lines().any(|line| line == name))
    }

    async fn create_window_for_issue(&self, session: &str, id: u64) -> Result<(String, bool)> {
        let name = window_name(id);
        if self.window_exists(session, &name).await? {
            return Ok((name, false));
        }
        run_tmux(&["new-window", "-t", session, "-n", &name]).await?;
        debug!(session, window = %name, "created tmux window");
        Ok((name, true))
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<String>> {
        let out = run_tmux(&["list-windows", "-t", session, "-F", "#{window_name}"]).await?;
        Ok(out.lines().map(String::from).collect())
    }

    async fn list_panes(&self, session: &str, window: &str) -> Result<Vec<PaneInfo>> {
        let out = run_tmux(&[
            "list-panes",
            "-t",
            &target(session, window),
            "-F",
            "#{pane_index}\t#{pane_title}\t#{pane_active}",
        ])
        .await?;
        Ok(out.lines().filter_map(parse_pane_line).collect())
    }

    async fn get_pane_by_title(
        &self,
        session: &str,
        window: &str,
        title: &str,
    ) -> Result<Option<PaneInfo>> {
        Ok(self
            .list_panes(session, window)
            .await?
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
        if limit_panes_enabled {
            let panes = self.list_panes(session, window).await?;
            if panes.len() as u32 >= max_panes_per_window {
                if let Some(oldest_inactive) = panes.iter().find(|p| !p.active) {
                    self.kill_pane(session, window, oldest_inactive.index).await?;
                } else {
                    warn!(session, window, "pane limit reached with no inactive pane to evict");
                }
            }
        }

        let split_flag = if opts.split_horizontal { "-h" } else { "-v" };
        let percentage = opts.percentage.to_string();
        run_tmux(&[
            "split-window",
            "-t",
            &target(session, window),
            split_flag,
            "-p",
            &percentage,
        ])
        .await?;

        let panes = self.list_panes(session, window).await?;
        let new_pane = panes
            .iter()
            .max_by_key(|p| p.index)
            .copied()
            .ok_or_else(|| Error::Parse("no panes after split-window".into()))?;

        self.set_pane_title(session, window, new_pane.index, &opts.title).await?;

        Ok(PaneInfo {
            index: new_pane.index,
            title: opts.title.clone(),
            active: new_pane.active,
        })
    }

    async fn set_pane_title(&self, session: &str, window: &str, index: u32, title: &str) -> Result<()> {
        run_tmux(&[
            "select-pane",
            "-t",
            &format!("{}.{}", target(session, window), index),
            "-T",
            title,
        ])
        .await?;
        Ok(())
    }

    async fn select_pane(&self, session: &str, window: &str, index: u32) -> Result<()> {
        run_tmux(&[
            "select-pane",
            "-t",
            &format!("{}.{}", target(session, window), index),
        ])
        .await?;
        Ok(())
    }

    async fn kill_pane(&self, session: &str, window: &str, index: u32) -> Result<()> {
        run_tmux(&["kill-pane", "-t", &format!("{}.{}", target(session, window), index)]).await?;
        Ok(())
    }

    async fn kill_window(&self, session: &str, window: &str) -> Result<()> {
        run_tmux(&["kill-window", "-t", &target(session, window)]).await?;
        Ok(())
    }

    async fn get_pane_base_index(&self, _session: &str) -> Result<u32> {
        let out = run_tmux(&["show-options", "-g", "pane-base-index"]).await?;
        let value = out
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| Error::Parse(format!("unexpected pane-base-index output: {out:?}")))?;
        value
            .parse()
            .map_err(|_| Error::Parse(format!("non-numeric pane-base-index: {value:?}")).into())
    }

    async fn resize_panes_evenly(&self, session: &str, window: &str) -> Result<()> {
        run_tmux(&["select-layout", "-t", &target(session, window), "tiled"]).await?;
        Ok(())
    }

    async fn run_in_window(&self, session: &str, window: &str, cmd: &str) -> Result<()> {
        run_tmux(&["send-keys", "-t", &target(session, window), cmd, "Enter"]).await?;
        Ok(())
    }
}
