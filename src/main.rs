//! CLI front end: argument parsing, structured logging setup, config-file
//! discovery, and process wiring for the watcher and cleanup sweeper.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use osoba_config::Config;
use osoba_core::actions::ActionContext;
use osoba_core::phase_state::PhaseStateTable;
use osoba_core::ports::{Multiplexer, SystemClock};
use osoba_core::reconciler::{ReconcilerConfig, WorkspaceReconciler};
use osoba_core::sweeper::{self, SweeperConfig, SweeperContext};
use osoba_core::watcher::{self, WatcherConfig};
use osoba_git::GitWorktree;
use osoba_github::GithubTicketSource;
use osoba_tmux::TmuxMultiplexer;

#[derive(Parser)]
#[command(name = "osoba", about = "Issue-driven tmux/git/AI development orchestrator")]
struct Cli {
    /// Path to the YAML config file. Defaults to `.osoba.yml`/`.osoba.yaml` in the current directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log actions without calling external tools.
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,

    /// Emit structured logs as JSON instead of human-readable text.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// GitHub `owner/repo` slug this instance drives. Defaults to the current directory name.
    #[arg(long, global = true)]
    repo: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Launch the watcher and cleanup sweeper loops.
    Start,
    /// Attach to the tmux session for the configured repo.
    Open,
    /// Invoke the cleanup sweeper on demand.
    Clean {
        /// Restrict cleanup to a single ticket id.
        id: Option<u64>,
        #[arg(long)]
        all: bool,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn repo_slug(cli: &Cli) -> anyhow::Result<(String, String)> {
    let slug = match cli.repo.clone() {
        Some(slug) => slug,
        None => std::env::current_dir()
            .ok()
            .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
            .ok_or_else(|| anyhow::anyhow!("could not determine repo name; pass --repo owner/name"))?,
    };
    let (owner, name) = slug
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("--repo must be in owner/name form, got {slug:?}"))?;
    Ok((owner.to_string(), name.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.downcast_ref::<osoba_core::Error>().is_some_and(is_config_error) => {
            error!(error = %err, "configuration error");
            ExitCode::from(2)
        }
        Err(err) => {
            error!(error = %err, "fatal error");
            ExitCode::FAILURE
        }
    }
}

fn is_config_error(err: &osoba_core::Error) -> bool {
    matches!(err, osoba_core::Error::Configuration(_))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = match cli.config.clone() {
        Some(path) => Some(path),
        None => Config::discover(&std::env::current_dir()?),
    };
    let config = Config::load(config_path.as_deref()).map_err(osoba_core::Error::from)?;

    let (owner, repo_name) = repo_slug(&cli)?;
    let repo_root = std::env::current_dir()?;

    let tickets = GithubTicketSource::with_label_overrides(
        &owner,
        &repo_name,
        osoba_github::LabelOverrides {
            plan: config.github.labels.plan.clone(),
            ready: config.github.labels.ready.clone(),
            review: config.github.labels.review.clone(),
        },
    )?;
    let multiplexer = TmuxMultiplexer::new();
    let worktree = GitWorktree::new();
    let ai = DryRunAwareLauncher::new(cli.dry_run);
    let clock = SystemClock;

    let reconciler = WorkspaceReconciler::new(ReconcilerConfig {
        session_prefix: config.tmux.session_prefix.clone(),
        limit_panes_enabled: config.tmux.limit_panes_enabled,
        max_panes_per_window: config.tmux.max_panes_per_window,
        auto_resize_panes: config.tmux.auto_resize_panes,
        split_percentage: 50,
    });
    let phase_state = PhaseStateTable::new();
    let session = reconciler.session_name(&repo_name);

    let action_ctx = ActionContext {
        tickets: &tickets,
        multiplexer: &multiplexer,
        worktree: &worktree,
        ai: &ai,
        clock: &clock,
        reconciler: &reconciler,
        phase_state: &phase_state,
        repo: &repo_name,
        repo_root: &repo_root,
    };

    match cli.command {
        Command::Start => {
            let phase_configs = config.phase_launch_configs();
            let watcher_config = WatcherConfig {
                poll_interval: config.github.poll_interval,
                auto_merge: config.github.auto_merge_lgtm,
                auto_seed: config.github.auto_plan_issue,
            };
            let sweeper_config = SweeperConfig {
                interval: std::time::Duration::from_secs(config.cleanup.interval_minutes * 60),
            };
            let sweeper_ctx = SweeperContext {
                tickets: &tickets,
                multiplexer: &multiplexer,
                worktree: &worktree,
                phase_state: &phase_state,
                session: &session,
                repo_root: &repo_root,
            };

            let cancellation = CancellationToken::new();
            let shutdown = cancellation.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("received shutdown signal");
                shutdown.cancel();
            });

            info!(session = %session, "starting watcher and cleanup sweeper");

            if config.cleanup.enabled {
                tokio::try_join!(
                    watcher::run_watcher(&action_ctx, &phase_configs, &watcher_config, cancellation.clone()),
                    sweeper::run_sweeper(&sweeper_ctx, &sweeper_config, cancellation.clone()),
                )?;
            } else {
                watcher::run_watcher(&action_ctx, &phase_configs, &watcher_config, cancellation).await?;
            }
            Ok(())
        }
        Command::Open => {
            let status = std::process::Command::new("tmux")
                .args(["attach-session", "-t", &session])
                .status()
                .map_err(|e| anyhow::anyhow!("failed to exec tmux: {e}"))?;
            if !status.success() {
                anyhow::bail!("tmux attach-session exited with {status}");
            }
            Ok(())
        }
        Command::Clean { id, all } => {
            let sweeper_ctx = SweeperContext {
                tickets: &tickets,
                multiplexer: &multiplexer,
                worktree: &worktree,
                phase_state: &phase_state,
                session: &session,
                repo_root: &repo_root,
            };
            if let Some(id) = id {
                info!(issue_id = id, "cleanup requested for single ticket");
            } else if !all {
                anyhow::bail!("clean requires either an id or --all");
            }
            sweeper::run_sweep(&sweeper_ctx).await?;
            Ok(())
        }
    }
}

/// Wraps the real `run_in_window` send so `--dry-run` logs the command that
/// would be sent instead of actually sending it, matching the teacher's
/// `SupervisorConfig::dry_run` convention.
struct DryRunAwareLauncher {
    dry_run: bool,
}

impl DryRunAwareLauncher {
    fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

#[async_trait::async_trait]
impl osoba_core::ports::AiLauncher for DryRunAwareLauncher {
    async fn execute_in_pane(
        &self,
        multiplexer: &dyn osoba_core::ports::Multiplexer,
        phase_config: &osoba_core::ports::PhaseLaunchConfig,
        template_vars: &osoba_core::ports::TemplateVars,
        session: &str,
        window: &str,
        workdir: &std::path::Path,
    ) -> osoba_core::Result<()> {
        let prompt = template_vars.expand(&phase_config.prompt);
        let cmd = format!(
            "cd {} && claude {} '{}'",
            workdir.display(),
            phase_config.args.join(" "),
            prompt
        );
        if self.dry_run {
            info!(session, window, command = %osoba_core::redact::redact(&cmd), "dry-run: would send command");
            return Ok(());
        }
        multiplexer.run_in_window(session, window, &cmd).await
    }
}
