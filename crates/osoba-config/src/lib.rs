//! Configuration schema and loader (spec §6, §9). Loaded from
//! `.osoba.yml`/`.osoba.yaml` in the working directory, falling back to
//! defaults per sub-struct when the file is absent. A present-but-invalid
//! file is a hard error — the process must not start with it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use osoba_core::ports::PhaseLaunchConfig;
use osoba_core::ticket::{labels, Phase};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE_NAMES: &[&str] = &[".osoba.yml", ".osoba.yaml"];

#[derive(Error, Debug)]
pub enum Error {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

impl From<Error> for osoba_core::Error {
    fn from(err: Error) -> Self {
        osoba_core::Error::Configuration(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub github: GithubConfig,
    pub tmux: TmuxConfig,
    pub claude: ClaudeConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GithubConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub labels: GithubLabelOverrides,
    pub messages: GithubMessages,
    pub auto_merge_lgtm: bool,
    pub auto_plan_issue: bool,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            poll_interval: osoba_core::watcher::DEFAULT_POLL_INTERVAL,
            labels: GithubLabelOverrides::default(),
            messages: GithubMessages::default(),
            auto_merge_lgtm: false,
            auto_plan_issue: false,
        }
    }
}

/// Overrides for the trigger labels that admit Plan, Implementation, and
/// Review. `requires-changes` (Revise's trigger) is not overridable: it is
/// also the label the Review action's rejection path writes, so letting it
/// drift from the built-in constant would break that round trip.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct GithubLabelOverrides {
    pub plan: Option<String>,
    pub ready: Option<String>,
    pub review: Option<String>,
}

impl GithubLabelOverrides {
    pub fn plan_label(&self) -> &str {
        self.plan.as_deref().unwrap_or(labels::NEEDS_PLAN)
    }

    pub fn ready_label(&self) -> &str {
        self.ready.as_deref().unwrap_or(labels::READY)
    }

    pub fn review_label(&self) -> &str {
        self.review.as_deref().unwrap_or(labels::REVIEW_REQUESTED)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct GithubMessages {
    pub plan: Option<String>,
    pub implement: Option<String>,
    pub review: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TmuxConfig {
    pub session_prefix: String,
    pub limit_panes_enabled: bool,
    pub max_panes_per_window: u32,
    pub auto_resize_panes: bool,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            session_prefix: "osoba-".to_string(),
            limit_panes_enabled: false,
            max_panes_per_window: 3,
            auto_resize_panes: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ClaudeConfig {
    pub phases: ClaudePhases,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClaudePhases {
    pub plan: PhaseSpec,
    pub implement: PhaseSpec,
    pub review: PhaseSpec,
    pub revise: PhaseSpec,
}

impl Default for ClaudePhases {
    fn default() -> Self {
        Self {
            plan: PhaseSpec {
                args: vec!["--dangerously-skip-permissions".into()],
                prompt: "/osoba:plan {{issue-number}}".into(),
            },
            implement: PhaseSpec {
                args: vec!["--dangerously-skip-permissions".into()],
                prompt: "/osoba:implement {{issue-number}}".into(),
            },
            review: PhaseSpec {
                args: vec!["--dangerously-skip-permissions".into()],
                prompt: "/osoba:review {{issue-number}}".into(),
            },
            revise: PhaseSpec {
                args: vec!["--dangerously-skip-permissions".into()],
                prompt: "/osoba:revise {{issue-number}}".into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct PhaseSpec {
    pub args: Vec<String>,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 5,
        }
    }
}

impl Config {
    /// Looks for `.osoba.yml` then `.osoba.yaml` under `dir`, in that order.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Loads and validates the config at `path`, or returns built-in
    /// defaults if `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                let config: Config = serde_yaml::from_str(&raw).map_err(|source| Error::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
                tracing::info!(path = %path.display(), "loaded configuration");
                config
            }
            None => {
                tracing::info!("no configuration file found, using defaults");
                Config::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if !(1..=60).contains(&self.cleanup.interval_minutes) {
            return Err(Error::Invalid(format!(
                "cleanup.interval_minutes must be in 1..=60, got {}",
                self.cleanup.interval_minutes
            )));
        }
        if self.tmux.max_panes_per_window == 0 {
            return Err(Error::Invalid(
                "tmux.max_panes_per_window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the per-phase launch configuration the dispatcher needs,
    /// merging the configured prompt/args with the configured entry message.
    pub fn phase_launch_configs(&self) -> HashMap<Phase, PhaseLaunchConfig> {
        let phases = &self.claude.phases;
        let messages = &self.github.messages;
        HashMap::from([
            (
                Phase::Plan,
                PhaseLaunchConfig {
                    args: phases.plan.args.clone(),
                    prompt: phases.plan.prompt.clone(),
                    entry_message: messages.plan.clone(),
                },
            ),
            (
                Phase::Implementation,
                PhaseLaunchConfig {
                    args: phases.implement.args.clone(),
                    prompt: phases.implement.prompt.clone(),
                    entry_message: messages.implement.clone(),
                },
            ),
            (
                Phase::Review,
                PhaseLaunchConfig {
                    args: phases.review.args.clone(),
                    prompt: phases.review.prompt.clone(),
                    entry_message: messages.review.clone(),
                },
            ),
            (
                Phase::Revise,
                PhaseLaunchConfig {
                    args: phases.revise.args.clone(),
                    prompt: phases.revise.prompt.clone(),
                    entry_message: None,
                },
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.tmux.session_prefix, "osoba-");
        assert_eq!(config.cleanup.interval_minutes, 5);
    }

    #[test]
    fn parses_duration_and_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "github:\n  poll_interval: 30s\n  auto_merge_lgtm: true\ncleanup:\n  interval_minutes: 10\n"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.github.poll_interval, Duration::from_secs(30));
        assert!(config.github.auto_merge_lgtm);
        assert_eq!(config.cleanup.interval_minutes, 10);
    }

    #[test]
    fn out_of_range_cleanup_interval_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cleanup:\n  interval_minutes: 90\n").unwrap();

        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn unknown_key_is_a_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "nonsense: true\n").unwrap();

        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn discover_prefers_yml_over_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".osoba.yml"), "").unwrap();
        std::fs::write(dir.path().join(".osoba.yaml"), "").unwrap();
        assert_eq!(Config::discover(dir.path()), Some(dir.path().join(".osoba.yml")));
    }
}
