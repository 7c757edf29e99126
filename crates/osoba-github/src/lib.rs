//! Ticket-source adapter: GitHub issues and pull requests via `octocrab`
//! (spec §4.1). `GITHUB_TOKEN` is read from the environment at client
//! construction time (spec §6).

use std::sync::OnceLock;

use async_trait::async_trait;
use octocrab::models::IssueState;
use octocrab::params;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use osoba_core::ports::{PullRequest, TicketSource};
use osoba_core::ticket::{labels, Ticket, TicketState};

#[derive(Error, Debug)]
pub enum Error {
    #[error("GITHUB_TOKEN is not set")]
    MissingToken,
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),
}

impl From<Error> for osoba_core::Error {
    fn from(err: Error) -> Self {
        match &err {
            Error::MissingToken => osoba_core::Error::Configuration(err.to_string()),
            Error::Api(_) => osoba_core::Error::transient(err.to_string()),
        }
    }
}

type Result<T> = std::result::Result<T, osoba_core::Error>;

/// Bounded exponential backoff applied to transient GitHub errors (5xx,
/// secondary rate limit) before surfacing to the caller (§ ticket-source
/// adapter expansion).
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 250;

/// Overrides for the GitHub-visible spelling of the Plan/Implement/Review
/// trigger labels (§6 `github.labels.*`). The core's own label vocabulary
/// (`osoba_core::ticket::labels`) stays fixed; this adapter is the only
/// place that knows a repository might call `status:needs-plan` something
/// else on the wire.
#[derive(Debug, Clone, Default)]
pub struct LabelOverrides {
    pub plan: Option<String>,
    pub ready: Option<String>,
    pub review: Option<String>,
}

pub struct GithubTicketSource {
    client: octocrab::Octocrab,
    owner: String,
    repo: String,
    canonical_to_external: std::collections::HashMap<&'static str, String>,
    external_to_canonical: std::collections::HashMap<String, &'static str>,
}

impl GithubTicketSource {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Result<Self> {
        Self::with_label_overrides(owner, repo, LabelOverrides::default())
    }

    pub fn with_label_overrides(
        owner: impl Into<String>,
        repo: impl Into<String>,
        overrides: LabelOverrides,
    ) -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN").map_err(|_| Error::MissingToken)?;
        let client = octocrab::Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(Error::Api)?;

        let mut canonical_to_external = std::collections::HashMap::new();
        let mut external_to_canonical = std::collections::HashMap::new();
        for (canonical, external) in [
            (labels::NEEDS_PLAN, overrides.plan),
            (labels::READY, overrides.ready),
            (labels::REVIEW_REQUESTED, overrides.review),
        ] {
            if let Some(external) = external {
                external_to_canonical.insert(external.clone(), canonical);
                canonical_to_external.insert(canonical, external);
            }
        }

        Ok(Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
            canonical_to_external,
            external_to_canonical,
        })
    }

    /// Maps a canonical core label to the string this repository actually
    /// uses on GitHub, if overridden.
    fn to_external<'a>(&'a self, label: &'a str) -> &'a str {
        self.canonical_to_external
            .get(label)
            .map(String::as_str)
            .unwrap_or(label)
    }

    /// Maps a label string observed on GitHub back to the core's canonical
    /// vocabulary, if it matches a configured override.
    fn to_canonical(&self, label: &str) -> String {
        self.external_to_canonical
            .get(label)
            .map(|s| s.to_string())
            .unwrap_or_else(|| label.to_string())
    }

    async fn retry<T, F, Fut>(&self, mut op: F) -> std::result::Result<T, octocrab::Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, octocrab::Error>>,
    {
        let mut delay = std::time::Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut last_err = None;
        for attempt in 0..RETRY_ATTEMPTS {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < RETRY_ATTEMPTS && is_transient(&err) => {
                    warn!(attempt, error = %err, "retrying transient GitHub error");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }

    async fn all_open_issues(&self) -> std::result::Result<Vec<octocrab::models::issues::Issue>, octocrab::Error> {
        let mut page = self
            .retry(|| {
                self.client
                    .issues(&self.owner, &self.repo)
                    .list()
                    .state(params::State::Open)
                    .per_page(100)
                    .send()
            })
            .await?;

        let mut all = page.take_items();
        while let Some(next) = self.client.get_page(&page.next).await? {
            page = next;
            all.extend(page.take_items());
        }
        Ok(all)
    }

    fn to_ticket(&self, issue: &octocrab::models::issues::Issue) -> Ticket {
        Ticket {
            id: issue.number,
            title: issue.title.clone(),
            labels: issue
                .labels
                .iter()
                .map(|l| self.to_canonical(&l.name))
                .collect(),
            state: match issue.state {
                IssueState::Open => TicketState::Open,
                _ => TicketState::Closed,
            },
        }
    }
}

fn is_transient(err: &octocrab::Error) -> bool {
    matches!(
        err,
        octocrab::Error::GitHub { source, .. }
            if source.status_code.is_server_error() || source.status_code.as_u16() == 403
    )
}

fn cross_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(closes|fixes|resolves)\s+#(\d+)\b").expect("valid regex")
    })
}

#[async_trait]
impl TicketSource for GithubTicketSource {
    async fn list_open_by_labels(&self, labels: &[&str]) -> Result<Vec<Ticket>> {
        let issues = self.all_open_issues().await.map_err(Error::Api)?;
        Ok(issues
            .iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(|issue| self.to_ticket(issue))
            .filter(|ticket| labels.iter().any(|l| ticket.has_label(l)))
            .collect())
    }

    async fn list_all_open(&self) -> Result<Vec<Ticket>> {
        let issues = self.all_open_issues().await.map_err(Error::Api)?;
        Ok(issues
            .iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(|issue| self.to_ticket(issue))
            .collect())
    }

    async fn transition_label(&self, id: u64, from: &str, to: &str) -> Result<()> {
        self.remove_label(id, from).await?;
        self.add_label(id, to).await?;
        Ok(())
    }

    async fn add_label(&self, id: u64, label: &str) -> Result<()> {
        let external = self.to_external(label).to_string();
        self.retry(|| {
            self.client
                .issues(&self.owner, &self.repo)
                .add_labels(id, &[external.clone()])
        })
        .await
        .map_err(Error::Api)?;
        Ok(())
    }

    async fn remove_label(&self, id: u64, label: &str) -> Result<()> {
        let external = self.to_external(label);
        let result = self
            .retry(|| self.client.issues(&self.owner, &self.repo).remove_label(id, external))
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code.as_u16() == 404 => {
                debug!(issue_id = id, label, "label already absent, treating as success");
                Ok(())
            }
            Err(err) => Err(Error::Api(err).into()),
        }
    }

    async fn comment(&self, id: u64, text: &str) -> Result<()> {
        self.retry(|| self.client.issues(&self.owner, &self.repo).create_comment(id, text))
            .await
            .map_err(Error::Api)?;
        Ok(())
    }

    async fn pull_request_for(&self, id: u64) -> Result<Option<PullRequest>> {
        let open_prs = self
            .retry(|| {
                self.client
                    .pulls(&self.owner, &self.repo)
                    .list()
                    .state(params::State::Open)
                    .per_page(100)
                    .send()
            })
            .await
            .map_err(Error::Api)?;

        let pattern = cross_reference_pattern();
        let matched = open_prs.items.into_iter().find(|pr| {
            pr.body.as_deref().is_some_and(|body| {
                pattern
                    .captures_iter(body)
                    .any(|cap| cap.get(2).and_then(|m| m.as_str().parse::<u64>().ok()) == Some(id))
            })
        });

        let Some(pr) = matched else {
            return Ok(None);
        };

        let issue = self
            .retry(|| self.client.issues(&self.owner, &self.repo).get(pr.number))
            .await
            .map_err(Error::Api)?;

        // GitHub's combined `mergeable_state` already folds in required status
        // checks and branch-protection review rules; "clean" is the only
        // value that means both "mergeable" and "checks passing".
        let checks_passing = pr.mergeable_state.as_deref() == Some("clean");

        Ok(Some(PullRequest {
            number: pr.number,
            labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
            checks_passing,
            mergeable: pr.mergeable.unwrap_or(false),
        }))
    }

    async fn auto_merge_eligible(&self, pr: &PullRequest) -> Result<bool> {
        Ok(pr.labels.iter().any(|l| l == labels::LGTM) && pr.checks_passing && pr.mergeable)
    }

    async fn request_merge(&self, pr: &PullRequest) -> Result<()> {
        self.retry(|| {
            self.client
                .pulls(&self.owner, &self.repo)
                .merge(pr.number)
                .method(params::pulls::MergeMethod::Squash)
                .send()
        })
        .await
        .map_err(Error::Api)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_reference_pattern_matches_closes_and_fixes() {
        let pattern = cross_reference_pattern();
        assert!(pattern.is_match("This PR closes #42"));
        assert!(pattern.is_match("Fixes #7 and adds tests"));
        assert!(!pattern.is_match("see issue 42 for context"));
    }

    #[test]
    fn missing_token_is_a_configuration_error() {
        std::env::remove_var("GITHUB_TOKEN");
        let err = GithubTicketSource::new("acme", "widgets").unwrap_err();
        assert!(matches!(err, osoba_core::Error::Configuration(_)));
    }
}
