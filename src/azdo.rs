use crate::config::{Config, FetchPolicy};
use crate::error::FetchError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rayon::prelude::*;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const API_BASE: &str = "https://dev.azure.com";
const API_VERSION: &str = "6.0";
/// Azure DevOps ignores the user part of a PAT basic-auth pair.
const BASIC_AUTH_USER: &str = "any";

/// Everything needed to request one repository's pull requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSpec {
    pub organization: String,
    pub project_id: String,
    pub repository_id: String,
    pub credential: String,
}

/// The configured reviewer's vote on a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Approved,
    ApprovedWithSuggestions,
    NoVote,
    WaitingForAuthor,
    Rejected,
}

impl Vote {
    /// Unknown values are treated as no vote.
    pub fn from_api(value: i64) -> Self {
        match value {
            10 => Self::Approved,
            5 => Self::ApprovedWithSuggestions,
            -5 => Self::WaitingForAuthor,
            -10 => Self::Rejected,
            _ => Self::NoVote,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Approved => "✓",
            Self::ApprovedWithSuggestions => "✓✍",
            Self::NoVote => "",
            Self::WaitingForAuthor => "⌛",
            Self::Rejected => "✗",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestStatus {
    Active,
    Completed,
    Abandoned,
    Draft,
    Other(String),
}

impl PullRequestStatus {
    fn parse(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "completed" => Self::Completed,
            "abandoned" => Self::Abandoned,
            "draft" => Self::Draft,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRecord {
    pub id: u64,
    pub title: String,
    pub status: PullRequestStatus,
    pub merge_status: String,
    pub source_branch: String,
    pub created_by: String,
    pub is_draft: bool,
    pub repository_id: String,
    pub repository_name: String,
    pub is_required_reviewer: bool,
    pub vote: Vote,
}

impl PullRequestRecord {
    pub fn branch_name(&self) -> &str {
        self.source_branch
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.source_branch)
    }

    /// Repository name, or its id when the response carried no name.
    pub fn repository_label(&self) -> &str {
        if self.repository_name.is_empty() {
            &self.repository_id
        } else {
            &self.repository_name
        }
    }
}

/// Combined result of a multi-repository fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequests {
    pub records: Vec<PullRequestRecord>,
    pub total_count: usize,
    /// Repositories that failed under [`FetchPolicy::Partial`].
    pub failures: Vec<FetchError>,
}

pub trait RemoteDataSource: Send + Sync {
    fn fetch_pull_requests(&self, specs: &[FetchSpec]) -> Result<PullRequests, FetchError>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    Status { status: u16, body: String },
    Transport(String),
}

pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str, authorization: &str) -> Result<String, HttpFailure>;
}

struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl HttpClient for UreqClient {
    fn get(&self, url: &str, authorization: &str) -> Result<String, HttpFailure> {
        match self.agent.get(url).set("Authorization", authorization).call() {
            Ok(response) => response
                .into_string()
                .map_err(|e| HttpFailure::Transport(format!("reading body: {e}"))),
            Err(ureq::Error::Status(status, response)) => Err(HttpFailure::Status {
                status,
                body: response.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(e)) => Err(HttpFailure::Transport(e.to_string())),
        }
    }
}

pub fn basic_auth_header(token: &str) -> String {
    let encoded = STANDARD.encode(format!("{BASIC_AUTH_USER}:{token}"));
    format!("Basic {encoded}")
}

pub fn pull_requests_url(spec: &FetchSpec) -> String {
    format!(
        "{API_BASE}/{}/{}/_apis/git/repositories/{}/pullrequests?api-version={API_VERSION}",
        spec.organization, spec.project_id, spec.repository_id
    )
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FetchPrResponse {
    #[serde(default)]
    value: Vec<PullRequestResponse>,
}

/// Missing fields decode to their zero values; only malformed JSON fails.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PullRequestResponse {
    repository: RepositoryResponse,
    pull_request_id: u64,
    title: String,
    status: String,
    is_draft: bool,
    created_by: UserResponse,
    reviewers: Vec<ReviewerResponse>,
    source_ref_name: String,
    merge_status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RepositoryResponse {
    id: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UserResponse {
    display_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ReviewerResponse {
    display_name: String,
    unique_name: String,
    vote: i64,
    is_required: bool,
}

impl ReviewerResponse {
    fn is(&self, identity: &str) -> bool {
        self.unique_name.eq_ignore_ascii_case(identity)
            || self.display_name.eq_ignore_ascii_case(identity)
    }
}

fn shape(response: FetchPrResponse, reviewer: Option<&str>) -> Vec<PullRequestRecord> {
    response
        .value
        .into_iter()
        .map(|pr| {
            let me = reviewer.and_then(|identity| pr.reviewers.iter().find(|r| r.is(identity)));
            PullRequestRecord {
                id: pr.pull_request_id,
                title: pr.title,
                status: PullRequestStatus::parse(&pr.status),
                merge_status: pr.merge_status,
                source_branch: pr.source_ref_name,
                created_by: pr.created_by.display_name,
                is_draft: pr.is_draft,
                repository_id: pr.repository.id,
                repository_name: pr.repository.name,
                is_required_reviewer: me.is_some_and(|r| r.is_required),
                vote: me.map_or(Vote::NoVote, |r| Vote::from_api(r.vote)),
            }
        })
        .collect()
}

/// Merges per-repository results, in configuration order, under `policy`.
fn combine(
    results: Vec<Result<Vec<PullRequestRecord>, FetchError>>,
    policy: FetchPolicy,
) -> Result<PullRequests, FetchError> {
    let mut records = Vec::new();
    let mut failures = Vec::new();
    let attempted = results.len();

    for result in results {
        match result {
            Ok(repo_records) => records.extend(repo_records),
            Err(err) if policy == FetchPolicy::AllOrNothing => return Err(err),
            Err(err) => {
                warn!(repository = err.repository(), error = %err, "repository fetch failed");
                failures.push(err);
            }
        }
    }

    if attempted > 0 && failures.len() == attempted {
        return Err(failures.swap_remove(0));
    }

    let total_count = records.len();
    Ok(PullRequests {
        records,
        total_count,
        failures,
    })
}

/// Azure DevOps REST implementation of [`RemoteDataSource`].
pub struct AzureDevOpsSource {
    client: Box<dyn HttpClient>,
    reviewer: Option<String>,
    policy: FetchPolicy,
}

impl AzureDevOpsSource {
    pub fn new(config: &Config) -> Self {
        Self::with_client(
            Box::new(UreqClient::new(config.request_timeout())),
            config.reviewer.clone(),
            config.fetch_policy,
        )
    }

    pub fn with_client(
        client: Box<dyn HttpClient>,
        reviewer: Option<String>,
        policy: FetchPolicy,
    ) -> Self {
        Self {
            client,
            reviewer,
            policy,
        }
    }

    fn fetch_repository(&self, spec: &FetchSpec) -> Result<Vec<PullRequestRecord>, FetchError> {
        let url = pull_requests_url(spec);
        debug!(%url, "fetching pull requests");
        let repository = spec.repository_id.clone();

        let body = self
            .client
            .get(&url, &basic_auth_header(&spec.credential))
            .map_err(|failure| match failure {
                HttpFailure::Status { status, body } => FetchError::Status {
                    repository: repository.clone(),
                    status,
                    body,
                },
                HttpFailure::Transport(message) => FetchError::Transport {
                    repository: repository.clone(),
                    message,
                },
            })?;

        let response: FetchPrResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode {
                repository: repository.clone(),
                message: e.to_string(),
            })?;

        Ok(shape(response, self.reviewer.as_deref()))
    }
}

impl RemoteDataSource for AzureDevOpsSource {
    fn fetch_pull_requests(&self, specs: &[FetchSpec]) -> Result<PullRequests, FetchError> {
        let results: Vec<_> = specs
            .par_iter()
            .map(|spec| self.fetch_repository(spec))
            .collect();
        combine(results, self.policy)
    }
}
