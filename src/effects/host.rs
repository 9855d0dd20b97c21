//! Host API effect types.
//!
//! These describe the GitHub calls the reviewer makes, without executing them.
//! The fetcher and publisher build effects; an interpreter runs them. Effects
//! are scoped by a [`HostScope`] passed alongside, so they carry no repository
//! or installation themselves.

use serde::{Deserialize, Serialize};

use crate::types::{InstallationId, PrNumber, RepoId, Sha, Verdict};

/// The repository and installation an effect runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostScope {
    pub repo: RepoId,
    pub installation: InstallationId,
}

/// A host API effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEffect {
    // ─── Diffs ────────────────────────────────────────────────────────────────
    /// One page of the files changed by a pull request.
    ListPullRequestFiles {
        pr: PrNumber,
        page: u32,
        per_page: u32,
    },

    /// One page of the files changed between two commits.
    CompareCommits {
        base: Sha,
        head: Sha,
        page: u32,
        per_page: u32,
    },

    /// One page of the files changed by a single commit. Used when a push
    /// creates a branch and there is no base to compare against.
    GetCommit { sha: Sha, page: u32, per_page: u32 },

    // ─── Reviews ──────────────────────────────────────────────────────────────
    /// All reviews on a pull request.
    ListReviews { pr: PrNumber },

    /// Submit a new review with inline comments.
    CreateReview { pr: PrNumber, review: NewReview },

    /// Replace the body of an existing review.
    UpdateReview {
        pr: PrNumber,
        review_id: u64,
        body: String,
    },

    // ─── Check runs ───────────────────────────────────────────────────────────
    /// Check runs on a commit with the given name.
    ListCheckRuns { head_sha: Sha, name: String },

    /// Create a completed check run.
    CreateCheckRun { head_sha: Sha, output: CheckRunOutput },

    /// Overwrite an existing check run's conclusion and output.
    UpdateCheckRun {
        check_run_id: u64,
        output: CheckRunOutput,
    },
}

impl HostEffect {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            HostEffect::ListPullRequestFiles { .. } => "list_pull_request_files",
            HostEffect::CompareCommits { .. } => "compare_commits",
            HostEffect::GetCommit { .. } => "get_commit",
            HostEffect::ListReviews { .. } => "list_reviews",
            HostEffect::CreateReview { .. } => "create_review",
            HostEffect::UpdateReview { .. } => "update_review",
            HostEffect::ListCheckRuns { .. } => "list_check_runs",
            HostEffect::CreateCheckRun { .. } => "create_check_run",
            HostEffect::UpdateCheckRun { .. } => "update_check_run",
        }
    }

    /// True for effects that change host state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            HostEffect::CreateReview { .. }
                | HostEffect::UpdateReview { .. }
                | HostEffect::CreateCheckRun { .. }
                | HostEffect::UpdateCheckRun { .. }
        )
    }
}

/// The review event submitted with a new review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewAction {
    Approve,
    Comment,
    RequestChanges,
}

impl ReviewAction {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "APPROVE",
            ReviewAction::Comment => "COMMENT",
            ReviewAction::RequestChanges => "REQUEST_CHANGES",
        }
    }
}

impl From<Verdict> for ReviewAction {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Approve => ReviewAction::Approve,
            Verdict::Comment => ReviewAction::Comment,
            Verdict::RequestChanges => ReviewAction::RequestChanges,
        }
    }
}

/// An inline comment on the new side of the diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineComment {
    pub path: String,
    pub line: u32,
    pub body: String,
}

/// A review to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReview {
    pub commit_sha: Sha,
    pub body: String,
    pub action: ReviewAction,
    pub comments: Vec<InlineComment>,
}

/// Conclusion of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Neutral,
    Failure,
}

impl CheckConclusion {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            CheckConclusion::Success => "success",
            CheckConclusion::Neutral => "neutral",
            CheckConclusion::Failure => "failure",
        }
    }
}

/// Annotation severity on a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationLevel {
    Notice,
    Warning,
    Failure,
}

impl AnnotationLevel {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            AnnotationLevel::Notice => "notice",
            AnnotationLevel::Warning => "warning",
            AnnotationLevel::Failure => "failure",
        }
    }
}

/// A line annotation attached to a check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub level: AnnotationLevel,
    pub title: String,
    pub message: String,
}

/// Everything written to a check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunOutput {
    pub name: String,
    pub conclusion: CheckConclusion,
    pub title: String,
    pub summary: String,
    pub annotations: Vec<Annotation>,
}

// ─── Response Types ───────────────────────────────────────────────────────────

/// A changed file as listed by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub status: String,
    pub additions: u32,
    pub deletions: u32,
    /// Unified diff text. Absent for binary files and very large diffs.
    pub patch: Option<String>,
}

/// One page of changed files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePage {
    pub files: Vec<ChangedFile>,
    /// Whether the host advertised a following page.
    pub has_next: bool,
}

/// An existing pull request review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewData {
    pub id: u64,
    pub body: String,
    /// Login of the review's author. Empty for deleted accounts.
    pub author: String,
}

/// An existing check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunData {
    pub id: u64,
    pub name: String,
    /// The GitHub App that created the run, if any.
    pub app_id: Option<u64>,
}

/// Who the reviewer publishes as.
///
/// An App posts reviews as its bot user, `<slug>[bot]`, and owns the check
/// runs it creates. Only artifacts matching this identity are ever updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    pub app_id: u64,
    pub slug: String,
}

impl AppIdentity {
    pub fn new(app_id: u64, slug: impl Into<String>) -> Self {
        AppIdentity {
            app_id,
            slug: slug.into(),
        }
    }

    pub fn bot_login(&self) -> String {
        format!("{}[bot]", self.slug)
    }

    pub fn authored(&self, review: &ReviewData) -> bool {
        review.author == self.bot_login()
    }

    pub fn owns(&self, run: &CheckRunData) -> bool {
        run.app_id == Some(self.app_id)
    }
}

/// Response from a host effect.
///
/// Each variant corresponds to the response from a particular effect type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HostResponse {
    /// Response to `ListPullRequestFiles`, `CompareCommits` and `GetCommit`.
    FilePage(FilePage),

    /// Response to `ListReviews`.
    Reviews(Vec<ReviewData>),

    /// Response to `CreateReview` and `UpdateReview`.
    Review(ReviewData),

    /// Response to `ListCheckRuns`.
    CheckRuns(Vec<CheckRunData>),

    /// Response to `CreateCheckRun` and `UpdateCheckRun`.
    CheckRun(CheckRunData),
}

impl HostResponse {
    /// Variant name for "unexpected response" errors.
    pub fn kind(&self) -> &'static str {
        match self {
            HostResponse::FilePage(_) => "file_page",
            HostResponse::Reviews(_) => "reviews",
            HostResponse::Review(_) => "review",
            HostResponse::CheckRuns(_) => "check_runs",
            HostResponse::CheckRun(_) => "check_run",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_action_follows_verdict() {
        assert_eq!(
            ReviewAction::from(Verdict::RequestChanges).as_api_str(),
            "REQUEST_CHANGES"
        );
        assert_eq!(ReviewAction::from(Verdict::Approve).as_api_str(), "APPROVE");
        assert_eq!(ReviewAction::from(Verdict::Comment).as_api_str(), "COMMENT");
    }

    #[test]
    fn only_writes_are_mutations() {
        assert!(!HostEffect::ListReviews { pr: PrNumber(1) }.is_mutation());
        assert!(
            HostEffect::UpdateReview {
                pr: PrNumber(1),
                review_id: 2,
                body: String::new(),
            }
            .is_mutation()
        );
    }

    #[test]
    fn identity_matches_only_its_own_artifacts() {
        let me = AppIdentity::new(7, "neural-review");
        let review = |author: &str| ReviewData {
            id: 1,
            body: String::new(),
            author: author.into(),
        };
        assert!(me.authored(&review("neural-review[bot]")));
        assert!(!me.authored(&review("neural-review")));
        assert!(!me.authored(&review("octocat")));

        let run = |app_id| CheckRunData {
            id: 1,
            name: "neural-review".into(),
            app_id,
        };
        assert!(me.owns(&run(Some(7))));
        assert!(!me.owns(&run(Some(8))));
        assert!(!me.owns(&run(None)));
    }

    #[test]
    fn effects_serialize_with_type_tag() {
        let effect = HostEffect::ListCheckRuns {
            head_sha: Sha::new("a".repeat(40)),
            name: "neural-review".into(),
        };
        let json = serde_json::to_value(&effect).unwrap();
        assert_eq!(json["type"], "list_check_runs");
        assert_eq!(json["name"], "neural-review");
    }
}
