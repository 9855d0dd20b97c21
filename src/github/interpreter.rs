//! Host effect interpreter using octocrab.
//!
//! Executes each [`HostEffect`] once against the REST API. Retrying and
//! rate-limit suspension belong to the caller (see [`super::retry`]); this
//! layer only classifies what went wrong.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::effects::{
    ChangedFile, CheckRunData, CheckRunOutput, FilePage, HostEffect, HostInterpreter,
    HostResponse, HostScope, NewReview, ReviewData,
};
use crate::types::{PrNumber, RepoId, Sha};

use super::client::{Method, OctocrabHost, encode_query_value, has_next_page, send};
use super::error::HostApiError;
use super::token::TokenSource;

/// Safety limit on review-list pagination.
const MAX_REVIEW_PAGES: u32 = 10;

// ─── Wire Types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawFile {
    filename: String,
    status: String,
    #[serde(default)]
    additions: u32,
    #[serde(default)]
    deletions: u32,
    patch: Option<String>,
}

impl From<RawFile> for ChangedFile {
    fn from(raw: RawFile) -> Self {
        ChangedFile {
            filename: raw.filename,
            status: raw.status,
            additions: raw.additions,
            deletions: raw.deletions,
            patch: raw.patch,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCompare {
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    id: u64,
    body: Option<String>,
    user: Option<RawUser>,
}

impl From<RawReview> for ReviewData {
    fn from(raw: RawReview) -> Self {
        ReviewData {
            id: raw.id,
            body: raw.body.unwrap_or_default(),
            author: raw.user.map(|u| u.login).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawApp {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RawCheckRun {
    id: u64,
    name: String,
    app: Option<RawApp>,
}

impl From<RawCheckRun> for CheckRunData {
    fn from(raw: RawCheckRun) -> Self {
        CheckRunData {
            id: raw.id,
            name: raw.name,
            app_id: raw.app.map(|a| a.id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCheckRunList {
    #[serde(default)]
    check_runs: Vec<RawCheckRun>,
}

#[derive(Debug, Serialize)]
struct ReviewCommentBody<'a> {
    path: &'a str,
    line: u32,
    side: &'static str,
    body: &'a str,
}

// ─── Interpreter Implementation ───────────────────────────────────────────────

impl<S: TokenSource> HostInterpreter for OctocrabHost<S> {
    async fn interpret(
        &self,
        scope: &HostScope,
        effect: HostEffect,
    ) -> Result<HostResponse, HostApiError> {
        let client = self.client_for(scope.installation).await?;
        let name = effect.name();
        let result = execute_effect(&client, &scope.repo, effect).await;
        if let Err(e) = &result {
            if e.status_code == Some(401) {
                self.invalidate(scope.installation);
            }
            tracing::debug!(repo = %scope.repo, effect = name, error = %e, "host call failed");
        }
        result
    }
}

fn repo_path(repo: &RepoId) -> String {
    format!("/repos/{}/{}", repo.owner, repo.repo)
}

/// Executes a single effect without retry logic.
async fn execute_effect(
    client: &octocrab::Octocrab,
    repo: &RepoId,
    effect: HostEffect,
) -> Result<HostResponse, HostApiError> {
    match effect {
        HostEffect::ListPullRequestFiles { pr, page, per_page } => {
            list_pull_request_files(client, repo, pr, page, per_page).await
        }
        HostEffect::CompareCommits {
            base,
            head,
            page,
            per_page,
        } => compare_commits(client, repo, &base, &head, page, per_page).await,
        HostEffect::GetCommit {
            sha,
            page,
            per_page,
        } => get_commit(client, repo, &sha, page, per_page).await,
        HostEffect::ListReviews { pr } => list_reviews(client, repo, pr).await,
        HostEffect::CreateReview { pr, review } => create_review(client, repo, pr, review).await,
        HostEffect::UpdateReview {
            pr,
            review_id,
            body,
        } => update_review(client, repo, pr, review_id, body).await,
        HostEffect::ListCheckRuns { head_sha, name } => {
            list_check_runs(client, repo, &head_sha, &name).await
        }
        HostEffect::CreateCheckRun { head_sha, output } => {
            create_check_run(client, repo, &head_sha, output).await
        }
        HostEffect::UpdateCheckRun {
            check_run_id,
            output,
        } => update_check_run(client, repo, check_run_id, output).await,
    }
}

// ─── Diffs ────────────────────────────────────────────────────────────────────

async fn list_pull_request_files(
    client: &octocrab::Octocrab,
    repo: &RepoId,
    pr: PrNumber,
    page: u32,
    per_page: u32,
) -> Result<HostResponse, HostApiError> {
    let path = format!(
        "{}/pulls/{}/files?per_page={}&page={}",
        repo_path(repo),
        pr.0,
        per_page,
        page
    );
    let response = send(client, Method::Get, &path, None::<&()>).await?;
    let files: Vec<RawFile> = response.json()?;
    Ok(HostResponse::FilePage(FilePage {
        files: files.into_iter().map(ChangedFile::from).collect(),
        has_next: has_next_page(&response.headers),
    }))
}

async fn compare_commits(
    client: &octocrab::Octocrab,
    repo: &RepoId,
    base: &Sha,
    head: &Sha,
    page: u32,
    per_page: u32,
) -> Result<HostResponse, HostApiError> {
    let path = format!(
        "{}/compare/{}...{}?per_page={}&page={}",
        repo_path(repo),
        base,
        head,
        per_page,
        page
    );
    let response = send(client, Method::Get, &path, None::<&()>).await?;
    let compare: RawCompare = response.json()?;
    Ok(HostResponse::FilePage(FilePage {
        files: compare.files.into_iter().map(ChangedFile::from).collect(),
        has_next: has_next_page(&response.headers),
    }))
}

async fn get_commit(
    client: &octocrab::Octocrab,
    repo: &RepoId,
    sha: &Sha,
    page: u32,
    per_page: u32,
) -> Result<HostResponse, HostApiError> {
    let path = format!(
        "{}/commits/{}?per_page={}&page={}",
        repo_path(repo),
        sha,
        per_page,
        page
    );
    let response = send(client, Method::Get, &path, None::<&()>).await?;
    // The commit payload lists files the same way a comparison does.
    let commit: RawCompare = response.json()?;
    Ok(HostResponse::FilePage(FilePage {
        files: commit.files.into_iter().map(ChangedFile::from).collect(),
        has_next: has_next_page(&response.headers),
    }))
}

// ─── Reviews ──────────────────────────────────────────────────────────────────

async fn list_reviews(
    client: &octocrab::Octocrab,
    repo: &RepoId,
    pr: PrNumber,
) -> Result<HostResponse, HostApiError> {
    let mut reviews = Vec::new();
    for page in 1..=MAX_REVIEW_PAGES {
        let path = format!(
            "{}/pulls/{}/reviews?per_page=100&page={}",
            repo_path(repo),
            pr.0,
            page
        );
        let response = send(client, Method::Get, &path, None::<&()>).await?;
        let batch: Vec<RawReview> = response.json()?;
        reviews.extend(batch.into_iter().map(ReviewData::from));
        if !has_next_page(&response.headers) {
            break;
        }
    }
    Ok(HostResponse::Reviews(reviews))
}

async fn create_review(
    client: &octocrab::Octocrab,
    repo: &RepoId,
    pr: PrNumber,
    review: NewReview,
) -> Result<HostResponse, HostApiError> {
    let comments: Vec<ReviewCommentBody<'_>> = review
        .comments
        .iter()
        .map(|c| ReviewCommentBody {
            path: &c.path,
            line: c.line,
            side: "RIGHT",
            body: &c.body,
        })
        .collect();
    let body = json!({
        "commit_id": review.commit_sha.as_str(),
        "body": review.body,
        "event": review.action.as_api_str(),
        "comments": comments,
    });
    let path = format!("{}/pulls/{}/reviews", repo_path(repo), pr.0);
    let response = send(client, Method::Post, &path, Some(&body)).await?;
    let created: RawReview = response.json()?;
    Ok(HostResponse::Review(created.into()))
}

async fn update_review(
    client: &octocrab::Octocrab,
    repo: &RepoId,
    pr: PrNumber,
    review_id: u64,
    body: String,
) -> Result<HostResponse, HostApiError> {
    let path = format!("{}/pulls/{}/reviews/{}", repo_path(repo), pr.0, review_id);
    let response = send(client, Method::Put, &path, Some(&json!({ "body": body }))).await?;
    let updated: RawReview = response.json()?;
    Ok(HostResponse::Review(updated.into()))
}

// ─── Check Runs ───────────────────────────────────────────────────────────────

fn check_run_body(output: &CheckRunOutput) -> serde_json::Value {
    let annotations: Vec<serde_json::Value> = output
        .annotations
        .iter()
        .map(|a| {
            json!({
                "path": a.path,
                "start_line": a.start_line,
                "end_line": a.end_line,
                "annotation_level": a.level.as_api_str(),
                "title": a.title,
                "message": a.message,
            })
        })
        .collect();
    json!({
        "name": output.name,
        "status": "completed",
        "conclusion": output.conclusion.as_api_str(),
        "output": {
            "title": output.title,
            "summary": output.summary,
            "annotations": annotations,
        },
    })
}

async fn list_check_runs(
    client: &octocrab::Octocrab,
    repo: &RepoId,
    head_sha: &Sha,
    name: &str,
) -> Result<HostResponse, HostApiError> {
    let path = format!(
        "{}/commits/{}/check-runs?check_name={}&per_page=100",
        repo_path(repo),
        head_sha,
        encode_query_value(name)
    );
    let response = send(client, Method::Get, &path, None::<&()>).await?;
    let list: RawCheckRunList = response.json()?;
    Ok(HostResponse::CheckRuns(
        list.check_runs
            .into_iter()
            .map(CheckRunData::from)
            .collect(),
    ))
}

async fn create_check_run(
    client: &octocrab::Octocrab,
    repo: &RepoId,
    head_sha: &Sha,
    output: CheckRunOutput,
) -> Result<HostResponse, HostApiError> {
    let mut body = check_run_body(&output);
    body["head_sha"] = json!(head_sha.as_str());
    let path = format!("{}/check-runs", repo_path(repo));
    let response = send(client, Method::Post, &path, Some(&body)).await?;
    let created: RawCheckRun = response.json()?;
    Ok(HostResponse::CheckRun(created.into()))
}

async fn update_check_run(
    client: &octocrab::Octocrab,
    repo: &RepoId,
    check_run_id: u64,
    output: CheckRunOutput,
) -> Result<HostResponse, HostApiError> {
    let body = check_run_body(&output);
    let path = format!("{}/check-runs/{}", repo_path(repo), check_run_id);
    let response = send(client, Method::Patch, &path, Some(&body)).await?;
    let updated: RawCheckRun = response.json()?;
    Ok(HostResponse::CheckRun(updated.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{Annotation, AnnotationLevel, CheckConclusion};

    #[test]
    fn check_run_body_matches_api_shape() {
        let output = CheckRunOutput {
            name: "neural-review".into(),
            conclusion: CheckConclusion::Failure,
            title: "2 findings".into(),
            summary: "summary".into(),
            annotations: vec![Annotation {
                path: "app.py".into(),
                start_line: 3,
                end_line: 3,
                level: AnnotationLevel::Failure,
                title: "security".into(),
                message: "eval of untrusted input".into(),
            }],
        };
        let body = check_run_body(&output);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["conclusion"], "failure");
        assert_eq!(body["output"]["annotations"][0]["annotation_level"], "failure");
        assert_eq!(body["output"]["annotations"][0]["start_line"], 3);
    }

    #[test]
    fn raw_file_defaults_missing_counts() {
        let raw: RawFile =
            serde_json::from_str(r#"{"filename":"logo.png","status":"added"}"#).unwrap();
        let file = ChangedFile::from(raw);
        assert_eq!(file.additions, 0);
        assert!(file.patch.is_none());
    }

    #[test]
    fn review_without_body_reads_as_empty() {
        let raw: RawReview = serde_json::from_str(r#"{"id":5,"body":null}"#).unwrap();
        assert_eq!(ReviewData::from(raw).body, "");
    }

    #[test]
    fn review_author_comes_from_user_login() {
        let raw: RawReview = serde_json::from_str(
            r#"{"id":5,"body":"hi","user":{"login":"neural-review[bot]","type":"Bot"}}"#,
        )
        .unwrap();
        assert_eq!(ReviewData::from(raw).author, "neural-review[bot]");
    }

    #[test]
    fn check_run_records_owning_app() {
        let raw: RawCheckRun =
            serde_json::from_str(r#"{"id":9,"name":"neural-review","app":{"id":42,"slug":"x"}}"#)
                .unwrap();
        assert_eq!(CheckRunData::from(raw).app_id, Some(42));
    }

    #[test]
    fn compare_without_files_is_empty() {
        let raw: RawCompare = serde_json::from_str(r#"{"status":"identical"}"#).unwrap();
        assert!(raw.files.is_empty());
    }
}
