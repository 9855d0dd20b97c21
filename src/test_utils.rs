//! Shared test doubles, fixtures and arbitrary generators for property-based
//! testing.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use crate::analysis::{
    Candidate, Fragment, KnowledgeError, KnowledgeStore, Pattern, ScoringError, ScoringFunction,
};
use crate::effects::{
    AppIdentity, ChangedFile, CheckRunData, FilePage, HostEffect, HostInterpreter, HostResponse, HostScope,
    ReviewData,
};
use crate::github::HostApiError;
use crate::types::{
    AddedLine, DeliveryId, FileDiff, FileStatus, Finding, Hunk, InstallationId, PrNumber, RepoId,
    ReviewEvent, ReviewTarget, Severity, Sha, StageKind,
};

// ─── Fixtures ─────────────────────────────────────────────────────────────────

/// A 40-character SHA made of one repeated hex digit.
pub fn sha(c: char) -> Sha {
    Sha::new(c.to_string().repeat(40))
}

pub fn repo() -> RepoId {
    RepoId::new("octocat", "hello")
}

/// The App the mock host publishes as.
pub fn identity() -> AppIdentity {
    AppIdentity::new(4242, "neural-review")
}

/// A pull request event at head `aaaa…` with base `bbbb…`.
pub fn pr_event(number: u64) -> ReviewEvent {
    ReviewEvent {
        repo: repo(),
        target: ReviewTarget::PullRequest {
            number: PrNumber(number),
        },
        head_sha: sha('a'),
        base_sha: Some(sha('b')),
        files: vec![],
        installation: InstallationId(1),
        delivery_id: DeliveryId::new(format!("delivery-{number}")),
        sequence: number,
    }
}

/// A push to `refs/heads/main` at head `cccc…`.
pub fn push_event(base: Option<Sha>) -> ReviewEvent {
    ReviewEvent {
        repo: repo(),
        target: ReviewTarget::Push {
            git_ref: "refs/heads/main".into(),
        },
        head_sha: sha('c'),
        base_sha: base,
        files: vec!["src/lib.rs".into()],
        installation: InstallationId(1),
        delivery_id: DeliveryId::new("push-1"),
        sequence: 1,
    }
}

pub fn page(files: Vec<ChangedFile>, has_next: bool) -> HostResponse {
    HostResponse::FilePage(FilePage { files, has_next })
}

/// A host file entry whose patch adds `lines` at the top of the file.
pub fn changed_file(path: &str, lines: &[&str]) -> ChangedFile {
    let mut patch = format!("@@ -0,0 +1,{} @@", lines.len());
    for line in lines {
        patch.push_str("\n+");
        patch.push_str(line);
    }
    ChangedFile {
        filename: path.into(),
        status: "added".into(),
        additions: lines.len() as u32,
        deletions: 0,
        patch: Some(patch),
    }
}

fn numbered(lines: &[&str]) -> Vec<AddedLine> {
    lines
        .iter()
        .enumerate()
        .map(|(i, l)| AddedLine {
            line: i as u32 + 1,
            content: l.to_string(),
        })
        .collect()
}

pub fn fragment(path: &str, lines: &[&str]) -> Fragment {
    Fragment {
        path: path.into(),
        lines: numbered(lines),
    }
}

/// A modified file whose added lines are numbered from 1.
pub fn file_diff(path: &str, lines: &[&str]) -> FileDiff {
    FileDiff {
        path: path.into(),
        status: FileStatus::Modified,
        additions: lines.len() as u32,
        deletions: 0,
        hunks: vec![Hunk {
            start_line: 1,
            line_count: lines.len() as u32,
            added_lines: numbered(lines),
        }],
    }
}

// ─── Mock host ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct HostState {
    scripted: VecDeque<Result<HostResponse, HostApiError>>,
    failures: HashMap<&'static str, VecDeque<HostApiError>>,
    files: Vec<ChangedFile>,
    reviews: Vec<(PrNumber, ReviewData)>,
    check_runs: Vec<(Sha, CheckRunData)>,
    next_id: u64,
    effects: Vec<HostEffect>,
    call_times: Vec<Instant>,
    latency: Duration,
}

/// An in-memory host.
///
/// Each call is answered, in priority order, by a failure queued for that
/// effect name, by the next scripted response, or by a small simulation that
/// serves the configured file list and stores reviews and check runs.
#[derive(Default)]
pub struct MockHost {
    state: Mutex<HostState>,
}

impl MockHost {
    pub fn new() -> Self {
        MockHost::default()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues a response for the next call, whatever its effect.
    pub fn push_response(&self, response: Result<HostResponse, HostApiError>) {
        self.lock().scripted.push_back(response);
    }

    /// Queues an error for the next call of the named effect.
    pub fn fail_next(&self, effect: &'static str, error: HostApiError) {
        self.lock()
            .failures
            .entry(effect)
            .or_default()
            .push_back(error);
    }

    /// Files returned by every diff listing.
    pub fn set_files(&self, files: Vec<ChangedFile>) {
        self.lock().files = files;
    }

    /// Delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn effects(&self) -> Vec<HostEffect> {
        self.lock().effects.clone()
    }

    /// Number of calls made for the named effect.
    pub fn count(&self, effect: &str) -> usize {
        self.lock()
            .effects
            .iter()
            .filter(|e| e.name() == effect)
            .count()
    }

    pub fn mutations(&self) -> Vec<HostEffect> {
        self.lock()
            .effects
            .iter()
            .filter(|e| e.is_mutation())
            .cloned()
            .collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.lock().call_times.clone()
    }

    pub fn reviews(&self, pr: PrNumber) -> Vec<ReviewData> {
        self.lock()
            .reviews
            .iter()
            .filter(|(n, _)| *n == pr)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn check_runs(&self, head_sha: &Sha) -> Vec<CheckRunData> {
        self.lock()
            .check_runs
            .iter()
            .filter(|(s, _)| s == head_sha)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Adds a review as if someone else had posted it.
    pub fn seed_review(&self, pr: PrNumber, body: &str) -> u64 {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.reviews.push((pr, ReviewData {
            id,
            body: body.into(),
            author: "octocat".into(),
        }));
        id
    }

    /// Adds a check run created by another App.
    pub fn seed_check_run(&self, head_sha: &Sha, name: &str, app_id: u64) -> u64 {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.check_runs.push((head_sha.clone(), CheckRunData {
            id,
            name: name.into(),
            app_id: Some(app_id),
        }));
        id
    }

    fn respond(&self, effect: HostEffect) -> Result<HostResponse, HostApiError> {
        let mut state = self.lock();
        state.effects.push(effect.clone());
        state.call_times.push(Instant::now());

        if let Some(err) = state
            .failures
            .get_mut(effect.name())
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        if let Some(response) = state.scripted.pop_front() {
            return response;
        }

        match effect {
            HostEffect::ListPullRequestFiles { .. }
            | HostEffect::CompareCommits { .. }
            | HostEffect::GetCommit { .. } => Ok(page(state.files.clone(), false)),
            HostEffect::ListReviews { pr } => Ok(HostResponse::Reviews(
                state
                    .reviews
                    .iter()
                    .filter(|(n, _)| *n == pr)
                    .map(|(_, r)| r.clone())
                    .collect(),
            )),
            HostEffect::CreateReview { pr, review } => {
                state.next_id += 1;
                let data = ReviewData {
                    id: state.next_id,
                    body: review.body,
                    author: identity().bot_login(),
                };
                state.reviews.push((pr, data.clone()));
                Ok(HostResponse::Review(data))
            }
            HostEffect::UpdateReview {
                review_id, body, ..
            } => {
                let Some((_, review)) = state.reviews.iter_mut().find(|(_, r)| r.id == review_id)
                else {
                    return Err(HostApiError::not_found(format!("review {review_id}")));
                };
                review.body = body;
                Ok(HostResponse::Review(review.clone()))
            }
            HostEffect::ListCheckRuns { head_sha, name } => Ok(HostResponse::CheckRuns(
                state
                    .check_runs
                    .iter()
                    .filter(|(s, c)| *s == head_sha && c.name == name)
                    .map(|(_, c)| c.clone())
                    .collect(),
            )),
            HostEffect::CreateCheckRun { head_sha, output } => {
                state.next_id += 1;
                let data = CheckRunData {
                    id: state.next_id,
                    name: output.name,
                    app_id: Some(identity().app_id),
                };
                state.check_runs.push((head_sha, data.clone()));
                Ok(HostResponse::CheckRun(data))
            }
            HostEffect::UpdateCheckRun { check_run_id, .. } => state
                .check_runs
                .iter()
                .find(|(_, c)| c.id == check_run_id)
                .map(|(_, c)| HostResponse::CheckRun(c.clone()))
                .ok_or_else(|| HostApiError::not_found(format!("check run {check_run_id}"))),
        }
    }
}

impl HostInterpreter for MockHost {
    fn interpret(
        &self,
        _scope: &HostScope,
        effect: HostEffect,
    ) -> impl Future<Output = Result<HostResponse, HostApiError>> + Send {
        async move {
            let latency = self.lock().latency;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            self.respond(effect)
        }
    }
}

// ─── Scorers and stores ───────────────────────────────────────────────────────

/// Returns fixed candidates per (stage, path) and records every call.
#[derive(Default)]
pub struct ScriptedScorer {
    script: HashMap<(StageKind, String), Vec<Candidate>>,
    calls: Mutex<Vec<(StageKind, String)>>,
}

impl ScriptedScorer {
    pub fn new() -> Self {
        ScriptedScorer::default()
    }

    pub fn with_candidate(
        mut self,
        stage: StageKind,
        path: &str,
        line: u32,
        severity: Severity,
    ) -> Self {
        self.script
            .entry((stage, path.to_string()))
            .or_default()
            .push(Candidate {
                line,
                severity,
                message: format!("{stage} finding at {path}:{line}"),
                confidence: 0.9,
            });
        self
    }

    pub fn calls(&self) -> Vec<(StageKind, String)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ScoringFunction for ScriptedScorer {
    fn score(
        &self,
        stage: StageKind,
        fragment: &Fragment,
    ) -> impl Future<Output = Result<Vec<Candidate>, ScoringError>> + Send {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((stage, fragment.path.clone()));
        let found = self
            .script
            .get(&(stage, fragment.path.clone()))
            .cloned()
            .unwrap_or_default();
        std::future::ready(Ok(found))
    }
}

/// Fails every call.
pub struct FailingScorer {
    message: String,
    calls: AtomicUsize,
}

impl FailingScorer {
    pub fn new(message: &str) -> Self {
        FailingScorer {
            message: message.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ScoringFunction for FailingScorer {
    fn score(
        &self,
        _stage: StageKind,
        _fragment: &Fragment,
    ) -> impl Future<Output = Result<Vec<Candidate>, ScoringError>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Err(ScoringError(self.message.clone())))
    }
}

/// Sleeps before answering with no candidates.
pub struct SlowScorer {
    delay: Duration,
}

impl SlowScorer {
    pub fn new(delay: Duration) -> Self {
        SlowScorer { delay }
    }
}

impl ScoringFunction for SlowScorer {
    fn score(
        &self,
        _stage: StageKind,
        _fragment: &Fragment,
    ) -> impl Future<Output = Result<Vec<Candidate>, ScoringError>> + Send {
        let delay = self.delay;
        async move {
            tokio::time::sleep(delay).await;
            Ok(Vec::new())
        }
    }
}

/// A knowledge store that is always unavailable.
pub struct FailingKnowledgeStore;

impl KnowledgeStore for FailingKnowledgeStore {
    fn accepted_patterns(
        &self,
        _repo: &RepoId,
    ) -> impl Future<Output = Result<Vec<Pattern>, KnowledgeError>> + Send {
        std::future::ready(Err(KnowledgeError("store offline".into())))
    }

    fn record(
        &self,
        _repo: &RepoId,
        _patterns: Vec<Pattern>,
    ) -> impl Future<Output = Result<(), KnowledgeError>> + Send {
        std::future::ready(Err(KnowledgeError("store offline".into())))
    }
}

// ─── Generators ───────────────────────────────────────────────────────────────

pub fn arb_sha() -> impl Strategy<Value = Sha> {
    "[0-9a-f]{40}".prop_map(Sha::new)
}

pub fn arb_stage() -> impl Strategy<Value = StageKind> {
    prop::sample::select(StageKind::ORDER.to_vec())
}

pub fn arb_severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Low),
        Just(Severity::Medium),
        Just(Severity::High),
    ]
}

pub fn arb_finding() -> impl Strategy<Value = Finding> {
    (
        arb_stage(),
        arb_severity(),
        "[a-z]{1,8}(/[a-z]{1,8}){0,2}\\.(py|rs|js)",
        0u32..500,
        "[ -~]{0,80}",
        0.0f64..=1.0,
    )
        .prop_map(|(stage, severity, path, line, message, confidence)| {
            Finding::new(stage, severity, path, line, message, confidence)
        })
}
