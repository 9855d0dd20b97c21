//! Rendering review results for the host.

use std::fmt::Write;

use crate::effects::{
    Annotation, AnnotationLevel, CheckConclusion, CheckRunOutput, InlineComment,
};
use crate::types::{Finding, ReviewResult, Severity, Sha, StageKind, Verdict};

/// Name of the check run published for pushes.
pub const CHECK_RUN_NAME: &str = "neural-review";

/// The host rejects check runs with more annotations than this per request.
pub const MAX_ANNOTATIONS: usize = 50;

/// Finding lines stop being listed once the body grows past this. The host
/// caps bodies at 65 536 characters.
const MAX_BODY_CHARS: usize = 60_000;

/// Hidden marker identifying the review published for `head_sha`.
///
/// ```
/// use neural_review::publish::marker;
/// use neural_review::types::Sha;
///
/// let sha = Sha::new("0123456789abcdef0123456789abcdef01234567");
/// assert_eq!(
///     marker(&sha),
///     "<!-- neural-review:sha=0123456789abcdef0123456789abcdef01234567 -->"
/// );
/// ```
pub fn marker(head_sha: &Sha) -> String {
    format!("<!-- neural-review:sha={} -->", head_sha)
}

fn verdict_heading(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Approve => "No blocking issues",
        Verdict::Comment => "Suggestions",
        Verdict::RequestChanges => "Changes requested",
    }
}

fn location(finding: &Finding) -> String {
    if finding.line() == 0 {
        finding.path().to_string()
    } else {
        format!("{}:{}", finding.path(), finding.line())
    }
}

/// Markdown body: severity counts, findings grouped by stage, stage
/// diagnostics, skipped files, and the marker on the last line.
pub fn review_body(result: &ReviewResult, head_sha: &Sha) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "## Neural Review: {}\n",
        verdict_heading(result.verdict())
    );

    let findings = result.findings();
    if findings.is_empty() {
        body.push_str("No issues found in this change.\n\n");
    } else {
        body.push_str("| Severity | Findings |\n|---|---|\n");
        for severity in [Severity::High, Severity::Medium, Severity::Low] {
            let _ = writeln!(body, "| {} | {} |", severity, result.count(severity));
        }
        body.push('\n');

        let mut omitted = 0;
        for stage in StageKind::ORDER {
            let mut in_stage = findings.iter().filter(|f| f.stage() == stage).peekable();
            if in_stage.peek().is_none() {
                continue;
            }
            let _ = writeln!(body, "### {}\n", capitalize(stage.as_str()));
            for finding in in_stage {
                if body.len() > MAX_BODY_CHARS {
                    omitted += 1;
                    continue;
                }
                let _ = writeln!(
                    body,
                    "- **{}** `{}`: {} (confidence {:.0}%)",
                    finding.severity(),
                    location(finding),
                    finding.message(),
                    finding.confidence() * 100.0
                );
            }
            body.push('\n');
        }
        if omitted > 0 {
            let _ = writeln!(body, "_{omitted} more findings omitted._\n");
        }
    }

    if !result.diagnostics().is_empty() {
        body.push_str("### Diagnostics\n\n");
        for failure in result.diagnostics() {
            let _ = writeln!(body, "- {}", failure);
        }
        body.push('\n');
    }

    if !result.skipped().is_empty() {
        body.push_str("### Not analyzed\n\nThese files exceed the size limit and were skipped:\n\n");
        for path in result.skipped() {
            let _ = writeln!(body, "- `{path}`");
        }
        body.push('\n');
    }

    body.push_str(&marker(head_sha));
    body
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Inline comments for line-anchored findings. File-level findings (line 0)
/// appear only in the body.
pub fn inline_comments(result: &ReviewResult) -> Vec<InlineComment> {
    result
        .findings()
        .iter()
        .filter(|f| f.line() > 0)
        .map(|f| InlineComment {
            path: f.path().to_string(),
            line: f.line(),
            body: format!("**{}** ({}): {}", f.severity(), f.stage(), f.message()),
        })
        .collect()
}

fn conclusion(verdict: Verdict) -> CheckConclusion {
    match verdict {
        Verdict::Approve => CheckConclusion::Success,
        Verdict::Comment => CheckConclusion::Neutral,
        Verdict::RequestChanges => CheckConclusion::Failure,
    }
}

fn annotation_level(severity: Severity) -> AnnotationLevel {
    match severity {
        Severity::High => AnnotationLevel::Failure,
        Severity::Medium => AnnotationLevel::Warning,
        Severity::Low => AnnotationLevel::Notice,
    }
}

/// Check run output for a push. Annotations keep the most severe findings
/// when there are more than [`MAX_ANNOTATIONS`].
pub fn check_run_output(result: &ReviewResult, head_sha: &Sha) -> CheckRunOutput {
    let mut ranked: Vec<&Finding> = result.findings().iter().collect();
    ranked.sort_by_key(|f| std::cmp::Reverse(f.severity()));

    let annotations = ranked
        .into_iter()
        .take(MAX_ANNOTATIONS)
        .map(|f| {
            let line = f.line().max(1);
            Annotation {
                path: f.path().to_string(),
                start_line: line,
                end_line: line,
                level: annotation_level(f.severity()),
                title: format!("{} ({})", f.stage(), f.severity()),
                message: f.message().to_string(),
            }
        })
        .collect();

    let total = result.findings().len();
    let title = match total {
        0 => "No issues found".to_string(),
        1 => "1 finding".to_string(),
        n => format!("{n} findings"),
    };

    CheckRunOutput {
        name: CHECK_RUN_NAME.to_string(),
        conclusion: conclusion(result.verdict()),
        title,
        summary: review_body(result, head_sha),
        annotations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{arb_finding, repo, sha};
    use crate::types::{EventKey, StageFailure};
    use proptest::prelude::*;

    fn result(findings: Vec<Finding>, diagnostics: Vec<StageFailure>) -> ReviewResult {
        ReviewResult::new(
            EventKey {
                repo: repo(),
                head_sha: sha('a'),
            },
            findings,
            diagnostics,
        )
    }

    fn finding(stage: StageKind, severity: Severity, line: u32) -> Finding {
        Finding::new(stage, severity, "src/app.py", line, "something is off", 0.75)
    }

    #[test]
    fn empty_result_says_so() {
        let body = review_body(&result(vec![], vec![]), &sha('a'));
        assert!(body.starts_with("## Neural Review: No blocking issues"));
        assert!(body.contains("No issues found"));
        assert!(body.ends_with(&marker(&sha('a'))));
    }

    #[test]
    fn body_groups_by_stage_with_counts() {
        let body = review_body(
            &result(
                vec![
                    finding(StageKind::Security, Severity::High, 3),
                    finding(StageKind::Quality, Severity::Low, 0),
                ],
                vec![],
            ),
            &sha('a'),
        );

        assert!(body.contains("| high | 1 |"));
        assert!(body.contains("| medium | 0 |"));
        let security = body.find("### Security").unwrap();
        let quality = body.find("### Quality").unwrap();
        assert!(security < quality);
        assert!(!body.contains("### Pattern"));
        assert!(body.contains("`src/app.py:3`"));
        assert!(body.contains("`src/app.py`: something is off (confidence 75%)"));
    }

    #[test]
    fn diagnostics_are_listed() {
        let body = review_body(
            &result(vec![], vec![StageFailure {
                stage: StageKind::Pattern,
                reason: "knowledge store unavailable".into(),
            }]),
            &sha('a'),
        );
        assert!(body.contains("StageFailed(pattern): knowledge store unavailable"));
    }

    #[test]
    fn skipped_files_are_named() {
        let r = result(vec![], vec![]).with_skipped(vec!["vendor/big.min.js".into()]);
        let body = review_body(&r, &sha('a'));
        assert!(body.contains("### Not analyzed"));
        assert!(body.contains("- `vendor/big.min.js`"));
        assert!(body.ends_with(&marker(&sha('a'))));

        let plain = review_body(&result(vec![], vec![]), &sha('a'));
        assert!(!plain.contains("Not analyzed"));
    }

    #[test]
    fn file_level_findings_are_not_inline() {
        let comments = inline_comments(&result(
            vec![
                finding(StageKind::Quality, Severity::Low, 0),
                finding(StageKind::Security, Severity::High, 7),
            ],
            vec![],
        ));
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].line, 7);
        assert!(comments[0].body.starts_with("**high** (security)"));
    }

    #[test]
    fn check_run_keeps_most_severe_annotations() {
        let mut findings: Vec<Finding> = (1..=60)
            .map(|l| finding(StageKind::Pattern, Severity::Low, l))
            .collect();
        findings.push(finding(StageKind::Security, Severity::High, 99));

        let output = check_run_output(&result(findings, vec![]), &sha('a'));

        assert_eq!(output.annotations.len(), MAX_ANNOTATIONS);
        assert_eq!(output.annotations[0].level, AnnotationLevel::Failure);
        assert_eq!(output.annotations[0].start_line, 99);
        assert_eq!(output.conclusion, CheckConclusion::Failure);
        assert_eq!(output.title, "61 findings");
        assert_eq!(output.name, CHECK_RUN_NAME);
    }

    #[test]
    fn file_level_annotation_anchors_to_first_line() {
        let output = check_run_output(
            &result(vec![finding(StageKind::Quality, Severity::Medium, 0)], vec![]),
            &sha('a'),
        );
        assert_eq!(output.annotations[0].start_line, 1);
        assert_eq!(output.conclusion, CheckConclusion::Neutral);
    }

    #[test]
    fn oversized_bodies_are_truncated() {
        let long = "x".repeat(1000);
        let findings: Vec<Finding> = (1..=100)
            .map(|l| Finding::new(StageKind::Quality, Severity::Low, "a.py", l, long.clone(), 0.5))
            .collect();
        let body = review_body(&result(findings, vec![]), &sha('a'));
        assert!(body.len() < 65_536);
        assert!(body.contains("more findings omitted"));
        assert!(body.ends_with(&marker(&sha('a'))));
    }

    proptest! {
        /// The body always ends with the marker for the reviewed commit.
        #[test]
        fn body_always_carries_marker(findings in prop::collection::vec(arb_finding(), 0..20)) {
            let r = result(findings, vec![]);
            let body = review_body(&r, &sha('f'));
            prop_assert!(body.ends_with(&marker(&sha('f'))));
            prop_assert_eq!(body.matches("neural-review:sha=").count(), 1);
        }
    }
}
