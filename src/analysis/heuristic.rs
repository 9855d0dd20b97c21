//! Deterministic rule-based scoring.
//!
//! [`HeuristicScorer`] is the shipped [`ScoringFunction`]: a fixed table of
//! line rules per stage. Security rules split into confirmed indicators (high)
//! and heuristic matches (medium). Quality rules never exceed medium.

use std::collections::HashMap;
use std::future::Future;

use regex::Regex;

use super::scoring::{Candidate, Fragment, ScoringError, ScoringFunction};
use crate::types::{Severity, StageKind};

/// Lines longer than this many characters count as long.
pub const LONG_LINE_CHARS: usize = 120;

/// Trimmed lines shorter than this are never reported as duplicates.
const MIN_DUPLICATE_CHARS: usize = 10;

/// A trimmed line repeated more than this many times is reported.
const MAX_REPEATS: usize = 2;

/// Round numbers that are not worth naming.
const ALLOWED_NUMBERS: [&str; 3] = ["10", "100", "1000"];

enum Matcher {
    Pattern(Regex),
    MagicNumber(Regex),
    LongLine(usize),
}

impl Matcher {
    fn matches(&self, line: &str) -> bool {
        match self {
            Matcher::Pattern(re) => re.is_match(line),
            Matcher::MagicNumber(re) => re
                .find_iter(line)
                .any(|m| !ALLOWED_NUMBERS.contains(&m.as_str())),
            Matcher::LongLine(limit) => line.chars().count() > *limit,
        }
    }
}

struct Rule {
    matcher: Matcher,
    severity: Severity,
    confidence: f64,
    message: &'static str,
    /// Matching lines needed before the rule fires. At 1 every matching line
    /// is reported; above 1 one candidate is reported at the first match.
    threshold: usize,
}

impl Rule {
    fn pattern(
        pattern: &str,
        severity: Severity,
        confidence: f64,
        message: &'static str,
    ) -> Result<Self, regex::Error> {
        Ok(Rule {
            matcher: Matcher::Pattern(Regex::new(pattern)?),
            severity,
            confidence,
            message,
            threshold: 1,
        })
    }

    fn apply(&self, fragment: &Fragment, out: &mut Vec<Candidate>) {
        let mut hits = fragment
            .lines
            .iter()
            .filter(|l| self.matcher.matches(&l.content));

        if self.threshold <= 1 {
            out.extend(hits.map(|l| Candidate {
                line: l.line,
                severity: self.severity,
                message: self.message.to_string(),
                confidence: self.confidence,
            }));
            return;
        }

        let Some(first) = hits.next() else {
            return;
        };
        let count = 1 + hits.count();
        if count >= self.threshold {
            out.push(Candidate {
                line: first.line,
                severity: self.severity,
                message: format!("{} ({} occurrences)", self.message, count),
                confidence: self.confidence,
            });
        }
    }
}

/// Rule-based scorer for the security and quality stages.
pub struct HeuristicScorer {
    security: Vec<Rule>,
    quality: Vec<Rule>,
}

impl HeuristicScorer {
    pub fn new() -> Result<Self, regex::Error> {
        use Severity::{High, Low, Medium};

        let security = vec![
            Rule::pattern(
                r"\b(eval|exec)\s*\(",
                High,
                0.9,
                "Dynamic code execution with eval/exec",
            )?,
            Rule::pattern(
                r"os\.system\s*\(|shell\s*=\s*True|\bpopen\s*\(",
                High,
                0.85,
                "Shell command built from program input; possible command injection",
            )?,
            Rule::pattern(
                r#"(?i)\b(password|passwd|secret|api_?key|access_?token|private_?key)\b\s*[:=]\s*["'][^"']{4,}["']"#,
                High,
                0.8,
                "Hardcoded credential",
            )?,
            Rule::pattern(
                r"\bpickle\.loads?\s*\(|\bmarshal\.loads?\s*\(|\byaml\.load\s*\([^)]*\)\s*$",
                High,
                0.8,
                "Deserialization of untrusted data",
            )?,
            Rule::pattern(
                r"verify\s*=\s*False|InsecureSkipVerify\s*:\s*true|danger_accept_invalid_certs\s*\(\s*true",
                High,
                0.85,
                "TLS certificate verification disabled",
            )?,
            Rule::pattern(
                r#"(?i)\b(select|insert\s+into|update|delete\s+from)\b.*(["']\s*\+|\+\s*["']|["']\s*%\s*[(\w]|\.format\s*\(|\bf["'])"#,
                Medium,
                0.6,
                "SQL assembled from strings; use parameterized queries",
            )?,
            Rule::pattern(
                r"(?i)\b(md5|sha1)\s*\(|hashlib\.(md5|sha1)\b",
                Medium,
                0.6,
                "Weak hash algorithm",
            )?,
        ];

        let quality = vec![
            Rule::pattern(
                r"^\s*print\s*\(",
                Low,
                0.7,
                "Use logging instead of print",
            )?,
            Rule::pattern(
                r"\bexcept\s*:",
                Medium,
                0.8,
                "Bare except swallows every exception; catch specific types",
            )?,
            Rule::pattern(
                r"(#|//)\s*(TODO|FIXME|HACK|XXX)\b",
                Low,
                0.9,
                "Unresolved TODO/FIXME marker",
            )?,
            Rule {
                matcher: Matcher::MagicNumber(Regex::new(r"\b[1-9]\d+\b")?),
                severity: Low,
                confidence: 0.5,
                message: "Magic numbers; consider named constants",
                threshold: 3,
            },
            Rule {
                matcher: Matcher::LongLine(LONG_LINE_CHARS),
                severity: Low,
                confidence: 0.9,
                message: "Lines longer than 120 characters",
                threshold: 2,
            },
            Rule::pattern(
                r"\b(def|fn|function)\s+\w+\s*\([^)]{50,}\)",
                Low,
                0.6,
                "Long parameter list; consider grouping parameters",
            )?,
        ];

        Ok(HeuristicScorer { security, quality })
    }

    /// Runs every rule for `stage` over `fragment`, in rule order.
    pub fn scan(&self, stage: StageKind, fragment: &Fragment) -> Vec<Candidate> {
        let mut out = Vec::new();
        match stage {
            StageKind::Security => {
                for rule in &self.security {
                    rule.apply(fragment, &mut out);
                }
            }
            StageKind::Quality => {
                for rule in &self.quality {
                    rule.apply(fragment, &mut out);
                }
                duplicated_lines(fragment, &mut out);
            }
            // Pattern learning compares fingerprints and has no line rules.
            StageKind::Pattern => {}
        }
        out
    }
}

fn duplicated_lines(fragment: &Fragment, out: &mut Vec<Candidate>) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in &fragment.lines {
        let text = line.content.trim();
        if text.len() <= MIN_DUPLICATE_CHARS {
            continue;
        }
        let count = counts.entry(text).or_default();
        *count += 1;
        if *count == MAX_REPEATS + 1 {
            out.push(Candidate {
                line: line.line,
                severity: Severity::Low,
                message: "Line repeated several times; consider extracting it".to_string(),
                confidence: 0.6,
            });
        }
    }
}

impl ScoringFunction for HeuristicScorer {
    fn score(
        &self,
        stage: StageKind,
        fragment: &Fragment,
    ) -> impl Future<Output = Result<Vec<Candidate>, ScoringError>> + Send {
        std::future::ready(Ok(self.scan(stage, fragment)))
    }
}
