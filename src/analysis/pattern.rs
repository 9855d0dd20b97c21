//! Pattern learning: compare each file against the repository's accepted
//! fingerprints and collect new fingerprints worth learning.

use super::knowledge::{Fingerprint, Pattern};
use super::scoring::Candidate;
use crate::types::{FileDiff, Severity};

/// Best similarity below this is reported as a deviation.
pub const DEVIATION_THRESHOLD: f64 = 0.3;

/// Best similarity below this makes the file a learning candidate.
pub const NOVELTY_THRESHOLD: f64 = 0.9;

/// Fragments with fewer tokens carry too little signal to compare.
pub const MIN_TOKENS: u32 = 8;

/// Outcome of comparing one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub deviation: Option<Candidate>,
    pub learning_candidate: Option<Pattern>,
}

/// Compares `file` against the accepted patterns in the same language.
///
/// Without any accepted patterns for the language nothing is reported, but the
/// file is still offered as a learning candidate.
pub fn compare(file: &FileDiff, accepted: &[Pattern]) -> Comparison {
    let fingerprint = Fingerprint::from_lines(file.added_lines().map(|l| l.content.as_str()));
    if fingerprint.token_count() < MIN_TOKENS {
        return Comparison {
            deviation: None,
            learning_candidate: None,
        };
    }

    let language = file.extension().unwrap_or_default();
    let best = accepted
        .iter()
        .filter(|p| p.language == language)
        .map(|p| fingerprint.cosine_similarity(&p.fingerprint))
        .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))));

    let deviation = match best {
        Some(similarity) if similarity < DEVIATION_THRESHOLD => {
            let line = file.added_lines().next().map_or(0, |l| l.line);
            Some(Candidate {
                line,
                severity: Severity::Low,
                message: format!(
                    "Code deviates from patterns established in this repository (similarity {similarity:.2})"
                ),
                confidence: 1.0 - similarity,
            })
        }
        _ => None,
    };

    let learning_candidate = best
        .is_none_or(|s| s < NOVELTY_THRESHOLD)
        .then(|| Pattern {
            language,
            source: file.path.clone(),
            fingerprint,
        });

    Comparison {
        deviation,
        learning_candidate,
    }
}
