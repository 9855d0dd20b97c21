//! Structural quality checks that need the whole file diff rather than a
//! single line.

use super::scoring::Candidate;
use crate::types::{FileDiff, Severity};

/// Files adding more lines than this get a suggestion to split the change.
pub const LARGE_CHANGE_LINES: u32 = 100;

/// Indentation levels beyond this count as deep nesting.
pub const MAX_NESTING_DEPTH: usize = 4;

const SPACES_PER_LEVEL: usize = 4;

/// Indentation level of a line: tabs count one level, spaces four to a level.
pub fn nesting_depth(line: &str) -> usize {
    let mut spaces = 0;
    let mut tabs = 0;
    for c in line.chars() {
        match c {
            ' ' => spaces += 1,
            '\t' => tabs += 1,
            _ => break,
        }
    }
    tabs + spaces / SPACES_PER_LEVEL
}

/// Large-change and deep-nesting candidates for one file.
pub fn structural_checks(file: &FileDiff) -> Vec<Candidate> {
    let mut out = Vec::new();

    if file.additions > LARGE_CHANGE_LINES {
        out.push(Candidate {
            line: 0,
            severity: Severity::Low,
            message: format!(
                "Large change ({} added lines); consider splitting it into smaller pieces",
                file.additions
            ),
            confidence: 0.7,
        });
    }

    let deepest = file
        .added_lines()
        .filter(|l| !l.content.trim().is_empty())
        .map(|l| (l, nesting_depth(&l.content)))
        .find(|(_, depth)| *depth > MAX_NESTING_DEPTH);
    if let Some((line, depth)) = deepest {
        out.push(Candidate {
            line: line.line,
            severity: Severity::Medium,
            message: format!("Deeply nested code ({depth} levels); consider early returns or helper functions"),
            confidence: 0.6,
        });
    }

    out
}
