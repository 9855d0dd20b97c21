//! Unified diff parsing.
//!
//! The host returns each file's change as the hunk section of a unified diff
//! (no `---`/`+++` headers). Only the new side matters for review, so each hunk
//! is reduced to its new-file range and the lines it adds.

use crate::types::{AddedLine, Hunk};

/// Parses a hunk header such as `@@ -10,7 +12,9 @@ fn main()`.
///
/// Returns `(start_line, line_count)` of the new side. A missing count means 1.
fn parse_hunk_header(line: &str) -> Option<(u32, u32)> {
    let rest = line.strip_prefix("@@ ")?;
    let (ranges, _) = rest.split_once(" @@")?;
    let new_range = ranges.split_whitespace().find_map(|r| r.strip_prefix('+'))?;
    match new_range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((new_range.parse().ok()?, 1)),
    }
}

/// Parses a file patch into hunks.
///
/// Lines before the first hunk header and malformed headers are ignored, so a
/// truncated patch yields whatever hunks were complete.
///
/// ```
/// use neural_review::fetch::parse_patch;
///
/// let hunks = parse_patch("@@ -1,2 +1,3 @@\n a\n+b\n c");
/// assert_eq!(hunks.len(), 1);
/// assert_eq!(hunks[0].added_lines[0].line, 2);
/// assert_eq!(hunks[0].added_lines[0].content, "b");
/// ```
pub fn parse_patch(patch: &str) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;
    let mut next_line = 0u32;

    for line in patch.lines() {
        if line.starts_with("@@") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            if let Some((start_line, line_count)) = parse_hunk_header(line) {
                next_line = start_line;
                current = Some(Hunk {
                    start_line,
                    line_count,
                    added_lines: Vec::new(),
                });
            }
            continue;
        }

        let Some(hunk) = current.as_mut() else {
            continue;
        };
        match line.as_bytes().first() {
            Some(b'+') => {
                hunk.added_lines.push(AddedLine {
                    line: next_line,
                    content: line[1..].to_string(),
                });
                next_line += 1;
            }
            Some(b'-') => {}
            // "\ No newline at end of file"
            Some(b'\\') => {}
            // Context line, or an empty line whose leading space was stripped.
            _ => next_line += 1,
        }
    }

    if let Some(hunk) = current {
        hunks.push(hunk);
    }
    hunks
}
