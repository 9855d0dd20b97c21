//! Changed-file representations fetched from the host.

use serde::{Deserialize, Serialize};

/// How a file changed, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
    Copied,
    Changed,
    Unchanged,
}

impl FileStatus {
    /// Maps the host's `status` string. Unknown values fall back to `Changed`.
    pub fn from_api_str(s: &str) -> Self {
        match s {
            "added" => FileStatus::Added,
            "modified" => FileStatus::Modified,
            "removed" => FileStatus::Removed,
            "renamed" => FileStatus::Renamed,
            "copied" => FileStatus::Copied,
            "unchanged" => FileStatus::Unchanged,
            _ => FileStatus::Changed,
        }
    }
}

/// A single added line with its line number in the new version of the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedLine {
    pub line: u32,
    pub content: String,
}

/// One hunk of a unified diff, described from the new file's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    /// First line of the hunk in the new file.
    pub start_line: u32,
    /// Number of lines the hunk spans in the new file.
    pub line_count: u32,
    /// Lines introduced by this hunk, in order.
    pub added_lines: Vec<AddedLine>,
}

/// The diff of a single file within a review event.
///
/// Owned by the run that fetched it and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub status: FileStatus,
    pub additions: u32,
    pub deletions: u32,
    /// Empty for binary files and for patches the host declined to render.
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    /// Iterates over every added line of the file in hunk order.
    pub fn added_lines(&self) -> impl Iterator<Item = &AddedLine> {
        self.hunks.iter().flat_map(|h| h.added_lines.iter())
    }

    /// Returns the lowercase file extension, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.path.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}
