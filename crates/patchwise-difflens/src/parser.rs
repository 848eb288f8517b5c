use std::fmt;
use std::fmt::Write;

use patchwise_core::PatchwiseError;
use serde::Serialize;

/// Classification of a single line inside a file patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LineKind {
    /// `@@ -a,b +c,d @@` header.
    HunkHeader,
    /// Unchanged line shown for context.
    Context,
    /// Line added in the head version.
    Added,
    /// Line removed from the base version.
    Removed,
    /// `\ No newline at end of file` marker.
    NoNewline,
}

/// A line of a file patch together with its diff-position.
///
/// The first hunk header has position 0; every following line, including
/// later hunk headers, increments the position by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchLine {
    /// Diff-position of this line.
    pub position: u32,
    /// Line classification.
    pub kind: LineKind,
    /// Line number in the base version, for context and removed lines.
    pub old_line: Option<u32>,
    /// Line number in the head version, for context and added lines.
    pub new_line: Option<u32>,
    /// Raw text including the leading `+`, `-` or space.
    pub text: String,
}

/// Ranges from a hunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HunkRange {
    /// Starting line in the old version.
    pub old_start: u32,
    /// Number of lines in the old version.
    pub old_lines: u32,
    /// Starting line in the new version.
    pub new_start: u32,
    /// Number of lines in the new version.
    pub new_lines: u32,
}

/// A parsed GitHub file patch: the `patch` field of the pull request files API.
///
/// # Examples
///
/// ```
/// use patchwise_difflens::parser::parse_patch;
///
/// let patch = "@@ -1,2 +1,3 @@\n fn main() {\n+    run();\n }";
/// let parsed = parse_patch(patch).unwrap();
/// assert_eq!(parsed.max_position(), 3);
/// assert!(parsed.is_commentable(2));
/// assert!(!parsed.is_commentable(4));
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePatch {
    /// Hunk ranges in patch order.
    pub hunks: Vec<HunkRange>,
    /// Every patch line, in order, starting with the first hunk header.
    pub lines: Vec<PatchLine>,
}

impl FilePatch {
    /// Highest diff-position in the patch (0 for an empty patch).
    pub fn max_position(&self) -> u32 {
        self.lines.last().map(|l| l.position).unwrap_or(0)
    }

    /// Look up the line at `position`.
    pub fn line(&self, position: u32) -> Option<&PatchLine> {
        self.lines.get(position as usize)
    }

    /// Returns `true` if a review comment may be anchored at `position`.
    ///
    /// Position 0, hunk headers, and no-newline markers are rejected, as is
    /// anything past the end of the patch.
    pub fn is_commentable(&self, position: u32) -> bool {
        if position == 0 {
            return false;
        }
        self.line(position).is_some_and(|l| {
            matches!(
                l.kind,
                LineKind::Context | LineKind::Added | LineKind::Removed
            )
        })
    }

    /// Render the patch with a diff-position column, for use in prompts.
    ///
    /// # Examples
    ///
    /// ```
    /// use patchwise_difflens::parser::parse_patch;
    ///
    /// let parsed = parse_patch("@@ -1 +1 @@\n-old\n+new").unwrap();
    /// let text = parsed.annotated();
    /// assert!(text.contains("   1 | -old"));
    /// assert!(text.contains("   2 | +new"));
    /// ```
    pub fn annotated(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line.kind {
                LineKind::HunkHeader | LineKind::NoNewline => {
                    let _ = writeln!(out, "     | {}", line.text);
                }
                _ => {
                    let _ = writeln!(out, "{:>4} | {}", line.position, line.text);
                }
            }
        }
        out
    }
}

impl fmt::Display for FilePatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hunks, positions 1..={}",
            self.hunks.len(),
            self.max_position()
        )
    }
}

/// Parse a single-file patch into positioned lines.
///
/// The patch must start with a hunk header, as GitHub's per-file patches do.
/// Lines with an unexpected prefix are treated as context so that positions
/// stay aligned with GitHub's own counting.
///
/// # Errors
///
/// Returns [`PatchwiseError::Parse`] if the patch does not start with a hunk
/// header or if a hunk header is malformed.
///
/// # Examples
///
/// ```
/// use patchwise_difflens::parser::parse_patch;
///
/// assert!(parse_patch("not a patch").is_err());
/// let empty = parse_patch("").unwrap();
/// assert_eq!(empty.max_position(), 0);
/// ```
pub fn parse_patch(patch: &str) -> Result<FilePatch, PatchwiseError> {
    let mut hunks = Vec::new();
    let mut lines: Vec<PatchLine> = Vec::new();
    let mut old_line = 0u32;
    let mut new_line = 0u32;

    for (index, raw) in patch.lines().enumerate() {
        let position = index as u32;

        if raw.starts_with("@@") {
            let range = parse_hunk_header(raw)?;
            old_line = range.old_start;
            new_line = range.new_start;
            hunks.push(range);
            lines.push(PatchLine {
                position,
                kind: LineKind::HunkHeader,
                old_line: None,
                new_line: None,
                text: raw.to_string(),
            });
            continue;
        }

        if index == 0 {
            return Err(PatchwiseError::Parse(format!(
                "patch must start with a hunk header, found: {raw}"
            )));
        }

        let line = if raw.starts_with('\\') {
            PatchLine {
                position,
                kind: LineKind::NoNewline,
                old_line: None,
                new_line: None,
                text: raw.to_string(),
            }
        } else if raw.starts_with('+') {
            new_line += 1;
            PatchLine {
                position,
                kind: LineKind::Added,
                old_line: None,
                new_line: Some(new_line - 1),
                text: raw.to_string(),
            }
        } else if raw.starts_with('-') {
            old_line += 1;
            PatchLine {
                position,
                kind: LineKind::Removed,
                old_line: Some(old_line - 1),
                new_line: None,
                text: raw.to_string(),
            }
        } else {
            old_line += 1;
            new_line += 1;
            PatchLine {
                position,
                kind: LineKind::Context,
                old_line: Some(old_line - 1),
                new_line: Some(new_line - 1),
                text: raw.to_string(),
            }
        };
        lines.push(line);
    }

    Ok(FilePatch { hunks, lines })
}

fn parse_hunk_header(line: &str) -> Result<HunkRange, PatchwiseError> {
    let inner = line
        .strip_prefix("@@ ")
        .and_then(|s| {
            let end = s.find(" @@")?;
            Some(&s[..end])
        })
        .ok_or_else(|| PatchwiseError::Parse(format!("invalid hunk header: {line}")))?;

    let parts: Vec<&str> = inner.split(' ').collect();
    if parts.len() != 2 {
        return Err(PatchwiseError::Parse(format!("invalid hunk header: {line}")));
    }

    let old = parts[0]
        .strip_prefix('-')
        .ok_or_else(|| PatchwiseError::Parse(format!("invalid old range in hunk: {line}")))?;
    let new = parts[1]
        .strip_prefix('+')
        .ok_or_else(|| PatchwiseError::Parse(format!("invalid new range in hunk: {line}")))?;

    let (old_start, old_lines) = parse_range(old, line)?;
    let (new_start, new_lines) = parse_range(new, line)?;

    Ok(HunkRange {
        old_start,
        old_lines,
        new_start,
        new_lines,
    })
}

fn parse_range(range: &str, context: &str) -> Result<(u32, u32), PatchwiseError> {
    if let Some((start, count)) = range.split_once(',') {
        let s = start
            .parse()
            .map_err(|_| PatchwiseError::Parse(format!("invalid range number in: {context}")))?;
        let c = count
            .parse()
            .map_err(|_| PatchwiseError::Parse(format!("invalid range count in: {context}")))?;
        Ok((s, c))
    } else {
        let s = range
            .parse()
            .map_err(|_| PatchwiseError::Parse(format!("invalid range number in: {context}")))?;
        Ok((s, 1))
    }
}
