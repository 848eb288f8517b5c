use std::fmt::Write;
use std::path::Path;

use patchwise_core::PatchwiseError;

/// Limits applied when listing the checked-out workspace.
///
/// # Examples
///
/// ```
/// use patchwise_review::tree::TreeOptions;
///
/// let opts = TreeOptions::default();
/// assert_eq!(opts.max_depth, 3);
/// assert_eq!(opts.max_entries, 400);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOptions {
    /// Deepest directory level listed; the root's children are level 1.
    pub max_depth: usize,
    /// Entries listed before the output is cut off.
    pub max_entries: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_entries: 400,
        }
    }
}

/// Render the folder structure under `root` as an indented listing.
///
/// Respects `.gitignore` and skips the `.git` directory. Directories end
/// with `/`; entries are sorted by name. When more than `max_entries`
/// entries exist, a final line reports how many were left out.
///
/// # Errors
///
/// Returns [`PatchwiseError::Io`] if `root` is not a readable directory.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use patchwise_review::tree::{folder_tree, TreeOptions};
///
/// let tree = folder_tree(Path::new("."), TreeOptions::default()).unwrap();
/// println!("{tree}");
/// ```
pub fn folder_tree(root: &Path, opts: TreeOptions) -> Result<String, PatchwiseError> {
    if !root.is_dir() {
        return Err(PatchwiseError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("workspace {} is not a directory", root.display()),
        )));
    }

    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .max_depth(Some(opts.max_depth))
        .filter_entry(|entry| entry.file_name() != ".git")
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut out = String::new();
    let mut listed = 0usize;
    let mut omitted = 0usize;

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        // depth 0 is the root itself
        if entry.depth() == 0 {
            continue;
        }
        if listed >= opts.max_entries {
            omitted += 1;
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        let indent = "  ".repeat(entry.depth() - 1);
        let suffix = if is_dir { "/" } else { "" };
        let _ = writeln!(out, "{indent}{name}{suffix}");
        listed += 1;
    }

    if omitted > 0 {
        let _ = writeln!(out, "... ({omitted} more entries)");
    }

    Ok(out)
}
