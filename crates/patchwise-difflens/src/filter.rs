//! Pre-LLM file filtering.
//!
//! Lock files, generated code, vendored dependencies, minified bundles,
//! files without a textual patch, and files matching custom patterns never
//! reach the model, so they can never produce review comments.

use std::path::Path;

use patchwise_core::{ChangedFile, FileStatus, ReviewConfig};

/// Files and patterns to skip before sending to the LLM.
///
/// # Examples
///
/// ```
/// use patchwise_difflens::filter::FileFilter;
///
/// let filter = FileFilter::default_filter();
/// assert!(filter.should_skip("package-lock.json"));
/// assert!(!filter.should_skip("src/main.rs"));
/// ```
pub struct FileFilter {
    skip_patterns: Vec<glob::Pattern>,
    skip_extensions: Vec<String>,
}

impl FileFilter {
    /// Create a filter with only the built-in rules.
    pub fn default_filter() -> Self {
        Self {
            skip_patterns: Vec::new(),
            skip_extensions: Vec::new(),
        }
    }

    /// Create a filter from review configuration.
    ///
    /// Invalid glob patterns are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use patchwise_core::ReviewConfig;
    /// use patchwise_difflens::filter::FileFilter;
    ///
    /// let config = ReviewConfig {
    ///     skip_patterns: vec!["docs/**".into()],
    ///     ..ReviewConfig::default()
    /// };
    /// let filter = FileFilter::from_config(&config);
    /// assert!(filter.should_skip("docs/intro.md"));
    /// assert!(filter.should_skip("Cargo.lock"));
    /// ```
    pub fn from_config(config: &ReviewConfig) -> Self {
        let skip_patterns = config
            .skip_patterns
            .iter()
            .filter_map(|pat| glob::Pattern::new(pat).ok())
            .collect();

        Self {
            skip_patterns,
            skip_extensions: config.skip_extensions.clone(),
        }
    }

    /// Check if a single file path should be skipped, ignoring its patch.
    pub fn should_skip(&self, path: &str) -> bool {
        self.check_path(path).is_some()
    }

    /// Decide whether a changed file is sent to the model.
    ///
    /// Returns the reason when the file is skipped.
    ///
    /// # Examples
    ///
    /// ```
    /// use patchwise_core::{ChangedFile, FileStatus};
    /// use patchwise_difflens::filter::{FileFilter, SkipReason};
    ///
    /// let file = ChangedFile {
    ///     filename: "assets/logo.png".into(),
    ///     previous_filename: None,
    ///     status: FileStatus::Added,
    ///     additions: 0,
    ///     deletions: 0,
    ///     patch: None,
    /// };
    /// let reason = FileFilter::default_filter().check(&file);
    /// assert!(matches!(reason, Some(SkipReason::NoPatch)));
    /// ```
    pub fn check(&self, file: &ChangedFile) -> Option<SkipReason> {
        if file.status == FileStatus::Removed {
            return Some(SkipReason::Removed);
        }
        if let Some(reason) = self.check_path(&file.filename) {
            return Some(reason);
        }
        let patch = match file.patch.as_deref() {
            Some(p) if !p.trim().is_empty() => p,
            _ => return Some(SkipReason::NoPatch),
        };
        let file_name = file_name(&file.filename);
        if is_minified(file_name, patch) {
            return Some(SkipReason::MinifiedFile);
        }
        if is_generated_by_content(patch) {
            return Some(SkipReason::GeneratedFile);
        }
        None
    }

    fn check_path(&self, path_str: &str) -> Option<SkipReason> {
        let file_name = file_name(path_str);

        if is_lock_file(file_name) {
            return Some(SkipReason::LockFile);
        }
        if is_vendored(path_str) {
            return Some(SkipReason::VendoredCode);
        }
        if is_minified(file_name, "") {
            return Some(SkipReason::MinifiedFile);
        }
        if is_generated_by_name(file_name) {
            return Some(SkipReason::GeneratedFile);
        }
        if let Some(ext) = Path::new(path_str).extension().and_then(|e| e.to_str()) {
            if self.skip_extensions.iter().any(|skip| skip == ext) {
                return Some(SkipReason::PatternMatch(format!("*.{ext}")));
            }
        }
        self.skip_patterns
            .iter()
            .find(|pat| pat.matches(path_str))
            .map(|pat| SkipReason::PatternMatch(pat.to_string()))
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Reason a file was skipped.
///
/// # Examples
///
/// ```
/// use patchwise_difflens::filter::SkipReason;
///
/// assert_eq!(SkipReason::LockFile.to_string(), "lock file");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Package manager lock file.
    LockFile,
    /// Auto-generated code.
    GeneratedFile,
    /// Third-party vendored code.
    VendoredCode,
    /// Minified or bundled file.
    MinifiedFile,
    /// Binary file or a diff too large for GitHub to render.
    NoPatch,
    /// File deleted by the pull request.
    Removed,
    /// Matched a custom skip pattern.
    PatternMatch(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::LockFile => write!(f, "lock file"),
            SkipReason::GeneratedFile => write!(f, "generated file"),
            SkipReason::VendoredCode => write!(f, "vendored code"),
            SkipReason::MinifiedFile => write!(f, "minified file"),
            SkipReason::NoPatch => write!(f, "no textual patch"),
            SkipReason::Removed => write!(f, "removed file"),
            SkipReason::PatternMatch(pat) => write!(f, "pattern: {pat}"),
        }
    }
}

const LOCK_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "Cargo.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "Gemfile.lock",
    "composer.lock",
    "go.sum",
];

fn is_lock_file(file_name: &str) -> bool {
    LOCK_FILES.contains(&file_name)
}

fn is_vendored(path: &str) -> bool {
    path.split('/')
        .any(|part| matches!(part, "vendor" | "third_party" | "node_modules" | "dist"))
}

fn is_minified(file_name: &str, patch: &str) -> bool {
    if file_name.ends_with(".min.js") || file_name.ends_with(".min.css") {
        return true;
    }
    // any line longer than 500 chars suggests a bundle
    patch.lines().any(|line| line.len() > 500)
}

fn is_generated_by_name(file_name: &str) -> bool {
    file_name.contains(".generated.")
        || file_name.ends_with(".g.dart")
        || file_name.ends_with(".pb.go")
        || file_name.ends_with(".pb.rs")
}

fn is_generated_by_content(patch: &str) -> bool {
    patch
        .lines()
        .filter(|line| !line.starts_with("@@"))
        .take(5)
        .map(|line| line.get(1..).unwrap_or(""))
        .any(|line| {
            line.contains("// Code generated")
                || line.contains("# AUTO-GENERATED")
                || line.contains("@generated")
        })
}
