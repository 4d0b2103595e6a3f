//! Path classification: noise filtering and root attribution.
//!
//! Everything here is pure. Nothing touches the file system, so these
//! helpers are safe to call on the hot path of the event loop.

use std::path::{Path, PathBuf};

/// Fragments marking build output, dependency caches and VCS internals.
pub const DEFAULT_IGNORE_FRAGMENTS: &[&str] = &[
    "/node_modules/",
    "/.git/objects/",
    "/.git/logs/",
    "/dist/",
    "/build/",
    "/.cache/",
];

/// Directory names that are never walked into or watched as directories.
const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Directory, relative to a root, holding the metadata files.
const METADATA_DIR: &str = ".git";

/// Metadata files that reveal changes such as a branch switch that leave the
/// work tree untouched.
const METADATA_NAMES: &[&str] = &["index", "HEAD"];

/// Check a path against the built-in ignore fragments.
pub fn is_ignored(path: &Path) -> bool {
    let normalized = normalize(path);
    DEFAULT_IGNORE_FRAGMENTS
        .iter()
        .any(|fragment| normalized.contains(fragment))
}

/// Check a path against an arbitrary fragment list.
///
/// The path is compared with `/` separators and a trailing `/`, so a
/// fragment like `/dist/` matches the `dist` directory itself as well as
/// everything below it.
pub fn matches_fragments<S: AsRef<str>>(path: &Path, fragments: &[S]) -> bool {
    let normalized = normalize(path);
    fragments
        .iter()
        .any(|fragment| normalized.contains(fragment.as_ref()))
}

fn normalize(path: &Path) -> String {
    let mut s = path.to_string_lossy().replace('\\', "/");
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}

/// Find the tracked root that owns `path`.
///
/// A path belongs to a root when it equals the root or lies below it on a
/// component boundary. The longest matching root wins; among equally long
/// matches the first in registration order wins.
pub fn owner_of<'a>(path: &Path, roots: &'a [PathBuf]) -> Option<&'a Path> {
    let mut best: Option<&'a Path> = None;
    for root in roots {
        if !path.starts_with(root) {
            continue;
        }
        let longer = best.is_none_or(|b| root.components().count() > b.components().count());
        if longer {
            best = Some(root.as_path());
        }
    }
    best
}

/// Whether `path` names a VCS bookkeeping directory.
pub fn is_vcs_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| VCS_DIRS.contains(&name))
}

/// The directory watched for metadata changes of `root`.
///
/// Git replaces `HEAD` and `index` by renaming a lock file over them, which
/// drops any watch on the file itself, so the directory is watched instead.
pub fn metadata_dir(root: &Path) -> PathBuf {
    root.join(METADATA_DIR)
}

/// The metadata files tracked for `root`, whether or not they exist.
pub fn metadata_files(root: &Path) -> Vec<PathBuf> {
    let dir = metadata_dir(root);
    METADATA_NAMES.iter().map(|name| dir.join(name)).collect()
}

/// Whether `path` is one of the metadata files of `root` itself.
///
/// Metadata files of nested checkouts (a vendored package's `.git/HEAD`)
/// do not count.
pub fn is_metadata_file(root: &Path, path: &Path) -> bool {
    path.parent() == Some(metadata_dir(root).as_path())
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| METADATA_NAMES.contains(&name))
}

/// Whether `path` lies inside the metadata directory of `root`.
///
/// Lock files, refs and the rest of the VCS bookkeeping under it are never
/// reported on their own.
pub fn is_vcs_internal(root: &Path, path: &Path) -> bool {
    let dir = metadata_dir(root);
    path != dir && path.starts_with(&dir)
}
