//! Vocabulary and URL arithmetic for the Simple Repository API.

pub mod filter;

/// The two backend indexes the proxy can serve from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Upstream {
    Public,
    Private,
}

/// Normalizes a package name: lowercase, underscores mapped to hyphens.
///
/// Applied at every cache lookup and every upstream URL construction so
/// `Test_Pkg`, `test-pkg` and `TEST-PKG` resolve to the same entry.
pub fn normalize_package_name(name: &str) -> String {
    name.to_ascii_lowercase().replace('_', "-")
}

/// Derives a package name from an artifact filename: strip the first
/// recognized suffix (`.whl`, `.tar.gz`, `.zip`), split on `-`, take the
/// first segment.
///
/// Hyphenated project names (`python-dateutil`) are truncated to their
/// first segment by this rule. Kept for compatibility with the clients
/// this proxy fronts; pip selects artifacts by full filename, so the
/// lossy name only feeds the source decision.
pub fn package_from_filename(filename: &str) -> Option<&str> {
    const SUFFIXES: [&str; 3] = [".whl", ".tar.gz", ".zip"];

    let stem = SUFFIXES
        .iter()
        .find_map(|suffix| filename.strip_suffix(suffix))?;
    match stem.split('-').next() {
        Some("") | None => None,
        Some(first) => Some(first),
    }
}

/// Builds the `{base}/{package}/` index URL, with exactly one slash
/// between the base and the package segment.
pub fn simple_index_url(base: &str, package: &str) -> String {
    format!("{}/{}/", base.trim_end_matches('/'), package)
}

/// The host a private index serves files from: its index base with the
/// `/simple/` suffix stripped.
pub fn private_files_base(private_base: &str) -> String {
    let trimmed = private_base.trim_end_matches('/');
    trimmed.strip_suffix("/simple").unwrap_or(trimmed).to_string()
}

/// Joins a file host and a request path with exactly one slash.
pub fn join_file_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
