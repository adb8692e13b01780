//! Resource surface: `file://` reads of indexed
//! source under a configured root, bounded to 1 MiB, plus a
//! `query_metrics` JSON resource. Path validation rejects traversal
//! outside the root the same way a scoped filesystem scan would.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::errors::CoreError;
use crate::metrics::QueryMetrics;

pub const RESOURCE_QUERY_METRICS: &str = "codesift://query_metrics";
const FILE_SCHEME: &str = "file://";
const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Syntactic check on the relative path carried by a `file://` URI, before
/// any filesystem access. Rejects empty paths, absolute paths (`/a`,
/// `C:\x`), and any path whose components walk above the root (`../x`,
/// `a/../../b`) — but not a path that merely *contains* `..` inside a
/// segment (`a/b..c` is a legal filename fragment).
fn validate_relative_path(path: &str) -> Result<(), CoreError> {
    if path.is_empty() {
        return Err(CoreError::invalid_params("resource path must not be empty"));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(CoreError::invalid_params(format!(
            "resource path must be relative: {path}"
        )));
    }
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Err(CoreError::invalid_params(format!(
            "resource path must be relative: {path}"
        )));
    }

    let mut depth: i32 = 0;
    for component in path.split(['/', '\\']) {
        match component {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return Err(CoreError::invalid_params(format!(
                        "resource path escapes the indexed root: {path}"
                    )));
                }
            }
            _ => depth += 1,
        }
    }

    Ok(())
}

/// Resolve and read a `file://<relative-path>` URI, refusing anything
/// that escapes `root` (`../`, absolute paths, symlinks that resolve
/// outside once canonicalized) and anything over 1 MiB.
pub fn read_file_resource(root: &Path, uri: &str) -> Result<String, CoreError> {
    let path = uri
        .strip_prefix(FILE_SCHEME)
        .ok_or_else(|| CoreError::invalid_params(format!("unsupported resource URI: {uri}")))?;

    validate_relative_path(path)?;

    let candidate: PathBuf = root.join(path);

    let canonical_root = root
        .canonicalize()
        .map_err(|e| CoreError::internal(anyhow::anyhow!(e)))?;
    let canonical = candidate
        .canonicalize()
        .map_err(|_| CoreError::file_not_found(format!("no such file: {uri}")))?;

    if !canonical.starts_with(&canonical_root) {
        return Err(CoreError::invalid_params(format!(
            "resource path escapes the indexed root: {uri}"
        )));
    }

    let metadata = std::fs::metadata(&canonical).map_err(|e| CoreError::internal(anyhow::anyhow!(e)))?;
    if metadata.len() > MAX_FILE_BYTES {
        return Err(CoreError::too_large(format!(
            "resource exceeds {MAX_FILE_BYTES} bytes: {uri}"
        )));
    }

    std::fs::read_to_string(&canonical).map_err(|e| CoreError::internal(anyhow::anyhow!(e)))
}

pub fn query_metrics_resource(metrics: &QueryMetrics) -> Value {
    let snapshot = metrics.snapshot();
    json!({
        "total_queries": snapshot.total_queries,
        "queries_by_tool": snapshot.queries_by_tool,
        "queries_by_type": snapshot.queries_by_type,
        "zero_result_count": snapshot.zero_result_count,
        "zero_result_rate": snapshot.zero_result_rate,
        "latency_buckets": {
            "under_10ms": snapshot.under_10ms,
            "under_50ms": snapshot.under_50ms,
            "under_100ms": snapshot.under_100ms,
            "under_500ms": snapshot.under_500ms,
            "over_500ms": snapshot.over_500ms,
        },
        "top_terms": snapshot.top_terms,
        "recent_zero_results": snapshot.recent_zero_results,
        "exact_repeat_count": snapshot.exact_repeat_count,
        "similar_query_count": snapshot.similar_query_count,
    })
}

/// Builds the `file://<relative-path>` URI advertised to clients; `root`
/// is only used by [`read_file_resource`] to resolve it back.
pub fn file_uri(relative: &str) -> String {
    format!("{FILE_SCHEME}{relative}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reads_file_within_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.rs"), "fn main() {}").unwrap();
        let content = read_file_resource(dir.path(), &file_uri("lib.rs")).unwrap();
        assert_eq!(content, "fn main() {}");
    }

    #[test]
    fn rejects_path_traversal_outside_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("project");
        fs::create_dir_all(&root).unwrap();
        fs::write(outer.path().join("secret.txt"), "top secret").unwrap();

        let result = read_file_resource(&root, &file_uri("../secret.txt"));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let big = vec![b'a'; (MAX_FILE_BYTES + 1) as usize];
        fs::write(dir.path().join("big.txt"), big).unwrap();
        let err = read_file_resource(dir.path(), &file_uri("big.txt")).unwrap_err();
        assert_eq!(err.jsonrpc_code(), -32005);
    }

    #[test]
    fn rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_file_resource(dir.path(), &file_uri("missing.rs")).unwrap_err();
        assert_eq!(err.jsonrpc_code(), -32004);
    }

    #[test]
    fn validate_relative_path_rejects_boundary_cases() {
        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("/a").is_err());
        assert!(validate_relative_path("C:\\x").is_err());
        assert!(validate_relative_path("../x").is_err());
        assert!(validate_relative_path("a/../../b").is_err());
    }

    #[test]
    fn validate_relative_path_accepts_embedded_dotdot() {
        assert!(validate_relative_path("a/b..c").is_ok());
    }

    #[test]
    fn query_metrics_resource_reflects_snapshot() {
        let metrics = QueryMetrics::default();
        let value = query_metrics_resource(&metrics);
        assert_eq!(value["total_queries"], 0);
    }
}
