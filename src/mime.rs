//! MIME resolution: a closed extension/filename table,
//! deliberately not the open-ended `mime_guess` crate — callers want
//! a fixed set of types this server understands, not best-effort sniffing
//! of arbitrary file formats.

/// Resolve a path's MIME type from its filename. Special filenames (no
/// extension) are checked first, then the extension table, falling back
/// to `text/plain`.
pub fn resolve(path: &str) -> &'static str {
    let filename = path.rsplit(['/', '\\']).next().unwrap_or(path);

    if let Some(mime) = special_filename(filename) {
        return mime;
    }

    match filename.rsplit_once('.') {
        Some((_, ext)) => extension(&ext.to_lowercase()).unwrap_or("text/plain"),
        None => "text/plain",
    }
}

fn special_filename(name: &str) -> Option<&'static str> {
    match name {
        "Dockerfile" => Some("text/x-dockerfile"),
        "Makefile" | "GNUmakefile" => Some("text/x-makefile"),
        "Jenkinsfile" => Some("text/x-groovy"),
        "Vagrantfile" => Some("text/x-ruby"),
        "Gemfile" => Some("text/x-ruby"),
        "Rakefile" => Some("text/x-ruby"),
        "CMakeLists.txt" => Some("text/x-cmake"),
        _ => None,
    }
}

fn extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "rs" => "text/x-rust",
        "go" => "text/x-go",
        "py" | "pyi" => "text/x-python",
        "rb" => "text/x-ruby",
        "js" | "mjs" | "cjs" => "text/javascript",
        "ts" | "mts" | "cts" => "text/x-typescript",
        "tsx" | "jsx" => "text/jsx",
        "java" => "text/x-java",
        "kt" | "kts" => "text/x-kotlin",
        "c" | "h" => "text/x-c",
        "cc" | "cpp" | "cxx" | "hpp" | "hxx" => "text/x-c++",
        "cs" => "text/x-csharp",
        "php" => "text/x-php",
        "swift" => "text/x-swift",
        "scala" => "text/x-scala",
        "sh" | "bash" | "zsh" => "text/x-shellscript",
        "sql" => "text/x-sql",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "scss" | "sass" => "text/x-scss",
        "json" => "application/json",
        "yaml" | "yml" => "application/x-yaml",
        "toml" => "application/toml",
        "xml" => "application/xml",
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        "lock" => "text/plain",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_source_extensions() {
        assert_eq!(resolve("src/main.rs"), "text/x-rust");
        assert_eq!(resolve("pkg/handler.go"), "text/x-go");
        assert_eq!(resolve("scripts/run.py"), "text/x-python");
    }

    #[test]
    fn resolves_special_filenames_without_extension() {
        assert_eq!(resolve("project/Dockerfile"), "text/x-dockerfile");
        assert_eq!(resolve("Makefile"), "text/x-makefile");
        assert_eq!(resolve("nested/dir/CMakeLists.txt"), "text/x-cmake");
    }

    #[test]
    fn unknown_extension_falls_back_to_plain_text() {
        assert_eq!(resolve("data.unknownext"), "text/plain");
        assert_eq!(resolve("no_extension_file"), "text/plain");
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert_eq!(resolve("README.MD"), "text/markdown");
    }
}
