//! Project detection: infer a project's display
//! name and type from manifest files at its root, in priority order, with
//! a directory-name fallback when none match.

use std::path::Path;

/// Detected project type, used to tailor search heuristics (e.g. which
/// symbol kinds matter) elsewhere in the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Go,
    Node,
    Python,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub name: String,
    pub project_type: ProjectType,
}

/// Probe `root` for manifest files in priority order (`go.mod` →
/// `package.json` → `pyproject.toml`), falling back to the directory's
/// base name with an unknown type.
pub fn detect(root: &Path) -> ProjectInfo {
    if let Some(info) = detect_go(root) {
        return info;
    }
    if let Some(info) = detect_node(root) {
        return info;
    }
    if let Some(info) = detect_python(root) {
        return info;
    }
    fallback(root)
}

fn detect_go(root: &Path) -> Option<ProjectInfo> {
    let content = std::fs::read_to_string(root.join("go.mod")).ok()?;
    let module_line = content.lines().find(|l| l.trim_start().starts_with("module "))?;
    let module_path = module_line.trim_start().trim_start_matches("module ").trim();
    let name = module_path.rsplit('/').next().unwrap_or(module_path).to_string();
    Some(ProjectInfo {
        name,
        project_type: ProjectType::Go,
    })
}

fn detect_node(root: &Path) -> Option<ProjectInfo> {
    let content = std::fs::read_to_string(root.join("package.json")).ok()?;
    let json: serde_json::Value = serde_json::from_str(&content).ok()?;
    let raw_name = json.get("name")?.as_str()?;
    let name = unscope_package_name(raw_name);
    Some(ProjectInfo {
        name,
        project_type: ProjectType::Node,
    })
}

/// `@org/name` → `name`; unscoped names pass through unchanged.
fn unscope_package_name(raw: &str) -> String {
    if let Some(stripped) = raw.strip_prefix('@') {
        if let Some((_, name)) = stripped.split_once('/') {
            return name.to_string();
        }
    }
    raw.to_string()
}

fn detect_python(root: &Path) -> Option<ProjectInfo> {
    let content = std::fs::read_to_string(root.join("pyproject.toml")).ok()?;
    let parsed: toml::Value = content.parse().ok()?;
    let name = parsed
        .get("project")
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
        .or_else(|| {
            parsed
                .get("tool")
                .and_then(|t| t.get("poetry"))
                .and_then(|p| p.get("name"))
                .and_then(|n| n.as_str())
        })?
        .to_string();
    Some(ProjectInfo {
        name,
        project_type: ProjectType::Python,
    })
}

fn fallback(root: &Path) -> ProjectInfo {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string());
    ProjectInfo {
        name,
        project_type: ProjectType::Unknown,
    }
}
