//! Heuristic project inventory for the summarizer.
//!
//! Walks the project once, classifies code files by a few textual cues and
//! pulls out imports, exports and top-level definitions. The result is
//! persisted as `file_structure.json` and rendered into the analysis prompt.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::scan::{self, decode_text};

const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "__pycache__",
    ".next",
    ".vscode",
    ".idea",
    "coverage",
    ".pytest_cache",
    "vendor",
    "tmp",
    "temp",
    ".cache",
    ".nuxt",
    ".output",
    ".svelte-kit",
    ".expo",
    "logs",
    "target",
];

const CODE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "py", "pyx", "java", "kt", "swift", "m", "cpp", "c", "h", "hpp",
    "cs", "php", "rb", "go", "rs", "vue", "svelte", "html", "css", "scss", "sass", "sql", "yaml",
    "yml", "json", "toml", "md",
];

const IMPORTANT_CONFIGS: &[&str] = &[
    "package.json",
    "requirements.txt",
    "Dockerfile",
    "docker-compose.yml",
    "tsconfig.json",
    "webpack.config.js",
    "next.config.js",
    "vite.config.js",
    ".env.example",
    "pyproject.toml",
    "setup.py",
    "Cargo.toml",
    "go.mod",
];

const MAX_IMPORTS: usize = 10;
const MAX_EXPORTS: usize = 5;
const MAX_KEY_ELEMENTS: usize = 10;
const IMPORT_SCAN_LINES: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Characters.
    pub size: usize,
    pub lines: usize,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub key_elements: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnologyDetection {
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub config_files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub total_code_files: usize,
    pub total_config_files: usize,
    pub analyzed_files: usize,
}

/// Contents of `file_structure.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStructure {
    pub timestamp: DateTime<Utc>,
    pub project_path: String,
    pub project_name: String,
    /// Every code file found, in walk order.
    pub code_files: Vec<String>,
    pub file_inventory: Vec<FileInfo>,
    pub technology_detection: TechnologyDetection,
    pub summary: InventorySummary,
}

pub fn build_inventory(
    project_path: &Path,
    config: &AnalysisConfig,
    max_file_bytes: u64,
) -> Result<FileStructure> {
    scan::ensure_project_dir(project_path)?;
    let project_name = scan::project_name(project_path)?;

    let mut code_files = Vec::new();
    let mut config_files = Vec::new();
    let mut languages = BTreeSet::new();
    let mut frameworks = BTreeSet::new();
    let mut config_names = Vec::new();

    let walker = WalkDir::new(project_path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && e.file_name()
                        .to_str()
                        .map(|n| EXCLUDED_DIRS.contains(&n))
                        .unwrap_or(false))
        });

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let too_big = entry
            .metadata()
            .map(|m| m.len() > max_file_bytes)
            .unwrap_or(true);
        if too_big {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        let rel = entry
            .path()
            .strip_prefix(project_path)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if IMPORTANT_CONFIGS.contains(&name.as_str()) {
            config_names.push(name);
            config_files.push(rel);
            continue;
        }

        let ext = extension_of(&name);
        if !CODE_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        match ext.as_str() {
            "js" | "ts" => {
                languages.insert("JavaScript/TypeScript");
            }
            "jsx" | "tsx" => {
                languages.insert("JavaScript/TypeScript");
                frameworks.insert("React");
            }
            "py" => {
                languages.insert("Python");
            }
            "rs" => {
                languages.insert("Rust");
            }
            "go" => {
                languages.insert("Go");
            }
            "vue" => {
                frameworks.insert("Vue");
            }
            "svelte" => {
                frameworks.insert("Svelte");
            }
            _ => {}
        }
        code_files.push(rel);
    }

    let file_inventory: Vec<FileInfo> = code_files
        .iter()
        .take(config.max_inventory_files)
        .filter_map(|rel| {
            let bytes = std::fs::read(project_path.join(rel)).ok()?;
            let content = decode_text(&bytes)?;
            Some(describe_file(rel, &content))
        })
        .collect();

    debug!(
        code_files = code_files.len(),
        inventoried = file_inventory.len(),
        "inventory built"
    );

    Ok(FileStructure {
        timestamp: Utc::now(),
        project_path: project_path.display().to_string(),
        project_name,
        summary: InventorySummary {
            total_code_files: code_files.len(),
            total_config_files: config_files.len(),
            analyzed_files: file_inventory.len(),
        },
        code_files,
        file_inventory,
        technology_detection: TechnologyDetection {
            languages: languages.into_iter().map(String::from).collect(),
            frameworks: frameworks.into_iter().map(String::from).collect(),
            config_files: config_names,
        },
    })
}

fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub fn describe_file(relative_path: &str, content: &str) -> FileInfo {
    let ext = extension_of(relative_path);
    FileInfo {
        path: relative_path.to_string(),
        kind: detect_file_type(content, &ext).to_string(),
        size: content.chars().count(),
        lines: content.split('\n').count(),
        imports: extract_imports(content, &ext),
        exports: extract_exports(content, &ext),
        key_elements: extract_key_elements(content, &ext),
    }
}

fn is_js(ext: &str) -> bool {
    matches!(ext, "js" | "jsx" | "ts" | "tsx")
}

pub fn detect_file_type(content: &str, ext: &str) -> &'static str {
    let lower = content.to_lowercase();
    match ext {
        "tsx" | "jsx" => {
            if content.contains("export default")
                && (lower.contains("function") || lower.contains("const"))
            {
                "react_component"
            } else if content.contains("export") {
                "react_module"
            } else {
                "code_file"
            }
        }
        "js" | "ts" => {
            if lower.contains("express") || lower.contains("app.listen") {
                "express_server"
            } else if lower.contains("electron") {
                "electron_main"
            } else if content.contains("export") || content.contains("module.exports") {
                "javascript_module"
            } else {
                "code_file"
            }
        }
        "py" => {
            if lower.contains("fastapi") || lower.contains("flask") {
                "python_api_server"
            } else if content.contains("if __name__ == \"__main__\"")
                || content.contains("if __name__ == '__main__'")
            {
                "python_script"
            } else if content.contains("class ") {
                "python_class_module"
            } else {
                "python_module"
            }
        }
        "rs" => {
            if content.contains("fn main(") {
                "rust_binary"
            } else {
                "rust_module"
            }
        }
        "css" | "scss" | "sass" => "stylesheet",
        "md" => "documentation",
        _ => "code_file",
    }
}

fn clip(line: &str, max_chars: usize) -> String {
    line.chars().take(max_chars).collect()
}

pub fn extract_imports(content: &str, ext: &str) -> Vec<String> {
    let mut imports = Vec::new();
    for line in content.lines().take(IMPORT_SCAN_LINES) {
        let line = line.trim();
        if is_js(ext) {
            if line.starts_with("import ") {
                if let Some((_, from)) = line.rsplit_once(" from ") {
                    imports.push(
                        from.trim()
                            .trim_matches(|c| matches!(c, '\'' | '"' | '`' | ';'))
                            .to_string(),
                    );
                }
            }
        } else if ext == "py" {
            if line.starts_with("import ") || line.starts_with("from ") {
                imports.push(line.to_string());
            }
        } else if ext == "rs" && line.starts_with("use ") {
            imports.push(line.trim_end_matches(';').to_string());
        }
    }
    imports.truncate(MAX_IMPORTS);
    imports
}

pub fn extract_exports(content: &str, ext: &str) -> Vec<String> {
    if !is_js(ext) {
        return Vec::new();
    }
    content
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("export "))
        .take(MAX_EXPORTS)
        .map(|line| clip(line, 100))
        .collect()
}

pub fn extract_key_elements(content: &str, ext: &str) -> Vec<String> {
    let lines = content.lines().map(str::trim);
    if is_js(ext) {
        lines
            .filter(|line| {
                line.starts_with("function ")
                    || (line.starts_with("const ") && line.contains("=>"))
                    || line.starts_with("export function ")
                    || line.starts_with("export const ")
            })
            .take(MAX_KEY_ELEMENTS)
            .map(|line| clip(line, 150))
            .collect()
    } else if ext == "py" {
        lines
            .filter(|line| line.starts_with("def ") || line.starts_with("class "))
            .take(MAX_KEY_ELEMENTS)
            .map(|line| clip(line, 100))
            .collect()
    } else if ext == "rs" {
        lines
            .filter(|line| {
                ["fn ", "pub fn ", "struct ", "pub struct ", "enum ", "pub enum ", "trait ", "pub trait "]
                    .iter()
                    .any(|p| line.starts_with(p))
            })
            .take(MAX_KEY_ELEMENTS)
            .map(|line| clip(line, 100))
            .collect()
    } else {
        Vec::new()
    }
}
