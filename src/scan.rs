//! Project tree scanner.
//!
//! Walks a project root and returns the text files worth chunking, sorted
//! by relative path. Files that are ignored by rule (dependency folders,
//! lock files, unsupported extensions) are silently left out; files that
//! *look* eligible but cannot be used (too large, binary, unreadable) are
//! reported as [`SkippedFile`]s so the run can continue.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::ScanConfig;
use crate::error::{KnowledgeError, Result};
use crate::models::SkippedFile;

pub const TEXT_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "tsx", "jsx", "html", "css", "scss", "sass", "json", "md", "txt", "yml",
    "yaml", "xml", "sql", "sh", "bat", "java", "c", "cpp", "h", "hpp", "cs", "php", "rb", "go",
    "rs", "swift", "kt", "scala", "r", "m", "mm", "dart", "vue", "svelte", "toml",
];

pub const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    "__pycache__",
    ".pytest_cache",
    "dist",
    "build",
    "target",
    "bin",
    "obj",
    ".next",
    ".nuxt",
    "coverage",
    ".vscode",
    ".idea",
    "logs",
    "temp",
    "tmp",
];

pub const IGNORED_FILES: &[&str] = &[
    ".gitignore",
    ".gitattributes",
    ".env",
    ".env.local",
    ".env.production",
    "package-lock.json",
    "yarn.lock",
    "Pipfile.lock",
    "poetry.lock",
    ".DS_Store",
    "Thumbs.db",
];

/// A readable text file of the project.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the project root, `/`-separated.
    pub relative_path: String,
    pub size_bytes: u64,
    pub text: String,
}

impl SourceFile {
    pub fn extension(&self) -> String {
        Path::new(&self.relative_path)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<SourceFile>,
    pub skipped: Vec<SkippedFile>,
}

/// Directory name of the project root, used as the content folder key.
pub fn project_name(project_path: &Path) -> Result<String> {
    let canonical = project_path
        .canonicalize()
        .unwrap_or_else(|_| project_path.to_path_buf());
    canonical
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            KnowledgeError::Validation(format!(
                "cannot derive a project name from {}",
                project_path.display()
            ))
        })
}

/// Fail unless `project_path` is an existing directory.
pub fn ensure_project_dir(project_path: &Path) -> Result<()> {
    if !project_path.is_dir() {
        return Err(KnowledgeError::Validation(format!(
            "project path does not exist or is not a directory: {}",
            project_path.display()
        )));
    }
    Ok(())
}

pub fn scan_project(root: &Path, config: &ScanConfig) -> Result<ScanResult> {
    ensure_project_dir(root)?;
    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut result = ScanResult::default();

    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| relative_str(root, p))
                    .unwrap_or_default();
                warn!(path = %path, error = %e, "skipping unreadable entry");
                result.skipped.push(SkippedFile {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel_str = relative_str(root, path);

        if exclude_set.is_match(&rel_str) || !is_supported(path) {
            continue;
        }

        match read_source_file(path, &rel_str, config.max_file_bytes) {
            Ok(file) => result.files.push(file),
            Err(reason) => {
                warn!(path = %rel_str, reason = %reason, "skipping file");
                result.skipped.push(SkippedFile {
                    path: rel_str,
                    reason,
                });
            }
        }
    }

    result
        .files
        .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    debug!(
        files = result.files.len(),
        skipped = result.skipped.len(),
        "scan finished"
    );
    Ok(result)
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORED_DIRS.contains(&name))
            .unwrap_or(false)
}

/// Extension allow-list plus the ignored file names.
pub fn is_supported(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    if IGNORED_FILES.contains(&name.as_ref()) {
        return false;
    }
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            TEXT_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn read_source_file(
    path: &Path,
    relative_path: &str,
    max_bytes: u64,
) -> std::result::Result<SourceFile, String> {
    let metadata = std::fs::metadata(path).map_err(|e| e.to_string())?;
    if metadata.len() > max_bytes {
        return Err(format!(
            "file is {} bytes, over the {} byte limit",
            metadata.len(),
            max_bytes
        ));
    }

    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let text = decode_text(&bytes).ok_or_else(|| "binary content".to_string())?;

    Ok(SourceFile {
        relative_path: relative_path.to_string(),
        size_bytes: metadata.len(),
        text,
    })
}

/// UTF-8 (BOM stripped), falling back to Latin-1. NUL bytes mean binary.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    if bytes.contains(&0) {
        return None;
    }
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => Some(s.to_string()),
        Err(_) => Some(bytes.iter().map(|&b| b as char).collect()),
    }
}

fn relative_str(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| KnowledgeError::Config(format!("bad exclude glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| KnowledgeError::Config(format!("bad exclude globs: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "src/b.rs", b"fn b() {}");
        write(root, "src/a.py", b"def a(): pass");
        write(root, "node_modules/lib/index.js", b"module.exports = 1");
        write(root, "package-lock.json", b"{}");
        write(root, "logo.png", b"\x89PNG");
        write(root, "README.md", b"# readme");

        let result = scan_project(root, &ScanConfig::default()).unwrap();
        let paths: Vec<&str> = result
            .files
            .iter()
            .map(|f| f.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["README.md", "src/a.py", "src/b.rs"]);
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn test_binary_and_oversized_are_reported() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "data.json", b"{\"a\":\x00}");
        write(root, "big.txt", &vec![b'x'; 2048]);
        write(root, "ok.txt", b"fine");

        let config = ScanConfig {
            max_file_bytes: 1024,
            ..ScanConfig::default()
        };
        let result = scan_project(root, &config).unwrap();
        assert_eq!(result.files.len(), 1);
        let mut skipped: Vec<&str> = result.skipped.iter().map(|s| s.path.as_str()).collect();
        skipped.sort();
        assert_eq!(skipped, vec!["big.txt", "data.json"]);
    }

    #[test]
    fn test_exclude_globs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "docs/guide.md", b"guide");
        write(root, "src/lib.rs", b"pub fn x() {}");

        let config = ScanConfig {
            exclude_globs: vec!["docs/**".to_string()],
            ..ScanConfig::default()
        };
        let result = scan_project(root, &config).unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, "src/lib.rs");
    }

    #[test]
    fn test_decode_text_latin1_fallback_and_bom() {
        assert_eq!(decode_text(b"\xEF\xBB\xBFhi").as_deref(), Some("hi"));
        assert_eq!(decode_text(b"caf\xE9").as_deref(), Some("café"));
        assert!(decode_text(b"a\x00b").is_none());
    }

    #[test]
    fn test_missing_project_is_validation_error() {
        let err = scan_project(Path::new("/definitely/not/here"), &ScanConfig::default())
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::Validation(_)));
    }
}
