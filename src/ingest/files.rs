use std::path::{Path, PathBuf};

use serde_json::Value;
use walkdir::WalkDir;

use super::IngestContext;
use crate::error::{ErrorKind, IssueLevel, IssueType};
use crate::issues::{to_slash, FileIssueCallback};
use crate::resource_location::{ResourceLocation, ResourceLocationError};
use crate::schema::SchemaKind;

pub const DATA_DIR: &str = ".data";
pub const CONTENT_DIR: &str = ".content";

/// A JSON file below `.data/<namespace>/<category>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub path: PathBuf,
    /// Path relative to the docs root.
    pub relative: String,
    pub namespace: String,
    /// Path below the category directory, without the `.json` extension.
    pub sub_path: String,
}

impl DataFile {
    pub fn location(&self) -> Result<ResourceLocation, ResourceLocationError> {
        ResourceLocation::new(self.namespace.as_str(), self.sub_path.as_str())
    }
}

/// Lists `.data/<ns>/<category>/**/*.json` in traversal order.
pub fn data_files(docs_root: &Path, category: &str) -> Vec<DataFile> {
    let data_root = docs_root.join(DATA_DIR);
    let namespaces = WalkDir::new(&data_root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir());

    let mut files = Vec::new();
    for ns_entry in namespaces {
        let namespace = ns_entry.file_name().to_string_lossy().into_owned();
        let base = ns_entry.path().join(category);
        for entry in WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(below) = path.strip_prefix(&base) else {
                continue;
            };
            let relative = path.strip_prefix(docs_root).unwrap_or(path);
            files.push(DataFile {
                path: path.to_path_buf(),
                relative: to_slash(relative),
                namespace: namespace.clone(),
                sub_path: to_slash(&below.with_extension("")),
            });
        }
    }
    files
}

/// Reads and parses a JSON document.
pub fn read_json(path: &Path) -> Result<Value, String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("cannot read file: {e}"))?;
    serde_json::from_str(&content).map_err(|e| format!("invalid JSON: {e}"))
}

/// A data file that passed location, syntax and schema checks.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub id: ResourceLocation,
    pub json: Value,
    pub issues: FileIssueCallback,
}

/// Runs the per-file validation chain: resource location, then JSON syntax,
/// then schema. The first failure is reported and the file is skipped.
pub async fn load_data_file(ctx: &IngestContext, file: &DataFile, kind: SchemaKind) -> Option<LoadedFile> {
    let issues = ctx.issues.file(&file.relative);

    let id = match file.location() {
        Ok(id) => id,
        Err(e) => {
            issues
                .add_issue(IssueLevel::Error, IssueType::File, ErrorKind::InvalidResloc, e.to_string())
                .await;
            return None;
        }
    };

    let json = match read_json(&file.path) {
        Ok(json) => json,
        Err(message) => {
            issues
                .add_issue(IssueLevel::Error, IssueType::File, ErrorKind::InvalidFile, message)
                .await;
            return None;
        }
    };

    if let Some(message) = ctx.schemas.validate(kind, &json) {
        issues
            .add_issue(IssueLevel::Error, IssueType::File, ErrorKind::InvalidFormat, message)
            .await;
        return None;
    }

    Some(LoadedFile { id, json, issues })
}
