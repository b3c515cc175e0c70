use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use walkdir::WalkDir;

use super::files::read_json;
use super::{IngestContext, SubIngestor};
use crate::error::{ErrorKind, IssueLevel, IssueType};
use crate::issues::to_slash;
use crate::models::PreparationResult;
use crate::schema::SchemaKind;

pub const FOLDER_METADATA_FILE: &str = "_meta.json";

/// Validates `_meta.json` folder metadata in the documentation tree.
///
/// Hidden directories (`.data`, `.content`, `.git`) are not part of the
/// navigable docs and are skipped.
pub struct MetadataSubIngestor {
    ctx: Arc<IngestContext>,
    validated: usize,
}

impl MetadataSubIngestor {
    pub fn new(ctx: Arc<IngestContext>) -> Self {
        Self { ctx, validated: 0 }
    }

    async fn check_file(&mut self, path: &Path) {
        let relative = to_slash(path.strip_prefix(&self.ctx.docs_root).unwrap_or(path));
        let issues = self.ctx.issues.file(&relative);

        let json = match read_json(path) {
            Ok(json) => json,
            Err(message) => {
                issues
                    .add_issue(IssueLevel::Error, IssueType::File, ErrorKind::InvalidFile, message)
                    .await;
                return;
            }
        };
        if let Some(message) = self.ctx.schemas.validate(SchemaKind::FolderMetadata, &json) {
            issues
                .add_issue(IssueLevel::Error, IssueType::File, ErrorKind::InvalidFormat, message)
                .await;
            return;
        }

        let folder = path.parent().unwrap_or(&self.ctx.docs_root);
        if let Value::Object(entries) = &json {
            for name in entries.keys() {
                if !entry_exists(folder, name) {
                    // Persisted in the background; the deployment flushes before finishing.
                    issues.add_issue_async(
                        IssueLevel::Warning,
                        IssueType::Meta,
                        ErrorKind::InvalidMeta,
                        format!("entry '{name}' does not match a page or folder"),
                    );
                }
            }
        }
        self.validated += 1;
    }
}

fn entry_exists(folder: &Path, name: &str) -> bool {
    [name.to_string(), format!("{name}.md"), format!("{name}.mdx")]
        .iter()
        .any(|candidate| folder.join(candidate).exists())
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

#[async_trait]
impl SubIngestor for MetadataSubIngestor {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn prepare(&mut self) -> Result<PreparationResult> {
        let files: Vec<_> = WalkDir::new(&self.ctx.docs_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && e.file_name() == FOLDER_METADATA_FILE)
            .map(|e| e.into_path())
            .collect();

        for path in files {
            self.check_file(&path).await;
        }
        tracing::debug!(project = %self.ctx.project, files = self.validated, "folder metadata checked");
        Ok(PreparationResult::empty())
    }

    async fn execute(&mut self) -> Result<()> {
        Ok(())
    }
}
