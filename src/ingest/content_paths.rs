use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use walkdir::WalkDir;

use super::files::CONTENT_DIR;
use super::{IngestContext, SubIngestor};
use crate::error::{ErrorKind, IssueLevel, IssueType};
use crate::issues::to_slash;
use crate::models::{PreparationResult, PreparedData, StubContentPage};
use crate::resource_location::ResourceLocation;

/// Maps content page ids to their paths below `.content`.
pub struct ContentPathsSubIngestor {
    ctx: Arc<IngestContext>,
    pages: BTreeMap<ResourceLocation, PreparedData<StubContentPage>>,
}

/// Parsed `---` block at the top of a page.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FrontMatter {
    pub attributes: BTreeMap<String, String>,
}

impl FrontMatter {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FrontMatterError {
    Missing,
    Unterminated,
    InvalidLine(String),
}

/// Reads `key: value` pairs from the leading `---` block. Values may be
/// wrapped in single or double quotes.
pub fn parse_front_matter(content: &str) -> Result<FrontMatter, FrontMatterError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content.lines();
    if lines.next().map(str::trim_end) != Some("---") {
        return Err(FrontMatterError::Missing);
    }

    let mut attributes = BTreeMap::new();
    for line in lines {
        let line = line.trim_end();
        if line == "---" {
            return Ok(FrontMatter { attributes });
        }
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        // Nested values belong to the previous key.
        if line.starts_with(' ') || line.starts_with('\t') || line.trim_start().starts_with("- ") {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(FrontMatterError::InvalidLine(line.to_string()));
        };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        attributes.insert(key.trim().to_string(), value.to_string());
    }
    Err(FrontMatterError::Unterminated)
}

fn has_heading(content: &str) -> bool {
    content.lines().any(|l| l.trim_start().starts_with("# "))
}

fn is_page(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("md" | "mdx"))
}

impl ContentPathsSubIngestor {
    pub fn new(ctx: Arc<IngestContext>) -> Self {
        Self {
            ctx,
            pages: BTreeMap::new(),
        }
    }

    async fn scan_page(&mut self, path: &Path) {
        let relative = to_slash(path.strip_prefix(&self.ctx.docs_root).unwrap_or(path));
        let issues = self.ctx.issues.file(&relative);

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                issues
                    .add_issue(IssueLevel::Error, IssueType::Page, ErrorKind::InvalidFile, format!("cannot read page: {e}"))
                    .await;
                return;
            }
        };

        let front_matter = match parse_front_matter(&content) {
            Ok(front_matter) => front_matter,
            Err(e) => {
                let details = match e {
                    FrontMatterError::Missing => "page has no front matter".to_string(),
                    FrontMatterError::Unterminated => "front matter is not terminated".to_string(),
                    FrontMatterError::InvalidLine(line) => format!("invalid front matter line: {line}"),
                };
                issues
                    .add_issue(IssueLevel::Error, IssueType::Page, ErrorKind::InvalidFrontmatter, details)
                    .await;
                return;
            }
        };

        let Some(raw_id) = front_matter.get("id") else {
            issues
                .add_issue(
                    IssueLevel::Error,
                    IssueType::Page,
                    ErrorKind::MissingRequiredAttribute,
                    "front matter is missing 'id'",
                )
                .await;
            return;
        };
        let id = match ResourceLocation::parse(raw_id) {
            Ok(id) => id,
            Err(e) => {
                issues
                    .add_issue(IssueLevel::Error, IssueType::Page, ErrorKind::InvalidResloc, e.to_string())
                    .await;
                return;
            }
        };

        if front_matter.get("title").is_none() && !has_heading(&content) {
            issues
                .add_issue(IssueLevel::Warning, IssueType::Page, ErrorKind::NoPageTitle, format!("page {id} has no title"))
                .await;
        }

        if let Some(existing) = self.pages.get(&id) {
            issues
                .add_issue(
                    IssueLevel::Warning,
                    IssueType::Page,
                    ErrorKind::DuplicatePage,
                    format!("page id {id} is already used by {}", existing.data.path),
                )
                .await;
            return;
        }

        let page = StubContentPage {
            id: id.clone(),
            path: relative,
        };
        self.pages.insert(id, PreparedData::new(page, issues));
    }
}

#[async_trait]
impl SubIngestor for ContentPathsSubIngestor {
    fn name(&self) -> &'static str {
        "content_paths"
    }

    async fn prepare(&mut self) -> Result<PreparationResult> {
        let content_root = self.ctx.docs_root.join(CONTENT_DIR);
        let pages: Vec<_> = WalkDir::new(&content_root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && is_page(e.path()))
            .map(|e| e.into_path())
            .collect();

        for path in pages {
            self.scan_page(&path).await;
        }

        self.ctx.log.info(&format!("Found {} content pages", self.pages.len()));
        Ok(PreparationResult::new(self.pages.keys().map(|id| id.to_string()).collect()))
    }

    async fn execute(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        for prepared in self.pages.values() {
            let page = &prepared.data;
            match ctx.db.get_project_content_path(&ctx.project, &page.id).await {
                Ok(Some(existing)) if existing == page.path => continue,
                Ok(Some(existing)) => {
                    prepared
                        .issues
                        .add_issue(
                            IssueLevel::Warning,
                            IssueType::Page,
                            ErrorKind::DuplicatePage,
                            format!("page id {} is already mapped to {existing}", page.id),
                        )
                        .await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    prepared
                        .issues
                        .add_issue(IssueLevel::Error, IssueType::Internal, ErrorKind::Unknown, format!("{e:#}"))
                        .await;
                    continue;
                }
            }

            if let Err(e) = ctx.db.add_project_content_page(&ctx.project, page).await {
                prepared
                    .issues
                    .add_issue(IssueLevel::Error, IssueType::Internal, ErrorKind::Unknown, format!("{e:#}"))
                    .await;
            }
        }
        Ok(())
    }
}
