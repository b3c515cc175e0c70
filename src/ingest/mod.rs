//! Content ingestion pipeline.
//!
//! An [`Ingestor`] runs a fixed sequence of [`SubIngestor`]s over a docs
//! root, each one responsible for a single area of the working tree:
//!
//! | Sub-ingestor | Reads |
//! |--------------|-------|
//! | [`ContentPathsSubIngestor`] | `.content/**/*.md(x)` front matter |
//! | [`TagsSubIngestor`] | `.data/<ns>/tags/item` |
//! | [`RecipesSubIngestor`] | `.data/<ns>/recipe_type`, `recipe`, `workbenches` |
//! | [`MetadataSubIngestor`] | `**/_meta.json` |
//!
//! Every sub-ingestor goes through three phases. `prepare` scans and stages
//! records without touching the database, `execute` persists them, and
//! `finish` runs once every sub-ingestor has executed. Between `prepare` and
//! `execute` the orchestrator persists the union of discovered item ids.

pub mod content_paths;
pub mod files;
pub mod metadata;
pub mod recipes;
pub mod tags;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::db::ProjectDatabaseAccess;
use crate::issues::IssueCallback;
use crate::models::PreparationResult;
use crate::progress::LogSink;
use crate::resource_location::ResourceLocation;
use crate::schema::SchemaValidator;

pub use content_paths::ContentPathsSubIngestor;
pub use metadata::MetadataSubIngestor;
pub use recipes::RecipesSubIngestor;
pub use tags::TagsSubIngestor;

/// Collaborators shared by every sub-ingestor of one run.
pub struct IngestContext {
    pub project: String,
    /// Namespace whose tagged items count as the project's own items.
    pub modid: String,
    pub docs_root: PathBuf,
    pub db: Arc<dyn ProjectDatabaseAccess>,
    pub issues: Arc<IssueCallback>,
    pub schemas: Arc<dyn SchemaValidator>,
    pub log: Arc<dyn LogSink>,
}

#[async_trait]
pub trait SubIngestor: Send {
    fn name(&self) -> &'static str;

    /// Read-only scan that stages records and reports discovered ids.
    async fn prepare(&mut self) -> Result<PreparationResult>;

    /// Persists the staged records.
    async fn execute(&mut self) -> Result<()>;

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct Ingestor {
    ctx: Arc<IngestContext>,
    ingestors: Vec<Box<dyn SubIngestor>>,
}

impl Ingestor {
    pub fn new(ctx: Arc<IngestContext>) -> Self {
        let ingestors: Vec<Box<dyn SubIngestor>> = vec![
            Box::new(ContentPathsSubIngestor::new(ctx.clone())),
            Box::new(TagsSubIngestor::new(ctx.clone())),
            Box::new(RecipesSubIngestor::new(ctx.clone())),
            Box::new(MetadataSubIngestor::new(ctx.clone())),
        ];
        Self::with_ingestors(ctx, ingestors)
    }

    pub fn with_ingestors(ctx: Arc<IngestContext>, ingestors: Vec<Box<dyn SubIngestor>>) -> Self {
        Self { ctx, ingestors }
    }

    /// Runs every sub-ingestor to completion and returns the union of the
    /// discovered item ids.
    ///
    /// An error from any phase stops the run; it has already been logged.
    pub async fn run(&mut self) -> Result<PreparationResult> {
        let ctx = self.ctx.clone();
        let mut discovered = PreparationResult::empty();

        for ingestor in &mut self.ingestors {
            ctx.log.info(&format!("Preparing {}", ingestor.name()));
            let prepared = run_phase(&ctx, ingestor.name(), "prepare", ingestor.prepare()).await?;
            tracing::debug!(ingestor = ingestor.name(), items = prepared.items.len(), "prepared");
            discovered.merge(prepared);
        }

        for raw in &discovered.items {
            let item = match ResourceLocation::parse(raw) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(item = %raw, "skipping discovered item: {e}");
                    continue;
                }
            };
            if let Err(e) = ctx.db.add_item(&ctx.project, &item).await {
                ctx.log.error(&format!("Failed to register item {item}: {e:#}"));
            }
        }
        ctx.log.info(&format!("Registered {} items", discovered.items.len()));

        for ingestor in &mut self.ingestors {
            ctx.log.info(&format!("Running {}", ingestor.name()));
            run_phase(&ctx, ingestor.name(), "execute", ingestor.execute()).await?;
        }

        for ingestor in &mut self.ingestors {
            run_phase(&ctx, ingestor.name(), "finish", ingestor.finish()).await?;
        }

        Ok(discovered)
    }
}

async fn run_phase<T>(
    ctx: &IngestContext,
    name: &str,
    phase: &str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match fut.await {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::error!(project = %ctx.project, ingestor = name, phase, "sub-ingestor failed: {e:#}");
            ctx.log.error(&format!("{name} {phase} failed: {e:#}"));
            Err(e.context(format!("{name} {phase} failed")))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::InMemoryDatabase;
    use crate::progress::TracingLog;
    use crate::schema::JsonSchemaValidator;
    use std::path::Path;

    pub fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn context(root: &Path, db: &Arc<InMemoryDatabase>) -> Arc<IngestContext> {
        let log: Arc<dyn LogSink> = Arc::new(TracingLog::new("test"));
        Arc::new(IngestContext {
            project: "demo".into(),
            modid: "mod".into(),
            docs_root: root.to_path_buf(),
            db: db.clone(),
            issues: IssueCallback::new("deploy", None, db.clone(), log.clone()),
            schemas: Arc::new(JsonSchemaValidator::new().unwrap()),
            log,
        })
    }
}
