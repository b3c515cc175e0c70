//! Deployment supervisor.
//!
//! A deployment clones a project's documentation repository into
//! `<repos_dir>/<project>`, records its HEAD revision, reads `wiki.json` and
//! runs the [`Ingestor`] over the docs root. Progress is relayed to the
//! project's observers while it runs. Whatever happens, the run ends with
//! [`ConnectionManager::complete`] so observers see a terminal sentinel.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::{Config, GitConfig};
use crate::db::ProjectDatabaseAccess;
use crate::error::{ErrorKind, IssueLevel, IssueType};
use crate::git::RepositoryAcquirer;
use crate::ingest::{IngestContext, Ingestor};
use crate::issues::IssueCallback;
use crate::models::GitRevision;
use crate::progress::{LogSink, RelayLog};
use crate::project_meta::read_project_metadata;
use crate::realtime::ConnectionManager;
use crate::resource_location::is_valid_namespace_char;
use crate::schema::SchemaValidator;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployRequest {
    pub project: String,
    pub url: String,
    pub branch: Option<String>,
    /// Docs root inside the repository, relative. Defaults to the top level.
    pub root: Option<String>,
    pub version_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentOutcome {
    pub deployment_id: String,
    pub project: String,
    pub success: bool,
    pub revision: Option<GitRevision>,
    /// Number of item ids discovered by the ingestion run.
    pub items: usize,
}

pub struct Deployer {
    db: Arc<dyn ProjectDatabaseAccess>,
    connections: Arc<ConnectionManager>,
    schemas: Arc<dyn SchemaValidator>,
    git: GitConfig,
    repos_dir: PathBuf,
}

/// What the stages produced before the run ended, for the outcome.
#[derive(Default)]
struct StageReport {
    revision: Option<GitRevision>,
    items: usize,
}

impl Deployer {
    pub fn new(
        config: &Config,
        db: Arc<dyn ProjectDatabaseAccess>,
        connections: Arc<ConnectionManager>,
        schemas: Arc<dyn SchemaValidator>,
    ) -> Self {
        Self {
            db,
            connections,
            schemas,
            git: config.git.clone(),
            repos_dir: config.storage.repos_dir.clone(),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub async fn deploy(&self, request: DeployRequest) -> Result<DeploymentOutcome> {
        self.deploy_with_id(uuid::Uuid::new_v4().to_string(), request).await
    }

    /// Runs a deployment under a caller-chosen id.
    ///
    /// Only an invalid request is returned as an error. Every failure after
    /// that point is recorded as an issue and reflected in
    /// [`DeploymentOutcome::success`].
    pub async fn deploy_with_id(
        &self,
        deployment_id: String,
        request: DeployRequest,
    ) -> Result<DeploymentOutcome> {
        validate_request(&request)?;
        let project = request.project.clone();

        let (relay, relay_handle) = RelayLog::spawn(self.connections.clone(), project.clone());
        let log: Arc<dyn LogSink> = Arc::new(relay);
        let issues = IssueCallback::new(
            deployment_id.clone(),
            request.version_name.clone(),
            self.db.clone(),
            log.clone(),
        );

        tracing::info!(project = %project, deployment = %deployment_id, url = %request.url, "deployment started");
        log.info(&format!("Starting deployment {deployment_id} of {project}"));

        let report = self.run_stages(&request, &issues, &log).await;

        issues.flush().await;
        let success = !issues.has_errors();
        if success {
            log.info("Deployment finished");
        } else {
            log.error("Deployment finished with errors");
        }
        relay_handle.drain().await;
        self.connections.complete(&project, success).await;

        tracing::info!(project = %project, deployment = %deployment_id, success, items = report.items, "deployment finished");
        Ok(DeploymentOutcome {
            deployment_id,
            project,
            success,
            revision: report.revision,
            items: report.items,
        })
    }

    async fn run_stages(
        &self,
        request: &DeployRequest,
        issues: &Arc<IssueCallback>,
        log: &Arc<dyn LogSink>,
    ) -> StageReport {
        let mut report = StageReport::default();
        let dest = self.repos_dir.join(&request.project);

        if dest.exists() {
            log.info("Removing previous working tree");
            if let Err(e) = tokio::fs::remove_dir_all(&dest).await {
                issues
                    .add_issue(
                        IssueLevel::Error,
                        IssueType::Internal,
                        ErrorKind::Unknown,
                        format!("cannot remove {}: {e}", dest.display()),
                        "",
                    )
                    .await;
                return report;
            }
        }

        let acquirer = RepositoryAcquirer::new(&self.git, log.clone());
        let tree = match acquirer.acquire(&request.url, &dest, request.branch.as_deref()).await {
            Ok(tree) => tree,
            Err(e) => {
                log.error(&format!("Clone failed: {e}"));
                issues
                    .add_issue(IssueLevel::Error, IssueType::GitClone, e.kind, e.message, "")
                    .await;
                if dest.exists() {
                    let _ = tokio::fs::remove_dir_all(&dest).await;
                }
                return report;
            }
        };

        match acquirer.get_latest_revision(&tree).await {
            Ok(revision) => {
                log.info(&format!("Revision {} by {}: {}", revision.hash, revision.author_name, revision.message));
                report.revision = Some(revision);
            }
            Err(e) => {
                issues
                    .add_issue(IssueLevel::Warning, IssueType::GitInfo, ErrorKind::Unknown, format!("{e:#}"), "")
                    .await;
            }
        }

        let docs_root = match request.root.as_deref() {
            Some(root) => tree.path().join(root),
            None => tree.path().to_path_buf(),
        };
        if !docs_root.is_dir() {
            issues
                .add_issue(
                    IssueLevel::Error,
                    IssueType::Meta,
                    ErrorKind::NoPath,
                    format!("docs root '{}' does not exist", request.root.as_deref().unwrap_or(".")),
                    "",
                )
                .await;
            return report;
        }

        let meta = match read_project_metadata(&docs_root) {
            Ok(meta) => meta,
            Err(e) => {
                issues
                    .add_issue(IssueLevel::Error, IssueType::Meta, ErrorKind::InvalidMeta, format!("{e:#}"), "")
                    .await;
                return report;
            }
        };
        if meta.id != request.project {
            log.warn(&format!("wiki.json id '{}' differs from project '{}'", meta.id, request.project));
        }

        if let Err(e) = self.db.clear_project(&request.project).await {
            issues
                .add_issue(
                    IssueLevel::Error,
                    IssueType::Internal,
                    ErrorKind::Unknown,
                    format!("cannot clear previous content: {e:#}"),
                    "",
                )
                .await;
            return report;
        }

        let ctx = Arc::new(IngestContext {
            project: request.project.clone(),
            modid: meta.modid().to_string(),
            docs_root,
            db: self.db.clone(),
            issues: issues.clone(),
            schemas: self.schemas.clone(),
            log: log.clone(),
        });
        match Ingestor::new(ctx).run().await {
            Ok(discovered) => report.items = discovered.items.len(),
            Err(e) => {
                issues
                    .add_issue(IssueLevel::Error, IssueType::Internal, ErrorKind::Unknown, format!("{e:#}"), "")
                    .await;
            }
        }
        report
    }
}

fn validate_request(request: &DeployRequest) -> Result<()> {
    if request.project.is_empty() || !request.project.chars().all(is_valid_namespace_char) {
        bail!("'{}' is not a valid project id", request.project);
    }
    if request.url.trim().is_empty() {
        bail!("repository url must not be empty");
    }
    if let Some(root) = &request.root {
        if !is_contained(Path::new(root)) {
            bail!("docs root '{root}' must be a relative path inside the repository");
        }
    }
    Ok(())
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
