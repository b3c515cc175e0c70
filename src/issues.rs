//! Issue accumulation for one deployment.
//!
//! [`IssueCallback`] is shared by every sub-ingestor of a run. It logs each
//! issue, drops repeats of the same `(deployment, level, type, file)` and
//! persists the rest through the database collaborator. [`FileIssueCallback`]
//! is a cheap view that scopes issues to a path relative to the docs root.

use std::fmt;
use std::path::{Component, Path};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;

use crate::db::ProjectDatabaseAccess;
use crate::error::{ErrorKind, IssueLevel, IssueType, ProjectIssue};
use crate::progress::LogSink;

pub struct IssueCallback {
    deployment_id: String,
    version_name: Option<String>,
    db: Arc<dyn ProjectDatabaseAccess>,
    log: Arc<dyn LogSink>,
    has_errors: AtomicBool,
    /// Serializes the dedup lookup with the insert that follows it.
    persist: Mutex<()>,
    pending: TaskTracker,
}

impl fmt::Debug for IssueCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssueCallback")
            .field("deployment_id", &self.deployment_id)
            .field("version_name", &self.version_name)
            .field("has_errors", &self.has_errors())
            .finish_non_exhaustive()
    }
}

impl IssueCallback {
    pub fn new(
        deployment_id: impl Into<String>,
        version_name: Option<String>,
        db: Arc<dyn ProjectDatabaseAccess>,
        log: Arc<dyn LogSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            deployment_id: deployment_id.into(),
            version_name,
            db,
            log,
            has_errors: AtomicBool::new(false),
            persist: Mutex::new(()),
            pending: TaskTracker::new(),
        })
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Whether any error-level issue was recorded during this run.
    pub fn has_errors(&self) -> bool {
        self.has_errors.load(Ordering::SeqCst)
    }

    /// Records an issue and waits until it is persisted.
    ///
    /// Returns `true` when a new record was written, `false` when it was a
    /// duplicate or could not be stored.
    pub async fn add_issue(
        &self,
        level: IssueLevel,
        issue_type: IssueType,
        subject: ErrorKind,
        details: impl Into<String>,
        file: &str,
    ) -> bool {
        let details = details.into();
        if level == IssueLevel::Error {
            self.has_errors.store(true, Ordering::SeqCst);
        }

        let line = if file.is_empty() {
            format!("[{issue_type}/{subject}] {details}")
        } else {
            format!("[{issue_type}/{subject}] {file}: {details}")
        };
        match level {
            IssueLevel::Warning => self.log.warn(&line),
            IssueLevel::Error => self.log.error(&line),
        }

        let _guard = self.persist.lock().await;
        match self
            .db
            .get_project_issue(&self.deployment_id, level, issue_type, file)
            .await
        {
            Ok(Some(_)) => {
                tracing::debug!(
                    deployment = %self.deployment_id,
                    %level,
                    %issue_type,
                    file,
                    "skipping duplicate issue"
                );
                return false;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(deployment = %self.deployment_id, "issue lookup failed: {e:#}");
                return false;
            }
        }

        let issue = ProjectIssue {
            deployment_id: self.deployment_id.clone(),
            level,
            issue_type,
            subject,
            details,
            file: file.to_string(),
            version_name: self.version_name.clone(),
        };
        if let Err(e) = self.db.add_project_issue(&issue).await {
            tracing::error!(deployment = %self.deployment_id, "failed to persist issue: {e:#}");
            return false;
        }
        true
    }

    /// Schedules [`add_issue`](Self::add_issue) on the current runtime without
    /// waiting for it. [`flush`](Self::flush) waits for scheduled issues.
    pub fn add_issue_async(
        self: &Arc<Self>,
        level: IssueLevel,
        issue_type: IssueType,
        subject: ErrorKind,
        details: impl Into<String>,
        file: impl Into<String>,
    ) {
        if level == IssueLevel::Error {
            self.has_errors.store(true, Ordering::SeqCst);
        }
        let this = Arc::clone(self);
        let details = details.into();
        let file = file.into();
        self.pending.spawn(async move {
            this.add_issue(level, issue_type, subject, details, &file).await;
        });
    }

    /// Waits until every issue scheduled with `add_issue_async` is stored.
    pub async fn flush(&self) {
        self.pending.close();
        self.pending.wait().await;
        self.pending.reopen();
    }

    /// Returns a view that attributes issues to `path`.
    pub fn file(self: &Arc<Self>, path: impl AsRef<Path>) -> FileIssueCallback {
        FileIssueCallback {
            parent: Arc::clone(self),
            path: to_slash(path.as_ref()),
        }
    }
}

/// Issue callback scoped to one path below the docs root.
#[derive(Debug, Clone)]
pub struct FileIssueCallback {
    parent: Arc<IssueCallback>,
    path: String,
}

impl FileIssueCallback {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn deployment(&self) -> &Arc<IssueCallback> {
        &self.parent
    }

    pub fn has_errors(&self) -> bool {
        self.parent.has_errors()
    }

    /// Nested view; `path` is resolved relative to this view's path.
    pub fn file(&self, path: impl AsRef<Path>) -> FileIssueCallback {
        let nested = to_slash(path.as_ref());
        let path = match (self.path.is_empty(), nested.is_empty()) {
            (true, _) => nested,
            (false, true) => self.path.clone(),
            (false, false) => format!("{}/{}", self.path, nested),
        };
        FileIssueCallback {
            parent: Arc::clone(&self.parent),
            path,
        }
    }

    pub async fn add_issue(
        &self,
        level: IssueLevel,
        issue_type: IssueType,
        subject: ErrorKind,
        details: impl Into<String>,
    ) -> bool {
        self.parent
            .add_issue(level, issue_type, subject, details, &self.path)
            .await
    }

    pub fn add_issue_async(
        &self,
        level: IssueLevel,
        issue_type: IssueType,
        subject: ErrorKind,
        details: impl Into<String>,
    ) {
        self.parent
            .add_issue_async(level, issue_type, subject, details, self.path.clone());
    }
}

/// Renders a relative path with `/` separators, dropping `.` components.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryDatabase;
    use crate::progress::TracingLog;

    fn callback(db: &Arc<InMemoryDatabase>) -> Arc<IssueCallback> {
        IssueCallback::new(
            "deploy-1",
            Some("1.20.1".into()),
            db.clone(),
            Arc::new(TracingLog::new("test")),
        )
    }

    #[tokio::test]
    async fn duplicates_are_persisted_once() {
        let db = Arc::new(InMemoryDatabase::new());
        let issues = callback(&db);

        assert!(
            issues
                .add_issue(IssueLevel::Warning, IssueType::File, ErrorKind::InvalidFormat, "first", "a.json")
                .await
        );
        assert!(
            !issues
                .add_issue(IssueLevel::Warning, IssueType::File, ErrorKind::InvalidFormat, "second", "a.json")
                .await
        );
        assert!(
            issues
                .add_issue(IssueLevel::Error, IssueType::File, ErrorKind::InvalidFormat, "third", "a.json")
                .await
        );

        let stored = db.issues();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].details, "first");
        assert_eq!(stored[0].version_name.as_deref(), Some("1.20.1"));
    }

    #[tokio::test]
    async fn error_flag_tracks_levels() {
        let db = Arc::new(InMemoryDatabase::new());
        let issues = callback(&db);
        issues
            .add_issue(IssueLevel::Warning, IssueType::Page, ErrorKind::NoPageTitle, "w", "")
            .await;
        assert!(!issues.has_errors());

        issues.add_issue_async(IssueLevel::Error, IssueType::Meta, ErrorKind::InvalidMeta, "e", "");
        assert!(issues.has_errors());

        issues.flush().await;
        assert_eq!(db.issues().len(), 2);
    }

    #[tokio::test]
    async fn async_and_sync_paths_share_dedup() {
        let db = Arc::new(InMemoryDatabase::new());
        let issues = callback(&db);
        for i in 0..5 {
            issues.add_issue_async(
                IssueLevel::Error,
                IssueType::Ingestor,
                ErrorKind::Unknown,
                format!("attempt {i}"),
                "x.json",
            );
        }
        issues.flush().await;
        issues
            .add_issue(IssueLevel::Error, IssueType::Ingestor, ErrorKind::Unknown, "sync", "x.json")
            .await;
        assert_eq!(db.issues().len(), 1);
    }

    #[tokio::test]
    async fn file_views_compose_relative_paths() {
        let db = Arc::new(InMemoryDatabase::new());
        let issues = callback(&db);

        let data = issues.file(Path::new(".data/mod"));
        let nested = data.file("tags/item/./wood.json");
        assert_eq!(nested.path(), ".data/mod/tags/item/wood.json");

        nested
            .add_issue(IssueLevel::Error, IssueType::File, ErrorKind::InvalidResloc, "bad id")
            .await;
        assert!(data.has_errors());
        assert_eq!(db.issues()[0].file, ".data/mod/tags/item/wood.json");

        let root = issues.file("");
        assert_eq!(root.file("a.md").path(), "a.md");
    }
}
