//! Repository acquisition.
//!
//! [`RepositoryAcquirer`] clones a project repository into a destination
//! directory with the `git` binary, under a hard on-disk size ceiling
//! enforced by [`watchdog::SizeWatchdog`]. Failures are classified from the
//! captured git output into an [`ErrorKind`] and returned as a
//! [`ProjectErrorInstance`] value.
//!
//! Remote clones are shallow (`--depth 1 --no-single-branch`) so every
//! branch tip is available to [`RepositoryAcquirer::checkout_branch`]
//! without a further fetch.

pub mod process;
pub mod watchdog;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use tokio::process::Command;

use crate::config::GitConfig;
use crate::error::{ErrorKind, ProjectErrorInstance};
use crate::models::GitRevision;
use crate::progress::LogSink;

use self::process::{run_supervised, SupervisedOutput};
use self::watchdog::{dir_size, SizeLimit};

const REVISION_FORMAT: &str = "--format=%h%x00%H%x00%s%x00%an%x00%ae%x00%ct";

/// A checked-out working tree produced by [`RepositoryAcquirer::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingTree {
    path: PathBuf,
}

impl WorkingTree {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct RepositoryAcquirer {
    binary: PathBuf,
    limit: SizeLimit,
    log: Arc<dyn LogSink>,
}

impl RepositoryAcquirer {
    pub fn new(config: &GitConfig, log: Arc<dyn LogSink>) -> Self {
        Self::with_limit(
            config.binary.clone(),
            SizeLimit {
                max_bytes: config.max_repo_size_bytes(),
                interval: config.watch_interval(),
            },
            log,
        )
    }

    pub fn with_limit(binary: impl Into<PathBuf>, limit: SizeLimit, log: Arc<dyn LogSink>) -> Self {
        Self {
            binary: binary.into(),
            limit,
            log,
        }
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .env("GCM_INTERACTIVE", "never")
            .env("LC_ALL", "C")
            .env("LANG", "C");
        cmd
    }

    /// Clones `url` into `dest`, optionally at `branch`.
    ///
    /// `dest` must not exist yet. A partial clone left behind on failure is
    /// the caller's to remove.
    pub async fn acquire(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
    ) -> Result<WorkingTree, ProjectErrorInstance> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ProjectErrorInstance::new(
                    ErrorKind::Unknown,
                    format!("cannot create {}: {e}", parent.display()),
                )
            })?;
        }

        let local = is_local_url(url);
        let mut cmd = self.git();
        cmd.arg("clone");
        if !local {
            cmd.args(["--depth", "1", "--no-single-branch"]);
        }
        if let Some(branch) = branch {
            cmd.args(["--branch", branch]);
        }
        cmd.arg(url).arg(dest);

        self.log.info(&format!(
            "Cloning {url}{}",
            branch.map(|b| format!(" (branch {b})")).unwrap_or_default()
        ));
        let result = self.run(cmd, dest).await?;
        self.check(result, dest, "clone")?;

        self.log.info("Clone complete");
        Ok(WorkingTree::open(dest))
    }

    /// Force-resets `tree` to the tip of `branch` as fetched from `origin`.
    pub async fn checkout_branch(
        &self,
        tree: &WorkingTree,
        branch: &str,
    ) -> Result<(), ProjectErrorInstance> {
        let remote_ref = format!("origin/{branch}");
        let mut cmd = self.git();
        cmd.arg("-C")
            .arg(tree.path())
            .args(["checkout", "--force", "-B", branch, &remote_ref]);
        let result = self.run(cmd, tree.path()).await?;
        self.check(result, tree.path(), "checkout")?;

        let mut cmd = self.git();
        cmd.arg("-C").arg(tree.path()).args(["clean", "-fd"]);
        let result = self.run(cmd, tree.path()).await?;
        self.check(result, tree.path(), "clean")?;

        self.log.info(&format!("Checked out branch {branch}"));
        Ok(())
    }

    /// Reads the HEAD commit of `tree`.
    pub async fn get_latest_revision(&self, tree: &WorkingTree) -> Result<GitRevision> {
        let output = self
            .git()
            .arg("-C")
            .arg(tree.path())
            .args(["log", "-1", REVISION_FORMAT])
            .output()
            .await
            .with_context(|| format!("Failed to execute '{} log'", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git log failed: {}", stderr.trim());
        }

        parse_revision(&String::from_utf8_lossy(&output.stdout))
    }

    async fn run(&self, cmd: Command, watch_dir: &Path) -> Result<SupervisedOutput, ProjectErrorInstance> {
        run_supervised(cmd, watch_dir, self.limit, self.log.as_ref())
            .await
            .map_err(|e| {
                ProjectErrorInstance::new(
                    ErrorKind::Unknown,
                    format!("failed to run {}: {e}", self.binary.display()),
                )
            })
    }

    fn check(&self, result: SupervisedOutput, dir: &Path, action: &str) -> Result<(), ProjectErrorInstance> {
        // The clone can finish between two samples; the ceiling still applies.
        let size_exceeded = result.size_exceeded || dir_size(dir) > self.limit.max_bytes;
        if result.output.success() && !size_exceeded {
            return Ok(());
        }

        let kind = classify_failure(&result.output.lines, size_exceeded);
        let message = match kind {
            ErrorKind::RepoTooLarge if size_exceeded => format!(
                "repository exceeds the size limit of {} MB",
                self.limit.max_bytes / (1024 * 1024)
            ),
            _ => last_diagnostic(&result.output.lines)
                .map(str::to_string)
                .unwrap_or_else(|| format!("git {action} failed")),
        };
        self.log.error(&format!("git {action} failed: {message}"));
        Err(ProjectErrorInstance::new(kind, message))
    }
}

/// `file:` URLs and plain filesystem paths are cloned without `--depth`.
pub fn is_local_url(url: &str) -> bool {
    if let Some((scheme, _)) = url.split_once("://") {
        return scheme.eq_ignore_ascii_case("file");
    }
    if url.starts_with("file:") {
        return true;
    }
    // scp-like `user@host:path`
    !url.contains('@')
}

/// Maps captured git output to a failure kind.
///
/// Pattern based and therefore best-effort.
pub fn classify_failure(lines: &[String], size_exceeded: bool) -> ErrorKind {
    if size_exceeded {
        return ErrorKind::RepoTooLarge;
    }

    let text = lines.join("\n");
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&[
        "could not read Username",
        "could not read Password",
        "terminal prompts disabled",
        "Authentication failed",
        "The requested URL returned error: 401",
        "The requested URL returned error: 403",
        "Permission denied (publickey",
    ]) {
        ErrorKind::RequiresAuth
    } else if has(&[
        "Repository not found",
        "does not appear to be a git repository",
        "does not exist",
        "The requested URL returned error: 404",
    ]) {
        ErrorKind::NoRepository
    } else if has(&[
        "Remote branch",
        "did not match any",
        "pathspec",
        "invalid reference",
        "not a valid object name",
        "is not a commit",
    ]) {
        ErrorKind::NoBranch
    } else if has(&[
        "early EOF",
        "RPC failed",
        "index-pack failed",
        "remote end hung up unexpectedly",
        "unexpected disconnect",
    ]) {
        ErrorKind::RepoTooLarge
    } else {
        ErrorKind::Unknown
    }
}

fn last_diagnostic(lines: &[String]) -> Option<&str> {
    lines
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| l.starts_with("fatal:") || l.starts_with("error:"))
        .or_else(|| lines.iter().rev().map(|l| l.trim()).find(|l| !l.is_empty()))
}

fn parse_revision(stdout: &str) -> Result<GitRevision> {
    let line = stdout.trim_end_matches(['\n', '\r']);
    let parts: Vec<&str> = line.split('\0').collect();
    let [hash, full_hash, message, author_name, author_email, timestamp] = parts.as_slice() else {
        bail!("unexpected git log output: {line:?}");
    };

    let seconds: i64 = timestamp
        .trim()
        .parse()
        .with_context(|| format!("invalid commit timestamp: {timestamp}"))?;
    let date = Utc
        .timestamp_opt(seconds, 0)
        .single()
        .with_context(|| format!("commit timestamp out of range: {seconds}"))?;

    Ok(GitRevision {
        hash: hash.to_string(),
        full_hash: full_hash.to_string(),
        message: message.to_string(),
        author_name: author_name.to_string(),
        author_email: author_email.to_string(),
        date: date.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::TracingLog;
    use std::time::Duration;
    use tempfile::TempDir;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn classifies_clone_failures() {
        let cases = [
            (
                "Cloning into 'x'...\nfatal: could not read Username for 'https://github.com': terminal prompts disabled",
                ErrorKind::RequiresAuth,
            ),
            (
                "remote: Repository not found.\nfatal: repository 'https://github.com/a/b/' not found",
                ErrorKind::NoRepository,
            ),
            (
                "warning: Could not find remote branch dev to clone.\nfatal: Remote branch dev not found in upstream origin",
                ErrorKind::NoBranch,
            ),
            (
                "fatal: 'origin/nope' is not a commit and a branch 'nope' cannot be created from it",
                ErrorKind::NoBranch,
            ),
            (
                "error: RPC failed; curl 18 transfer closed\nfatal: early EOF\nfatal: index-pack failed",
                ErrorKind::RepoTooLarge,
            ),
            ("fatal: something else", ErrorKind::Unknown),
        ];
        for (output, expected) in cases {
            assert_eq!(classify_failure(&lines(output), false), expected, "{output}");
        }
    }

    #[test]
    fn size_breach_wins_over_output() {
        let output = lines("fatal: the remote end hung up unexpectedly\nfatal: Authentication failed");
        assert_eq!(classify_failure(&output, true), ErrorKind::RepoTooLarge);
        assert_eq!(classify_failure(&[], true), ErrorKind::RepoTooLarge);
    }

    #[test]
    fn local_urls() {
        assert!(is_local_url("file:///srv/repos/wiki"));
        assert!(is_local_url("/srv/repos/wiki"));
        assert!(!is_local_url("https://github.com/a/b.git"));
        assert!(!is_local_url("git@github.com:a/b.git"));
    }

    #[test]
    fn parses_revision_line() {
        let rev = parse_revision(
            "abc1234\0abc1234def5678abc1234def5678abc1234de\0Add pages\0Jane\0jane@example.com\01709374500\n",
        )
        .unwrap();
        assert_eq!(rev.hash, "abc1234");
        assert_eq!(rev.message, "Add pages");
        assert_eq!(rev.author_email, "jane@example.com");
        assert_eq!(rev.date, "2024-03-02T10:15:00Z");

        assert!(parse_revision("abc\0def\n").is_err());
    }

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .current_dir(dir)
            .args(["-c", "user.name=Wiki Bot", "-c", "user.email=bot@example.com"])
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .unwrap();
        assert!(status.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&status.stderr));
    }

    fn source_repo(tmp: &TempDir) -> PathBuf {
        let repo = tmp.path().join("source");
        std::fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "-q", "-b", "main"]);
        std::fs::write(repo.join("wiki.json"), r#"{"id":"demo"}"#).unwrap();
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "-q", "-m", "Initial docs"]);
        git(&repo, &["checkout", "-q", "-b", "dev"]);
        std::fs::write(repo.join("dev.txt"), "dev").unwrap();
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "-q", "-m", "Dev work"]);
        git(&repo, &["checkout", "-q", "main"]);
        repo
    }

    fn acquirer(max_bytes: u64) -> RepositoryAcquirer {
        RepositoryAcquirer::with_limit(
            "git",
            SizeLimit {
                max_bytes,
                interval: Duration::from_millis(50),
            },
            Arc::new(TracingLog::new("test")),
        )
    }

    #[tokio::test]
    async fn clones_local_repository() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let source = source_repo(&tmp);
        let dest = tmp.path().join("clones/demo");
        let url = format!("file://{}", source.display());

        let acquirer = acquirer(500 * 1024 * 1024);
        let tree = acquirer.acquire(&url, &dest, None).await.unwrap();
        assert!(tree.path().join("wiki.json").exists());

        let rev = acquirer.get_latest_revision(&tree).await.unwrap();
        assert_eq!(rev.message, "Initial docs");
        assert_eq!(rev.full_hash.len(), 40);
        assert!(rev.full_hash.starts_with(&rev.hash));
        assert_eq!(rev.author_name, "Wiki Bot");

        std::fs::write(tree.path().join("wiki.json"), "local edit").unwrap();
        std::fs::write(tree.path().join("stray.txt"), "untracked").unwrap();

        acquirer.checkout_branch(&tree, "dev").await.unwrap();
        assert!(tree.path().join("dev.txt").exists());
        assert!(!tree.path().join("stray.txt").exists());
        assert_eq!(
            std::fs::read_to_string(tree.path().join("wiki.json")).unwrap(),
            r#"{"id":"demo"}"#
        );
        let rev = acquirer.get_latest_revision(&tree).await.unwrap();
        assert_eq!(rev.message, "Dev work");
    }

    #[tokio::test]
    async fn checkout_of_unknown_branch_is_no_branch() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let source = source_repo(&tmp);
        let url = format!("file://{}", source.display());
        let acquirer = acquirer(500 * 1024 * 1024);
        let tree = acquirer.acquire(&url, &tmp.path().join("clone"), None).await.unwrap();

        let err = acquirer.checkout_branch(&tree, "nope").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoBranch, "{}", err.message);
    }

    #[tokio::test]
    async fn missing_branch_and_repository() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let source = source_repo(&tmp);
        let url = format!("file://{}", source.display());
        let acquirer = acquirer(500 * 1024 * 1024);

        let err = acquirer
            .acquire(&url, &tmp.path().join("a"), Some("nope"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoBranch);

        let missing = format!("file://{}", tmp.path().join("missing").display());
        let err = acquirer
            .acquire(&missing, &tmp.path().join("b"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoRepository);
    }

    #[tokio::test]
    async fn oversized_clone_is_rejected() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let source = source_repo(&tmp);
        let url = format!("file://{}", source.display());

        let err = acquirer(16)
            .acquire(&url, &tmp.path().join("big"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RepoTooLarge);
    }
}
