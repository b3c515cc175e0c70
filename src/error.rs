//! Issue taxonomy and the structured acquisition failure.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a recorded issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueLevel {
    Warning,
    Error,
}

/// Which stage of a deployment produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Meta,
    File,
    GitClone,
    GitInfo,
    Ingestor,
    Page,
    Internal,
}

/// The specific problem an issue describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Ok,
    RequiresAuth,
    NoRepository,
    RepoTooLarge,
    NoBranch,
    NoPath,
    InvalidMeta,
    PageRender,
    DuplicatePage,
    UnknownRecipeType,
    InvalidIngredient,
    InvalidFile,
    InvalidFormat,
    InvalidResloc,
    InvalidVersionBranch,
    MissingPlatformProject,
    NoPageTitle,
    InvalidFrontmatter,
    MissingRequiredAttribute,
    Unknown,
}

macro_rules! wire_names {
    ($ty:ty { $($variant:ident => $name:literal),* $(,)? }) => {
        impl $ty {
            /// Lowercase wire name used in storage and logs.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }

            pub fn from_wire(raw: &str) -> Option<Self> {
                match raw {
                    $($name => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_names!(IssueLevel {
    Warning => "warning",
    Error => "error",
});

wire_names!(IssueType {
    Meta => "meta",
    File => "file",
    GitClone => "git_clone",
    GitInfo => "git_info",
    Ingestor => "ingestor",
    Page => "page",
    Internal => "internal",
});

wire_names!(ErrorKind {
    Ok => "ok",
    RequiresAuth => "requires_auth",
    NoRepository => "no_repository",
    RepoTooLarge => "repo_too_large",
    NoBranch => "no_branch",
    NoPath => "no_path",
    InvalidMeta => "invalid_meta",
    PageRender => "page_render",
    DuplicatePage => "duplicate_page",
    UnknownRecipeType => "unknown_recipe_type",
    InvalidIngredient => "invalid_ingredient",
    InvalidFile => "invalid_file",
    InvalidFormat => "invalid_format",
    InvalidResloc => "invalid_resloc",
    InvalidVersionBranch => "invalid_version_branch",
    MissingPlatformProject => "missing_platform_project",
    NoPageTitle => "no_page_title",
    InvalidFrontmatter => "invalid_frontmatter",
    MissingRequiredAttribute => "missing_required_attribute",
    Unknown => "unknown",
});

/// A diagnostic record attached to one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIssue {
    pub deployment_id: String,
    pub level: IssueLevel,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub subject: ErrorKind,
    pub details: String,
    /// Path relative to the docs root; empty for deployment-wide issues.
    pub file: String,
    pub version_name: Option<String>,
}

/// Classified failure of a repository operation.
///
/// Returned as a value from acquisition; callers record it as an issue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProjectErrorInstance {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProjectErrorInstance {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
