//! Database collaborator used by the ingestion pipeline.
//!
//! The [`ProjectDatabaseAccess`] trait is the only way the pipeline touches
//! persistent storage. Handles are passed into the ingestors explicitly;
//! nothing reaches for a global connection.
//!
//! | Implementation | Use |
//! |----------------|-----|
//! | [`InMemoryDatabase`] | tests and dry runs |
//! | [`SqliteDatabase`] | the `wikictl` binary |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;
use crate::error::{IssueLevel, IssueType, ProjectIssue};
use crate::models::{
    RecipeTypeInfo, StubContentPage, StubRecipe, StubRecipeIngredient, StubWorkbenches,
};
use crate::resource_location::ResourceLocation;

pub use memory::InMemoryDatabase;
pub use sqlite::SqliteDatabase;

/// Storage operations consumed by the sub-ingestors and issue callback.
///
/// Write operations that insert rows return the number of rows actually
/// written so callers can detect silently ignored duplicates.
#[async_trait]
pub trait ProjectDatabaseAccess: Send + Sync {
    async fn add_item(&self, project: &str, item: &ResourceLocation) -> Result<()>;

    async fn add_tag(&self, project: &str, tag: &ResourceLocation) -> Result<()>;

    async fn add_tag_tag_entry(
        &self,
        project: &str,
        parent: &ResourceLocation,
        child: &ResourceLocation,
    ) -> Result<()>;

    async fn add_tag_item_entry(
        &self,
        project: &str,
        tag: &ResourceLocation,
        item: &ResourceLocation,
    ) -> Result<()>;

    async fn add_recipe_type(&self, project: &str, info: &RecipeTypeInfo) -> Result<()>;

    /// Inserts a recipe header and returns its row id.
    async fn add_recipe(&self, project: &str, recipe: &StubRecipe) -> Result<i64>;

    async fn add_recipe_ingredient_item(
        &self,
        recipe_row: i64,
        ingredient: &StubRecipeIngredient,
    ) -> Result<u64>;

    async fn add_recipe_ingredient_tag(
        &self,
        recipe_row: i64,
        ingredient: &StubRecipeIngredient,
    ) -> Result<u64>;

    async fn add_recipe_workbenches(&self, project: &str, workbenches: &StubWorkbenches) -> Result<u64>;

    async fn add_project_content_page(&self, project: &str, page: &StubContentPage) -> Result<()>;

    async fn get_project_content_path(
        &self,
        project: &str,
        id: &ResourceLocation,
    ) -> Result<Option<String>>;

    /// Removes every content record of `project`. Issues are kept.
    async fn clear_project(&self, project: &str) -> Result<()>;

    /// Rebuilds the flattened tag → item view after tag data changed.
    async fn refresh_flat_tag_item_view(&self) -> Result<()>;

    async fn add_project_issue(&self, issue: &ProjectIssue) -> Result<()>;

    async fn get_project_issue(
        &self,
        deployment_id: &str,
        level: IssueLevel,
        issue_type: IssueType,
        file: &str,
    ) -> Result<Option<ProjectIssue>>;
}

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
