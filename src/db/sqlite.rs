//! SQLite-backed [`ProjectDatabaseAccess`] implementation.
//!
//! Maps each operation onto the schema created by
//! [`migrate::create_schema`](crate::migrate::create_schema). Row inserts use
//! `INSERT OR IGNORE` and report `rows_affected`, so a duplicate shows up as
//! a zero count instead of an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::error::{ErrorKind, IssueLevel, IssueType, ProjectIssue};
use crate::models::{
    RecipeTypeInfo, StubContentPage, StubRecipe, StubRecipeIngredient, StubWorkbenches,
};
use crate::resource_location::ResourceLocation;

use super::ProjectDatabaseAccess;

/// SQLite implementation of [`ProjectDatabaseAccess`].
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Lists every issue recorded for a deployment, oldest first.
    pub async fn list_issues(&self, deployment_id: &str) -> Result<Vec<ProjectIssue>> {
        let rows = sqlx::query(
            "SELECT deployment_id, level, type, subject, details, file, version_name
             FROM project_issues WHERE deployment_id = ? ORDER BY id ASC",
        )
        .bind(deployment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(issue_from_row).collect()
    }

    async fn add_ingredient(
        &self,
        table: &str,
        column: &str,
        recipe_row: i64,
        ingredient: &StubRecipeIngredient,
    ) -> Result<u64> {
        let sql = format!(
            "INSERT OR IGNORE INTO {table} (recipe_row, {column}, slot, count, input) VALUES (?, ?, ?, ?, ?)"
        );
        let result = sqlx::query(&sql)
            .bind(recipe_row)
            .bind(ingredient.item_id.to_string())
            .bind(&ingredient.slot)
            .bind(ingredient.count)
            .bind(ingredient.input)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn issue_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ProjectIssue> {
    let level: String = row.get("level");
    let issue_type: String = row.get("type");
    let subject: String = row.get("subject");
    Ok(ProjectIssue {
        deployment_id: row.get("deployment_id"),
        level: IssueLevel::from_wire(&level)
            .with_context(|| format!("unknown issue level '{level}'"))?,
        issue_type: IssueType::from_wire(&issue_type)
            .with_context(|| format!("unknown issue type '{issue_type}'"))?,
        subject: ErrorKind::from_wire(&subject).unwrap_or(ErrorKind::Unknown),
        details: row.get("details"),
        file: row.get("file"),
        version_name: row.get("version_name"),
    })
}

#[async_trait]
impl ProjectDatabaseAccess for SqliteDatabase {
    async fn add_item(&self, project: &str, item: &ResourceLocation) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO items (project_id, item_id) VALUES (?, ?)")
            .bind(project)
            .bind(item.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_tag(&self, project: &str, tag: &ResourceLocation) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO tags (project_id, tag_id) VALUES (?, ?)")
            .bind(project)
            .bind(tag.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_tag_tag_entry(
        &self,
        project: &str,
        parent: &ResourceLocation,
        child: &ResourceLocation,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO tag_tag_entries (project_id, parent_id, child_id) VALUES (?, ?, ?)",
        )
        .bind(project)
        .bind(parent.to_string())
        .bind(child.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_tag_item_entry(
        &self,
        project: &str,
        tag: &ResourceLocation,
        item: &ResourceLocation,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO tag_item_entries (project_id, tag_id, item_id) VALUES (?, ?, ?)",
        )
        .bind(project)
        .bind(tag.to_string())
        .bind(item.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_recipe_type(&self, project: &str, info: &RecipeTypeInfo) -> Result<()> {
        let slots = serde_json::to_string(&info.slots)?;
        sqlx::query(
            r#"
            INSERT INTO recipe_types (project_id, type_id, background, slots_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id, type_id) DO UPDATE SET
                background = excluded.background,
                slots_json = excluded.slots_json
            "#,
        )
        .bind(project)
        .bind(info.id.to_string())
        .bind(&info.background)
        .bind(slots)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_recipe(&self, project: &str, recipe: &StubRecipe) -> Result<i64> {
        let result = sqlx::query("INSERT INTO recipes (project_id, recipe_id, type_id) VALUES (?, ?, ?)")
            .bind(project)
            .bind(recipe.id.to_string())
            .bind(recipe.recipe_type.to_string())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to insert recipe {}", recipe.id))?;
        Ok(result.last_insert_rowid())
    }

    async fn add_recipe_ingredient_item(
        &self,
        recipe_row: i64,
        ingredient: &StubRecipeIngredient,
    ) -> Result<u64> {
        self.add_ingredient("recipe_ingredient_items", "item_id", recipe_row, ingredient)
            .await
    }

    async fn add_recipe_ingredient_tag(
        &self,
        recipe_row: i64,
        ingredient: &StubRecipeIngredient,
    ) -> Result<u64> {
        self.add_ingredient("recipe_ingredient_tags", "tag_id", recipe_row, ingredient)
            .await
    }

    async fn add_recipe_workbenches(&self, project: &str, workbenches: &StubWorkbenches) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for item in &workbenches.items {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO recipe_workbenches (project_id, type_id, item_id) VALUES (?, ?, ?)",
            )
            .bind(project)
            .bind(workbenches.recipe_type.to_string())
            .bind(item.to_string())
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn add_project_content_page(&self, project: &str, page: &StubContentPage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_pages (project_id, page_id, path) VALUES (?, ?, ?)
            ON CONFLICT(project_id, page_id) DO UPDATE SET path = excluded.path
            "#,
        )
        .bind(project)
        .bind(page.id.to_string())
        .bind(&page.path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_project_content_path(
        &self,
        project: &str,
        id: &ResourceLocation,
    ) -> Result<Option<String>> {
        let path: Option<String> =
            sqlx::query_scalar("SELECT path FROM content_pages WHERE project_id = ? AND page_id = ?")
                .bind(project)
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(path)
    }

    async fn clear_project(&self, project: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for table in ["recipe_ingredient_items", "recipe_ingredient_tags"] {
            let sql = format!(
                "DELETE FROM {table} WHERE recipe_row IN (SELECT id FROM recipes WHERE project_id = ?)"
            );
            sqlx::query(&sql).bind(project).execute(&mut *tx).await?;
        }
        for table in [
            "recipes",
            "recipe_types",
            "recipe_workbenches",
            "tag_item_flat",
            "tag_item_entries",
            "tag_tag_entries",
            "tags",
            "items",
            "content_pages",
        ] {
            let sql = format!("DELETE FROM {table} WHERE project_id = ?");
            sqlx::query(&sql).bind(project).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn refresh_flat_tag_item_view(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM tag_item_flat")
            .execute(&mut *tx)
            .await?;

        // UNION (not UNION ALL) stops the recursion on tag cycles.
        sqlx::query(
            r#"
            INSERT INTO tag_item_flat (project_id, tag_id, item_id)
            WITH RECURSIVE closure(project_id, root_id, tag_id) AS (
                SELECT project_id, tag_id, tag_id FROM tags
                UNION
                SELECT c.project_id, c.root_id, e.child_id
                FROM closure c
                JOIN tag_tag_entries e
                  ON e.project_id = c.project_id AND e.parent_id = c.tag_id
            )
            SELECT DISTINCT c.project_id, c.root_id, i.item_id
            FROM closure c
            JOIN tag_item_entries i
              ON i.project_id = c.project_id AND i.tag_id = c.tag_id
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn add_project_issue(&self, issue: &ProjectIssue) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO project_issues (deployment_id, level, type, subject, details, file, version_name, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&issue.deployment_id)
        .bind(issue.level.as_str())
        .bind(issue.issue_type.as_str())
        .bind(issue.subject.as_str())
        .bind(&issue.details)
        .bind(&issue.file)
        .bind(&issue.version_name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_project_issue(
        &self,
        deployment_id: &str,
        level: IssueLevel,
        issue_type: IssueType,
        file: &str,
    ) -> Result<Option<ProjectIssue>> {
        let row = sqlx::query(
            r#"
            SELECT deployment_id, level, type, subject, details, file, version_name
            FROM project_issues
            WHERE deployment_id = ? AND level = ? AND type = ? AND file = ?
            LIMIT 1
            "#,
        )
        .bind(deployment_id)
        .bind(level.as_str())
        .bind(issue_type.as_str())
        .bind(file)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(issue_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::create_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_db() -> SqliteDatabase {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        SqliteDatabase::new(pool)
    }

    fn loc(s: &str) -> ResourceLocation {
        ResourceLocation::parse(s).unwrap()
    }

    #[tokio::test]
    async fn issue_dedup_lookup() {
        let db = memory_db().await;
        let issue = ProjectIssue {
            deployment_id: "d1".into(),
            level: IssueLevel::Error,
            issue_type: IssueType::File,
            subject: ErrorKind::InvalidResloc,
            details: "bad".into(),
            file: ".data/mod/tags/item/X.json".into(),
            version_name: None,
        };
        db.add_project_issue(&issue).await.unwrap();

        let found = db
            .get_project_issue("d1", IssueLevel::Error, IssueType::File, &issue.file)
            .await
            .unwrap();
        assert_eq!(found, Some(issue.clone()));

        let other = db
            .get_project_issue("d1", IssueLevel::Warning, IssueType::File, &issue.file)
            .await
            .unwrap();
        assert_eq!(other, None);
        assert_eq!(db.list_issues("d1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_ingredients_report_zero_rows() {
        let db = memory_db().await;
        let recipe = StubRecipe {
            id: loc("mod:r"),
            recipe_type: loc("minecraft:crafting_shapeless"),
            ingredients: vec![],
        };
        let row = db.add_recipe("p", &recipe).await.unwrap();
        let ingredient = StubRecipeIngredient::input(loc("mod:a"), "1", 1, false);
        assert_eq!(db.add_recipe_ingredient_item(row, &ingredient).await.unwrap(), 1);
        assert_eq!(db.add_recipe_ingredient_item(row, &ingredient).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn flat_view_follows_nested_tags() {
        let db = memory_db().await;
        db.add_tag("p", &loc("mod:all")).await.unwrap();
        db.add_tag("p", &loc("mod:wood")).await.unwrap();
        db.add_tag_tag_entry("p", &loc("mod:all"), &loc("mod:wood")).await.unwrap();
        db.add_tag_item_entry("p", &loc("mod:wood"), &loc("mod:plank")).await.unwrap();

        db.refresh_flat_tag_item_view().await.unwrap();

        let items: Vec<String> = sqlx::query_scalar(
            "SELECT item_id FROM tag_item_flat WHERE project_id = 'p' AND tag_id = 'mod:all'",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(items, vec!["mod:plank".to_string()]);
    }

    #[tokio::test]
    async fn content_path_lookup() {
        let db = memory_db().await;
        let page = StubContentPage {
            id: loc("mod:gear"),
            path: ".content/gear.md".into(),
        };
        db.add_project_content_page("p", &page).await.unwrap();
        assert_eq!(
            db.get_project_content_path("p", &loc("mod:gear")).await.unwrap(),
            Some(".content/gear.md".into())
        );
        assert_eq!(db.get_project_content_path("q", &loc("mod:gear")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_project_allows_redeploy() {
        let db = memory_db().await;
        let recipe = StubRecipe {
            id: loc("mod:r"),
            recipe_type: loc("minecraft:smelting"),
            ingredients: vec![],
        };
        let row = db.add_recipe("p", &recipe).await.unwrap();
        db.add_recipe_ingredient_item(row, &StubRecipeIngredient::input(loc("mod:a"), "1", 1, false))
            .await
            .unwrap();
        assert!(db.add_recipe("p", &recipe).await.is_err());

        db.clear_project("p").await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recipe_ingredient_items")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
        db.add_recipe("p", &recipe).await.unwrap();
    }
}
