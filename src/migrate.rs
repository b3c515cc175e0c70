use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index used by [`SqliteDatabase`](crate::db::SqliteDatabase).
///
/// Idempotent; safe to run against an existing database.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS items (
            project_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            UNIQUE(project_id, item_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            project_id TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            UNIQUE(project_id, tag_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS tag_tag_entries (
            project_id TEXT NOT NULL,
            parent_id TEXT NOT NULL,
            child_id TEXT NOT NULL,
            UNIQUE(project_id, parent_id, child_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS tag_item_entries (
            project_id TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            UNIQUE(project_id, tag_id, item_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS tag_item_flat (
            project_id TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            item_id TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS recipe_types (
            project_id TEXT NOT NULL,
            type_id TEXT NOT NULL,
            background TEXT,
            slots_json TEXT NOT NULL DEFAULT '{}',
            UNIQUE(project_id, type_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS recipes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL,
            recipe_id TEXT NOT NULL,
            type_id TEXT NOT NULL,
            UNIQUE(project_id, recipe_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS recipe_ingredient_items (
            recipe_row INTEGER NOT NULL,
            item_id TEXT NOT NULL,
            slot TEXT NOT NULL,
            count INTEGER NOT NULL,
            input INTEGER NOT NULL,
            UNIQUE(recipe_row, item_id, slot, input),
            FOREIGN KEY (recipe_row) REFERENCES recipes(id) ON DELETE CASCADE
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS recipe_ingredient_tags (
            recipe_row INTEGER NOT NULL,
            tag_id TEXT NOT NULL,
            slot TEXT NOT NULL,
            count INTEGER NOT NULL,
            input INTEGER NOT NULL,
            UNIQUE(recipe_row, tag_id, slot, input),
            FOREIGN KEY (recipe_row) REFERENCES recipes(id) ON DELETE CASCADE
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS recipe_workbenches (
            project_id TEXT NOT NULL,
            type_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            UNIQUE(project_id, type_id, item_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS content_pages (
            project_id TEXT NOT NULL,
            page_id TEXT NOT NULL,
            path TEXT NOT NULL,
            UNIQUE(project_id, page_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS project_issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            deployment_id TEXT NOT NULL,
            level TEXT NOT NULL,
            type TEXT NOT NULL,
            subject TEXT NOT NULL,
            details TEXT NOT NULL,
            file TEXT NOT NULL DEFAULT '',
            version_name TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_project_issues_dedup ON project_issues(deployment_id, level, type, file)",
        "CREATE INDEX IF NOT EXISTS idx_tag_item_flat_tag ON tag_item_flat(project_id, tag_id)",
        "CREATE INDEX IF NOT EXISTS idx_recipes_type ON recipes(project_id, type_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
