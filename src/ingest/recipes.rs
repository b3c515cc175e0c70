use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::files::{data_files, load_data_file, LoadedFile};
use super::{IngestContext, SubIngestor};
use crate::error::{ErrorKind, IssueLevel, IssueType};
use crate::issues::FileIssueCallback;
use crate::models::{PreparationResult, PreparedData, RecipeTypeInfo, StubRecipe, StubRecipeType, StubWorkbenches};
use crate::recipe::custom::parse_recipe_type;
use crate::recipe::RecipeParsers;
use crate::resource_location::ResourceLocation;
use crate::schema::SchemaKind;

const RECIPE_TYPE_DIR: &str = "recipe_type";
const WORKBENCHES_DIR: &str = "workbenches";
/// Recipe directories, current name first.
const RECIPE_DIRS: [&str; 2] = ["recipe", "recipes"];

/// A recipe document staged for parsing during `execute`.
#[derive(Debug, Clone)]
pub struct RawRecipe {
    pub id: ResourceLocation,
    pub recipe_type: ResourceLocation,
    pub json: Value,
}

/// Reads custom recipe types, recipes and workbenches.
///
/// Recipe documents are only validated during `prepare`; they are parsed
/// into ingredients in `execute`, once every custom type is known.
pub struct RecipesSubIngestor {
    ctx: Arc<IngestContext>,
    recipe_types: BTreeMap<ResourceLocation, PreparedData<RecipeTypeInfo>>,
    recipes: BTreeMap<ResourceLocation, PreparedData<RawRecipe>>,
    workbenches: BTreeMap<ResourceLocation, PreparedData<StubWorkbenches>>,
}

impl RecipesSubIngestor {
    pub fn new(ctx: Arc<IngestContext>) -> Self {
        Self {
            ctx,
            recipe_types: BTreeMap::new(),
            recipes: BTreeMap::new(),
            workbenches: BTreeMap::new(),
        }
    }

    async fn duplicate(loaded: &LoadedFile, what: &str, first: &FileIssueCallback) {
        loaded
            .issues
            .add_issue(
                IssueLevel::Warning,
                IssueType::File,
                ErrorKind::DuplicatePage,
                format!("{what} {} is already defined in {}", loaded.id, first.path()),
            )
            .await;
    }

    async fn prepare_recipe_types(&mut self) {
        for file in data_files(&self.ctx.docs_root, RECIPE_TYPE_DIR) {
            let Some(loaded) = load_data_file(&self.ctx, &file, SchemaKind::RecipeType).await else {
                continue;
            };
            if let Some(first) = self.recipe_types.get(&loaded.id) {
                Self::duplicate(&loaded, "recipe type", &first.issues).await;
                continue;
            }
            match parse_recipe_type(StubRecipeType::new(loaded.id.clone()), &loaded.json) {
                Ok(info) => {
                    self.recipe_types.insert(loaded.id, PreparedData::new(info, loaded.issues));
                }
                Err(e) => {
                    loaded
                        .issues
                        .add_issue(IssueLevel::Error, IssueType::File, ErrorKind::InvalidFormat, e.to_string())
                        .await;
                }
            }
        }
    }

    async fn prepare_recipes(&mut self) {
        for dir in RECIPE_DIRS {
            for file in data_files(&self.ctx.docs_root, dir) {
                let Some(loaded) = load_data_file(&self.ctx, &file, SchemaKind::Recipe).await else {
                    continue;
                };
                if let Some(first) = self.recipes.get(&loaded.id) {
                    Self::duplicate(&loaded, "recipe", &first.issues).await;
                    continue;
                }

                let raw_type = loaded.json.get("type").and_then(Value::as_str).unwrap_or_default();
                let recipe_type = match ResourceLocation::parse(raw_type) {
                    Ok(recipe_type) => recipe_type,
                    Err(e) => {
                        loaded
                            .issues
                            .add_issue(
                                IssueLevel::Error,
                                IssueType::File,
                                ErrorKind::InvalidResloc,
                                format!("invalid recipe type '{raw_type}': {e}"),
                            )
                            .await;
                        continue;
                    }
                };

                let raw = RawRecipe {
                    id: loaded.id.clone(),
                    recipe_type,
                    json: loaded.json,
                };
                self.recipes.insert(loaded.id, PreparedData::new(raw, loaded.issues));
            }
        }
    }

    async fn prepare_workbenches(&mut self) {
        for file in data_files(&self.ctx.docs_root, WORKBENCHES_DIR) {
            let Some(loaded) = load_data_file(&self.ctx, &file, SchemaKind::Workbenches).await else {
                continue;
            };
            if let Some(first) = self.workbenches.get(&loaded.id) {
                Self::duplicate(&loaded, "workbenches for", &first.issues).await;
                continue;
            }

            let mut items = BTreeSet::new();
            let values = loaded.json.get("values").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
            for value in values {
                let raw = value.as_str().unwrap_or_default();
                match ResourceLocation::parse(raw) {
                    Ok(item) => {
                        items.insert(item);
                    }
                    Err(e) => {
                        loaded
                            .issues
                            .add_issue(
                                IssueLevel::Error,
                                IssueType::File,
                                ErrorKind::InvalidResloc,
                                format!("invalid workbench {value}: {e}"),
                            )
                            .await;
                    }
                }
            }

            let workbenches = StubWorkbenches {
                recipe_type: loaded.id.clone(),
                items,
            };
            self.workbenches.insert(loaded.id, PreparedData::new(workbenches, loaded.issues));
        }
    }

    /// Persists one parsed recipe and checks that every ingredient row was
    /// written.
    async fn persist_recipe(&self, recipe: &StubRecipe, issues: &FileIssueCallback) {
        let ctx = &self.ctx;
        let row = match ctx.db.add_recipe(&ctx.project, recipe).await {
            Ok(row) => row,
            Err(e) => {
                issues
                    .add_issue(
                        IssueLevel::Error,
                        IssueType::Internal,
                        ErrorKind::Unknown,
                        format!("failed to store recipe {}: {e:#}", recipe.id),
                    )
                    .await;
                return;
            }
        };

        let mut written = 0u64;
        for ingredient in &recipe.ingredients {
            let result = if ingredient.is_tag {
                ctx.db.add_recipe_ingredient_tag(row, ingredient).await
            } else {
                ctx.db.add_recipe_ingredient_item(row, ingredient).await
            };
            match result {
                Ok(count) => written += count,
                Err(e) => {
                    issues
                        .add_issue(
                            IssueLevel::Error,
                            IssueType::Internal,
                            ErrorKind::Unknown,
                            format!("failed to store ingredient {} of {}: {e:#}", ingredient.item_id, recipe.id),
                        )
                        .await;
                    return;
                }
            }
        }

        let expected = recipe.ingredients.len() as u64;
        if written != expected {
            issues
                .add_issue(
                    IssueLevel::Error,
                    IssueType::Internal,
                    ErrorKind::Unknown,
                    format!("recipe {}: expected {expected} ingredient rows, wrote {written}", recipe.id),
                )
                .await;
        }
    }
}

#[async_trait]
impl SubIngestor for RecipesSubIngestor {
    fn name(&self) -> &'static str {
        "recipes"
    }

    async fn prepare(&mut self) -> Result<PreparationResult> {
        self.prepare_recipe_types().await;
        self.prepare_recipes().await;
        self.prepare_workbenches().await;

        self.ctx.log.info(&format!(
            "Found {} recipe types, {} recipes, {} workbench lists",
            self.recipe_types.len(),
            self.recipes.len(),
            self.workbenches.len()
        ));
        Ok(PreparationResult::empty())
    }

    async fn execute(&mut self) -> Result<()> {
        let ctx = self.ctx.clone();
        let parsers = RecipeParsers::new(self.recipe_types.values().map(|p| p.data.clone()));

        for prepared in self.recipe_types.values() {
            if let Err(e) = ctx.db.add_recipe_type(&ctx.project, &prepared.data).await {
                prepared
                    .issues
                    .add_issue(
                        IssueLevel::Error,
                        IssueType::Internal,
                        ErrorKind::Unknown,
                        format!("failed to store recipe type {}: {e:#}", prepared.data.id),
                    )
                    .await;
            }
        }

        let mut stored = 0usize;
        for prepared in self.recipes.values() {
            let raw = &prepared.data;
            let parsed = parsers
                .parse_recipe(&raw.id, &raw.recipe_type, &raw.json, &prepared.issues)
                .await;
            let recipe = match parsed {
                Ok(Some(recipe)) => recipe,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(
                        project = %ctx.project,
                        recipe = %raw.id,
                        recipe_type = %raw.recipe_type,
                        file = prepared.issues.path(),
                        "recipe parser failed: {e:#}"
                    );
                    ctx.log.error(&format!(
                        "Failed to parse recipe {} ({}) in {}: {e:#}",
                        raw.id,
                        raw.recipe_type,
                        prepared.issues.path()
                    ));
                    return Err(e);
                }
            };
            self.persist_recipe(&recipe, &prepared.issues).await;
            stored += 1;
        }

        for prepared in self.workbenches.values() {
            let workbenches = &prepared.data;
            match ctx.db.add_recipe_workbenches(&ctx.project, workbenches).await {
                Ok(written) if written == workbenches.items.len() as u64 => {}
                Ok(written) => {
                    prepared
                        .issues
                        .add_issue(
                            IssueLevel::Error,
                            IssueType::Internal,
                            ErrorKind::Unknown,
                            format!(
                                "workbenches for {}: expected {} rows, wrote {written}",
                                workbenches.recipe_type,
                                workbenches.items.len()
                            ),
                        )
                        .await;
                }
                Err(e) => {
                    prepared
                        .issues
                        .add_issue(IssueLevel::Error, IssueType::Internal, ErrorKind::Unknown, format!("{e:#}"))
                        .await;
                }
            }
        }

        ctx.log.info(&format!("Stored {stored} recipes"));
        Ok(())
    }
}
