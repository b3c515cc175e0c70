//! Recipe parser dispatch.
//!
//! A [`RecipeParsers`] registry holds an ordered list of [`RecipeParser`]s:
//! one per built-in vanilla shape, followed by the project's custom types.
//! The first parser that handles a recipe's declared type wins.

pub mod builtin;
pub mod custom;
pub mod ingredient;

use anyhow::{bail, Result};
use serde_json::Value;

use crate::error::{ErrorKind, IssueLevel, IssueType};
use crate::issues::FileIssueCallback;
use crate::models::{RecipeTypeInfo, StubRecipe};
use crate::resource_location::ResourceLocation;

pub use builtin::BuiltinKind;
pub use custom::CustomParser;

#[derive(Debug, Clone)]
pub enum RecipeParser {
    Builtin(BuiltinKind),
    Custom(CustomParser),
}

impl RecipeParser {
    pub fn handles_type(&self, recipe_type: &ResourceLocation) -> bool {
        match self {
            RecipeParser::Builtin(kind) => kind.matches(recipe_type),
            RecipeParser::Custom(parser) => parser.handles_type(recipe_type),
        }
    }

    /// Display metadata for `recipe_type`. Built-in shapes carry none.
    pub fn get_type(&self, recipe_type: &ResourceLocation) -> Option<RecipeTypeInfo> {
        match self {
            RecipeParser::Builtin(_) => None,
            RecipeParser::Custom(parser) => parser.get_type(recipe_type).cloned(),
        }
    }

    /// Parses one recipe document.
    ///
    /// Malformed ingredients are reported as `INVALID_INGREDIENT` and yield
    /// `Ok(None)`. An `Err` means the document does not have the shape the
    /// schema promised and is fatal for the run.
    pub async fn parse_recipe(
        &self,
        id: &ResourceLocation,
        recipe_type: &ResourceLocation,
        json: &Value,
        issues: &FileIssueCallback,
    ) -> Result<Option<StubRecipe>> {
        let Some(object) = json.as_object() else {
            bail!("recipe {id} is not a JSON object");
        };

        let parsed = match self {
            RecipeParser::Builtin(kind) => kind.parse(id, recipe_type, object),
            RecipeParser::Custom(parser) => parser.parse(id, recipe_type, object),
        };

        match parsed {
            Ok(recipe) => Ok(Some(recipe)),
            Err(invalid) => {
                issues
                    .add_issue(
                        IssueLevel::Error,
                        IssueType::File,
                        ErrorKind::InvalidIngredient,
                        format!("recipe {id}: {}", invalid.details()),
                    )
                    .await;
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecipeParsers {
    parsers: Vec<RecipeParser>,
}

impl RecipeParsers {
    pub fn new(custom_types: impl IntoIterator<Item = RecipeTypeInfo>) -> Self {
        let mut parsers: Vec<RecipeParser> = BuiltinKind::ALL.into_iter().map(RecipeParser::Builtin).collect();
        parsers.push(RecipeParser::Custom(CustomParser::new(custom_types)));
        Self { parsers }
    }

    pub fn find(&self, recipe_type: &ResourceLocation) -> Option<&RecipeParser> {
        self.parsers.iter().find(|p| p.handles_type(recipe_type))
    }

    /// Dispatches to the first matching parser; an unhandled type is reported
    /// as `UNKNOWN_RECIPE_TYPE`.
    pub async fn parse_recipe(
        &self,
        id: &ResourceLocation,
        recipe_type: &ResourceLocation,
        json: &Value,
        issues: &FileIssueCallback,
    ) -> Result<Option<StubRecipe>> {
        match self.find(recipe_type) {
            Some(parser) => parser.parse_recipe(id, recipe_type, json, issues).await,
            None => {
                issues
                    .add_issue(
                        IssueLevel::Warning,
                        IssueType::File,
                        ErrorKind::UnknownRecipeType,
                        format!("recipe {id} has unknown type {recipe_type}"),
                    )
                    .await;
                Ok(None)
            }
        }
    }
}
