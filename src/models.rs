//! Core data models used throughout the ingestion pipeline.
//!
//! The `Stub*` types are staged records: produced by the scan phase of a
//! sub-ingestor and handed to the database collaborator during execution.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::issues::FileIssueCallback;
use crate::resource_location::ResourceLocation;

/// A declared recipe category awaiting display metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubRecipeType {
    pub id: ResourceLocation,
}

impl StubRecipeType {
    pub fn new(id: ResourceLocation) -> Self {
        Self { id }
    }

    /// Attaches display metadata, producing the record that gets stored.
    pub fn with_display(self, background: Option<String>, slots: BTreeMap<String, SlotPosition>) -> RecipeTypeInfo {
        RecipeTypeInfo {
            id: self.id,
            background,
            slots,
        }
    }
}

/// Position of a named slot in a recipe type's display background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPosition {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub output: bool,
}

/// Display metadata for a recipe type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeTypeInfo {
    pub id: ResourceLocation,
    pub background: Option<String>,
    pub slots: BTreeMap<String, SlotPosition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StubRecipeIngredient {
    pub item_id: ResourceLocation,
    pub slot: String,
    pub count: i32,
    pub input: bool,
    /// `item_id` names a tag of items rather than a single item.
    pub is_tag: bool,
}

impl StubRecipeIngredient {
    pub fn input(item_id: ResourceLocation, slot: impl Into<String>, count: i32, is_tag: bool) -> Self {
        Self {
            item_id,
            slot: slot.into(),
            count,
            input: true,
            is_tag,
        }
    }

    pub fn output(item_id: ResourceLocation, slot: impl Into<String>, count: i32, is_tag: bool) -> Self {
        Self {
            item_id,
            slot: slot.into(),
            count,
            input: false,
            is_tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StubRecipe {
    pub id: ResourceLocation,
    #[serde(rename = "type")]
    pub recipe_type: ResourceLocation,
    pub ingredients: Vec<StubRecipeIngredient>,
}

impl StubRecipe {
    pub fn inputs(&self) -> impl Iterator<Item = &StubRecipeIngredient> {
        self.ingredients.iter().filter(|i| i.input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &StubRecipeIngredient> {
        self.ingredients.iter().filter(|i| !i.input)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubWorkbenches {
    pub recipe_type: ResourceLocation,
    pub items: BTreeSet<ResourceLocation>,
}

/// One entry of an item tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEntry {
    Item(ResourceLocation),
    Tag(ResourceLocation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubTag {
    pub id: ResourceLocation,
    pub entries: Vec<TagEntry>,
}

/// A content page discovered under `.content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubContentPage {
    pub id: ResourceLocation,
    /// Path relative to the docs root, with `/` separators.
    pub path: String,
}

/// Snapshot of the checked-out HEAD commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRevision {
    pub hash: String,
    pub full_hash: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    /// ISO-8601 UTC, e.g. `2024-03-02T10:15:00Z`.
    pub date: String,
}

/// Content identifiers discovered by a sub-ingestor's scan phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparationResult {
    pub items: BTreeSet<String>,
}

impl PreparationResult {
    pub fn new(items: BTreeSet<String>) -> Self {
        Self { items }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: PreparationResult) {
        self.items.extend(other.items);
    }
}

/// A staged record together with the file callback that produced it.
#[derive(Debug, Clone)]
pub struct PreparedData<T> {
    pub data: T,
    pub issues: FileIssueCallback,
}

impl<T> PreparedData<T> {
    pub fn new(data: T, issues: FileIssueCallback) -> Self {
        Self { data, issues }
    }
}
