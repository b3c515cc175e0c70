//! In-memory [`ProjectDatabaseAccess`] implementation for tests and dry runs.
//!
//! Uses ordered collections behind `std::sync::RwLock`. Duplicate inserts are
//! ignored the same way the SQLite backend's `INSERT OR IGNORE` ignores them.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{IssueLevel, IssueType, ProjectIssue};
use crate::models::{
    RecipeTypeInfo, StubContentPage, StubRecipe, StubRecipeIngredient, StubWorkbenches,
};
use crate::resource_location::ResourceLocation;

use super::ProjectDatabaseAccess;

type Key = (String, String);

/// A stored recipe ingredient row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IngredientRow {
    pub recipe_row: i64,
    pub id: String,
    pub slot: String,
    pub count: i32,
    pub input: bool,
}

#[derive(Default)]
struct MemoryState {
    items: BTreeSet<Key>,
    tags: BTreeSet<Key>,
    tag_tags: BTreeSet<(String, String, String)>,
    tag_items: BTreeSet<(String, String, String)>,
    recipe_types: BTreeMap<Key, RecipeTypeInfo>,
    recipes: BTreeMap<i64, (String, StubRecipe)>,
    next_recipe_row: i64,
    ingredient_items: BTreeSet<IngredientRow>,
    ingredient_tags: BTreeSet<IngredientRow>,
    workbenches: BTreeSet<(String, String, String)>,
    content_pages: BTreeMap<Key, String>,
    issues: Vec<ProjectIssue>,
    flat_tag_items: BTreeSet<(String, String, String)>,
}

/// In-memory database for testing.
pub struct InMemoryDatabase {
    state: RwLock<MemoryState>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    pub fn items(&self, project: &str) -> Vec<String> {
        let state = self.state.read().unwrap();
        scoped(&state.items, project)
    }

    pub fn tags(&self, project: &str) -> Vec<String> {
        let state = self.state.read().unwrap();
        scoped(&state.tags, project)
    }

    /// `(parent, child)` pairs.
    pub fn tag_tag_entries(&self, project: &str) -> Vec<(String, String)> {
        let state = self.state.read().unwrap();
        scoped_pairs(&state.tag_tags, project)
    }

    /// `(tag, item)` pairs.
    pub fn tag_item_entries(&self, project: &str) -> Vec<(String, String)> {
        let state = self.state.read().unwrap();
        scoped_pairs(&state.tag_items, project)
    }

    /// `(tag, item)` pairs of the flattened view.
    pub fn flat_tag_items(&self, project: &str) -> Vec<(String, String)> {
        let state = self.state.read().unwrap();
        scoped_pairs(&state.flat_tag_items, project)
    }

    pub fn recipe_types(&self, project: &str) -> Vec<RecipeTypeInfo> {
        let state = self.state.read().unwrap();
        state
            .recipe_types
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|(_, info)| info.clone())
            .collect()
    }

    pub fn recipes(&self, project: &str) -> Vec<StubRecipe> {
        let state = self.state.read().unwrap();
        state
            .recipes
            .values()
            .filter(|(p, _)| p == project)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn ingredient_item_rows(&self) -> Vec<IngredientRow> {
        self.state.read().unwrap().ingredient_items.iter().cloned().collect()
    }

    pub fn ingredient_tag_rows(&self) -> Vec<IngredientRow> {
        self.state.read().unwrap().ingredient_tags.iter().cloned().collect()
    }

    /// `(recipe type, item)` pairs.
    pub fn workbenches(&self, project: &str) -> Vec<(String, String)> {
        let state = self.state.read().unwrap();
        scoped_pairs(&state.workbenches, project)
    }

    /// `(page id, path)` pairs.
    pub fn content_pages(&self, project: &str) -> Vec<(String, String)> {
        let state = self.state.read().unwrap();
        state
            .content_pages
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|((_, id), path)| (id.clone(), path.clone()))
            .collect()
    }

    pub fn issues(&self) -> Vec<ProjectIssue> {
        self.state.read().unwrap().issues.clone()
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

fn scoped(set: &BTreeSet<Key>, project: &str) -> Vec<String> {
    set.iter()
        .filter(|(p, _)| p == project)
        .map(|(_, id)| id.clone())
        .collect()
}

fn scoped_pairs(set: &BTreeSet<(String, String, String)>, project: &str) -> Vec<(String, String)> {
    set.iter()
        .filter(|(p, _, _)| p == project)
        .map(|(_, a, b)| (a.clone(), b.clone()))
        .collect()
}

fn ingredient_row(recipe_row: i64, ingredient: &StubRecipeIngredient) -> IngredientRow {
    IngredientRow {
        recipe_row,
        id: ingredient.item_id.to_string(),
        slot: ingredient.slot.clone(),
        count: ingredient.count,
        input: ingredient.input,
    }
}

/// Rows are unique per recipe, id, slot and direction; the count is payload.
fn insert_unique(rows: &mut BTreeSet<IngredientRow>, row: IngredientRow) -> u64 {
    let exists = rows.iter().any(|r| {
        r.recipe_row == row.recipe_row && r.id == row.id && r.slot == row.slot && r.input == row.input
    });
    if exists {
        return 0;
    }
    rows.insert(row);
    1
}

/// Resolves every tag to the items reachable through nested tags.
fn flatten_tags(state: &MemoryState) -> BTreeSet<(String, String, String)> {
    let mut children: HashMap<(&str, &str), Vec<&str>> = HashMap::new();
    for (project, parent, child) in &state.tag_tags {
        children
            .entry((project.as_str(), parent.as_str()))
            .or_default()
            .push(child.as_str());
    }
    let mut direct: HashMap<(&str, &str), Vec<&str>> = HashMap::new();
    for (project, tag, item) in &state.tag_items {
        direct
            .entry((project.as_str(), tag.as_str()))
            .or_default()
            .push(item.as_str());
    }

    let mut flat = BTreeSet::new();
    for (project, root) in &state.tags {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([root.as_str()]);
        while let Some(tag) = queue.pop_front() {
            if !seen.insert(tag) {
                continue;
            }
            if let Some(items) = direct.get(&(project.as_str(), tag)) {
                for item in items {
                    flat.insert((project.clone(), root.clone(), item.to_string()));
                }
            }
            if let Some(nested) = children.get(&(project.as_str(), tag)) {
                queue.extend(nested.iter().copied());
            }
        }
    }
    flat
}

#[async_trait]
impl ProjectDatabaseAccess for InMemoryDatabase {
    async fn add_item(&self, project: &str, item: &ResourceLocation) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.items.insert((project.to_string(), item.to_string()));
        Ok(())
    }

    async fn add_tag(&self, project: &str, tag: &ResourceLocation) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.tags.insert((project.to_string(), tag.to_string()));
        Ok(())
    }

    async fn add_tag_tag_entry(
        &self,
        project: &str,
        parent: &ResourceLocation,
        child: &ResourceLocation,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state
            .tag_tags
            .insert((project.to_string(), parent.to_string(), child.to_string()));
        Ok(())
    }

    async fn add_tag_item_entry(
        &self,
        project: &str,
        tag: &ResourceLocation,
        item: &ResourceLocation,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state
            .tag_items
            .insert((project.to_string(), tag.to_string(), item.to_string()));
        Ok(())
    }

    async fn add_recipe_type(&self, project: &str, info: &RecipeTypeInfo) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state
            .recipe_types
            .insert((project.to_string(), info.id.to_string()), info.clone());
        Ok(())
    }

    async fn add_recipe(&self, project: &str, recipe: &StubRecipe) -> Result<i64> {
        let mut state = self.state.write().unwrap();
        if state
            .recipes
            .values()
            .any(|(p, r)| p == project && r.id == recipe.id)
        {
            anyhow::bail!("recipe {} already exists in project {}", recipe.id, project);
        }
        state.next_recipe_row += 1;
        let row = state.next_recipe_row;
        state.recipes.insert(row, (project.to_string(), recipe.clone()));
        Ok(row)
    }

    async fn add_recipe_ingredient_item(
        &self,
        recipe_row: i64,
        ingredient: &StubRecipeIngredient,
    ) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        Ok(insert_unique(
            &mut state.ingredient_items,
            ingredient_row(recipe_row, ingredient),
        ))
    }

    async fn add_recipe_ingredient_tag(
        &self,
        recipe_row: i64,
        ingredient: &StubRecipeIngredient,
    ) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        Ok(insert_unique(
            &mut state.ingredient_tags,
            ingredient_row(recipe_row, ingredient),
        ))
    }

    async fn add_recipe_workbenches(&self, project: &str, workbenches: &StubWorkbenches) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        let mut written = 0;
        for item in &workbenches.items {
            if state.workbenches.insert((
                project.to_string(),
                workbenches.recipe_type.to_string(),
                item.to_string(),
            )) {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn add_project_content_page(&self, project: &str, page: &StubContentPage) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state
            .content_pages
            .insert((project.to_string(), page.id.to_string()), page.path.clone());
        Ok(())
    }

    async fn get_project_content_path(
        &self,
        project: &str,
        id: &ResourceLocation,
    ) -> Result<Option<String>> {
        let state = self.state.read().unwrap();
        Ok(state
            .content_pages
            .get(&(project.to_string(), id.to_string()))
            .cloned())
    }

    async fn clear_project(&self, project: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.items.retain(|(p, _)| p != project);
        state.tags.retain(|(p, _)| p != project);
        state.tag_tags.retain(|(p, _, _)| p != project);
        state.tag_items.retain(|(p, _, _)| p != project);
        state.flat_tag_items.retain(|(p, _, _)| p != project);
        state.recipe_types.retain(|(p, _), _| p != project);
        state.recipes.retain(|_, (p, _)| p != project);
        let MemoryState {
            recipes,
            ingredient_items,
            ingredient_tags,
            ..
        } = &mut *state;
        ingredient_items.retain(|row| recipes.contains_key(&row.recipe_row));
        ingredient_tags.retain(|row| recipes.contains_key(&row.recipe_row));
        state.workbenches.retain(|(p, _, _)| p != project);
        state.content_pages.retain(|(p, _), _| p != project);
        Ok(())
    }

    async fn refresh_flat_tag_item_view(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let flat = flatten_tags(&state);
        state.flat_tag_items = flat;
        Ok(())
    }

    async fn add_project_issue(&self, issue: &ProjectIssue) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.issues.push(issue.clone());
        Ok(())
    }

    async fn get_project_issue(
        &self,
        deployment_id: &str,
        level: IssueLevel,
        issue_type: IssueType,
        file: &str,
    ) -> Result<Option<ProjectIssue>> {
        let state = self.state.read().unwrap();
        Ok(state
            .issues
            .iter()
            .find(|i| {
                i.deployment_id == deployment_id
                    && i.level == level
                    && i.issue_type == issue_type
                    && i.file == file
            })
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(s: &str) -> ResourceLocation {
        ResourceLocation::parse(s).unwrap()
    }

    #[tokio::test]
    async fn flat_view_resolves_nested_tags_and_cycles() {
        let db = InMemoryDatabase::new();
        db.add_tag("p", &loc("mod:all")).await.unwrap();
        db.add_tag("p", &loc("mod:wood")).await.unwrap();
        db.add_tag_tag_entry("p", &loc("mod:all"), &loc("mod:wood")).await.unwrap();
        db.add_tag_tag_entry("p", &loc("mod:wood"), &loc("mod:all")).await.unwrap();
        db.add_tag_item_entry("p", &loc("mod:wood"), &loc("mod:plank")).await.unwrap();
        db.add_tag_item_entry("p", &loc("mod:all"), &loc("mod:gear")).await.unwrap();

        db.refresh_flat_tag_item_view().await.unwrap();

        let flat = db.flat_tag_items("p");
        assert!(flat.contains(&("mod:all".into(), "mod:plank".into())));
        assert!(flat.contains(&("mod:all".into(), "mod:gear".into())));
        assert!(flat.contains(&("mod:wood".into(), "mod:gear".into())));
        assert_eq!(flat.len(), 4);
    }

    #[tokio::test]
    async fn duplicate_ingredient_rows_are_ignored() {
        let db = InMemoryDatabase::new();
        let ingredient = StubRecipeIngredient::input(loc("mod:a"), "1", 1, false);
        assert_eq!(db.add_recipe_ingredient_item(1, &ingredient).await.unwrap(), 1);
        assert_eq!(db.add_recipe_ingredient_item(1, &ingredient).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_project_keeps_other_projects() {
        let db = InMemoryDatabase::new();
        let recipe = StubRecipe {
            id: loc("mod:r"),
            recipe_type: loc("minecraft:smelting"),
            ingredients: vec![],
        };
        let row = db.add_recipe("p", &recipe).await.unwrap();
        let other = db.add_recipe("q", &recipe).await.unwrap();
        assert_ne!(row, other);
        let ingredient = StubRecipeIngredient::input(loc("mod:a"), "1", 1, false);
        db.add_recipe_ingredient_item(row, &ingredient).await.unwrap();
        db.add_recipe_ingredient_item(other, &ingredient).await.unwrap();
        db.add_item("p", &loc("mod:a")).await.unwrap();

        db.clear_project("p").await.unwrap();

        assert!(db.recipes("p").is_empty());
        assert!(db.items("p").is_empty());
        assert_eq!(db.recipes("q").len(), 1);
        assert_eq!(db.ingredient_item_rows().len(), 1);
        assert!(db.add_recipe("p", &recipe).await.unwrap() > other);
    }
}
