use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::ingredient::{parse_ingredient, parse_result, InvalidIngredient};
use crate::models::{RecipeTypeInfo, StubRecipe, StubRecipeIngredient, StubRecipeType};
use crate::resource_location::ResourceLocation;

/// Parses recipes whose type is declared by the project itself under
/// `.data/<ns>/recipe_type`.
///
/// Documents name their slots explicitly:
/// `{"type": "mod:press", "inputs": {"in": "mod:a"}, "outputs": {"out": {"id": "mod:b", "count": 2}}}`.
#[derive(Debug, Clone, Default)]
pub struct CustomParser {
    types: BTreeMap<ResourceLocation, RecipeTypeInfo>,
}

impl CustomParser {
    pub fn new(types: impl IntoIterator<Item = RecipeTypeInfo>) -> Self {
        Self {
            types: types.into_iter().map(|info| (info.id.clone(), info)).collect(),
        }
    }

    pub fn handles_type(&self, recipe_type: &ResourceLocation) -> bool {
        self.types.contains_key(recipe_type)
    }

    pub fn get_type(&self, recipe_type: &ResourceLocation) -> Option<&RecipeTypeInfo> {
        self.types.get(recipe_type)
    }

    pub fn parse(
        &self,
        id: &ResourceLocation,
        recipe_type: &ResourceLocation,
        json: &Map<String, Value>,
    ) -> Result<StubRecipe, InvalidIngredient> {
        let info = self.types.get(recipe_type);
        let mut ingredients = Vec::new();

        if let Some(raw) = json.get("inputs") {
            for (slot, value) in slot_map(raw)? {
                check_slot(info, slot, raw)?;
                let ingr = parse_ingredient(Some(value))?;
                ingredients.push(StubRecipeIngredient::input(ingr.id, slot.as_str(), ingr.count, ingr.is_tag));
            }
        }

        let raw_outputs = json.get("outputs");
        let outputs = match raw_outputs {
            Some(raw) => slot_map(raw)?,
            None => return Err(InvalidIngredient::new("missing outputs", None)),
        };
        if outputs.is_empty() {
            return Err(InvalidIngredient::new("recipe has no outputs", raw_outputs));
        }
        for (slot, value) in outputs {
            if let Some(raw) = raw_outputs {
                check_slot(info, slot, raw)?;
            }
            let result = parse_result(Some(value))?;
            ingredients.push(StubRecipeIngredient::output(result.id, slot.as_str(), result.count, false));
        }

        Ok(StubRecipe {
            id: id.clone(),
            recipe_type: recipe_type.clone(),
            ingredients,
        })
    }
}

fn slot_map(raw: &Value) -> Result<&Map<String, Value>, InvalidIngredient> {
    raw.as_object()
        .ok_or_else(|| InvalidIngredient::new("slots must be an object", Some(raw)))
}

/// A type that declares slots only accepts those slots.
fn check_slot(info: Option<&RecipeTypeInfo>, slot: &str, fragment: &Value) -> Result<(), InvalidIngredient> {
    match info {
        Some(info) if !info.slots.is_empty() && !info.slots.contains_key(slot) => Err(InvalidIngredient::new(
            format!("slot '{slot}' is not declared by {}", info.id),
            Some(fragment),
        )),
        _ => Ok(()),
    }
}

/// Reads a `.data/<ns>/recipe_type/<path>.json` document.
pub fn parse_recipe_type(stub: StubRecipeType, json: &Value) -> Result<RecipeTypeInfo, serde_json::Error> {
    #[derive(serde::Deserialize)]
    struct RawRecipeType {
        background: Option<String>,
        #[serde(default)]
        slots: BTreeMap<String, crate::models::SlotPosition>,
    }

    let raw: RawRecipeType = serde_json::from_value(json.clone())?;
    Ok(stub.with_display(raw.background, raw.slots))
}
