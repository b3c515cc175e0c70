//! Vanilla recipe shapes in the default namespace.

use serde_json::{Map, Value};

use super::ingredient::{parse_ingredient, parse_result, IngredientRef, InvalidIngredient};
use crate::models::{StubRecipe, StubRecipeIngredient};
use crate::resource_location::ResourceLocation;

const GRID_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    CraftingShaped,
    CraftingShapeless,
    Smelting,
    Blasting,
    Smoking,
    CampfireCooking,
    Stonecutting,
    SmithingTransform,
}

impl BuiltinKind {
    pub const ALL: [BuiltinKind; 8] = [
        BuiltinKind::CraftingShaped,
        BuiltinKind::CraftingShapeless,
        BuiltinKind::Smelting,
        BuiltinKind::Blasting,
        BuiltinKind::Smoking,
        BuiltinKind::CampfireCooking,
        BuiltinKind::Stonecutting,
        BuiltinKind::SmithingTransform,
    ];

    pub fn path(self) -> &'static str {
        match self {
            BuiltinKind::CraftingShaped => "crafting_shaped",
            BuiltinKind::CraftingShapeless => "crafting_shapeless",
            BuiltinKind::Smelting => "smelting",
            BuiltinKind::Blasting => "blasting",
            BuiltinKind::Smoking => "smoking",
            BuiltinKind::CampfireCooking => "campfire_cooking",
            BuiltinKind::Stonecutting => "stonecutting",
            BuiltinKind::SmithingTransform => "smithing_transform",
        }
    }

    pub fn matches(self, recipe_type: &ResourceLocation) -> bool {
        recipe_type.is_default_namespace() && recipe_type.path() == self.path()
    }

    /// Extracts the ingredients of `json` into a recipe of this shape.
    pub fn parse(
        self,
        id: &ResourceLocation,
        recipe_type: &ResourceLocation,
        json: &Map<String, Value>,
    ) -> Result<StubRecipe, InvalidIngredient> {
        let mut ingredients = match self {
            BuiltinKind::CraftingShaped => shaped_inputs(json)?,
            BuiltinKind::CraftingShapeless => shapeless_inputs(json)?,
            BuiltinKind::Smelting
            | BuiltinKind::Blasting
            | BuiltinKind::Smoking
            | BuiltinKind::CampfireCooking
            | BuiltinKind::Stonecutting => vec![input(parse_ingredient(json.get("ingredient"))?, "1")],
            BuiltinKind::SmithingTransform => ["template", "base", "addition"]
                .into_iter()
                .map(|slot| parse_ingredient(json.get(slot)).map(|ingr| input(ingr, slot)))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let mut result = parse_result(json.get("result"))?;
        // Older formats keep the result count next to a string result.
        if let (Some(Value::String(_)), Some(count)) = (json.get("result"), json.get("count")) {
            result.count = count
                .as_i64()
                .and_then(|c| i32::try_from(c).ok())
                .ok_or_else(|| InvalidIngredient::new("count is not an integer", Some(count)))?;
        }
        ingredients.push(StubRecipeIngredient::output(result.id, "1", result.count, false));

        Ok(StubRecipe {
            id: id.clone(),
            recipe_type: recipe_type.clone(),
            ingredients,
        })
    }
}

fn input(ingredient: IngredientRef, slot: impl Into<String>) -> StubRecipeIngredient {
    StubRecipeIngredient::input(ingredient.id, slot, ingredient.count, ingredient.is_tag)
}

/// Expands the pattern grid against the key map. Each non-blank cell becomes
/// one input whose slot is its 1-based index in the 3x3 grid.
fn shaped_inputs(json: &Map<String, Value>) -> Result<Vec<StubRecipeIngredient>, InvalidIngredient> {
    let pattern = json.get("pattern");
    let rows = pattern
        .and_then(Value::as_array)
        .filter(|rows| !rows.is_empty() && rows.len() <= GRID_SIZE)
        .ok_or_else(|| InvalidIngredient::new("invalid pattern", pattern))?;
    let key = json
        .get("key")
        .and_then(Value::as_object)
        .ok_or_else(|| InvalidIngredient::new("missing key", json.get("key")))?;

    let mut inputs = Vec::new();
    for (row_index, row) in rows.iter().enumerate() {
        let row = row
            .as_str()
            .filter(|r| r.chars().count() <= GRID_SIZE)
            .ok_or_else(|| InvalidIngredient::new("invalid pattern row", Some(row)))?;
        for (col_index, symbol) in row.chars().enumerate() {
            if symbol == ' ' {
                continue;
            }
            let entry = key.get(symbol.to_string().as_str());
            let ingredient = parse_ingredient(entry).map_err(|e| match entry {
                None => InvalidIngredient::new(
                    format!("pattern symbol '{symbol}' is not in the key"),
                    json.get("key"),
                ),
                Some(_) => e,
            })?;
            let slot = row_index * GRID_SIZE + col_index + 1;
            inputs.push(input(ingredient, slot.to_string()));
        }
    }
    Ok(inputs)
}

fn shapeless_inputs(json: &Map<String, Value>) -> Result<Vec<StubRecipeIngredient>, InvalidIngredient> {
    let raw = json.get("ingredients");
    let entries = raw
        .and_then(Value::as_array)
        .filter(|entries| !entries.is_empty())
        .ok_or_else(|| InvalidIngredient::new("missing ingredients", raw))?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_ingredient(Some(entry)).map(|ingr| input(ingr, (index + 1).to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rl(s: &str) -> ResourceLocation {
        ResourceLocation::parse(s).unwrap()
    }

    fn parse(kind: BuiltinKind, json: Value) -> Result<StubRecipe, InvalidIngredient> {
        let recipe_type = ResourceLocation::new("minecraft", kind.path()).unwrap();
        kind.parse(&rl("mod:r"), &recipe_type, json.as_object().unwrap())
    }

    #[test]
    fn shapeless_with_tag() {
        let recipe = parse(
            BuiltinKind::CraftingShapeless,
            json!({
                "type": "minecraft:crafting_shapeless",
                "ingredients": ["mod:a", "#mod:wood"],
                "result": {"id": "mod:b", "count": 1}
            }),
        )
        .unwrap();

        assert_eq!(
            recipe.ingredients,
            vec![
                StubRecipeIngredient::input(rl("mod:a"), "1", 1, false),
                StubRecipeIngredient::input(rl("mod:wood"), "2", 1, true),
                StubRecipeIngredient::output(rl("mod:b"), "1", 1, false),
            ]
        );
    }

    #[test]
    fn shaped_expands_grid() {
        let recipe = parse(
            BuiltinKind::CraftingShaped,
            json!({
                "pattern": ["##", "# ", "|"],
                "key": {"#": {"tag": "minecraft:planks"}, "|": {"item": "minecraft:stick"}},
                "result": {"item": "mod:thing", "count": 2}
            }),
        )
        .unwrap();

        let slots: Vec<_> = recipe.inputs().map(|i| i.slot.as_str()).collect();
        assert_eq!(slots, ["1", "2", "4", "7"]);
        assert!(recipe.inputs().take(3).all(|i| i.is_tag));
        let outputs: Vec<_> = recipe.outputs().collect();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].count, 2);
    }

    #[test]
    fn shaped_inputs_never_exceed_filled_cells() {
        let patterns = [
            json!(["###", "###", "###"]),
            json!([" # ", "   ", " # "]),
            json!(["#"]),
            json!(["# #", " # "]),
        ];
        for pattern in patterns {
            let filled = pattern
                .as_array()
                .unwrap()
                .iter()
                .flat_map(|r| r.as_str().unwrap().chars())
                .filter(|c| *c != ' ')
                .count();
            let recipe = parse(
                BuiltinKind::CraftingShaped,
                json!({"pattern": pattern, "key": {"#": "mod:x"}, "result": "mod:y"}),
            )
            .unwrap();
            assert!(recipe.inputs().count() <= filled);
            assert_eq!(recipe.outputs().count(), 1);
        }
    }

    #[test]
    fn shaped_unknown_symbol() {
        let err = parse(
            BuiltinKind::CraftingShaped,
            json!({"pattern": ["#X"], "key": {"#": "mod:x"}, "result": "mod:y"}),
        )
        .unwrap_err();
        assert!(err.reason.contains("'X'"));
        assert_eq!(err.fragment, r##"{"#":"mod:x"}"##);
    }

    #[test]
    fn cooking_and_stonecutting() {
        for kind in [BuiltinKind::Smelting, BuiltinKind::CampfireCooking] {
            let recipe = parse(kind, json!({"ingredient": {"item": "mod:ore"}, "result": "mod:ingot"})).unwrap();
            assert_eq!(recipe.ingredients.len(), 2);
            assert_eq!(recipe.ingredients[0].slot, "1");
        }

        let recipe = parse(
            BuiltinKind::Stonecutting,
            json!({"ingredient": "mod:stone", "result": "mod:slab", "count": 2}),
        )
        .unwrap();
        assert_eq!(recipe.outputs().next().unwrap().count, 2);
    }

    #[test]
    fn smithing_uses_named_slots() {
        let recipe = parse(
            BuiltinKind::SmithingTransform,
            json!({
                "template": "minecraft:netherite_upgrade_smithing_template",
                "base": "minecraft:diamond_sword",
                "addition": "#minecraft:netherite_ingots",
                "result": {"id": "minecraft:netherite_sword"}
            }),
        )
        .unwrap();
        let slots: Vec<_> = recipe.inputs().map(|i| i.slot.as_str()).collect();
        assert_eq!(slots, ["template", "base", "addition"]);

        let err = parse(BuiltinKind::SmithingTransform, json!({"template": "a:b", "result": "a:c"})).unwrap_err();
        assert_eq!(err.fragment, "null");
    }

    #[test]
    fn missing_result_fails() {
        assert!(parse(BuiltinKind::CraftingShapeless, json!({"ingredients": ["mod:a"]})).is_err());
    }
}
