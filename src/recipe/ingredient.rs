use serde_json::Value;

use crate::resource_location::ResourceLocation;

/// An ingredient reference read from a recipe document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngredientRef {
    pub id: ResourceLocation,
    pub is_tag: bool,
    pub count: i32,
}

/// Why an ingredient could not be read. Carries the offending fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidIngredient {
    pub reason: String,
    pub fragment: String,
}

impl InvalidIngredient {
    pub fn new(reason: impl Into<String>, fragment: Option<&Value>) -> Self {
        Self {
            reason: reason.into(),
            fragment: fragment.map(Value::to_string).unwrap_or_else(|| "null".into()),
        }
    }

    pub fn details(&self) -> String {
        format!("{}: {}", self.reason, self.fragment)
    }
}

/// Reads `"ns:item"`, `"#ns:tag"`, or an object with an `item`, `tag` or
/// `id` key and an optional integer `count`. An array of alternatives
/// resolves to its first entry.
pub fn parse_ingredient(value: Option<&Value>) -> Result<IngredientRef, InvalidIngredient> {
    let invalid = |reason: &str| InvalidIngredient::new(reason, value);

    match value {
        Some(Value::String(raw)) => reference(raw, false, 1).ok_or_else(|| invalid("invalid ingredient id")),
        Some(Value::Object(map)) => {
            let count = match map.get("count") {
                None => 1,
                Some(raw) => raw
                    .as_i64()
                    .and_then(|c| i32::try_from(c).ok())
                    .ok_or_else(|| invalid("count is not an integer"))?,
            };
            let (raw, force_tag) = if let Some(Value::String(tag)) = map.get("tag") {
                (tag, true)
            } else if let Some(Value::String(item)) = map.get("item") {
                (item, false)
            } else if let Some(Value::String(id)) = map.get("id") {
                (id, false)
            } else {
                return Err(invalid("ingredient has no item, tag or id"));
            };
            reference(raw, force_tag, count).ok_or_else(|| invalid("invalid ingredient id"))
        }
        Some(Value::Array(alternatives)) => match alternatives.first() {
            Some(first) => parse_ingredient(Some(first)),
            None => Err(invalid("empty ingredient list")),
        },
        _ => Err(invalid("missing ingredient")),
    }
}

/// Reads a recipe result. Tags are not valid results.
pub fn parse_result(value: Option<&Value>) -> Result<IngredientRef, InvalidIngredient> {
    let result = parse_ingredient(value)?;
    if result.is_tag {
        return Err(InvalidIngredient::new("result cannot be a tag", value));
    }
    Ok(result)
}

fn reference(raw: &str, force_tag: bool, count: i32) -> Option<IngredientRef> {
    let (raw, is_tag) = match raw.strip_prefix('#') {
        Some(rest) => (rest, true),
        None => (raw, force_tag),
    };
    let id = ResourceLocation::parse(raw).ok()?;
    Some(IngredientRef { id, is_tag, count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rl(s: &str) -> ResourceLocation {
        ResourceLocation::parse(s).unwrap()
    }

    #[test]
    fn string_forms() {
        let item = parse_ingredient(Some(&json!("mod:a"))).unwrap();
        assert_eq!(item, IngredientRef { id: rl("mod:a"), is_tag: false, count: 1 });

        let tag = parse_ingredient(Some(&json!("#mod:wood"))).unwrap();
        assert_eq!(tag.id, rl("mod:wood"));
        assert!(tag.is_tag);
    }

    #[test]
    fn object_forms() {
        let tag = parse_ingredient(Some(&json!({"tag": "c:ingots/iron"}))).unwrap();
        assert!(tag.is_tag);
        assert_eq!(tag.id.to_string(), "c:ingots/iron");

        let counted = parse_ingredient(Some(&json!({"id": "mod:b", "count": 4}))).unwrap();
        assert_eq!(counted.count, 4);

        let first = parse_ingredient(Some(&json!([{"item": "mod:x"}, {"item": "mod:y"}]))).unwrap();
        assert_eq!(first.id, rl("mod:x"));
    }

    #[test]
    fn counts_are_not_bounded() {
        let zero = parse_ingredient(Some(&json!({"item": "mod:a", "count": 0}))).unwrap();
        assert_eq!(zero.count, 0);
        assert!(parse_ingredient(Some(&json!({"item": "mod:a", "count": "2"}))).is_err());
    }

    #[test]
    fn malformed_keeps_fragment() {
        let err = parse_ingredient(Some(&json!({"count": 2}))).unwrap_err();
        assert_eq!(err.fragment, r#"{"count":2}"#);
        assert!(parse_ingredient(None).is_err());
        assert!(parse_ingredient(Some(&json!("Bad Id"))).is_err());
        assert!(parse_result(Some(&json!("#mod:tag"))).is_err());
    }
}
