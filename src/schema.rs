//! JSON-schema validation of untrusted data files.
//!
//! Schemas are bundled with the binary (`schemas/*.json`) and compiled once
//! when the validator is built.

use anyhow::{anyhow, Result};
use jsonschema::JSONSchema;
use serde_json::Value;

/// The document kinds validated before domain parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    Recipe,
    RecipeType,
    Tag,
    Workbenches,
    FolderMetadata,
}

impl SchemaKind {
    pub const ALL: [SchemaKind; 5] = [
        SchemaKind::Recipe,
        SchemaKind::RecipeType,
        SchemaKind::Tag,
        SchemaKind::Workbenches,
        SchemaKind::FolderMetadata,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SchemaKind::Recipe => "recipe",
            SchemaKind::RecipeType => "recipe_type",
            SchemaKind::Tag => "tag",
            SchemaKind::Workbenches => "workbenches",
            SchemaKind::FolderMetadata => "folder_metadata",
        }
    }

    fn source(self) -> &'static str {
        match self {
            SchemaKind::Recipe => include_str!("../schemas/recipe.json"),
            SchemaKind::RecipeType => include_str!("../schemas/recipe_type.json"),
            SchemaKind::Tag => include_str!("../schemas/tag.json"),
            SchemaKind::Workbenches => include_str!("../schemas/workbenches.json"),
            SchemaKind::FolderMetadata => include_str!("../schemas/folder_metadata.json"),
        }
    }
}

/// Validates a JSON document; `None` means it conforms.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, kind: SchemaKind, instance: &Value) -> Option<String>;
}

pub struct JsonSchemaValidator {
    recipe: JSONSchema,
    recipe_type: JSONSchema,
    tag: JSONSchema,
    workbenches: JSONSchema,
    folder_metadata: JSONSchema,
}

impl JsonSchemaValidator {
    pub fn new() -> Result<Self> {
        Ok(Self {
            recipe: compile(SchemaKind::Recipe)?,
            recipe_type: compile(SchemaKind::RecipeType)?,
            tag: compile(SchemaKind::Tag)?,
            workbenches: compile(SchemaKind::Workbenches)?,
            folder_metadata: compile(SchemaKind::FolderMetadata)?,
        })
    }

    fn schema(&self, kind: SchemaKind) -> &JSONSchema {
        match kind {
            SchemaKind::Recipe => &self.recipe,
            SchemaKind::RecipeType => &self.recipe_type,
            SchemaKind::Tag => &self.tag,
            SchemaKind::Workbenches => &self.workbenches,
            SchemaKind::FolderMetadata => &self.folder_metadata,
        }
    }
}

fn compile(kind: SchemaKind) -> Result<JSONSchema> {
    let raw: Value = serde_json::from_str(kind.source())
        .map_err(|e| anyhow!("bundled {} schema is not JSON: {e}", kind.name()))?;
    JSONSchema::compile(&raw).map_err(|e| anyhow!("bundled {} schema does not compile: {e}", kind.name()))
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, kind: SchemaKind, instance: &Value) -> Option<String> {
        let errors = match self.schema(kind).validate(instance) {
            Ok(()) => return None,
            Err(errors) => errors,
        };
        let mut lines = errors
            .map(|e| {
                let ptr = e.instance_path.to_string();
                if ptr.is_empty() {
                    e.to_string()
                } else {
                    format!("{ptr}: {e}")
                }
            })
            .collect::<Vec<_>>();
        lines.sort();
        Some(lines.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bundled_schemas_compile() {
        let validator = JsonSchemaValidator::new().unwrap();
        for kind in SchemaKind::ALL {
            assert!(validator.validate(kind, &json!(null)).is_some(), "{}", kind.name());
        }
    }

    #[test]
    fn tag_values_must_be_entries() {
        let validator = JsonSchemaValidator::new().unwrap();
        assert!(validator
            .validate(SchemaKind::Tag, &json!({"values": ["mod:a", {"id": "#mod:b", "required": false}]}))
            .is_none());

        let message = validator
            .validate(SchemaKind::Tag, &json!({"values": [1]}))
            .unwrap();
        assert!(message.starts_with("/values/0"), "{message}");
        assert!(validator.validate(SchemaKind::Tag, &json!({})).is_some());
    }

    #[test]
    fn recipe_requires_type() {
        let validator = JsonSchemaValidator::new().unwrap();
        assert!(validator.validate(SchemaKind::Recipe, &json!({"ingredients": []})).is_some());
        assert!(validator
            .validate(SchemaKind::Recipe, &json!({"type": "minecraft:smelting"}))
            .is_none());
    }

    #[test]
    fn folder_metadata_entries() {
        let validator = JsonSchemaValidator::new().unwrap();
        assert!(validator
            .validate(
                SchemaKind::FolderMetadata,
                &json!({"blocks": "Blocks", "items": {"name": "Items", "icon": "mod:gear"}})
            )
            .is_none());
        assert!(validator
            .validate(SchemaKind::FolderMetadata, &json!({"items": {"icon": "mod:gear"}}))
            .is_some());
    }
}
