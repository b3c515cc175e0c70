//! `wiki.json` project metadata at the docs root.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::resource_location::is_valid_namespace_char;

pub const WIKI_META_FILE: &str = "wiki.json";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectMetadata {
    pub id: String,
    #[serde(default)]
    pub modid: Option<String>,
    /// Distribution platform slugs keyed by platform name.
    #[serde(default)]
    pub platforms: BTreeMap<String, serde_json::Value>,
}

impl ProjectMetadata {
    /// Namespace owning the project's items. Falls back to the project id.
    pub fn modid(&self) -> &str {
        self.modid.as_deref().unwrap_or(&self.id)
    }
}

pub fn read_project_metadata(docs_root: &Path) -> Result<ProjectMetadata> {
    let path = docs_root.join(WIKI_META_FILE);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read {WIKI_META_FILE}"))?;
    parse_project_metadata(&content)
}

pub fn parse_project_metadata(content: &str) -> Result<ProjectMetadata> {
    let meta: ProjectMetadata =
        serde_json::from_str(content).with_context(|| format!("{WIKI_META_FILE} is malformed"))?;

    if meta.id.trim().is_empty() {
        bail!("{WIKI_META_FILE}: id must not be empty");
    }
    let modid = meta.modid();
    if modid.is_empty() || !modid.chars().all(is_valid_namespace_char) {
        bail!("{WIKI_META_FILE}: '{modid}' is not a valid namespace");
    }
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modid_defaults_to_id() {
        let meta = parse_project_metadata(r#"{"id": "techmod"}"#).unwrap();
        assert_eq!(meta.modid(), "techmod");
        assert!(meta.platforms.is_empty());

        let meta = parse_project_metadata(
            r#"{"id": "tech-mod", "modid": "techmod", "platforms": {"modrinth": "tech-mod"}}"#,
        )
        .unwrap();
        assert_eq!(meta.modid(), "techmod");
        assert_eq!(meta.platforms["modrinth"], "tech-mod");
    }

    #[test]
    fn rejects_bad_metadata() {
        assert!(parse_project_metadata("{").is_err());
        assert!(parse_project_metadata(r#"{"modid": "x"}"#).is_err());
        assert!(parse_project_metadata(r#"{"id": " "}"#).is_err());
        let err = parse_project_metadata(r#"{"id": "x", "modid": "Tech Mod"}"#).unwrap_err();
        assert!(err.to_string().contains("not a valid namespace"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = read_project_metadata(tmp.path()).unwrap_err();
        assert!(err.to_string().contains(WIKI_META_FILE));
    }
}
