use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::files::{data_files, load_data_file};
use super::{IngestContext, SubIngestor};
use crate::error::{ErrorKind, IssueLevel, IssueType};
use crate::issues::FileIssueCallback;
use crate::models::{PreparationResult, PreparedData, StubTag, TagEntry};
use crate::resource_location::ResourceLocation;
use crate::schema::SchemaKind;

/// Tag directories, current name first.
const TAG_DIRS: [&str; 2] = ["tags/item", "tags/items"];

/// Reads item tags and persists tag-to-tag and tag-to-item entries.
pub struct TagsSubIngestor {
    ctx: Arc<IngestContext>,
    tags: BTreeMap<ResourceLocation, PreparedData<StubTag>>,
}

impl TagsSubIngestor {
    pub fn new(ctx: Arc<IngestContext>) -> Self {
        Self {
            ctx,
            tags: BTreeMap::new(),
        }
    }

    /// Parses the `values` array. Entries that are not valid locations are
    /// reported and dropped; the rest of the tag is kept.
    async fn read_entries(json: &Value, issues: &FileIssueCallback) -> Vec<TagEntry> {
        let values = json.get("values").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
        let mut entries = Vec::with_capacity(values.len());
        for value in values {
            let raw = match value {
                Value::String(raw) => raw.as_str(),
                Value::Object(map) => map.get("id").and_then(Value::as_str).unwrap_or_default(),
                _ => "",
            };
            let (raw, is_tag) = match raw.strip_prefix('#') {
                Some(rest) => (rest, true),
                None => (raw, false),
            };
            match ResourceLocation::parse(raw) {
                Ok(id) if is_tag => entries.push(TagEntry::Tag(id)),
                Ok(id) => entries.push(TagEntry::Item(id)),
                Err(e) => {
                    issues
                        .add_issue(
                            IssueLevel::Error,
                            IssueType::File,
                            ErrorKind::InvalidResloc,
                            format!("invalid tag entry {value}: {e}"),
                        )
                        .await;
                }
            }
        }
        entries
    }
}

#[async_trait]
impl SubIngestor for TagsSubIngestor {
    fn name(&self) -> &'static str {
        "tags"
    }

    async fn prepare(&mut self) -> Result<PreparationResult> {
        let mut items = std::collections::BTreeSet::new();

        for dir in TAG_DIRS {
            for file in data_files(&self.ctx.docs_root, dir) {
                let Some(loaded) = load_data_file(&self.ctx, &file, SchemaKind::Tag).await else {
                    continue;
                };

                if let Some(existing) = self.tags.get(&loaded.id) {
                    loaded
                        .issues
                        .add_issue(
                            IssueLevel::Warning,
                            IssueType::File,
                            ErrorKind::DuplicatePage,
                            format!("tag {} is already defined in {}", loaded.id, existing.issues.path()),
                        )
                        .await;
                    continue;
                }

                let entries = Self::read_entries(&loaded.json, &loaded.issues).await;
                for entry in &entries {
                    if let TagEntry::Item(item) = entry {
                        if item.namespace() == self.ctx.modid {
                            items.insert(item.to_string());
                        }
                    }
                }

                let tag = StubTag {
                    id: loaded.id.clone(),
                    entries,
                };
                self.tags.insert(loaded.id, PreparedData::new(tag, loaded.issues));
            }
        }

        self.ctx.log.info(&format!("Found {} tags", self.tags.len()));
        Ok(PreparationResult::new(items))
    }

    async fn execute(&mut self) -> Result<()> {
        let ctx = &self.ctx;
        for prepared in self.tags.values() {
            let tag = &prepared.data;
            if let Err(e) = persist_tag(ctx, tag).await {
                prepared
                    .issues
                    .add_issue(
                        IssueLevel::Error,
                        IssueType::Internal,
                        ErrorKind::Unknown,
                        format!("failed to store tag {}: {e:#}", tag.id),
                    )
                    .await;
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.ctx.db.refresh_flat_tag_item_view().await
    }
}

async fn persist_tag(ctx: &IngestContext, tag: &StubTag) -> Result<()> {
    ctx.db.add_tag(&ctx.project, &tag.id).await?;
    for entry in &tag.entries {
        match entry {
            TagEntry::Tag(child) => ctx.db.add_tag_tag_entry(&ctx.project, &tag.id, child).await?,
            TagEntry::Item(item) => ctx.db.add_tag_item_entry(&ctx.project, &tag.id, item).await?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryDatabase;
    use crate::ingest::test_support::{context, write};
    use tempfile::TempDir;

    #[tokio::test]
    async fn nested_tag_and_item_entries() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            ".data/mod/tags/item/mytag.json",
            r##"{"values": ["#othertag", "mod:item1"]}"##,
        );

        let db = Arc::new(InMemoryDatabase::new());
        let mut ingestor = TagsSubIngestor::new(context(tmp.path(), &db));
        let prepared = ingestor.prepare().await.unwrap();
        assert_eq!(prepared.items.into_iter().collect::<Vec<_>>(), ["mod:item1"]);

        ingestor.execute().await.unwrap();
        assert_eq!(
            db.tag_tag_entries("demo"),
            [("mod:mytag".to_string(), "minecraft:othertag".to_string())]
        );
        assert_eq!(
            db.tag_item_entries("demo"),
            [("mod:mytag".to_string(), "mod:item1".to_string())]
        );
    }

    #[tokio::test]
    async fn foreign_items_are_not_discovered() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            ".data/mod/tags/item/ores.json",
            r#"{"values": ["minecraft:iron_ore", {"id": "mod:tin_ore", "required": false}, "other:ore"]}"#,
        );

        let db = Arc::new(InMemoryDatabase::new());
        let mut ingestor = TagsSubIngestor::new(context(tmp.path(), &db));
        let prepared = ingestor.prepare().await.unwrap();
        assert_eq!(prepared.items.into_iter().collect::<Vec<_>>(), ["mod:tin_ore"]);
    }

    #[tokio::test]
    async fn validation_short_circuits_per_file() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, ".data/mod/tags/item/Bad.json", "not json at all");
        write(root, ".data/mod/tags/item/broken.json", "{");
        write(root, ".data/mod/tags/item/shape.json", r#"{"values": "mod:a"}"#);
        write(root, ".data/mod/tags/item/good.json", r#"{"values": ["mod:a", "Not Valid"]}"#);
        write(root, ".data/mod/tags/items/good.json", r#"{"values": ["mod:b"]}"#);

        let db = Arc::new(InMemoryDatabase::new());
        let ctx = context(root, &db);
        let mut ingestor = TagsSubIngestor::new(ctx.clone());
        ingestor.prepare().await.unwrap();
        ingestor.execute().await.unwrap();
        ingestor.finish().await.unwrap();

        let issues = db.issues();
        let find = |file: &str| issues.iter().find(|i| i.file == file).map(|i| i.subject);
        assert_eq!(find(".data/mod/tags/item/Bad.json"), Some(ErrorKind::InvalidResloc));
        assert_eq!(find(".data/mod/tags/item/broken.json"), Some(ErrorKind::InvalidFile));
        assert_eq!(find(".data/mod/tags/item/shape.json"), Some(ErrorKind::InvalidFormat));
        assert_eq!(find(".data/mod/tags/item/good.json"), Some(ErrorKind::InvalidResloc));
        assert_eq!(find(".data/mod/tags/items/good.json"), Some(ErrorKind::DuplicatePage));

        assert_eq!(db.tags("demo"), ["mod:good"]);
        assert_eq!(
            db.flat_tag_items("demo"),
            [("mod:good".to_string(), "mod:a".to_string())]
        );
    }
}
