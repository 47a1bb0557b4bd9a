use anyhow::Context as _;

use crate::formats::{Chapter, StoreDocument, WorkRecord};
use crate::state::KvStore;

/// Translated chapters of every work, kept as one JSON document.
pub struct WorkStore<'a> {
    kv: &'a dyn KvStore,
    key: String,
}

impl<'a> WorkStore<'a> {
    pub fn new(kv: &'a dyn KvStore, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    /// Absent or unparsable content loads as an empty store.
    pub fn load(&self) -> anyhow::Result<StoreDocument> {
        let raw = match self.kv.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(StoreDocument::default()),
            Err(err) if is_invalid_data(&err) => {
                tracing::warn!(
                    store = %self.key,
                    error = %format!("{err:#}"),
                    "work store is not valid UTF-8; starting from an empty store"
                );
                return Ok(StoreDocument::default());
            }
            Err(err) => return Err(err),
        };
        if raw.trim().is_empty() {
            return Ok(StoreDocument::default());
        }
        match serde_json::from_str(&raw) {
            Ok(doc) => Ok(doc),
            Err(err) => {
                tracing::warn!(
                    store = %self.key,
                    error = %err,
                    "work store is corrupt; starting from an empty store"
                );
                Ok(StoreDocument::default())
            }
        }
    }

    pub fn work(&self, work_id: &str) -> anyhow::Result<Option<WorkRecord>> {
        Ok(self.load()?.works.remove(work_id))
    }

    pub fn upsert_chapter(
        &self,
        work_id: &str,
        work_title: &str,
        chapter: &Chapter,
    ) -> anyhow::Result<()> {
        let mut doc = self.load()?;
        let record = doc
            .works
            .entry(work_id.to_owned())
            .or_insert_with(WorkRecord::default);
        record.title = work_title.to_owned();
        record.upsert(chapter.to_record());

        let json = serde_json::to_string_pretty(&doc).context("serialize work store")?;
        self.kv
            .put(&self.key, &json)
            .with_context(|| format!("write work store: {}", self.key))?;

        tracing::debug!(
            work_id = work_id,
            link = %chapter.source_link,
            ordinal = chapter.ordinal,
            "chapter persisted"
        );
        Ok(())
    }
}

fn is_invalid_data(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::InvalidData)
    })
}
