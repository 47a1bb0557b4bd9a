use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A chapter as it moves through one chain step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub ordinal: u64,
    pub title: String,
    pub source_link: String,
    pub body: String,
    pub translated_body: String,
}

impl Chapter {
    pub fn to_record(&self) -> ChapterRecord {
        ChapterRecord {
            ordinal: self.ordinal,
            title: self.title.clone(),
            content: self.translated_body.clone(),
            link: self.source_link.clone(),
        }
    }
}

/// Persisted chapter entry: `{ep_id, title, content, link}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRecord {
    #[serde(rename = "ep_id", with = "ep_id")]
    pub ordinal: u64,
    pub title: String,
    pub content: String,
    pub link: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRecord {
    pub title: String,
    #[serde(default)]
    pub chapters: Vec<ChapterRecord>,
}

impl WorkRecord {
    /// Replaces the entry sharing `record.link`, or appends it, then keeps
    /// the list ordinal-ascending.
    pub fn upsert(&mut self, record: ChapterRecord) {
        match self.chapters.iter_mut().find(|c| c.link == record.link) {
            Some(existing) => *existing = record,
            None => self.chapters.push(record),
        }
        self.chapters.sort_by_key(|c| c.ordinal);
    }
}

/// The whole work store: `{ [work_id]: WorkRecord }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreDocument {
    pub works: BTreeMap<String, WorkRecord>,
}

/// One table-of-contents entry found on a work's main page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub numeric_id: u64,
    pub title: String,
    pub link: String,
}

mod ep_id {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("ep_id is not numeric: {text}"))),
        }
    }
}
