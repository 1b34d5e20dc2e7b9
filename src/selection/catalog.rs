//! Ordered persona/activity image catalog
//!
//! Images are named `Persona_<pid>_Activity_<aid>.<jpg|jpeg|png>` and their
//! narrations `Persona_<pid>_Activity_<aid>_Description.<txt|md|json>`.

use super::{channel, Selection, SelectionProvider, SelectionPublisher};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

static IMAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Persona_(\d+)_Activity_(\d+)\.(?:jpg|jpeg|png)$")
        .expect("Invalid regex pattern for image names")
});

static NARRATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Persona_(\d+)_Activity_(\d+)_Description\.(txt|md|json)$")
        .expect("Invalid regex pattern for narration names")
});

/// JSON narrations carry the scenario under this field
const ACTIVITY_DESCRIPTION_FIELD: &str = "Activity Description";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no image with key {0}")]
    UnknownKey(String),
    #[error("no image for persona {persona_id}, activity {activity_id}")]
    UnknownPair { persona_id: u32, activity_id: u32 },
    #[error("{0} is not a narration file name")]
    NotNarration(String),
    #[error("narration {name} is not valid JSON: {source}")]
    NarrationJson {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One image in the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub key: String,
    pub persona_id: u32,
    pub activity_id: u32,
    pub image_name: String,
    pub narration: Option<String>,
}

impl ImageRecord {
    fn selection(&self) -> Selection {
        Selection {
            key: self.key.clone(),
            persona_id: self.persona_id,
            activity_id: self.activity_id,
            image_name: self.image_name.clone(),
            narration: self.narration.clone(),
        }
    }
}

fn record_key(persona_id: u32, activity_id: u32) -> String {
    format!("{persona_id}_{activity_id}")
}

fn parse_ids(captures: &regex::Captures<'_>) -> Option<(u32, u32)> {
    let persona_id = captures.get(1)?.as_str().parse().ok()?;
    let activity_id = captures.get(2)?.as_str().parse().ok()?;
    Some((persona_id, activity_id))
}

/// Images sorted by persona then activity, with a current position
#[derive(Debug)]
pub struct ImageCatalog {
    records: Vec<ImageRecord>,
    index: Option<usize>,
    publisher: SelectionPublisher,
}

impl ImageCatalog {
    /// Build from file names. Names that are not images are skipped; the
    /// first image is selected.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut records: Vec<ImageRecord> = Vec::new();
        for name in names {
            let name = name.as_ref();
            let Some((persona_id, activity_id)) =
                IMAGE_PATTERN.captures(name).as_ref().and_then(parse_ids)
            else {
                continue;
            };
            let key = record_key(persona_id, activity_id);
            if records.iter().any(|r| r.key == key) {
                tracing::debug!(name, "Skipping duplicate image");
                continue;
            }
            records.push(ImageRecord {
                key,
                persona_id,
                activity_id,
                image_name: name.to_string(),
                narration: None,
            });
        }
        records.sort_by_key(|r| (r.persona_id, r.activity_id));

        let catalog = Self {
            index: if records.is_empty() { None } else { Some(0) },
            records,
            publisher: channel(),
        };
        catalog.publish();
        catalog
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    /// A live reader of the current selection
    pub fn provider(&self) -> SelectionProvider {
        self.publisher.provider()
    }

    pub fn current(&self) -> Option<Selection> {
        self.index.map(|i| self.records[i].selection())
    }

    pub fn select(&mut self, key: &str) -> Result<Selection, CatalogError> {
        let index = self
            .records
            .iter()
            .position(|r| r.key == key || r.image_name == key)
            .ok_or_else(|| CatalogError::UnknownKey(key.to_string()))?;
        Ok(self.move_to(index))
    }

    pub fn has_next(&self) -> bool {
        self.index.is_some_and(|i| i + 1 < self.records.len())
    }

    /// Move to the next image. Returns `None` at the end, leaving the
    /// selection where it was.
    pub fn advance(&mut self) -> Option<Selection> {
        if !self.has_next() {
            return None;
        }
        let next = self.index.map_or(0, |i| i + 1);
        Some(self.move_to(next))
    }

    /// Attach a narration file's contents to its image
    pub fn attach_narration(&mut self, file_name: &str, contents: &str) -> Result<(), CatalogError> {
        let captures = NARRATION_PATTERN
            .captures(file_name)
            .ok_or_else(|| CatalogError::NotNarration(file_name.to_string()))?;
        let (persona_id, activity_id) = parse_ids(&captures)
            .ok_or_else(|| CatalogError::NotNarration(file_name.to_string()))?;
        let is_json = captures
            .get(3)
            .is_some_and(|ext| ext.as_str().eq_ignore_ascii_case("json"));

        let narration = if is_json {
            let value: Value =
                serde_json::from_str(contents).map_err(|source| CatalogError::NarrationJson {
                    name: file_name.to_string(),
                    source,
                })?;
            value
                .get(ACTIVITY_DESCRIPTION_FIELD)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        } else {
            contents.to_string()
        };

        let index = self
            .records
            .iter()
            .position(|r| r.persona_id == persona_id && r.activity_id == activity_id)
            .ok_or(CatalogError::UnknownPair {
                persona_id,
                activity_id,
            })?;
        self.records[index].narration = Some(narration);
        if self.index == Some(index) {
            self.publish();
        }
        Ok(())
    }

    fn move_to(&mut self, index: usize) -> Selection {
        self.index = Some(index);
        self.publish();
        self.records[index].selection()
    }

    fn publish(&self) {
        self.publisher.publish(self.current());
    }
}
