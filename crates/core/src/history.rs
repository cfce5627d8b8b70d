//! Durable media records and the caller-visible history list.
//!
//! History is ordered newest-first and never holds two entries with the
//! same uid.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::slots::RemoteMedia;
use crate::types::{MediaUid, Timestamp};

/// A stored media record as returned by `GET /media-data/{uid}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub uid: MediaUid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(
        default,
        alias = "createdAt",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<Timestamp>,
    /// Per-field metadata (description, tags, formats, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Any other top-level fields the backend sends.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HistoryEntry {
    pub fn new(uid: impl Into<MediaUid>) -> Self {
        Self {
            uid: uid.into(),
            url: None,
            urls: Vec::new(),
            seed: None,
            prompt: None,
            created_at: None,
            metadata: Map::new(),
            extra: Map::new(),
        }
    }

    /// `url`, or the first of `urls`.
    pub fn primary_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or_else(|| self.urls.first().map(String::as_str))
    }

    /// Reuse this record as an input slot. `None` when it has no URL.
    pub fn to_remote_media(&self) -> Option<RemoteMedia> {
        let url = self.primary_url()?.to_string();
        let mut fields = self.extra.clone();
        fields.insert("uid".into(), Value::String(self.uid.clone()));
        if let Some(prompt) = &self.prompt {
            fields.insert("prompt".into(), Value::String(prompt.clone()));
        }
        if let Some(seed) = self.seed {
            fields.insert("seed".into(), Value::from(seed));
        }
        Some(RemoteMedia {
            url,
            fields,
            metadata: self.metadata.clone(),
        })
    }
}

/// Newest-first list of media records, unique by uid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at the head, dropping any older entry with the same uid.
    pub fn merge_at_head(&mut self, entry: HistoryEntry) {
        self.entries.retain(|existing| existing.uid != entry.uid);
        self.entries.insert(0, entry);
    }

    /// Replace an entry in place, or insert at the head when absent.
    pub fn replace_or_insert(&mut self, entry: HistoryEntry) {
        match self.entries.iter_mut().find(|e| e.uid == entry.uid) {
            Some(existing) => *existing = entry,
            None => self.entries.insert(0, entry),
        }
    }

    /// Append a page loaded from the gallery, skipping uids already known.
    pub fn load_gallery(&mut self, page: impl IntoIterator<Item = HistoryEntry>) {
        for entry in page {
            if !self.contains(&entry.uid) {
                self.entries.push(entry);
            }
        }
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.entries.iter().any(|e| e.uid == uid)
    }

    pub fn get(&self, uid: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.uid == uid)
    }

    pub fn first(&self) -> Option<&HistoryEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}

/// Current result plus history, as shown to the user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultState {
    pub current: Option<HistoryEntry>,
    pub history: History,
}

impl ResultState {
    /// A freshly generated (or uploaded) record becomes the current result
    /// and the head of history.
    pub fn accept_generated(&mut self, entry: HistoryEntry) {
        self.history.merge_at_head(entry.clone());
        self.current = Some(entry);
    }

    /// A regenerated record replaces its previous version wherever it
    /// appears.
    pub fn accept_regenerated(&mut self, entry: HistoryEntry) {
        if self.current.as_ref().is_some_and(|c| c.uid == entry.uid) {
            self.current = Some(entry.clone());
        }
        self.history.replace_or_insert(entry);
    }

    pub fn load_gallery(&mut self, page: impl IntoIterator<Item = HistoryEntry>) {
        self.history.load_gallery(page);
    }
}
