//! Bounded input-media slots.
//!
//! Each workflow declares how many image and audio inputs it needs; the
//! [`MediaSlotModel`] holds one fixed-capacity [`MediaSlots`] sequence per
//! kind. Local files own a [`PreviewHandle`] that is released exactly once,
//! when the slot is replaced, cleared, or dropped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::types::MediaKind;
use crate::workflow::Workflow;

// ---------------------------------------------------------------------------
// Preview handles
// ---------------------------------------------------------------------------

/// Allocator for ephemeral preview URLs.
///
/// Tracks every live handle so leaks are observable via
/// [`live_count`](Self::live_count).
#[derive(Debug, Default)]
pub struct PreviewStore {
    next_id: AtomicU64,
    live: Mutex<HashSet<String>>,
}

impl PreviewStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocate a new preview URL owned by the returned handle.
    pub fn acquire(self: &Arc<Self>, kind: MediaKind) -> PreviewHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let url = format!("preview://{kind}/{id}");
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.clone());
        PreviewHandle {
            url,
            store: Arc::clone(self),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_live(&self, url: &str) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(url)
    }

    fn release(&self, url: &str) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
    }
}

/// Exclusive owner of one preview URL. Released on drop.
#[derive(Debug)]
pub struct PreviewHandle {
    url: String,
    store: Arc<PreviewStore>,
}

impl PreviewHandle {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.store.release(&self.url);
    }
}

// ---------------------------------------------------------------------------
// Slot contents
// ---------------------------------------------------------------------------

/// A file picked from the local machine.
#[derive(Debug)]
pub struct LocalMedia {
    pub bytes: Vec<u8>,
    pub file_name: String,
    preview: PreviewHandle,
}

impl LocalMedia {
    pub fn preview_url(&self) -> &str {
        self.preview.url()
    }
}

/// A reference to media already stored on the server (typically a history
/// entry). Only fetched to bytes when a request is assembled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteMedia {
    pub url: String,
    /// Top-level fields of the referenced record (`uid`, `name`, ...).
    pub fields: Map<String, Value>,
    /// Nested `metadata` object of the referenced record, preferred over
    /// `fields` when both carry the same key.
    pub metadata: Map<String, Value>,
}

impl RemoteMedia {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Text value for a metadata field, from `metadata` first, then from
    /// the top-level fields.
    pub fn field_text(&self, name: &str) -> Option<String> {
        self.metadata
            .get(name)
            .or_else(|| self.fields.get(name))
            .and_then(value_text)
    }

    /// File name for the resolved bytes, derived from the URL path.
    pub fn file_name(&self) -> String {
        self.url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("remote")
            .to_string()
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let joined: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect();
            (!joined.is_empty()).then(|| joined.join(", "))
        }
        other => Some(other.to_string()),
    }
}

/// One fixed-position attachment point.
#[derive(Debug, Default)]
pub enum MediaSlot {
    #[default]
    Empty,
    LocalFile(LocalMedia),
    RemoteReference(RemoteMedia),
}

impl MediaSlot {
    pub fn is_filled(&self) -> bool {
        !matches!(self, MediaSlot::Empty)
    }

    pub fn is_local(&self) -> bool {
        matches!(self, MediaSlot::LocalFile(_))
    }
}

// ---------------------------------------------------------------------------
// Slot sequences
// ---------------------------------------------------------------------------

/// Fixed-capacity ordered slots of a single media kind.
///
/// Indexes outside `[0, capacity)` are programming errors and panic.
#[derive(Debug)]
pub struct MediaSlots {
    kind: MediaKind,
    slots: Vec<MediaSlot>,
    previews: Arc<PreviewStore>,
}

impl MediaSlots {
    pub fn new(kind: MediaKind, capacity: usize, previews: Arc<PreviewStore>) -> Self {
        Self {
            kind,
            slots: (0..capacity).map(|_| MediaSlot::Empty).collect(),
            previews,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Attach a local file, releasing the preview of any prior local file
    /// before the new preview is acquired.
    pub fn set_local(&mut self, index: usize, bytes: Vec<u8>, file_name: impl Into<String>) {
        self.vacate(index);
        let preview = self.previews.acquire(self.kind);
        self.slots[index] = MediaSlot::LocalFile(LocalMedia {
            bytes,
            file_name: file_name.into(),
            preview,
        });
    }

    pub fn set_remote(&mut self, index: usize, media: RemoteMedia) {
        self.vacate(index);
        self.slots[index] = MediaSlot::RemoteReference(media);
    }

    pub fn clear(&mut self, index: usize) {
        self.vacate(index);
    }

    pub fn get(&self, index: usize) -> &MediaSlot {
        self.check_index(index);
        &self.slots[index]
    }

    pub fn filled_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_filled()).count()
    }

    pub fn any_filled(&self) -> bool {
        self.slots.iter().any(MediaSlot::is_filled)
    }

    /// First slot holding a local file, with its index.
    pub fn first_local(&self) -> Option<(usize, &LocalMedia)> {
        self.slots.iter().enumerate().find_map(|(i, slot)| match slot {
            MediaSlot::LocalFile(local) => Some((i, local)),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &MediaSlot)> {
        self.slots.iter().enumerate()
    }

    fn vacate(&mut self, index: usize) {
        self.check_index(index);
        // Dropping the previous occupant releases its preview handle.
        drop(std::mem::take(&mut self.slots[index]));
    }

    fn check_index(&self, index: usize) {
        assert!(
            index < self.slots.len(),
            "{} slot index {index} out of range (capacity {})",
            self.kind,
            self.slots.len()
        );
    }
}

/// Image and audio slots for the active workflow.
#[derive(Debug)]
pub struct MediaSlotModel {
    images: MediaSlots,
    audio: MediaSlots,
}

impl MediaSlotModel {
    /// Empty model with no capacity (no workflow selected).
    pub fn empty(previews: Arc<PreviewStore>) -> Self {
        Self {
            images: MediaSlots::new(MediaKind::Image, 0, Arc::clone(&previews)),
            audio: MediaSlots::new(MediaKind::Audio, 0, previews),
        }
    }

    pub fn for_workflow(workflow: &Workflow, previews: Arc<PreviewStore>) -> Self {
        Self {
            images: MediaSlots::new(
                MediaKind::Image,
                workflow.required_image_slots,
                Arc::clone(&previews),
            ),
            audio: MediaSlots::new(MediaKind::Audio, workflow.required_audio_slots, previews),
        }
    }

    pub fn slots(&self, kind: MediaKind) -> &MediaSlots {
        match kind {
            MediaKind::Image => &self.images,
            MediaKind::Audio => &self.audio,
        }
    }

    pub fn slots_mut(&mut self, kind: MediaKind) -> &mut MediaSlots {
        match kind {
            MediaKind::Image => &mut self.images,
            MediaKind::Audio => &mut self.audio,
        }
    }

    pub fn images(&self) -> &MediaSlots {
        &self.images
    }

    pub fn audio(&self) -> &MediaSlots {
        &self.audio
    }

    /// True when any slot of either kind is occupied.
    pub fn has_media(&self) -> bool {
        self.images.any_filled() || self.audio.any_filled()
    }
}
