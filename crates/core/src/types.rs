use serde::{Deserialize, Serialize};

/// Server-assigned identifier of a generation, regeneration or upload task.
pub type TaskId = String;

/// Durable identifier of a stored media record.
pub type MediaUid = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// The kind of input media a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    /// Prefix used for multipart part names (`image_0`, `audio_1_prompt`).
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
        }
    }

    /// Kind-specific metadata field forwarded alongside each attached slot.
    pub fn format_field(self) -> &'static str {
        match self {
            MediaKind::Image => "image_format",
            MediaKind::Audio => "audio_format",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
