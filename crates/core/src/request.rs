//! Generate request assembly.
//!
//! A request without attached media is sent as JSON. As soon as any slot
//! is occupied the request becomes multipart: each occupied slot adds a
//! binary part `{kind}_{index}` and text parts `{kind}_{index}_{field}`
//! for the metadata allow-list.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::form::{FormState, SEED_FIELD};
use crate::slots::{LocalMedia, RemoteMedia};
use crate::types::MediaKind;
use crate::workflow::{Orientation, Workflow};

/// Metadata fields forwarded for every attached slot, in addition to the
/// kind-specific [`MediaKind::format_field`].
pub const METADATA_FIELDS: &[&str] = &["description", "prompt", "summary", "tags", "name", "uid"];

pub const WORKFLOW_FIELD: &str = "workflow";
pub const ORIENTATION_FIELD: &str = "orientation";

/// Slot content with bytes in hand, ready for assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub kind: MediaKind,
    pub index: usize,
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub metadata: BTreeMap<String, String>,
}

impl ResolvedMedia {
    pub fn from_local(kind: MediaKind, index: usize, local: &LocalMedia) -> Self {
        Self {
            kind,
            index,
            bytes: local.bytes.clone(),
            file_name: local.file_name.clone(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn from_remote(kind: MediaKind, index: usize, remote: &RemoteMedia, bytes: Vec<u8>) -> Self {
        let metadata = METADATA_FIELDS
            .iter()
            .copied()
            .chain(std::iter::once(kind.format_field()))
            .filter_map(|field| remote.field_text(field).map(|text| (field.to_string(), text)))
            .collect();
        Self {
            kind,
            index,
            bytes,
            file_name: remote.file_name(),
            metadata,
        }
    }

    pub fn part_name(&self) -> String {
        part_name(self.kind, self.index)
    }
}

/// Binary part of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub name: String,
    pub file_name: String,
    pub mime: Option<&'static str>,
    pub bytes: Vec<u8>,
}

impl FilePart {
    pub fn new(name: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        Self {
            name: name.into(),
            mime: mime_for_file_name(&file_name),
            file_name,
            bytes,
        }
    }
}

/// Transport-neutral multipart body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartBody {
    pub text: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

impl MultipartBody {
    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.text
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn file(&self, name: &str) -> Option<&FilePart> {
        self.files.iter().find(|part| part.name == name)
    }
}

/// Body of a `POST /generate` request.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerateBody {
    Json(Value),
    Multipart(MultipartBody),
}

impl GenerateBody {
    pub fn is_multipart(&self) -> bool {
        matches!(self, GenerateBody::Multipart(_))
    }
}

pub fn part_name(kind: MediaKind, index: usize) -> String {
    format!("{}_{index}", kind.as_str())
}

/// Scalar request fields: every form field, then workflow name, seed and
/// the resolved orientation (which override same-named form fields).
pub fn request_fields(
    workflow: &Workflow,
    form: &FormState,
    orientation: Orientation,
) -> Map<String, Value> {
    let mut fields: Map<String, Value> = form
        .fields()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    fields.insert(WORKFLOW_FIELD.into(), Value::String(workflow.name.clone()));
    fields.insert(SEED_FIELD.into(), Value::from(form.seed()));
    fields.insert(
        ORIENTATION_FIELD.into(),
        Value::String(orientation.as_str().into()),
    );
    fields
}

/// Choose JSON or multipart and assemble the body.
pub fn build_generate_body(
    workflow: &Workflow,
    form: &FormState,
    orientation: Orientation,
    media: Vec<ResolvedMedia>,
) -> GenerateBody {
    let fields = request_fields(workflow, form, orientation);
    if media.is_empty() {
        return GenerateBody::Json(Value::Object(fields));
    }

    let mut body = MultipartBody {
        text: fields
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key, text_of(value)))
            .collect(),
        files: Vec::with_capacity(media.len()),
    };

    for item in media {
        let part = item.part_name();
        for (field, value) in &item.metadata {
            body.text.push((format!("{part}_{field}"), value.clone()));
        }
        body.files.push(FilePart::new(part, item.file_name, item.bytes));
    }

    GenerateBody::Multipart(body)
}

fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Best-effort MIME type from a file extension.
pub fn mime_for_file_name(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "wav" => Some("audio/wav"),
        "mp3" => Some("audio/mpeg"),
        "flac" => Some("audio/flac"),
        "ogg" => Some("audio/ogg"),
        "m4a" => Some("audio/mp4"),
        "mp4" => Some("video/mp4"),
        _ => None,
    }
}
