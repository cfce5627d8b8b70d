//! Workflow schema as declared by the backend (`GET /workflows`).
//!
//! A workflow is read-only to the client. Selecting one sizes the media
//! slots and seeds the form with the workflow's extra-field defaults.

use serde::{Deserialize, Serialize};

/// What a workflow produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Image,
    Video,
    Audio,
    Inpaint,
}

/// Whether the output orientation is declared up front or derived from the
/// first attached image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrientationPolicy {
    #[default]
    Fixed,
    Detect,
}

/// Output orientation sent with every generate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Portrait,
    #[default]
    Landscape,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
        }
    }
}

/// A workflow-specific form field and its default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraField {
    pub id: String,
    #[serde(default)]
    pub default: serde_json::Value,
}

/// Server-declared schema for one job template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub kind: WorkflowKind,
    #[serde(default, alias = "promptOptional")]
    pub prompt_optional: bool,
    #[serde(default, alias = "nameRequired")]
    pub name_required: bool,
    #[serde(default, alias = "requiredImageSlots")]
    pub required_image_slots: usize,
    #[serde(default, alias = "requiredAudioSlots")]
    pub required_audio_slots: usize,
    #[serde(default, alias = "orientationPolicy")]
    pub orientation_policy: OrientationPolicy,
    /// Orientation used verbatim when the policy is [`OrientationPolicy::Fixed`].
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default, alias = "extraFields")]
    pub extra_fields: Vec<ExtraField>,
}

impl Workflow {
    /// Minimal workflow with no media requirements and a fixed orientation.
    pub fn new(name: impl Into<String>, kind: WorkflowKind) -> Self {
        Self {
            name: name.into(),
            kind,
            prompt_optional: false,
            name_required: false,
            required_image_slots: 0,
            required_audio_slots: 0,
            orientation_policy: OrientationPolicy::Fixed,
            orientation: Orientation::Landscape,
            extra_fields: Vec::new(),
        }
    }

    pub fn detects_orientation(&self) -> bool {
        self.orientation_policy == OrientationPolicy::Detect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_backend_schema() {
        let json = r#"{
            "name": "portrait-animate",
            "kind": "video",
            "promptOptional": true,
            "required_image_slots": 2,
            "orientation_policy": "detect",
            "extra_fields": [{"id": "steps", "default": 30}, {"id": "style"}]
        }"#;
        let wf: Workflow = serde_json::from_str(json).unwrap();
        assert_eq!(wf.kind, WorkflowKind::Video);
        assert!(wf.prompt_optional);
        assert!(!wf.name_required);
        assert_eq!(wf.required_image_slots, 2);
        assert_eq!(wf.required_audio_slots, 0);
        assert!(wf.detects_orientation());
        assert_eq!(wf.extra_fields[0].default, serde_json::json!(30));
        assert!(wf.extra_fields[1].default.is_null());
    }

    #[test]
    fn fixed_policy_defaults_to_landscape() {
        let wf: Workflow = serde_json::from_str(r#"{"name":"t2i","kind":"image"}"#).unwrap();
        assert_eq!(wf.orientation_policy, OrientationPolicy::Fixed);
        assert_eq!(wf.orientation, Orientation::Landscape);
    }
}
