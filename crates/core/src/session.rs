//! The user's in-progress request: selected workflow, form fields and
//! attached media.

use std::sync::Arc;

use crate::form::FormState;
use crate::slots::{MediaSlotModel, PreviewStore};
use crate::workflow::Workflow;

#[derive(Debug)]
pub struct GenerationSession {
    workflow: Option<Workflow>,
    pub form: FormState,
    pub media: MediaSlotModel,
    previews: Arc<PreviewStore>,
}

impl GenerationSession {
    pub fn new(previews: Arc<PreviewStore>) -> Self {
        Self {
            workflow: None,
            form: FormState::new(),
            media: MediaSlotModel::empty(Arc::clone(&previews)),
            previews,
        }
    }

    pub fn workflow(&self) -> Option<&Workflow> {
        self.workflow.as_ref()
    }

    /// Switch workflows. All slots are discarded (releasing their previews)
    /// and reallocated to the new capacities; extra-field defaults are
    /// re-seeded.
    pub fn select_workflow(&mut self, workflow: Workflow) {
        self.form.reseed_defaults(self.workflow.as_ref(), &workflow);
        self.media = MediaSlotModel::for_workflow(&workflow, Arc::clone(&self.previews));
        self.workflow = Some(workflow);
    }

    pub fn previews(&self) -> &Arc<PreviewStore> {
        &self.previews
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::MediaKind;
    use crate::workflow::{ExtraField, WorkflowKind};

    #[test]
    fn switching_workflow_resizes_slots_and_releases_previews() {
        let store = PreviewStore::new();
        let mut session = GenerationSession::new(Arc::clone(&store));

        let mut first = Workflow::new("i2v", WorkflowKind::Video);
        first.required_image_slots = 2;
        session.select_workflow(first);
        session.media.slots_mut(MediaKind::Image).set_local(0, vec![1], "a.png");
        assert_eq!(store.live_count(), 1);

        let mut second = Workflow::new("tts", WorkflowKind::Audio);
        second.required_audio_slots = 1;
        second.extra_fields = vec![ExtraField {
            id: "voice".into(),
            default: json!("alto"),
        }];
        session.select_workflow(second);

        assert_eq!(store.live_count(), 0);
        assert_eq!(session.media.images().capacity(), 0);
        assert_eq!(session.media.audio().capacity(), 1);
        assert_eq!(session.form.get("voice"), Some(&json!("alto")));
        assert_eq!(session.workflow().map(|w| w.name.as_str()), Some("tts"));
    }
}
