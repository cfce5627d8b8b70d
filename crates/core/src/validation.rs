//! Client-side submission gate.
//!
//! Rules are evaluated in a fixed order and the first violation wins, so
//! the user always sees exactly one message. Nothing here touches the
//! network.

use crate::form::FormState;
use crate::session::GenerationSession;
use crate::slots::MediaSlotModel;
use crate::workflow::Workflow;

/// A single, user-facing reason why a submission cannot proceed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please select a workflow first")]
    NoWorkflow,

    #[error("Please enter a prompt")]
    PromptRequired,

    #[error("Please enter a name")]
    NameRequired,

    #[error("More images needed: {filled} of {required} provided")]
    NotEnoughImages { required: usize, filled: usize },

    #[error("More audio needed: {filled} of {required} provided")]
    NotEnoughAudio { required: usize, filled: usize },

    #[error("This workflow detects orientation from an uploaded image; attach a local image file")]
    LocalImageRequired,

    #[error("Select at least one field to regenerate")]
    NoFieldsSelected,
}

/// Check a request against its workflow. Returns the workflow on success.
pub fn validate_submission<'a>(
    workflow: Option<&'a Workflow>,
    form: &FormState,
    media: &MediaSlotModel,
) -> Result<&'a Workflow, ValidationError> {
    let workflow = workflow.ok_or(ValidationError::NoWorkflow)?;

    if !workflow.prompt_optional && form.prompt().is_empty() {
        return Err(ValidationError::PromptRequired);
    }

    if workflow.name_required && form.name().is_empty() {
        return Err(ValidationError::NameRequired);
    }

    let filled = media.images().filled_count();
    if filled < workflow.required_image_slots {
        return Err(ValidationError::NotEnoughImages {
            required: workflow.required_image_slots,
            filled,
        });
    }

    let filled = media.audio().filled_count();
    if filled < workflow.required_audio_slots {
        return Err(ValidationError::NotEnoughAudio {
            required: workflow.required_audio_slots,
            filled,
        });
    }

    if workflow.detects_orientation() && media.images().first_local().is_none() {
        return Err(ValidationError::LocalImageRequired);
    }

    Ok(workflow)
}

pub fn validate_session(session: &GenerationSession) -> Result<&Workflow, ValidationError> {
    validate_submission(session.workflow(), &session.form, &session.media)
}
