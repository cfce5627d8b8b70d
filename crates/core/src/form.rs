//! Form state consumed whole at submission time.
//!
//! Arbitrary fields are kept as JSON values. The seed is stored separately
//! as a `u32` so it can never hold an out-of-range value.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::CoreError;
use crate::workflow::Workflow;

pub const PROMPT_FIELD: &str = "prompt";
pub const NAME_FIELD: &str = "name";
pub const SEED_FIELD: &str = "seed";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormState {
    values: BTreeMap<String, Value>,
    seed: u32,
    seed_locked: bool,
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh form for a workflow with its extra-field defaults applied.
    pub fn for_workflow(workflow: &Workflow) -> Self {
        let mut form = Self::new();
        form.reseed_defaults(None, workflow);
        form
    }

    /// Replace the previous workflow's extra fields with the defaults of
    /// `next`. Prompt, name and seed survive a workflow switch.
    pub fn reseed_defaults(&mut self, previous: Option<&Workflow>, next: &Workflow) {
        if let Some(previous) = previous {
            for field in &previous.extra_fields {
                self.values.remove(&field.id);
            }
        }
        for field in &next.extra_fields {
            self.values.insert(field.id.clone(), field.default.clone());
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Set a single field. Writes to `seed` must carry an unsigned 32-bit
    /// integer (a number or a numeric string).
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> Result<(), CoreError> {
        let field = field.into();
        if field == SEED_FIELD {
            self.seed = parse_seed(&value)?;
            return Ok(());
        }
        self.values.insert(field, value);
        Ok(())
    }

    /// Set a field from text input. A seed that is not a `u32` is rejected
    /// and the previous seed kept.
    pub fn set_text(
        &mut self,
        field: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), CoreError> {
        self.set(field, Value::String(text.into()))
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.values.remove(field)
    }

    /// Prompt text, trimmed; empty when unset or not a string.
    pub fn prompt(&self) -> &str {
        self.text(PROMPT_FIELD)
    }

    pub fn name(&self) -> &str {
        self.text(NAME_FIELD)
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn set_seed(&mut self, seed: u32) {
        self.seed = seed;
    }

    pub fn seed_locked(&self) -> bool {
        self.seed_locked
    }

    pub fn set_seed_locked(&mut self, locked: bool) {
        self.seed_locked = locked;
    }

    /// All non-seed fields in stable (sorted) order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn text(&self, field: &str) -> &str {
        self.values
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("")
    }
}

fn parse_seed(value: &Value) -> Result<u32, CoreError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| CoreError::InvalidField {
            field: SEED_FIELD.to_string(),
            reason: format!("{value} is not an unsigned 32-bit integer"),
        })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::workflow::{ExtraField, WorkflowKind};

    fn workflow_with(fields: &[(&str, Value)]) -> Workflow {
        let mut wf = Workflow::new("wf", WorkflowKind::Image);
        wf.extra_fields = fields
            .iter()
            .map(|(id, default)| ExtraField {
                id: id.to_string(),
                default: default.clone(),
            })
            .collect();
        wf
    }

    #[test]
    fn seeds_extra_field_defaults() {
        let form = FormState::for_workflow(&workflow_with(&[("steps", json!(20))]));
        assert_eq!(form.get("steps"), Some(&json!(20)));
    }

    #[test]
    fn workflow_switch_replaces_extra_fields_but_keeps_prompt() {
        let first = workflow_with(&[("steps", json!(20))]);
        let second = workflow_with(&[("cfg", json!(7.5))]);
        let mut form = FormState::for_workflow(&first);
        form.set_text(PROMPT_FIELD, "a red fox").unwrap();

        form.reseed_defaults(Some(&first), &second);

        assert!(form.get("steps").is_none());
        assert_eq!(form.get("cfg"), Some(&json!(7.5)));
        assert_eq!(form.prompt(), "a red fox");
    }

    #[test]
    fn seed_accepts_u32_range_only() {
        let mut form = FormState::new();
        form.set(SEED_FIELD, json!(4_294_967_295u64)).unwrap();
        assert_eq!(form.seed(), u32::MAX);

        assert_matches!(
            form.set(SEED_FIELD, json!(4_294_967_296u64)),
            Err(CoreError::InvalidField { .. })
        );
        assert_matches!(form.set(SEED_FIELD, json!(-1)), Err(CoreError::InvalidField { .. }));
        assert_eq!(form.seed(), u32::MAX);
    }

    #[test]
    fn text_seed_is_parsed() {
        let mut form = FormState::new();
        form.set_text(SEED_FIELD, " 1234 ").unwrap();
        assert_eq!(form.seed(), 1234);
        assert_matches!(
            form.set_text(SEED_FIELD, "not a number"),
            Err(CoreError::InvalidField { .. })
        );
        assert_eq!(form.seed(), 1234);
    }

    #[test]
    fn prompt_is_trimmed() {
        let mut form = FormState::new();
        form.set_text(PROMPT_FIELD, "   ").unwrap();
        assert_eq!(form.prompt(), "");
    }
}
