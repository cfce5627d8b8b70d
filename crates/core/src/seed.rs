//! Seed policy applied right before a request is assembled.

use rand::Rng;

use crate::form::FormState;

/// Uniform random seed over the full `u32` range.
pub fn random_seed() -> u32 {
    rand::rng().random::<u32>()
}

/// Pick the seed for the next submission and write it back into the form,
/// so the UI shows the seed actually used.
///
/// A locked seed is reused unchanged.
pub fn apply_seed_policy(form: &mut FormState) -> u32 {
    if !form.seed_locked() {
        form.set_seed(random_seed());
    }
    form.seed()
}
