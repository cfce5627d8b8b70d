//! Domain logic for the mediagen client.
//!
//! Everything in this crate is pure: workflow schemas, form state, the
//! bounded input-media slots, the submission validation gate, seed and
//! orientation policies, request body assembly and history reconciliation.
//! Network I/O lives in `mediagen-client`.

pub mod error;
pub mod form;
pub mod history;
pub mod orientation;
pub mod request;
pub mod seed;
pub mod session;
pub mod slots;
pub mod task;
pub mod types;
pub mod validation;
pub mod workflow;
