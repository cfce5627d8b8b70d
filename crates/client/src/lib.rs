//! Network side of the mediagen client.
//!
//! Provides the REST API wrapper, server-sent-event progress streams, the
//! per-task channel registry, the progress presenter and the generation
//! orchestrator that ties them to the domain types in `mediagen-core`.

pub mod api;
pub mod config;
pub mod events;
pub mod messages;
pub mod orchestrator;
pub mod presenter;
pub mod processor;
pub mod registry;
pub mod sse;
pub mod stream;
