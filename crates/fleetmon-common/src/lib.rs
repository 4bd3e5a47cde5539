//! Shared data model for fleetmon agents.
//!
//! [`types`] holds the metric snapshot model every collector produces,
//! [`wire`] the JSON payloads exchanged with the collection service, and
//! [`error`] the per-source probe failure type.

pub mod error;
pub mod types;
pub mod wire;
