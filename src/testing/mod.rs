//! Deterministic test-signal utilities.
//!
//! Modules in this namespace feed the analysis pipeline with reproducible
//! synthetic ECG streams, for the integration tests and the CLI harness,
//! without touching real recordings.

pub mod fixtures;
