// ECG Analyzer - real-time single-lead QRS detection and beat classification
//
// Ingests one signed-integer sample at a time and emits, with bounded
// delay, the location of each detected QRS complex and a beat label in
// {NORMAL, PVC, UNKNOWN}. The crate owns no I/O; construct an analyzer per
// record and drive it sample by sample.

// Module declarations
pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod testing;

// Re-exports for convenience
pub use analysis::detector::QrsDetector;
pub use analysis::pipeline::EcgAnalyzer;
pub use analysis::BeatClass;
pub use api::{BeatAnnotation, BeatCode};
pub use config::AnalyzerConfig;
pub use error::AnalyzerError;
