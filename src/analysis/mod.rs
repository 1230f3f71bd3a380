// Analysis module - streaming pipeline from raw ECG samples to labeled beats
//
// This module hosts the complete analysis pipeline, driven one sample at a
// time with no internal concurrency:
//
//   filter -> detector -> (delay queue) -> downsample -> classifier
//                              |                            |
//                        noise estimate              templates, rhythm,
//                                                    dominant monitor,
//                                                    post-classifier
//
// Each component owns its buffers exclusively; only value types cross the
// boundaries. `pipeline::EcgAnalyzer` is the public entry point that wires
// everything together.

pub mod classifier;
pub mod detector;
pub mod dominant;
pub mod features;
pub mod filter;
pub mod matcher;
pub mod noise;
pub mod pipeline;
pub mod postclass;
pub mod rhythm;

use serde::{Deserialize, Serialize};

/// Morphology classification of a beat or template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeatClass {
    Normal,
    Pvc,
    Unknown,
}
