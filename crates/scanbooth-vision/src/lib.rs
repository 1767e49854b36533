// SPDX-License-Identifier: MIT
//
// Scanbooth — geometric boundary detection and the crop/re-encode pipeline
// that turns raw scanner captures into deliverable JPEG artifacts.

pub mod detect;
pub mod pipeline;

pub use detect::{correct_perspective, detect_bounds, DEFAULT_THRESHOLD};
pub use pipeline::{process, ProcessedScan};
