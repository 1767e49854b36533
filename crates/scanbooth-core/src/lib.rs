// SPDX-License-Identifier: MIT
//
// Scanbooth — core types, configuration, and error definitions shared
// across all crates.

pub mod config;
pub mod error;
pub mod geometry;
pub mod types;

pub use config::KioskConfig;
pub use error::KioskError;
pub use geometry::{CropRect, CropResult, Point, Quad};
pub use types::*;
