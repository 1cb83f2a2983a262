// FecWeave Core Library
//
// This library contains a groupwise systematic FEC codec for datagram
// streams, the finite-field and memory-pool machinery behind it, and the
// configuration and telemetry plumbing around it, consolidated into a
// single crate.

pub mod app_config;
pub mod error;
pub mod fec;
pub mod optimize;
pub mod telemetry;

pub use error::FecError;
pub use optimize::{CpuFeature, FeatureDetector};

/// Provides global access to detected CPU features.
pub fn cpu_features() -> &'static FeatureDetector {
    FeatureDetector::instance()
}
