//! Configuration and parameters
//!
//! Shared constants, simulation parameters and engine settings.

pub mod constants;
pub mod params;

pub use constants::*;
pub use params::*;
