//! CQI-driven MCS tuner: samples link quality, decides on a median with a dead-band,
//! steps MCS within bounds and exposes the loop over HTTP.

pub mod advanced;
pub mod component_a;
pub mod component_b;
pub mod config;
pub mod error;
pub mod utils;
