//! Shared infrastructure pieces

pub mod gate;

pub use gate::{RequestGate, RequestGateConfig};
