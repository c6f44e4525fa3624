//! Domain layer - Driver contract and controller wire model
//!
//! `ports` defines the block-storage driver trait the facade implements;
//! `model` holds the controller's JSON representations.

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::*;
