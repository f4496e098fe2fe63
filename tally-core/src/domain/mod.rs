mod error;
pub mod hierarchy;
pub mod models;
pub mod ports;
pub mod reconcile;
pub mod services;
pub mod status_gate;

pub use error::*;
