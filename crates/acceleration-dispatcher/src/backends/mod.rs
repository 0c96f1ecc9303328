//! Shipped backend implementations

pub mod simulated;

pub use simulated::SimulatedBackend;
