//! Built-in source fetchers

pub mod simulated;

pub use simulated::SimulatedSource;
