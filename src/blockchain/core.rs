// core.rs splits chain management from validation for easier maintenance.
pub mod chain;
pub mod validation;

pub use chain::*;
pub use validation::*;
