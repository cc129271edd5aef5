//! poolgate core: domain models, error taxonomy and repository traits
//! shared by the persistence and gateway crates.

pub mod clock;
pub mod error;
pub mod models;
pub mod repository;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{PoolgateError, PoolgateResult};
