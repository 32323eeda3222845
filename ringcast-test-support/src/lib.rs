//! Test helpers shared by the ringcast integration tests.
//!
//! - `verify` - payload integrity and ordering checks
//! - `chaos` - seeded delays and failures for consumers

pub mod chaos;
pub mod verify;

pub use chaos::{ChaosEvent, ChaosMonkey};
pub use verify::{payload, DataVerifier, SequenceChecker, SequenceStatus, VerifyResult};
