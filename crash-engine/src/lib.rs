pub mod engine;
pub mod error;
pub mod generator;
pub mod history;
pub mod ledger;
pub mod round;
pub mod types;

pub use engine::{CrashEngine, EngineConfig};
pub use error::{Error, Result};
