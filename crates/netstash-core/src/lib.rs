//! NetStash core — shared data model, error taxonomy, configuration,
//! and the trait seams the runner talks to collaborators through.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod traits;
pub mod types;

pub use config::NetStashConfig;
pub use error::{NetStashError, Result, SessionStage};
